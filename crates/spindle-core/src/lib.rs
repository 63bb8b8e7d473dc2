//! spindle-core: the real-time mixing core of a two-deck DJ application
//!
//! Two decks play simultaneously, tempo-scaled so their beats coincide,
//! blended under an equal-power crossfader into one stereo stream. A
//! single audio callback drives the whole pipeline:
//!
//! ```text
//!   [Deck A]──┐
//!             ├──► [Mixer: crossfade + soft clip] ──► output device
//!   [Deck B]──┘
//!             ▲
//!             │ (per-callback tempo & phase update)
//!        [Sync manager]
//! ```
//!
//! [`engine::Engine`] is the entry point: it owns the decks, the mixer,
//! the sync manager and the output stream, and exposes the flat command
//! surface a host UI binds to.
//!
//! # Threading
//!
//! The audio thread runs the callback under a hard deadline: no
//! allocation, no logging, no blocking beyond short per-deck mutexes.
//! Control threads set parameters through atomics and talk to the
//! structural state (track, cursor, filter) through those same short
//! mutexes. Notifications flow back over a lock-free queue.

pub mod analysis;
pub mod audio;
pub mod decode;
pub mod engine;
pub mod eq;
pub mod timestretch;
pub mod types;

pub use engine::{Engine, EngineError, EngineResult, Status, SyncState};
pub use types::{AudioData, DeckId, Sample, StereoBuffer, StereoSample, NUM_DECKS};
