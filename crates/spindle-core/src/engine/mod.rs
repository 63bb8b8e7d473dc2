//! The mixing engine
//!
//! [`Engine`] owns the two decks, the mixer, the sync manager and the one
//! output stream, and exposes the flat command surface a host UI binds
//! to. Construction configures the engine; `start` opens the stream and
//! begins rendering; `stop` closes it. All commands are synchronous and
//! report errors eagerly, leaving the engine either fully applied or
//! unchanged. The audio path itself never fails: an empty or paused deck
//! contributes silence.

pub mod deck;
pub mod events;
pub mod mixer;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::analysis;
use crate::audio::{
    self, AudioConfig, AudioError, CallbackState, StreamHandle, MAX_BUFFER_SIZE,
};
use crate::decode::{self, DecodeError};
use crate::types::{DeckId, NUM_DECKS};

pub use deck::{Deck, DeckLoadError, DEFAULT_BPM};
pub use events::{EngineEvent, NotificationRegistry, Notifier, PositionCallback, TrackEndedCallback};
pub use mixer::{equal_power_gains, soft_clip, Mixer};
pub use sync::{SyncManager, SyncState};

/// Flat status codes for host-language bindings
///
/// Every [`EngineError`] maps onto one of these via
/// [`EngineError::status`]; `Ok` is the success value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotInitialized,
    AlreadyInitialized,
    InvalidArgument,
    NoDevice,
    DecodeFailed,
    InternalError,
}

/// Errors reported by the command surface
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("engine already started")]
    AlreadyStarted,

    #[error(transparent)]
    Load(#[from] DeckLoadError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl EngineError {
    /// The flat status code for this error
    pub fn status(&self) -> Status {
        match self {
            EngineError::InvalidArgument(_) | EngineError::Load(_) => Status::InvalidArgument,
            EngineError::AlreadyStarted => Status::AlreadyInitialized,
            EngineError::Decode(_) => Status::DecodeFailed,
            EngineError::Audio(
                AudioError::NoDevices
                | AudioError::NoDefaultDevice(_)
                | AudioError::DeviceNotFound(_)
                | AudioError::UnsupportedSampleRate { .. },
            ) => Status::NoDevice,
            EngineError::Audio(_) => Status::InternalError,
        }
    }
}

/// Result type for engine commands
pub type EngineResult<T> = Result<T, EngineError>;

/// The two-deck mixing engine
pub struct Engine {
    config: AudioConfig,
    decks: [Arc<Deck>; NUM_DECKS],
    mixer: Arc<Mixer>,
    sync: Arc<SyncManager>,
    registry: Arc<NotificationRegistry>,
    stream: Option<StreamHandle>,
    notifier: Option<Notifier>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine for the given sample rate and callback size
    pub fn new(sample_rate: u32, buffer_size: u32) -> EngineResult<Self> {
        Self::with_config(AudioConfig {
            sample_rate,
            buffer_size,
            device: None,
        })
    }

    /// Create an engine from a full audio configuration
    pub fn with_config(config: AudioConfig) -> EngineResult<Self> {
        if config.sample_rate == 0 {
            return Err(EngineError::InvalidArgument("sample rate must be positive"));
        }
        if config.buffer_size == 0 || config.buffer_size as usize > MAX_BUFFER_SIZE {
            return Err(EngineError::InvalidArgument("buffer size out of range"));
        }

        let rate = config.sample_rate;
        log::info!(
            "engine configured: {}Hz, {} frame callbacks",
            rate,
            config.buffer_size
        );

        Ok(Self {
            config,
            decks: [
                Arc::new(Deck::new(DeckId::new(0), rate)),
                Arc::new(Deck::new(DeckId::new(1), rate)),
            ],
            mixer: Arc::new(Mixer::new()),
            sync: Arc::new(SyncManager::new()),
            registry: Arc::new(NotificationRegistry::new()),
            stream: None,
            notifier: None,
        })
    }

    // --- Lifecycle ---

    /// Open the output stream and start rendering
    pub fn start(&mut self) -> EngineResult<()> {
        if self.stream.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        let device = match &self.config.device {
            Some(id) => audio::find_device(id)?,
            None => audio::preferred_output_device()?,
        };

        let (event_tx, event_rx) = events::event_channel();
        let state = CallbackState::new(
            [Arc::clone(&self.decks[0]), Arc::clone(&self.decks[1])],
            Arc::clone(&self.mixer),
            Arc::clone(&self.sync),
            event_tx,
            self.config.sample_rate,
        );

        let stream = audio::open_output_stream(&device, &self.config, state)?;
        self.notifier = Some(Notifier::spawn(event_rx, Arc::clone(&self.registry)));
        self.stream = Some(stream);

        log::info!("engine started");
        Ok(())
    }

    /// Stop rendering and close the stream
    ///
    /// Blocks until the driver has drained; pending notifications are
    /// delivered before this returns. Decks keep their tracks, cursors
    /// and parameters. Idempotent.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::info!("engine stopped");
        }
        // Dropping the notifier drains the queue and joins the thread
        self.notifier = None;
    }

    /// Tear the engine down completely
    pub fn shutdown(mut self) {
        self.stop();
        for deck in &self.decks {
            deck.unload();
        }
    }

    /// Whether the output stream is running
    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// The engine's sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// One-way output latency in milliseconds
    ///
    /// Reported uniformly from the opened stream; never baked into sync
    /// arithmetic.
    pub fn latency_ms(&self) -> f32 {
        match &self.stream {
            Some(stream) => stream.latency_ms(),
            None => self.config.latency_ms(),
        }
    }

    // --- Deck access ---

    /// A deck by id (0 or 1)
    pub fn deck(&self, deck_id: usize) -> EngineResult<&Arc<Deck>> {
        self.decks
            .get(deck_id)
            .ok_or(EngineError::InvalidArgument("unknown deck id"))
    }

    // --- Per-deck commands ---

    /// Decode a file and load it onto a deck
    ///
    /// On failure the deck keeps whatever it had before.
    pub fn load(&self, deck_id: usize, path: &Path) -> EngineResult<()> {
        let deck = self.deck(deck_id)?;
        let data = decode::decode_file(path)?;
        deck.load(data)?;
        Ok(())
    }

    pub fn unload(&self, deck_id: usize) -> EngineResult<()> {
        self.deck(deck_id)?.unload();
        Ok(())
    }

    pub fn play(&self, deck_id: usize) -> EngineResult<()> {
        self.deck(deck_id)?.play();
        Ok(())
    }

    /// Start `slave_deck` so its next downbeat meets the master's
    pub fn play_synced(&self, slave_deck: usize, master_deck: usize) -> EngineResult<()> {
        if slave_deck == master_deck {
            return Err(EngineError::InvalidArgument("deck cannot sync to itself"));
        }
        let slave = self.deck(slave_deck)?;
        let master = self.deck(master_deck)?;
        self.sync.play_synced(slave, master);
        Ok(())
    }

    pub fn pause(&self, deck_id: usize) -> EngineResult<()> {
        self.deck(deck_id)?.pause();
        Ok(())
    }

    pub fn stop_deck(&self, deck_id: usize) -> EngineResult<()> {
        self.deck(deck_id)?.stop();
        Ok(())
    }

    pub fn set_position(&self, deck_id: usize, seconds: f64) -> EngineResult<()> {
        self.deck(deck_id)?.seek_seconds(seconds);
        Ok(())
    }

    pub fn position(&self, deck_id: usize) -> EngineResult<f64> {
        Ok(self.deck(deck_id)?.position_seconds())
    }

    pub fn duration(&self, deck_id: usize) -> EngineResult<f64> {
        Ok(self.deck(deck_id)?.duration_seconds())
    }

    pub fn is_playing(&self, deck_id: usize) -> EngineResult<bool> {
        Ok(self.deck(deck_id)?.is_playing())
    }

    pub fn set_volume(&self, deck_id: usize, volume: f32) -> EngineResult<()> {
        self.deck(deck_id)?.set_volume(volume);
        Ok(())
    }

    pub fn set_tempo(&self, deck_id: usize, tempo: f64) -> EngineResult<()> {
        self.deck(deck_id)?.set_tempo(tempo);
        Ok(())
    }

    pub fn set_pitch(&self, deck_id: usize, semitones: f64) -> EngineResult<()> {
        self.deck(deck_id)?.set_pitch(semitones);
        Ok(())
    }

    pub fn set_bpm(&self, deck_id: usize, bpm: f64) -> EngineResult<()> {
        self.deck(deck_id)?.set_bpm(bpm);
        Ok(())
    }

    pub fn bpm(&self, deck_id: usize) -> EngineResult<f64> {
        Ok(self.deck(deck_id)?.bpm())
    }

    pub fn set_beat_offset(&self, deck_id: usize, seconds: f64) -> EngineResult<()> {
        self.deck(deck_id)?.set_beat_offset(seconds);
        Ok(())
    }

    pub fn beat_offset(&self, deck_id: usize) -> EngineResult<f64> {
        Ok(self.deck(deck_id)?.beat_offset())
    }

    pub fn set_eq_low(&self, deck_id: usize, gain: f32) -> EngineResult<()> {
        self.deck(deck_id)?.set_eq_low(gain);
        Ok(())
    }

    pub fn set_eq_mid(&self, deck_id: usize, gain: f32) -> EngineResult<()> {
        self.deck(deck_id)?.set_eq_mid(gain);
        Ok(())
    }

    pub fn set_eq_high(&self, deck_id: usize, gain: f32) -> EngineResult<()> {
        self.deck(deck_id)?.set_eq_high(gain);
        Ok(())
    }

    // --- Mixer ---

    /// Set the crossfader position (0 = deck A, 1 = deck B)
    pub fn set_crossfader(&self, position: f32) {
        self.mixer.set_crossfader(position);
    }

    /// Current crossfader position
    pub fn crossfader(&self) -> f32 {
        self.mixer.crossfader()
    }

    // --- Sync ---

    pub fn sync_enable(&self, slave_deck: usize, master_deck: usize) -> EngineResult<()> {
        if slave_deck == master_deck {
            return Err(EngineError::InvalidArgument("deck cannot sync to itself"));
        }
        self.deck(slave_deck)?;
        self.deck(master_deck)?;
        self.sync.enable(DeckId::new(slave_deck), DeckId::new(master_deck));
        Ok(())
    }

    pub fn sync_disable(&self, deck_id: usize) -> EngineResult<()> {
        self.deck(deck_id)?;
        self.sync.disable(DeckId::new(deck_id));
        Ok(())
    }

    /// One-shot tempo and phase alignment without starting playback
    pub fn sync_align_now(&self, slave_deck: usize, master_deck: usize) -> EngineResult<()> {
        if slave_deck == master_deck {
            return Err(EngineError::InvalidArgument("deck cannot sync to itself"));
        }
        let slave = self.deck(slave_deck)?;
        let master = self.deck(master_deck)?;
        self.sync.align_now(slave, master);
        Ok(())
    }

    /// Current sync slot state
    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    // --- Analysis hooks ---

    /// Estimate the BPM of the track loaded on a deck; 0.0 if empty or
    /// analysis fails
    pub fn analyze_bpm(&self, deck_id: usize) -> EngineResult<f64> {
        let deck = self.deck(deck_id)?;
        Ok(deck.track().map_or(0.0, |track| analysis::analyze_bpm(&track)))
    }

    /// Locate the first downbeat of the track loaded on a deck, given its
    /// BPM; 0.0 if empty
    pub fn analyze_beat_offset(&self, deck_id: usize, bpm: f64) -> EngineResult<f64> {
        let deck = self.deck(deck_id)?;
        Ok(deck
            .track()
            .map_or(0.0, |track| analysis::detect_beat_offset(&track, bpm)))
    }

    // --- Notifications ---

    /// Register the playhead callback `(deck, seconds)`, invoked roughly
    /// every 100 ms per deck while the engine runs. Delivered from the
    /// notifier thread, never the audio thread.
    pub fn set_position_callback(&self, callback: Option<PositionCallback>) {
        self.registry.set_position_callback(callback);
    }

    /// Register the end-of-track callback, delivered exactly once per
    /// play-through
    pub fn set_track_ended_callback(&self, callback: Option<TrackEndedCallback>) {
        self.registry.set_track_ended_callback(callback);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
