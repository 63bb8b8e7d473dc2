//! Deck - one playback unit
//!
//! A deck owns an optional decoded track, a source frame cursor, a
//! streaming tempo/pitch filter, a three-band EQ and a volume fader.
//! `read()` always fills the caller's buffer completely (silence past end
//! of track) so the mixer can rely on fixed-length blocks.
//!
//! # Concurrency
//!
//! Two kinds of state, per the engine's threading model:
//!
//! - Scalar parameters (volume, EQ, tempo, pitch, BPM, beat offset, the
//!   playing flag, the cursor) live in [`DeckParams`] as atomics. Control
//!   threads write them without locking; the audio thread reads them at
//!   the top of each `read()`. A one-callback lag on a gain change is
//!   fine.
//! - Structural state (the loaded track, the filter, the EQ memory) lives
//!   behind a short-held mutex shared by `read()` and the control-side
//!   operations that must be atomic with respect to it: `load`, `seek`,
//!   `play_from`, `align_to_frame`. Those critical sections are a handful
//!   of scalar writes plus a non-allocating filter clear.
//!
//! The cursor is stored atomically so UI threads can poll the position
//! lock-free, but it is only ever *written* while the state mutex is held.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::eq::ThreeBandEq;
use crate::timestretch::{TempoFilter, FEED_CHUNK_FRAMES, MAX_TEMPO, MIN_TEMPO};
use crate::types::{AudioData, DeckId, StereoSample};

/// Nominal BPM before a track has been analyzed
pub const DEFAULT_BPM: f64 = 120.0;

/// Lock-free deck parameters (f32/f64 values stored as atomic bits)
pub struct DeckParams {
    playing: AtomicBool,
    /// Next source frame to feed the tempo filter. Written only under the
    /// deck's state mutex; read freely.
    position: AtomicI64,
    /// Total frames of the loaded track, 0 when empty
    total_frames: AtomicU64,
    volume: AtomicU32,
    eq_low: AtomicU32,
    eq_mid: AtomicU32,
    eq_high: AtomicU32,
    tempo: AtomicU64,
    pitch: AtomicU64,
    bpm: AtomicU64,
    beat_offset: AtomicU64,
}

#[inline]
fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

#[inline]
fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

#[inline]
fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

#[inline]
fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

impl DeckParams {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            position: AtomicI64::new(0),
            total_frames: AtomicU64::new(0),
            volume: AtomicU32::new(1.0f32.to_bits()),
            eq_low: AtomicU32::new(1.0f32.to_bits()),
            eq_mid: AtomicU32::new(1.0f32.to_bits()),
            eq_high: AtomicU32::new(1.0f32.to_bits()),
            tempo: AtomicU64::new(1.0f64.to_bits()),
            pitch: AtomicU64::new(0.0f64.to_bits()),
            bpm: AtomicU64::new(DEFAULT_BPM.to_bits()),
            beat_offset: AtomicU64::new(0.0f64.to_bits()),
        }
    }
}

/// State shared between `read()` and the serialized control operations
struct DeckState {
    track: Option<Arc<AudioData>>,
    filter: TempoFilter,
    eq: ThreeBandEq,
}

/// A single deck
pub struct Deck {
    id: DeckId,
    sample_rate: u32,
    params: DeckParams,
    state: Mutex<DeckState>,
}

/// Error from [`Deck::load`]
#[derive(Debug, thiserror::Error)]
pub enum DeckLoadError {
    #[error("track rate {track}Hz does not match engine rate {engine}Hz; resample upstream")]
    SampleRateMismatch { track: u32, engine: u32 },
}

impl Deck {
    /// Create an empty deck for the given engine sample rate
    pub fn new(id: DeckId, sample_rate: u32) -> Self {
        Self {
            id,
            sample_rate,
            params: DeckParams::new(),
            state: Mutex::new(DeckState {
                track: None,
                filter: TempoFilter::new(sample_rate),
                eq: ThreeBandEq::new(sample_rate),
            }),
        }
    }

    /// This deck's identifier
    pub fn id(&self) -> DeckId {
        self.id
    }

    /// The engine sample rate this deck runs at
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // --- Track lifecycle ---

    /// Load a decoded track, replacing any current one
    ///
    /// The deck is left paused with the cursor at zero and the filter
    /// cleared. Fails if the track's rate does not match the engine rate.
    pub fn load(&self, track: AudioData) -> Result<(), DeckLoadError> {
        if track.sample_rate() != self.sample_rate {
            return Err(DeckLoadError::SampleRateMismatch {
                track: track.sample_rate(),
                engine: self.sample_rate,
            });
        }

        // A playing deck pauses before its buffer is swapped
        self.params.playing.store(false, Ordering::Relaxed);

        let frames = track.frames();
        let mut state = self.lock_state();
        state.track = Some(Arc::new(track));
        state.filter.clear();
        state.eq.reset();
        self.params.position.store(0, Ordering::Relaxed);
        self.params.total_frames.store(frames, Ordering::Relaxed);

        log::info!("deck {}: loaded track ({} frames)", self.id, frames);
        Ok(())
    }

    /// Drop the loaded track and reset playback state
    pub fn unload(&self) {
        self.params.playing.store(false, Ordering::Relaxed);
        let mut state = self.lock_state();
        state.track = None;
        state.filter.clear();
        state.eq.reset();
        self.params.position.store(0, Ordering::Relaxed);
        self.params.total_frames.store(0, Ordering::Relaxed);
    }

    /// Whether a track is loaded
    pub fn is_loaded(&self) -> bool {
        self.params.total_frames.load(Ordering::Relaxed) > 0
    }

    /// Shared handle to the loaded audio (for the analysis hooks)
    pub fn track(&self) -> Option<Arc<AudioData>> {
        self.lock_state().track.clone()
    }

    // --- Transport ---

    /// Resume playback from the current cursor
    pub fn play(&self) {
        if self.is_loaded() {
            self.params.playing.store(true, Ordering::Relaxed);
        }
    }

    /// Set the cursor and start playing, atomically with respect to `read`
    ///
    /// The new cursor and the cleared filter become visible to the audio
    /// thread together, never one without the other.
    pub fn play_from(&self, start_frame: i64) {
        let mut state = self.lock_state();
        if state.track.is_none() {
            return;
        }
        let clamped = self.clamp_frame(start_frame);
        self.params.position.store(clamped, Ordering::Relaxed);
        state.filter.clear();
        self.params.playing.store(true, Ordering::Relaxed);
    }

    /// Pause, leaving the cursor in place
    pub fn pause(&self) {
        self.params.playing.store(false, Ordering::Relaxed);
    }

    /// Stop: pause, rewind to zero, clear the filter
    pub fn stop(&self) {
        self.params.playing.store(false, Ordering::Relaxed);
        let mut state = self.lock_state();
        self.params.position.store(0, Ordering::Relaxed);
        state.filter.clear();
    }

    /// Whether the deck is currently playing
    pub fn is_playing(&self) -> bool {
        self.params.playing.load(Ordering::Relaxed)
    }

    /// Seek to a position in seconds
    ///
    /// In-flight filtered samples are discarded; a click here is expected.
    pub fn seek_seconds(&self, seconds: f64) {
        let frame = (seconds * self.sample_rate as f64).round() as i64;
        self.align_to_frame(frame);
    }

    /// Set the source cursor directly and clear the filter (seek/align path)
    pub fn align_to_frame(&self, frame: i64) {
        let mut state = self.lock_state();
        if state.track.is_none() {
            return;
        }
        let clamped = self.clamp_frame(frame);
        self.params.position.store(clamped, Ordering::Relaxed);
        state.filter.clear();
    }

    /// Nudge the cursor by a small delta without clearing the filter
    ///
    /// Used by the steady-state phase corrector. Skips (returns false)
    /// when the state lock is contended, i.e. a seek or align is in
    /// flight on a control thread.
    pub fn try_nudge(&self, delta_frames: i64) -> bool {
        let Ok(state) = self.state.try_lock() else {
            return false;
        };
        if state.track.is_none() {
            return false;
        }
        let current = self.params.position.load(Ordering::Relaxed);
        let nudged = self.clamp_frame(current + delta_frames);
        self.params.position.store(nudged, Ordering::Relaxed);
        true
    }

    /// Current source cursor in frames
    pub fn sample_position(&self) -> i64 {
        self.params.position.load(Ordering::Relaxed)
    }

    /// Current position in seconds
    pub fn position_seconds(&self) -> f64 {
        self.sample_position() as f64 / self.sample_rate as f64
    }

    /// Duration of the loaded track in seconds (0.0 when empty)
    pub fn duration_seconds(&self) -> f64 {
        self.params.total_frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    // --- Parameters ---

    /// Set the channel volume, clamped to [0, 1]
    pub fn set_volume(&self, volume: f32) {
        store_f32(&self.params.volume, volume.clamp(0.0, 1.0));
    }

    /// Current channel volume
    pub fn volume(&self) -> f32 {
        load_f32(&self.params.volume)
    }

    /// Set the tempo ratio, clamped to [0.5, 2.0]; picked up by the filter
    /// on the next read without clearing
    pub fn set_tempo(&self, tempo: f64) {
        store_f64(&self.params.tempo, tempo.clamp(MIN_TEMPO, MAX_TEMPO));
    }

    /// Current tempo ratio
    pub fn tempo(&self) -> f64 {
        load_f64(&self.params.tempo)
    }

    /// Set the pitch transpose in semitones, clamped to [-12, +12]
    pub fn set_pitch(&self, semitones: f64) {
        store_f64(&self.params.pitch, semitones.clamp(-12.0, 12.0));
    }

    /// Current pitch transpose
    pub fn pitch(&self) -> f64 {
        load_f64(&self.params.pitch)
    }

    /// Set the nominal track BPM (ignored unless positive)
    pub fn set_bpm(&self, bpm: f64) {
        if bpm > 0.0 {
            store_f64(&self.params.bpm, bpm);
        } else {
            log::debug!("deck {}: ignoring non-positive bpm {}", self.id, bpm);
        }
    }

    /// Nominal track BPM
    pub fn bpm(&self) -> f64 {
        load_f64(&self.params.bpm)
    }

    /// Set the first-downbeat offset in seconds (clamped to >= 0)
    pub fn set_beat_offset(&self, seconds: f64) {
        store_f64(&self.params.beat_offset, seconds.max(0.0));
    }

    /// First-downbeat offset in seconds
    pub fn beat_offset(&self) -> f64 {
        load_f64(&self.params.beat_offset)
    }

    /// Set the low EQ band gain, clamped to [0, 2]
    pub fn set_eq_low(&self, gain: f32) {
        store_f32(&self.params.eq_low, gain.clamp(0.0, 2.0));
    }

    /// Set the mid EQ band gain, clamped to [0, 2]
    pub fn set_eq_mid(&self, gain: f32) {
        store_f32(&self.params.eq_mid, gain.clamp(0.0, 2.0));
    }

    /// Set the high EQ band gain, clamped to [0, 2]
    pub fn set_eq_high(&self, gain: f32) {
        store_f32(&self.params.eq_high, gain.clamp(0.0, 2.0));
    }

    // --- Beat grid ---

    /// Frames per beat at the nominal BPM, or 0 if the BPM is unusable
    pub fn frames_per_beat(&self) -> i64 {
        let bpm = self.bpm();
        if bpm <= 0.0 {
            return 0;
        }
        (60.0 * self.sample_rate as f64 / bpm).round() as i64
    }

    /// Beat phase in [0, 1): fractional position within the current beat,
    /// measured on the beat grid defined by BPM and beat offset
    pub fn phase(&self) -> f64 {
        let fpb = self.frames_per_beat();
        if fpb <= 0 {
            return 0.0;
        }
        let offset_frames = (self.beat_offset() * self.sample_rate as f64).round() as i64;
        let adjusted = self.sample_position() - offset_frames;
        adjusted.rem_euclid(fpb) as f64 / fpb as f64
    }

    // --- Audio ---

    /// Fill `dest` with the next block of processed audio
    ///
    /// Always writes `dest.len()` frames; anything the track cannot cover
    /// is silence. Returns true when the deck reached end of track during
    /// this call (it transitions to paused exactly once per play-through).
    ///
    /// Runs on the audio thread. The state lock is held for the duration
    /// of the block; control-side holders of the same lock only ever keep
    /// it for a few scalar writes.
    pub fn read(&self, dest: &mut [StereoSample]) -> bool {
        dest.fill(StereoSample::silence());

        if !self.is_playing() {
            return false;
        }

        let mut state = self.lock_state();
        let Some(track) = state.track.clone() else {
            return false;
        };

        // Pick up parameter changes since the last block
        let tempo = self.tempo();
        let pitch = self.pitch();
        state.filter.set_tempo(tempo);
        state.filter.set_pitch(pitch);

        let total = track.frames() as i64;
        let mut ended = false;

        let produced = if state.filter.is_identity() {
            // Fast path: read straight from the source so the filter's
            // internal latency cannot perturb beat phase
            let cursor = self.params.position.load(Ordering::Relaxed);
            let remaining = (total - cursor).max(0) as usize;
            let n = dest.len().min(remaining);
            let start = cursor as usize;
            dest[..n].copy_from_slice(&track.as_slice()[start..start + n]);
            self.params.position.store(cursor + n as i64, Ordering::Relaxed);
            if n < dest.len() {
                ended = true;
            }
            n
        } else {
            // Filtered path: keep the scaler fed a chunk at a time until
            // it can cover the block, then draw the block out
            loop {
                if state.filter.available() >= dest.len() {
                    break;
                }
                let cursor = self.params.position.load(Ordering::Relaxed);
                let remaining = (total - cursor).max(0) as usize;
                if remaining == 0 {
                    break;
                }
                let chunk = remaining.min(FEED_CHUNK_FRAMES);
                let start = cursor as usize;
                state.filter.feed(&track.as_slice()[start..start + chunk]);
                self.params.position.store(cursor + chunk as i64, Ordering::Relaxed);
            }

            let n = state.filter.receive(dest);
            let cursor = self.params.position.load(Ordering::Relaxed);
            if n < dest.len() && cursor >= total {
                ended = true;
            }
            n
        };

        if ended {
            self.params.playing.store(false, Ordering::Relaxed);
        }

        self.apply_eq_and_volume(&mut state, dest, produced);
        ended
    }

    /// Apply the channel EQ and volume fader to the produced frames
    ///
    /// Skipped entirely at flat EQ and unity volume so the fast path stays
    /// bit-identical to the source.
    fn apply_eq_and_volume(&self, state: &mut DeckState, dest: &mut [StereoSample], produced: usize) {
        state.eq.set_gains(
            load_f32(&self.params.eq_low),
            load_f32(&self.params.eq_mid),
            load_f32(&self.params.eq_high),
        );

        let volume = self.volume();
        let frames = &mut dest[..produced];

        if !state.eq.is_identity() {
            state.eq.process(frames);
        }
        if volume != 1.0 {
            for frame in frames.iter_mut() {
                *frame *= volume;
            }
        }
    }

    fn clamp_frame(&self, frame: i64) -> i64 {
        let total = self.params.total_frames.load(Ordering::Relaxed) as i64;
        frame.clamp(0, total)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DeckState> {
        // Lock poisoning cannot leave the deck inconsistent: every
        // critical section is a few scalar writes. Recover the guard.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoBuffer;

    const RATE: u32 = 44100;

    fn tone_track(frames: usize) -> AudioData {
        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                StereoSample::mono((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5)
            })
            .collect();
        AudioData::new(samples, RATE)
    }

    #[test]
    fn empty_deck_reads_silence() {
        let deck = Deck::new(DeckId::new(0), RATE);
        let mut buf = vec![StereoSample::mono(0.7); 512];

        assert!(!deck.read(&mut buf));
        assert!(buf.iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn paused_deck_reads_silence_and_keeps_cursor() {
        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(tone_track(RATE as usize)).unwrap();
        deck.seek_seconds(0.5);
        let cursor = deck.sample_position();

        let mut buf = vec![StereoSample::silence(); 512];
        assert!(!deck.read(&mut buf));
        assert_eq!(deck.sample_position(), cursor);
    }

    #[test]
    fn load_rejects_rate_mismatch() {
        let deck = Deck::new(DeckId::new(0), RATE);
        let track = AudioData::new(vec![StereoSample::silence(); 1000], 48000);
        assert!(matches!(
            deck.load(track),
            Err(DeckLoadError::SampleRateMismatch { track: 48000, engine: RATE })
        ));
        assert!(!deck.is_loaded());
    }

    #[test]
    fn fast_path_is_bit_identical() {
        let track = tone_track(RATE as usize);
        let expected: Vec<StereoSample> = track.as_slice()[1000..1512].to_vec();

        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(track).unwrap();
        deck.play_from(1000);

        let mut buf = vec![StereoSample::silence(); 512];
        deck.read(&mut buf);
        assert_eq!(buf, expected);
        assert_eq!(deck.sample_position(), 1512);
    }

    #[test]
    fn cursor_stays_in_range() {
        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(tone_track(RATE as usize)).unwrap();

        deck.seek_seconds(-5.0);
        assert_eq!(deck.sample_position(), 0);

        deck.seek_seconds(1e6);
        assert_eq!(deck.sample_position(), RATE as i64);

        deck.play_from(-100);
        assert_eq!(deck.sample_position(), 0);

        deck.stop();
        assert_eq!(deck.sample_position(), 0);
        assert!(!deck.is_playing());
    }

    #[test]
    fn end_of_track_pauses_once() {
        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(tone_track(1000)).unwrap();
        deck.play();

        let mut buf = vec![StereoSample::silence(); 512];
        assert!(!deck.read(&mut buf));
        // Second block crosses the end: partial audio, silent tail, ended
        assert!(deck.read(&mut buf));
        assert!(!deck.is_playing());
        assert_eq!(buf[488], StereoSample::silence());

        // Further reads are silent and do not re-report the end
        assert!(!deck.read(&mut buf));
    }

    #[test]
    fn volume_scales_output() {
        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(tone_track(4096)).unwrap();
        deck.set_volume(0.5);
        deck.play();

        let mut buf = vec![StereoSample::silence(); 256];
        deck.read(&mut buf);
        let peak = buf.iter().map(|s| s.peak()).fold(0.0f32, f32::max);
        assert!(peak <= 0.26, "peak {} not scaled", peak);
        assert!(peak > 0.0);
    }

    #[test]
    fn filtered_path_fills_whole_buffer() {
        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(tone_track(RATE as usize)).unwrap();
        deck.set_tempo(1.25);
        deck.play();

        // The scaler's startup latency can span several blocks; audio
        // must appear within the first few thousand frames
        let mut buf = StereoBuffer::silence(512);
        let mut peak = 0.0f32;
        for _ in 0..30 {
            deck.read(buf.as_mut_slice());
            peak = peak.max(buf.peak());
        }
        // Tempo != 1 runs the scaler; the cursor advances in source frames
        assert!(deck.sample_position() > 0);
        assert!(peak > 0.0);
    }

    #[test]
    fn phase_follows_beat_grid() {
        let deck = Deck::new(DeckId::new(0), RATE);
        deck.load(tone_track(RATE as usize * 4)).unwrap();
        deck.set_bpm(120.0);
        deck.set_beat_offset(0.0);

        // 120 BPM at 44100 -> 22050 frames per beat
        assert_eq!(deck.frames_per_beat(), 22050);

        deck.align_to_frame(11025);
        assert!((deck.phase() - 0.5).abs() < 1e-9);

        deck.set_beat_offset(0.25);
        // offset = 11025 frames, so the cursor sits exactly on a beat
        assert!(deck.phase() < 1e-9);
    }

    #[test]
    fn params_clamp() {
        let deck = Deck::new(DeckId::new(1), RATE);
        deck.set_volume(3.0);
        assert_eq!(deck.volume(), 1.0);
        deck.set_tempo(9.0);
        assert_eq!(deck.tempo(), 2.0);
        deck.set_pitch(-30.0);
        assert_eq!(deck.pitch(), -12.0);
        deck.set_bpm(-4.0);
        assert_eq!(deck.bpm(), DEFAULT_BPM);
        deck.set_beat_offset(-1.0);
        assert_eq!(deck.beat_offset(), 0.0);
    }
}
