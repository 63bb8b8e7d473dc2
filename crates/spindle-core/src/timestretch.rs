//! Streaming tempo/pitch filter
//!
//! Wraps signalsmith-stretch behind a push/pull interface: the deck feeds
//! source chunks in, the filter buffers scaled output, and the deck draws
//! fixed-size blocks out. Tempo is the ratio of source frames consumed per
//! output frame (2.0 = double speed), pitch is a semitone transpose.
//!
//! `clear()` is called from short critical sections shared with the audio
//! thread and must not allocate; the output FIFO is pre-allocated and only
//! ever truncated there.

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use crate::types::{StereoBuffer, StereoSample};

/// Stereo processing
const CHANNELS: u32 = 2;

/// Tempo ratio bounds
pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 2.0;

/// Pitch bounds in semitones
pub const MAX_PITCH_SEMITONES: f64 = 12.0;

/// Identity thresholds: within 0.1% of unity tempo and 0.1 semitone the
/// deck bypasses the filter entirely
const TEMPO_IDENTITY_EPSILON: f64 = 0.001;
const PITCH_IDENTITY_EPSILON: f64 = 0.1;

/// Largest chunk a deck feeds per iteration
pub const FEED_CHUNK_FRAMES: usize = 4096;

/// One feed at minimum tempo doubles in length; headroom on top of that
const SCRATCH_CAPACITY: usize = FEED_CHUNK_FRAMES * 2 + 64;

/// Pending-output capacity: one maximal device request plus one maximal
/// feed's worth of output. Feeds stop once a request is satisfiable, so
/// the FIFO never grows past this and `extend` never reallocates.
const FIFO_CAPACITY: usize = 8192 + SCRATCH_CAPACITY;

/// Streaming time/pitch scaler for one deck
pub struct TempoFilter {
    stretch: Stretch,
    tempo: f64,
    pitch_semitones: f64,
    /// Scaled output waiting to be drawn
    fifo: VecDeque<StereoSample>,
    /// Pre-allocated output block for each feed
    scratch: StereoBuffer,
    /// Source frames fed since the last clear or tempo change
    fed_frames: u64,
    /// Output frames produced against `fed_frames`. Keeping absolute
    /// counters instead of a fractional carry stops rounding error from
    /// accumulating across feeds.
    produced_frames: u64,
}

impl TempoFilter {
    /// Create an identity filter for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let mut scratch = StereoBuffer::silence(SCRATCH_CAPACITY);
        scratch.set_len_from_capacity(0);
        Self {
            stretch: Stretch::preset_default(CHANNELS, sample_rate),
            tempo: 1.0,
            pitch_semitones: 0.0,
            fifo: VecDeque::with_capacity(FIFO_CAPACITY),
            scratch,
            fed_frames: 0,
            produced_frames: 0,
        }
    }

    /// Set the tempo ratio (source frames per output frame), clamped to
    /// [0.5, 2.0]. Takes effect on the next feed without clearing; the
    /// new ratio applies to input fed from here on.
    pub fn set_tempo(&mut self, tempo: f64) {
        let clamped = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        if clamped != self.tempo {
            self.tempo = clamped;
            self.fed_frames = 0;
            self.produced_frames = 0;
        }
    }

    /// Current tempo ratio
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Set the pitch transpose in semitones, clamped to [-12, +12]
    ///
    /// Called once per callback with the deck's atomic parameter, so an
    /// unchanged value must be a no-op.
    pub fn set_pitch(&mut self, semitones: f64) {
        let clamped = semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES);
        if clamped == self.pitch_semitones {
            return;
        }
        self.pitch_semitones = clamped;
        self.stretch
            .set_transpose_factor_semitones(clamped as f32, None);
    }

    /// Current pitch transpose in semitones
    pub fn pitch(&self) -> f64 {
        self.pitch_semitones
    }

    /// True when tempo and pitch are close enough to unity that the deck
    /// should read straight from the source, skipping the filter and its
    /// internal latency
    pub fn is_identity(&self) -> bool {
        (self.tempo - 1.0).abs() < TEMPO_IDENTITY_EPSILON
            && self.pitch_semitones.abs() < PITCH_IDENTITY_EPSILON
    }

    /// Number of output frames ready to be drawn
    pub fn available(&self) -> usize {
        self.fifo.len()
    }

    /// Push a chunk of source frames through the scaler
    pub fn feed(&mut self, input: &[StereoSample]) {
        if input.is_empty() {
            return;
        }

        self.fed_frames += input.len() as u64;
        let target = (self.fed_frames as f64 / self.tempo).floor() as u64;
        let out_frames = (target.saturating_sub(self.produced_frames) as usize)
            .min(SCRATCH_CAPACITY);
        self.produced_frames += out_frames as u64;
        if out_frames == 0 {
            return;
        }

        self.scratch.set_len_from_capacity(out_frames);
        self.scratch.fill_silence();

        // Zero-copy: [StereoSample] reinterprets as interleaved [f32]
        let input_interleaved: &[f32] = bytemuck::cast_slice(input);
        self.stretch
            .process(input_interleaved, self.scratch.as_interleaved_mut());

        self.fifo.extend(self.scratch.as_slice().iter().copied());
    }

    /// Draw up to `dest.len()` frames of scaled output; returns the number
    /// of frames written
    pub fn receive(&mut self, dest: &mut [StereoSample]) -> usize {
        let n = dest.len().min(self.fifo.len());
        for slot in dest.iter_mut().take(n) {
            // n <= fifo.len(), pop cannot fail
            *slot = self.fifo.pop_front().unwrap_or_default();
        }
        n
    }

    /// Discard all buffered output and internal scaler state
    ///
    /// Does not allocate: the FIFO keeps its capacity.
    pub fn clear(&mut self) {
        self.stretch.reset();
        self.fifo.clear();
        self.fed_frames = 0;
        self.produced_frames = 0;
    }

    /// Total scaler latency in frames (input + output side)
    pub fn latency_frames(&self) -> usize {
        self.stretch.input_latency() + self.stretch.output_latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_detection() {
        let mut filter = TempoFilter::new(44100);
        assert!(filter.is_identity());

        filter.set_tempo(1.0005);
        assert!(filter.is_identity());

        filter.set_tempo(1.05);
        assert!(!filter.is_identity());

        filter.set_tempo(1.0);
        filter.set_pitch(3.0);
        assert!(!filter.is_identity());
    }

    #[test]
    fn tempo_and_pitch_are_clamped() {
        let mut filter = TempoFilter::new(44100);
        filter.set_tempo(5.0);
        assert_eq!(filter.tempo(), MAX_TEMPO);
        filter.set_tempo(0.1);
        assert_eq!(filter.tempo(), MIN_TEMPO);

        filter.set_pitch(24.0);
        assert_eq!(filter.pitch(), MAX_PITCH_SEMITONES);
        filter.set_pitch(-24.0);
        assert_eq!(filter.pitch(), -MAX_PITCH_SEMITONES);
    }

    #[test]
    fn feed_produces_scaled_output_count() {
        let mut filter = TempoFilter::new(44100);
        filter.set_tempo(2.0);

        let input = vec![StereoSample::mono(0.1); FEED_CHUNK_FRAMES];
        filter.feed(&input);
        assert_eq!(filter.available(), FEED_CHUNK_FRAMES / 2);

        filter.clear();
        filter.set_tempo(0.5);
        filter.feed(&input);
        assert_eq!(filter.available(), FEED_CHUNK_FRAMES * 2);
    }

    #[test]
    fn fractional_frames_carry_between_feeds() {
        let mut filter = TempoFilter::new(44100);
        filter.set_tempo(1.5);

        // 1000 / 1.5 = 666.67 per feed; over three feeds exactly 2000
        for _ in 0..3 {
            filter.feed(&vec![StereoSample::silence(); 1000]);
        }
        assert_eq!(filter.available(), 2000);
    }

    #[test]
    fn receive_drains_fifo() {
        let mut filter = TempoFilter::new(44100);
        filter.feed(&vec![StereoSample::mono(0.2); 1024]);
        let available = filter.available();
        assert_eq!(available, 1024);

        let mut dest = vec![StereoSample::silence(); 256];
        assert_eq!(filter.receive(&mut dest), 256);
        assert_eq!(filter.available(), available - 256);

        filter.clear();
        assert_eq!(filter.available(), 0);
        assert_eq!(filter.receive(&mut dest), 0);
    }
}
