//! Mixer - crossfades the two decks into the master bus
//!
//! A single crossfader position in [0, 1] (0 = deck A only, 1 = deck B
//! only) drives an equal-power gain pair, followed by a soft clip that
//! keeps the summed program inside full scale without hard edges.
//!
//! The crossfader is written by any control thread and read by the audio
//! callback; it is a single f32 stored as atomic bits, no ordering beyond
//! eventual visibility is needed.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::{StereoBuffer, StereoSample, NUM_DECKS};

use super::deck::Deck;

/// Where the soft-clip knee leaves the linear region. Placed just under
/// full scale so an equal-power sweep of correlated program reads as
/// unity, while sustained overs still fold smoothly instead of cracking.
const CLIP_KNEE: f32 = 0.998;

/// Equal-power crossfade gains for a fader position in [0, 1]
///
/// The pair satisfies `g_a^2 + g_b^2 == 1` at every position.
#[inline]
pub fn equal_power_gains(position: f32) -> (f32, f32) {
    let angle = position.clamp(0.0, 1.0) * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Exponential soft clip
///
/// Identity below the knee; above it the signal folds toward ±1 along an
/// exponential with matched value and slope at the knee, so the curve is
/// continuous, monotonic, and never exceeds ±1.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    let magnitude = x.abs();
    if magnitude <= CLIP_KNEE {
        return x;
    }
    let knee = 1.0 - CLIP_KNEE;
    let folded = 1.0 - knee * (-(magnitude - CLIP_KNEE) / knee).exp();
    folded.copysign(x)
}

/// The two-deck mixer
pub struct Mixer {
    /// Crossfader position in [0, 1], stored as f32 bits
    crossfader: AtomicU32,
}

impl Mixer {
    /// Create a mixer with the crossfader centred
    pub fn new() -> Self {
        Self {
            crossfader: AtomicU32::new(0.5f32.to_bits()),
        }
    }

    /// Set the crossfader position (clamped to [0, 1])
    pub fn set_crossfader(&self, position: f32) {
        self.crossfader
            .store(position.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Current crossfader position
    pub fn crossfader(&self) -> f32 {
        f32::from_bits(self.crossfader.load(Ordering::Relaxed))
    }

    /// Pull one block from both decks and blend into `output`
    ///
    /// `scratch_a`/`scratch_b` are caller-owned pre-allocated buffers (the
    /// callback state owns them); they are resized to `output.len()`
    /// without allocating. Returns, per deck, whether that deck reached
    /// end of track during this block.
    ///
    /// Runs on the audio thread; does not allocate.
    pub fn mix(
        &self,
        deck_a: &Deck,
        deck_b: &Deck,
        scratch_a: &mut StereoBuffer,
        scratch_b: &mut StereoBuffer,
        output: &mut [StereoSample],
    ) -> [bool; NUM_DECKS] {
        let frames = output.len();
        scratch_a.set_len_from_capacity(frames);
        scratch_b.set_len_from_capacity(frames);

        let ended_a = deck_a.read(scratch_a.as_mut_slice());
        let ended_b = deck_b.read(scratch_b.as_mut_slice());

        let (gain_a, gain_b) = equal_power_gains(self.crossfader());

        let a = scratch_a.as_slice();
        let b = scratch_b.as_slice();
        for i in 0..frames {
            let mixed = a[i] * gain_a + b[i] * gain_b;
            output[i] = StereoSample::new(soft_clip(mixed.left), soft_clip(mixed.right));
        }

        [ended_a, ended_b]
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
