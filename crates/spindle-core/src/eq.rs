//! Three-band EQ
//!
//! A per-deck channel EQ: low shelf at 100 Hz, peaking band at 1 kHz, high
//! shelf at 10 kHz, run in series on each channel. Band gains are linear in
//! [0, 2] with unity = 1. At unity every stage collapses to passthrough
//! coefficients, so the flat setting is a bit-exact identity.

use crate::types::StereoSample;

/// EQ band centers
const EQ_LOW_FREQ: f32 = 100.0;
const EQ_MID_FREQ: f32 = 1000.0;
const EQ_HIGH_FREQ: f32 = 10_000.0;
const EQ_MID_Q: f32 = 0.7;

/// Gains below this are treated as a band kill
const KILL_THRESHOLD: f32 = 0.01;
const KILL_DB: f32 = -60.0;

/// Biquad filter coefficients (direct form 1, a0 normalized out)
#[derive(Debug, Clone, PartialEq)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    /// Low shelf boost/cut at `freq`
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / 0.9 - 1.0) + 2.0).sqrt();

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha) / a0,
        }
    }

    /// Peaking band at `freq` with quality `q`
    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// High shelf boost/cut at `freq`
    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / 0.9 - 1.0) + 2.0).sqrt();

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha) / a0,
        }
    }

    /// Unity gain, no filtering
    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    fn is_passthrough(&self) -> bool {
        *self == Self::passthrough()
    }
}

/// Biquad state for one stereo stage
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1_l: f32,
    x2_l: f32,
    y1_l: f32,
    y2_l: f32,
    x1_r: f32,
    x2_r: f32,
    y1_r: f32,
    y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, coeffs: &BiquadCoeffs) -> (f32, f32) {
        let out_l = coeffs.b0 * input_l + coeffs.b1 * self.x1_l + coeffs.b2 * self.x2_l
            - coeffs.a1 * self.y1_l
            - coeffs.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = coeffs.b0 * input_r + coeffs.b1 * self.x1_r + coeffs.b2 * self.x2_r
            - coeffs.a1 * self.y1_r
            - coeffs.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Convert a linear band gain in [0, 2] to dB
///
/// 1.0 maps to exactly 0 dB, 2.0 to +6 dB, anything under the kill
/// threshold to -60 dB.
fn gain_to_db(gain: f32) -> f32 {
    let gain = gain.clamp(0.0, 2.0);
    if gain < KILL_THRESHOLD {
        KILL_DB
    } else {
        (20.0 * gain.log10()).max(KILL_DB)
    }
}

/// Three-band series EQ for one deck
pub struct ThreeBandEq {
    sample_rate: f32,
    low_gain: f32,
    mid_gain: f32,
    high_gain: f32,
    low_coeffs: BiquadCoeffs,
    mid_coeffs: BiquadCoeffs,
    high_coeffs: BiquadCoeffs,
    low_state: BiquadState,
    mid_state: BiquadState,
    high_state: BiquadState,
}

impl ThreeBandEq {
    /// Create a flat EQ for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            low_gain: 1.0,
            mid_gain: 1.0,
            high_gain: 1.0,
            low_coeffs: BiquadCoeffs::passthrough(),
            mid_coeffs: BiquadCoeffs::passthrough(),
            high_coeffs: BiquadCoeffs::passthrough(),
            low_state: BiquadState::default(),
            mid_state: BiquadState::default(),
            high_state: BiquadState::default(),
        }
    }

    /// Apply new band gains (linear, [0, 2]), recomputing coefficients for
    /// any band that changed
    pub fn set_gains(&mut self, low: f32, mid: f32, high: f32) {
        let low = low.clamp(0.0, 2.0);
        let mid = mid.clamp(0.0, 2.0);
        let high = high.clamp(0.0, 2.0);

        if low != self.low_gain {
            self.low_gain = low;
            let db = gain_to_db(low);
            self.low_coeffs = if db == 0.0 {
                BiquadCoeffs::passthrough()
            } else {
                BiquadCoeffs::low_shelf(EQ_LOW_FREQ, db, self.sample_rate)
            };
        }
        if mid != self.mid_gain {
            self.mid_gain = mid;
            let db = gain_to_db(mid);
            self.mid_coeffs = if db == 0.0 {
                BiquadCoeffs::passthrough()
            } else {
                BiquadCoeffs::peaking(EQ_MID_FREQ, db, EQ_MID_Q, self.sample_rate)
            };
        }
        if high != self.high_gain {
            self.high_gain = high;
            let db = gain_to_db(high);
            self.high_coeffs = if db == 0.0 {
                BiquadCoeffs::passthrough()
            } else {
                BiquadCoeffs::high_shelf(EQ_HIGH_FREQ, db, self.sample_rate)
            };
        }
    }

    /// True when all three bands are at exact passthrough
    pub fn is_identity(&self) -> bool {
        self.low_coeffs.is_passthrough()
            && self.mid_coeffs.is_passthrough()
            && self.high_coeffs.is_passthrough()
    }

    /// Process frames in place
    pub fn process(&mut self, frames: &mut [StereoSample]) {
        for frame in frames.iter_mut() {
            let (mut l, mut r) = (frame.left, frame.right);
            (l, r) = self.low_state.process(l, r, &self.low_coeffs);
            (l, r) = self.mid_state.process(l, r, &self.mid_coeffs);
            (l, r) = self.high_state.process(l, r, &self.high_coeffs);
            *frame = StereoSample::new(l, r);
        }
    }

    /// Reset filter memory (does not touch gains)
    pub fn reset(&mut self) {
        self.low_state.reset();
        self.mid_state.reset();
        self.high_state.reset();
    }
}
