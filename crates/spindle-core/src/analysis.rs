//! Tempo and downbeat analysis
//!
//! Offline analysis of a decoded track: a BPM estimate from the
//! autocorrelation of an onset-energy envelope, and a first-downbeat
//! offset from a windowed-energy scan of the track's opening beats. Both
//! run on a control thread against the immutable track data; neither
//! touches the audio path.

use crate::types::AudioData;

/// Envelope hop size in frames (~86 envelope samples/s at 44.1 kHz)
const HOP: usize = 512;

/// Envelope analysis window in frames
const WINDOW: usize = 1024;

/// Tempo search range
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;

/// Cap the analysis to the first minute; plenty for a stable estimate
const MAX_ANALYSIS_SECONDS: u64 = 60;

/// Estimate the track's tempo in beats per minute
///
/// Returns 0.0 when the track is too short or no periodicity stands out.
pub fn analyze_bpm(track: &AudioData) -> f64 {
    let rate = track.sample_rate() as f64;
    let frames = track.frames().min(track.sample_rate() as u64 * MAX_ANALYSIS_SECONDS) as usize;
    // Need a few seconds of material for the slowest lag to repeat
    if frames < track.sample_rate() as usize * 4 {
        return 0.0;
    }

    let envelope = onset_envelope(track, frames);
    let envelope_rate = rate / HOP as f64;

    let lag_min = (60.0 / MAX_BPM * envelope_rate).round() as usize;
    let lag_max = (60.0 / MIN_BPM * envelope_rate).round() as usize;
    if envelope.len() < lag_max * 2 + 2 {
        return 0.0;
    }

    // Mean-removed autocorrelation out to twice the slowest lag, so the
    // comb score below can look at harmonics of every candidate
    let mean = envelope.iter().sum::<f64>() / envelope.len() as f64;
    let centered: Vec<f64> = envelope.iter().map(|&e| e - mean).collect();
    let corr_len = lag_max * 2 + 1;
    let mut corr = vec![0.0f64; corr_len + 1];
    for (lag, slot) in corr.iter_mut().enumerate().skip(1) {
        let n = centered.len() - lag;
        let mut sum = 0.0;
        for i in 0..n {
            sum += centered[i] * centered[i + lag];
        }
        *slot = sum / n as f64;
    }

    // Score each candidate lag together with its first harmonics; this
    // resolves the half/double-tempo ambiguity toward the faster pulse
    let mut best_lag = 0usize;
    let mut best_score = 0.0f64;
    for lag in lag_min..=lag_max {
        let mut score = corr[lag];
        if lag * 2 <= corr_len {
            score += 0.5 * corr[lag * 2];
        }
        if lag * 3 <= corr_len {
            score += 0.33 * corr[lag * 3];
        }
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_score <= 0.0 {
        return 0.0;
    }

    // Parabolic refinement around the peak for sub-lag resolution
    let refined = if best_lag > lag_min && best_lag < lag_max {
        let (prev, here, next) = (corr[best_lag - 1], corr[best_lag], corr[best_lag + 1]);
        let denom = prev - 2.0 * here + next;
        if denom.abs() > f64::EPSILON {
            best_lag as f64 + 0.5 * (prev - next) / denom
        } else {
            best_lag as f64
        }
    } else {
        best_lag as f64
    };

    60.0 * envelope_rate / refined
}

/// Find the first downbeat: the highest-energy instant within the track's
/// first two beat periods
///
/// Returns the offset in seconds, 0.0 when the inputs are unusable.
pub fn detect_beat_offset(track: &AudioData, bpm: f64) -> f64 {
    if bpm <= 0.0 || track.frames() == 0 {
        return 0.0;
    }

    let rate = track.sample_rate() as usize;
    let samples = track.as_slice();
    let frames_per_beat = (60.0 / bpm * rate as f64) as usize;
    if frames_per_beat == 0 {
        return 0.0;
    }

    // Scan the first two beats (bounded by the first ten seconds),
    // comparing ~10 ms energy windows at half-window steps
    let search = samples.len().min(rate * 10).min(frames_per_beat * 2);
    let window = (rate / 100).max(1);

    let mut max_energy = 0.0f64;
    let mut max_pos = 0usize;

    let mut pos = 0;
    while pos < search {
        let end = (pos + window).min(samples.len());
        let mut energy = 0.0f64;
        for frame in &samples[pos..end] {
            energy += (frame.left as f64).powi(2) + (frame.right as f64).powi(2);
        }
        if energy > max_energy {
            max_energy = energy;
            max_pos = pos;
        }
        pos += window / 2 + 1;
    }

    max_pos as f64 / rate as f64
}

/// Half-wave rectified frame-to-frame energy difference of the mono mix
fn onset_envelope(track: &AudioData, frames: usize) -> Vec<f64> {
    let samples = track.as_slice();
    let count = (frames.saturating_sub(WINDOW)) / HOP;
    let mut envelope = Vec::with_capacity(count);

    let mut previous = 0.0f64;
    for i in 0..count {
        let start = i * HOP;
        let mut energy = 0.0f64;
        for frame in &samples[start..start + WINDOW] {
            let mono = (frame.left + frame.right) as f64 * 0.5;
            energy += mono * mono;
        }
        energy /= WINDOW as f64;
        envelope.push((energy - previous).max(0.0));
        previous = energy;
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    const RATE: u32 = 44100;

    /// A click track: short bursts on a fixed beat grid
    fn click_track(seconds: u32, bpm: f64, first_click: f64) -> AudioData {
        let frames = (RATE * seconds) as usize;
        let mut samples = vec![StereoSample::silence(); frames];
        let period = (60.0 / bpm * RATE as f64) as usize;
        let burst = 64;

        let mut pos = (first_click * RATE as f64) as usize;
        while pos + burst < frames {
            for i in 0..burst {
                let decay = 1.0 - i as f32 / burst as f32;
                samples[pos + i] = StereoSample::mono(0.9 * decay);
            }
            pos += period;
        }
        AudioData::new(samples, RATE)
    }

    #[test]
    fn detects_120_bpm() {
        let track = click_track(20, 120.0, 0.0);
        let bpm = analyze_bpm(&track);
        assert!((bpm - 120.0).abs() < 3.0, "estimated {} BPM", bpm);
    }

    #[test]
    fn detects_140_bpm() {
        let track = click_track(20, 140.0, 0.0);
        let bpm = analyze_bpm(&track);
        assert!((bpm - 140.0).abs() < 3.0, "estimated {} BPM", bpm);
    }

    #[test]
    fn short_track_yields_zero() {
        let track = AudioData::new(vec![StereoSample::silence(); 1000], RATE);
        assert_eq!(analyze_bpm(&track), 0.0);
    }

    #[test]
    fn silence_yields_zero() {
        let track = AudioData::new(vec![StereoSample::silence(); RATE as usize * 10], RATE);
        assert_eq!(analyze_bpm(&track), 0.0);
    }

    #[test]
    fn finds_first_downbeat() {
        let track = click_track(10, 120.0, 0.25);
        let offset = detect_beat_offset(&track, 120.0);
        assert!((offset - 0.25).abs() < 0.02, "offset {}", offset);
    }

    #[test]
    fn offset_of_zero_bpm_is_zero() {
        let track = click_track(5, 120.0, 0.0);
        assert_eq!(detect_beat_offset(&track, 0.0), 0.0);
    }
}
