//! Audio file decoding
//!
//! Decodes a track into the in-memory [`AudioData`] the decks play from:
//! interleaved stereo f32 at the file's native rate. Mono sources are
//! up-mixed to stereo; anything with more than two channels is rejected.
//! Resampling to the engine rate, when needed, is the caller's concern.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::types::{AudioData, StereoSample};

/// Errors from the decoding stage
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("could not open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or corrupt container: {0}")]
    Format(String),

    #[error("no decodable audio track in file")]
    NoTrack,

    #[error("unsupported codec: {0}")]
    Codec(String),

    #[error("unsupported channel count: {0} (expected 1 or 2)")]
    ChannelCount(usize),

    #[error("file contains no audio frames")]
    Empty,
}

/// Decode a whole file into interleaved stereo float PCM
pub fn decode_file(path: &Path) -> Result<AudioData, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Format(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let mut samples: Vec<StereoSample> = Vec::new();
    let mut sample_rate = 0u32;
    let mut channels = 0usize;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream shows up as an IO error in symphonia
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Format(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet mid-file is skippable; keep what we have
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        };

        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
            channels = spec.channels.count();
            if channels == 0 || channels > 2 {
                return Err(DecodeError::ChannelCount(channels));
            }
        }

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        buf.copy_interleaved_ref(decoded);

        let interleaved = buf.samples();
        match channels {
            1 => samples.extend(interleaved.iter().map(|&s| StereoSample::mono(s))),
            _ => samples.extend(
                interleaved
                    .chunks_exact(2)
                    .map(|lr| StereoSample::new(lr[0], lr[1])),
            ),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    log::info!(
        "decoded {}: {} frames at {}Hz ({:.1}s)",
        path.display(),
        samples.len(),
        sample_rate,
        samples.len() as f64 / sample_rate as f64
    );

    Ok(AudioData::new(samples, sample_rate))
}
