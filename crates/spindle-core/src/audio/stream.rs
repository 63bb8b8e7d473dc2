//! Output stream and the real-time callback
//!
//! [`CallbackState`] is the audio thread's working set: shared handles to
//! the decks, mixer and sync manager, plus pre-allocated scratch buffers
//! and the event producer. The cpal callback calls
//! [`CallbackState::process`] on every block:
//!
//! 1. sync update (tempo match + bounded phase correction)
//! 2. mix both decks into the output region
//! 3. throttled position events, end-of-track events
//!
//! The callback never allocates, never logs and never blocks beyond the
//! short per-deck state mutexes.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig};

use crate::engine::deck::Deck;
use crate::engine::events::EngineEvent;
use crate::engine::mixer::Mixer;
use crate::engine::sync::SyncManager;
use crate::types::{DeckId, StereoBuffer, NUM_DECKS};

use super::config::{AudioConfig, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};

/// Seconds between position notifications per deck
const POSITION_UPDATE_SECONDS: f64 = 0.1;

/// The audio callback's working state
pub struct CallbackState {
    decks: [Arc<Deck>; NUM_DECKS],
    mixer: Arc<Mixer>,
    sync: Arc<SyncManager>,
    /// Per-deck read scratch, pre-allocated to the maximum callback size
    scratch_a: StereoBuffer,
    scratch_b: StereoBuffer,
    /// Mix bus staging buffer
    mix_bus: StereoBuffer,
    events: rtrb::Producer<EngineEvent>,
    sample_rate: u32,
    frames_since_position_update: u64,
}

impl CallbackState {
    pub fn new(
        decks: [Arc<Deck>; NUM_DECKS],
        mixer: Arc<Mixer>,
        sync: Arc<SyncManager>,
        events: rtrb::Producer<EngineEvent>,
        sample_rate: u32,
    ) -> Self {
        Self {
            decks,
            mixer,
            sync,
            scratch_a: StereoBuffer::silence(MAX_BUFFER_SIZE),
            scratch_b: StereoBuffer::silence(MAX_BUFFER_SIZE),
            mix_bus: StereoBuffer::silence(MAX_BUFFER_SIZE),
            events,
            sample_rate,
            frames_since_position_update: 0,
        }
    }

    /// Render one device block into an interleaved output region with the
    /// given channel count
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        debug_assert!(channels >= 1);
        let total_frames = output.len() / channels;

        // Drivers should stay within MAX_BUFFER_SIZE; render in chunks if
        // one does not
        let mut done = 0;
        while done < total_frames {
            let frames = (total_frames - done).min(MAX_BUFFER_SIZE);
            let region = &mut output[done * channels..(done + frames) * channels];
            self.process_block(region, channels, frames);
            done += frames;
        }
    }

    fn process_block(&mut self, output: &mut [f32], channels: usize, frames: usize) {
        self.sync.update(&self.decks);

        self.mix_bus.set_len_from_capacity(frames);
        let ended = self.mixer.mix(
            &self.decks[0],
            &self.decks[1],
            &mut self.scratch_a,
            &mut self.scratch_b,
            self.mix_bus.as_mut_slice(),
        );

        // Interleave the stereo bus into the device layout; extra
        // channels stay silent
        for (i, frame) in output.chunks_exact_mut(channels).enumerate() {
            let sample = self.mix_bus[i];
            frame[0] = sample.left;
            if channels > 1 {
                frame[1] = sample.right;
            }
            for extra in frame.iter_mut().skip(2) {
                *extra = 0.0;
            }
        }

        for (i, ended) in ended.into_iter().enumerate() {
            if ended {
                // Queue full means the consumer is gone; dropping is the
                // only non-blocking option
                let _ = self.events.push(EngineEvent::TrackEnded { deck: DeckId::new(i) });
            }
        }

        self.frames_since_position_update += frames as u64;
        let interval = (POSITION_UPDATE_SECONDS * self.sample_rate as f64) as u64;
        if self.frames_since_position_update >= interval {
            self.frames_since_position_update = 0;
            for deck in &self.decks {
                let _ = self.events.push(EngineEvent::Position {
                    deck: deck.id(),
                    seconds: deck.position_seconds(),
                });
            }
        }
    }
}

/// Handle to a running output stream; drop to stop playback
pub struct StreamHandle {
    _stream: Stream,
    sample_rate: u32,
    buffer_size: u32,
}

impl StreamHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Open and start a stereo f32 output stream at exactly the configured
/// sample rate
pub fn open_output_stream(
    device: &cpal::Device,
    config: &AudioConfig,
    mut state: CallbackState,
) -> AudioResult<StreamHandle> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let rate = config.sample_rate;
    let supported = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| rate >= c.min_sample_rate().0 && rate <= c.max_sample_rate().0)
        .ok_or(AudioError::UnsupportedSampleRate { requested: rate })?
        .clone()
        .with_sample_rate(cpal::SampleRate(rate));

    let buffer_size = config.buffer_size.clamp(64, MAX_BUFFER_SIZE as u32);
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: BufferSize::Fixed(buffer_size),
    };
    let channels = stream_config.channels as usize;

    log::info!(
        "opening output stream: {} channels, {}Hz, {} frames (~{:.1}ms)",
        channels,
        rate,
        buffer_size,
        (buffer_size as f32 / rate as f32) * 1000.0
    );

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                state.process(data, channels);
            },
            move |err| {
                // Driver underruns surface here; log out-of-band and keep
                // the stream alive
                log::error!("audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    Ok(StreamHandle {
        _stream: stream,
        sample_rate: rate,
        buffer_size,
    })
}
