//! End-to-end playback scenarios
//!
//! Drives the audio pipeline exactly as the device callback would,
//! through [`CallbackState::process`], without opening a real stream, so
//! these run anywhere. Timing below assumes 44.1 kHz and 512-frame
//! callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spindle_core::audio::CallbackState;
use spindle_core::engine::events::{event_channel, EngineEvent};
use spindle_core::engine::{Deck, Mixer, SyncManager};
use spindle_core::types::{AudioData, DeckId, StereoSample};

const RATE: u32 = 44100;
const BLOCK: usize = 512;

struct Rig {
    decks: [Arc<Deck>; 2],
    mixer: Arc<Mixer>,
    sync: Arc<SyncManager>,
    state: CallbackState,
    events: rtrb::Consumer<EngineEvent>,
}

impl Rig {
    fn new() -> Self {
        let decks = [
            Arc::new(Deck::new(DeckId::new(0), RATE)),
            Arc::new(Deck::new(DeckId::new(1), RATE)),
        ];
        let mixer = Arc::new(Mixer::new());
        let sync = Arc::new(SyncManager::new());
        let (tx, rx) = event_channel();
        let state = CallbackState::new(
            [Arc::clone(&decks[0]), Arc::clone(&decks[1])],
            Arc::clone(&mixer),
            Arc::clone(&sync),
            tx,
            RATE,
        );
        Self { decks, mixer, sync, state, events: rx }
    }

    /// Render one callback and return the interleaved block
    fn render_block(&mut self) -> Vec<f32> {
        let mut out = vec![0.0f32; BLOCK * 2];
        self.state.process(&mut out, 2);
        out
    }

    /// Render `seconds` worth of callbacks, returning the concatenated
    /// output
    fn render_seconds(&mut self, seconds: f64) -> Vec<f32> {
        let blocks = (seconds * RATE as f64 / BLOCK as f64).ceil() as usize;
        let mut all = Vec::with_capacity(blocks * BLOCK * 2);
        for _ in 0..blocks {
            all.extend(self.render_block());
        }
        all
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.events.pop().ok()).collect()
    }
}

fn sine_track(seconds: f64, freq: f64) -> AudioData {
    let frames = (seconds * RATE as f64) as usize;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f64 / RATE as f64;
            StereoSample::mono((2.0 * std::f64::consts::PI * freq * t).sin() as f32 * 0.8)
        })
        .collect();
    AudioData::new(samples, RATE)
}

fn dc_track(seconds: f64, level: f32) -> AudioData {
    let frames = (seconds * RATE as f64) as usize;
    AudioData::new(vec![StereoSample::mono(level); frames], RATE)
}

#[test]
fn silence_with_no_tracks() {
    let mut rig = Rig::new();
    let out = rig.render_seconds(10.0);
    assert!(out.iter().all(|&s| s == 0.0), "expected pure silence");
    assert!(rig
        .drain_events()
        .iter()
        .all(|e| !matches!(e, EngineEvent::TrackEnded { .. })));
}

#[test]
fn single_track_plays_through_with_one_end_notification() {
    let mut rig = Rig::new();
    rig.decks[0].load(sine_track(5.0, 440.0)).unwrap();
    // Crossfader hard to deck A so the tone passes at unity
    rig.mixer.set_crossfader(0.0);
    rig.decks[0].play();

    let out = rig.render_seconds(5.2);

    // The first five seconds carry the tone
    let head = &out[..RATE as usize * 2];
    assert!(head.iter().any(|&s| s.abs() > 0.1), "tone missing");

    // At least the last 100 ms are silent after end of track
    let tail = &out[out.len() - (RATE as usize / 10) * 2..];
    assert!(tail.iter().all(|&s| s == 0.0), "tail not silent");
    assert!(!rig.decks[0].is_playing());

    let ended: Vec<_> = rig
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::TrackEnded { .. }))
        .collect();
    assert_eq!(ended, vec![EngineEvent::TrackEnded { deck: DeckId::new(0) }]);

    // Another 10 seconds of rendering must not re-report the end
    rig.render_seconds(10.0);
    assert!(rig
        .drain_events()
        .iter()
        .all(|e| !matches!(e, EngineEvent::TrackEnded { .. })));
}

#[test]
fn same_song_sync_locks_phase() {
    let mut rig = Rig::new();
    for deck in &rig.decks {
        deck.load(sine_track(10.0, 220.0)).unwrap();
        deck.set_bpm(120.0);
        deck.set_beat_offset(0.0);
    }

    rig.decks[0].play();
    rig.render_seconds(1.0);

    rig.sync.enable(DeckId::new(1), DeckId::new(0));
    rig.sync.play_synced(&rig.decks[1], &rig.decks[0]);

    // Identical BPM: unity tempo ratio, so both decks stay on the fast
    // path and advance in lockstep; their beat phases must agree for the
    // rest of the run
    assert!((rig.decks[1].tempo() - 1.0).abs() < 1e-9);
    for _ in 0..8 {
        rig.render_seconds(0.5);
        let master_phase = rig.decks[0].phase();
        let slave_phase = rig.decks[1].phase();
        let mut diff = (master_phase - slave_phase).abs();
        diff = diff.min(1.0 - diff);
        let frames_off = diff * rig.decks[1].frames_per_beat() as f64;
        assert!(frames_off <= 1.0, "decks drifted {:.2} frames apart", frames_off);
    }
}

#[test]
fn cross_bpm_sync_sets_ratio_and_meets_next_downbeat() {
    let rig = Rig::new();
    rig.decks[0].load(sine_track(10.0, 220.0)).unwrap();
    rig.decks[0].set_bpm(128.0);
    rig.decks[1].load(sine_track(10.0, 330.0)).unwrap();
    rig.decks[1].set_bpm(140.0);

    rig.decks[0].align_to_frame((0.5 * RATE as f64) as i64);
    rig.decks[0].play();
    rig.sync.play_synced(&rig.decks[1], &rig.decks[0]);

    let ratio = 128.0 / 140.0;
    assert!((rig.decks[1].tempo() - ratio).abs() < 1e-6);

    // The slave reaches a downbeat every master beat period of real
    // time, so its real-time distance to the next downbeat must equal
    // the master's, modulo one master beat
    let spb_master = 60.0 / 128.0;
    let master_to_beat = spb_master - rig.decks[0].position_seconds().rem_euclid(spb_master);
    let slave_offset = rig.decks[1].beat_offset();
    let slave_to_beat =
        ((slave_offset - rig.decks[1].position_seconds()) / ratio).rem_euclid(spb_master);

    let diff = (master_to_beat - slave_to_beat).abs().min(
        spb_master - (master_to_beat - slave_to_beat).abs(),
    );
    assert!(
        diff * RATE as f64 <= 1.0,
        "downbeats misaligned by {:.2} frames",
        diff * RATE as f64
    );
}

#[test]
fn crossfade_sweep_holds_unity() {
    let mut rig = Rig::new();
    for deck in &rig.decks {
        deck.load(dc_track(3.0, 1.0)).unwrap();
        deck.play();
    }

    let blocks = (RATE as usize).div_ceil(BLOCK);
    for i in 0..blocks {
        rig.mixer.set_crossfader(i as f32 / (blocks - 1) as f32);
        let out = rig.render_block();
        for &sample in &out {
            assert!(
                (0.999..=1.001).contains(&sample),
                "sample {} outside unity band at fader {}",
                sample,
                rig.mixer.crossfader()
            );
        }
    }
}

#[test]
fn seek_under_playback_is_defined() {
    let mut rig = Rig::new();
    rig.decks[0].load(sine_track(5.0, 440.0)).unwrap();
    rig.decks[0].play();
    rig.render_seconds(0.5);

    rig.decks[0].seek_seconds(3.0);
    assert_eq!(rig.decks[0].sample_position(), (3.0 * RATE as f64).round() as i64);

    let out = rig.render_block();
    assert!(out.iter().all(|s| s.is_finite()), "NaN in output after seek");
    assert_eq!(
        rig.decks[0].sample_position(),
        (3.0 * RATE as f64).round() as i64 + BLOCK as i64
    );
}

#[test]
fn concurrent_setters_do_not_disturb_the_callback() {
    let mut rig = Rig::new();
    rig.decks[0].load(sine_track(4.0, 440.0)).unwrap();
    rig.decks[1].load(sine_track(4.0, 330.0)).unwrap();
    rig.decks[0].set_bpm(128.0);
    rig.decks[1].set_bpm(140.0);
    rig.decks[0].play();
    rig.decks[1].play();
    rig.sync.enable(DeckId::new(1), DeckId::new(0));

    let stop = Arc::new(AtomicBool::new(false));
    let mut controllers = Vec::new();
    for (d, deck) in rig.decks.iter().enumerate() {
        let deck = Arc::clone(deck);
        let mixer = Arc::clone(&rig.mixer);
        let stop = Arc::clone(&stop);
        controllers.push(std::thread::spawn(move || {
            let mut i = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let x = (i % 1000) as f32 / 1000.0;
                deck.set_volume(x);
                deck.set_eq_low(x * 2.0);
                deck.set_eq_mid(2.0 - x * 2.0);
                deck.set_eq_high(x);
                deck.set_tempo(0.9 + x as f64 * 0.2);
                deck.set_pitch(x as f64 * 4.0 - 2.0);
                mixer.set_crossfader(x);
                if i % 97 == 0 {
                    deck.seek_seconds(x as f64 * 3.0);
                }
                if d == 1 && i % 53 == 0 {
                    deck.try_nudge(10);
                }
                i = i.wrapping_add(1);
                std::thread::sleep(std::time::Duration::from_micros(100));
            }
        }));
    }

    // Simulated 44.1kHz/512 callback thread: ~2 seconds of audio
    for _ in 0..172 {
        let out = rig.render_block();
        assert!(out.iter().all(|s| s.is_finite()));
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    stop.store(true, Ordering::Relaxed);
    for handle in controllers {
        handle.join().unwrap();
    }
}
