//! Engine → UI notifications
//!
//! The audio callback must never block, so UI-facing notifications are
//! pushed onto a lock-free SPSC ring buffer and delivered from a small
//! consumer thread. If the queue is momentarily full the event is dropped;
//! position updates are periodic anyway and a lost one is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::types::DeckId;

/// Events emitted by the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// Periodic playhead update (~every 100 ms per deck)
    Position { deck: DeckId, seconds: f64 },
    /// A deck played through to the end and paused itself
    TrackEnded { deck: DeckId },
}

/// Capacity of the event queue. Position updates arrive at ~20/s total;
/// this covers seconds of a stalled consumer before anything is dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Create the audio-thread → notifier event channel
pub fn event_channel() -> (rtrb::Producer<EngineEvent>, rtrb::Consumer<EngineEvent>) {
    rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY)
}

/// Playhead update callback: (deck, position in seconds)
pub type PositionCallback = Box<dyn Fn(DeckId, f64) + Send + Sync>;

/// End-of-track callback
pub type TrackEndedCallback = Box<dyn Fn(DeckId) + Send + Sync>;

/// Registered UI callbacks
///
/// Set from control threads, invoked from the notifier thread, never
/// from the audio thread.
#[derive(Default)]
pub struct NotificationRegistry {
    position: Mutex<Option<PositionCallback>>,
    track_ended: Mutex<Option<TrackEndedCallback>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position_callback(&self, callback: Option<PositionCallback>) {
        *self.position.lock().unwrap_or_else(|p| p.into_inner()) = callback;
    }

    pub fn set_track_ended_callback(&self, callback: Option<TrackEndedCallback>) {
        *self.track_ended.lock().unwrap_or_else(|p| p.into_inner()) = callback;
    }

    fn dispatch(&self, event: EngineEvent) {
        match event {
            EngineEvent::Position { deck, seconds } => {
                if let Some(cb) = &*self.position.lock().unwrap_or_else(|p| p.into_inner()) {
                    cb(deck, seconds);
                }
            }
            EngineEvent::TrackEnded { deck } => {
                if let Some(cb) = &*self.track_ended.lock().unwrap_or_else(|p| p.into_inner()) {
                    cb(deck);
                }
            }
        }
    }
}

/// Consumer thread that drains the event queue and invokes callbacks
pub struct Notifier {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Poll interval; comfortably below the 100 ms position cadence
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    pub fn spawn(
        mut events: rtrb::Consumer<EngineEvent>,
        registry: Arc<NotificationRegistry>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("spindle-notifier".into())
            .spawn(move || {
                loop {
                    while let Ok(event) = events.pop() {
                        registry.dispatch(event);
                    }
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    std::thread::sleep(Self::POLL_INTERVAL);
                }
                // Final drain so a stop right after end-of-track still
                // delivers the notification
                while let Ok(event) = events.pop() {
                    registry.dispatch(event);
                }
            })
            .expect("failed to spawn notifier thread");

        Self { stop, handle: Some(handle) }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
