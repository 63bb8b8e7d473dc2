//! Sync manager - keeps a slave deck locked to a master deck
//!
//! Holds at most one master↔slave relation. Enabling sync arms the
//! relation; a one-shot alignment (`align_now` or `play_synced`) makes it
//! aligned. While aligned and both decks play, the per-callback `update`
//! matches the slave's tempo ratio and applies small bounded phase
//! corrections. The tempo filter is only ever cleared by the one-shot
//! alignments, never by the steady-state corrector.
//!
//! Beat phase lives on the grid defined by each deck's BPM and beat
//! offset: `phase = ((cursor - offset_frames) mod frames_per_beat) /
//! frames_per_beat`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::{DeckId, NUM_DECKS};

use super::deck::Deck;

/// Phase corrections run every this many callbacks
const PHASE_CHECK_INTERVAL: u32 = 8;

/// Dead band: phase differences under 2% of a beat are left alone
const PHASE_DEADBAND: f64 = 0.02;

/// Largest single correction, as a fraction of a second (50 ms)
const MAX_CORRECTION_SECONDS: f64 = 0.05;

/// Lifecycle of the sync slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No relation recorded
    Idle,
    /// Relation recorded, waiting for a one-shot alignment
    Armed,
    /// Aligned and tracking while both decks play
    Aligned,
}

#[derive(Debug, Clone, Copy)]
struct SyncLink {
    slave: DeckId,
    master: DeckId,
    aligned: bool,
}

/// The engine's single sync slot
pub struct SyncManager {
    link: Mutex<Option<SyncLink>>,
    update_count: AtomicU32,
}

impl SyncManager {
    pub fn new() -> Self {
        Self {
            link: Mutex::new(None),
            update_count: AtomicU32::new(0),
        }
    }

    /// Record a slave→master relation (Armed). Replaces any existing
    /// relation; a deck can never be enslaved to itself.
    pub fn enable(&self, slave: DeckId, master: DeckId) {
        if slave == master {
            log::warn!("sync: refusing to enslave deck {} to itself", slave);
            return;
        }
        *self.lock_link() = Some(SyncLink { slave, master, aligned: false });
        log::info!("sync: deck {} follows deck {}", slave, master);
    }

    /// Clear the relation if `deck` is the recorded slave
    pub fn disable(&self, deck: DeckId) {
        let mut link = self.lock_link();
        if link.map_or(false, |l| l.slave == deck) {
            *link = None;
            log::info!("sync: deck {} released", deck);
        }
    }

    /// Current slot state
    pub fn state(&self) -> SyncState {
        match *self.lock_link() {
            None => SyncState::Idle,
            Some(SyncLink { aligned: false, .. }) => SyncState::Armed,
            Some(SyncLink { aligned: true, .. }) => SyncState::Aligned,
        }
    }

    /// The recorded relation as (slave, master), if any
    pub fn relation(&self) -> Option<(DeckId, DeckId)> {
        self.lock_link().map(|l| (l.slave, l.master))
    }

    /// One-shot alignment: match the slave's tempo ratio to the master and
    /// move the slave's cursor so its beat phase equals the master's.
    ///
    /// The slave's filter is cleared by the cursor move; a click is
    /// acceptable here.
    pub fn align_now(&self, slave: &Deck, master: &Deck) {
        let master_bpm = master.bpm();
        let slave_bpm = slave.bpm();
        if master_bpm <= 0.0 || slave_bpm <= 0.0 {
            return;
        }

        slave.set_tempo(master_bpm / slave_bpm);

        let fpb = slave.frames_per_beat();
        if fpb <= 0 {
            return;
        }
        let offset_frames = (slave.beat_offset() * slave.sample_rate() as f64).round() as i64;
        let adjusted = slave.sample_position() - offset_frames;
        let current_beat = adjusted.div_euclid(fpb);
        let target = offset_frames
            + current_beat * fpb
            + (master.phase() * fpb as f64).round() as i64;

        slave.align_to_frame(target);
        self.mark_aligned(slave.id(), master.id());
    }

    /// Start the slave so its first downbeat lands on the master's next
    /// downbeat.
    ///
    /// The slave plays at tempo ratio `r = bpm_m / bpm_s`; in the
    /// `t_next` real seconds until the master's next downbeat it advances
    /// `t_next * r` source seconds, so it starts `t_next * r` source
    /// seconds before its own first downbeat (shifted forward by whole
    /// slave beats while negative).
    pub fn play_synced(&self, slave: &Deck, master: &Deck) {
        let master_bpm = master.bpm();
        let slave_bpm = slave.bpm();
        if master_bpm <= 0.0 || slave_bpm <= 0.0 {
            // No usable beat grid; just start the deck
            slave.play();
            return;
        }

        let ratio = master_bpm / slave_bpm;
        slave.set_tempo(ratio);

        let spb_master = 60.0 / master_bpm;
        let spb_slave = 60.0 / slave_bpm;

        let master_phase_seconds =
            (master.position_seconds() - master.beat_offset()).rem_euclid(spb_master);
        let time_to_next_beat = spb_master - master_phase_seconds;

        let advance = time_to_next_beat * ratio;
        let mut start_seconds = slave.beat_offset() - advance;
        while start_seconds < 0.0 {
            start_seconds += spb_slave;
        }

        let start_frame = (start_seconds * slave.sample_rate() as f64).round() as i64;
        log::debug!(
            "sync: deck {} starts at frame {} to meet deck {}'s beat in {:.1}ms",
            slave.id(),
            start_frame,
            master.id(),
            time_to_next_beat * 1000.0
        );
        slave.play_from(start_frame);
        self.mark_aligned(slave.id(), master.id());
    }

    /// Per-callback update, invoked from the audio thread before mixing
    ///
    /// Matches the slave's tempo ratio whenever the relation is active and
    /// both decks play; while aligned, additionally nudges the slave's
    /// cursor toward the master's phase, bounded and infrequent, skipping
    /// whenever a control-thread seek or align holds the deck lock.
    pub fn update(&self, decks: &[Arc<Deck>; NUM_DECKS]) {
        // Contended means a control op is reconfiguring sync right now
        let Ok(mut link_guard) = self.link.try_lock() else {
            return;
        };
        let Some(link) = link_guard.as_mut() else {
            return;
        };

        let slave = &decks[link.slave.index()];
        let master = &decks[link.master.index()];

        if !(slave.is_playing() && master.is_playing()) {
            // Aligned decays to Armed when either side stops
            link.aligned = false;
            return;
        }

        let master_bpm = master.bpm();
        let slave_bpm = slave.bpm();
        if master_bpm <= 0.0 || slave_bpm <= 0.0 {
            return;
        }

        // Cheap and idempotent; runs every callback
        slave.set_tempo(master_bpm / slave_bpm);

        if !link.aligned {
            return;
        }

        let count = self.update_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % PHASE_CHECK_INTERVAL != 0 {
            return;
        }

        // Shortest-path phase difference in (-0.5, 0.5], in beats
        let mut diff = master.phase() - slave.phase();
        if diff > 0.5 {
            diff -= 1.0;
        }
        if diff <= -0.5 {
            diff += 1.0;
        }
        if diff.abs() <= PHASE_DEADBAND {
            return;
        }

        let max_correction =
            (MAX_CORRECTION_SECONDS * slave.sample_rate() as f64).round() as i64;
        let correction = ((diff * slave.frames_per_beat() as f64).round() as i64)
            .clamp(-max_correction, max_correction);

        // try_nudge skips when a seek/align holds the deck lock
        slave.try_nudge(correction);
    }

    fn mark_aligned(&self, slave: DeckId, master: DeckId) {
        let mut link = self.lock_link();
        if let Some(l) = link.as_mut() {
            if l.slave == slave && l.master == master {
                l.aligned = true;
            }
        }
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<SyncLink>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}
