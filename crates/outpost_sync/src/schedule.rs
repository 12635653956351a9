//! Per-store scheduling state machine.
//!
//! `Idle → ScheduledWait → Syncing → Idle`. The machine is pure: callers
//! feed it the store conditions and the current instant, and it answers
//! when the next pass may start.

use crate::config::SyncConfig;
use outpost_store::StoreSnapshot;
use std::time::Duration;
use tokio::time::Instant;

/// Phase of one store's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    /// Nothing to do, or the store cannot sync right now.
    Idle,
    /// A pass starts at `deadline`.
    ScheduledWait {
        /// When the pass starts.
        deadline: Instant,
    },
    /// A pass is running.
    Syncing,
}

/// What the schedule knows about a store and the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    /// The store finished its initial load.
    pub loaded: bool,
    /// The server is reachable.
    pub reachable: bool,
    /// The store has something to sync.
    pub needs_sync: bool,
    /// The store reports a running pass.
    pub in_progress: bool,
    /// The store's queue holds operations.
    pub pending_operations: bool,
}

impl Conditions {
    /// Conditions of `snapshot` under the given reachability.
    pub fn from_snapshot(snapshot: &StoreSnapshot, reachable: bool) -> Self {
        Self {
            loaded: snapshot.loaded,
            reachable,
            needs_sync: snapshot.status.needs_sync(),
            in_progress: snapshot.status.in_progress(),
            pending_operations: snapshot.pending_operations,
        }
    }

    /// Whether a pass may be scheduled.
    pub fn allow_sync(&self) -> bool {
        self.loaded && self.reachable && self.needs_sync && !self.in_progress && !self.pending_operations
    }
}

/// Scheduling state of one store.
#[derive(Debug, Clone)]
pub struct SyncSchedule {
    phase: SchedulePhase,
    last_sync: Option<Instant>,
    retry_at: Option<Instant>,
    refresh_at: Option<Instant>,
    min_sync_interval: Duration,
    min_timer_delay: Duration,
    incomplete_retry_delay: Duration,
    auto_update_interval: Duration,
}

impl SyncSchedule {
    /// Creates an idle schedule with the timings of `config`.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            phase: SchedulePhase::Idle,
            last_sync: None,
            retry_at: None,
            refresh_at: None,
            min_sync_interval: config.min_sync_interval,
            min_timer_delay: config.min_timer_delay,
            incomplete_retry_delay: config.incomplete_retry_delay,
            auto_update_interval: config.auto_update_interval,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SchedulePhase {
        self.phase
    }

    /// Start of the last pass.
    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    /// When the forced refresh fires, if armed.
    pub fn refresh_at(&self) -> Option<Instant> {
        self.refresh_at
    }

    /// Start time a pass requested at `now` gets.
    ///
    /// An armed retry wins over the interval. Otherwise the pass starts
    /// now when the interval has elapsed, or after the remaining time but
    /// never sooner than the minimum timer delay.
    pub fn deadline(&self, now: Instant) -> Instant {
        if let Some(retry_at) = self.retry_at {
            return retry_at.max(now);
        }
        match self.last_sync {
            None => now,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.min_sync_interval {
                    now
                } else {
                    now + (self.min_sync_interval - elapsed).max(self.min_timer_delay)
                }
            }
        }
    }

    /// Re-evaluates the phase after the conditions changed.
    pub fn observe(&mut self, conditions: Conditions, now: Instant) -> SchedulePhase {
        self.phase = match self.phase {
            SchedulePhase::Idle if conditions.allow_sync() => SchedulePhase::ScheduledWait {
                deadline: self.deadline(now),
            },
            SchedulePhase::ScheduledWait { .. } if !conditions.allow_sync() => SchedulePhase::Idle,
            phase => phase,
        };
        self.phase
    }

    /// Starts the pass when its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.phase {
            SchedulePhase::ScheduledWait { deadline } if deadline <= now => {
                self.start(now);
                true
            }
            _ => false,
        }
    }

    /// Starts a pass right away, ignoring the timer.
    pub fn sync_now(&mut self, conditions: Conditions, now: Instant) -> bool {
        if self.phase == SchedulePhase::Syncing || !conditions.allow_sync() {
            return false;
        }
        self.start(now);
        true
    }

    fn start(&mut self, now: Instant) {
        self.phase = SchedulePhase::Syncing;
        self.last_sync = Some(now);
        self.retry_at = None;
    }

    /// Ends the running pass.
    ///
    /// `more_work` arms the short retry. `pulled` arms the forced refresh.
    pub fn finished(&mut self, more_work: bool, pulled: bool, now: Instant) {
        self.phase = SchedulePhase::Idle;
        if more_work {
            self.retry_at = Some(now + self.incomplete_retry_delay);
        }
        if pulled {
            self.refresh_at = Some(now + self.auto_update_interval);
        }
    }

    /// Consumes the forced refresh once it is due.
    pub fn refresh_due(&mut self, now: Instant) -> bool {
        match self.refresh_at {
            Some(at) if at <= now => {
                self.refresh_at = None;
                true
            }
            _ => false,
        }
    }

    /// Next instant the driver must wake up at, if any.
    pub fn next_wake(&self) -> Option<Instant> {
        let deadline = match self.phase {
            SchedulePhase::ScheduledWait { deadline } => Some(deadline),
            _ => None,
        };
        match (deadline, self.refresh_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
