//! Admission control: the single gate new work must pass, plus the live
//! batch size / rate limit that the resource monitor degrades and restores.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::config;

/// Batch size and send rate currently in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    pub batch_size: usize,
    /// Sends per second
    pub rate_limit: u32,
}

impl ThrottleSettings {
    /// Delay between consecutive sends at this rate.
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_limit.max(1)
    }
}

/// Default, warning-floor and minimum throttle levels.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleLimits {
    pub defaults: ThrottleSettings,
    pub warning_floor: ThrottleSettings,
    pub cpu_warning_rate_floor: u32,
    pub minimum: ThrottleSettings,
    pub rate_step: u32,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        use config::throttle::*;

        Self {
            defaults: ThrottleSettings {
                batch_size: DEFAULT_BATCH_SIZE,
                rate_limit: DEFAULT_RATE_LIMIT,
            },
            warning_floor: ThrottleSettings {
                batch_size: WARNING_MIN_BATCH_SIZE,
                rate_limit: WARNING_MIN_RATE_LIMIT,
            },
            cpu_warning_rate_floor: CPU_WARNING_MIN_RATE_LIMIT,
            minimum: ThrottleSettings {
                batch_size: MIN_BATCH_SIZE,
                rate_limit: MIN_RATE_LIMIT,
            },
            rate_step: RATE_STEP,
        }
    }
}

#[derive(Debug)]
struct GateState {
    settings: ThrottleSettings,
    paused_until: Option<Instant>,
    halted: bool,
}

/// Gate consulted by every enqueue and every broadcast batch.
///
/// Intake is closed while a pause deadline lies in the future. Pauses are
/// timer driven: a spawned sleep reopens the gate at the deadline, and every
/// read also reopens it lazily, so expiry never waits for the next monitor pass.
#[derive(Debug)]
pub struct AdmissionControl {
    name: &'static str,
    limits: ThrottleLimits,
    state: Mutex<GateState>,
    resumed: Notify,
}

impl AdmissionControl {
    pub fn new(name: &'static str, limits: ThrottleLimits) -> Arc<Self> {
        Arc::new(Self {
            name,
            limits,
            state: Mutex::new(GateState {
                settings: limits.defaults,
                paused_until: None,
                halted: false,
            }),
            resumed: Notify::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limits(&self) -> &ThrottleLimits {
        &self.limits
    }

    /// Whether new tasks may be accepted right now.
    pub fn is_accepting(&self) -> bool {
        self.resume_if_expired();
        self.state.lock().paused_until.is_none()
    }

    /// True while an emergency halt is in force.
    pub fn is_halted(&self) -> bool {
        self.resume_if_expired();
        self.state.lock().halted
    }

    pub fn settings(&self) -> ThrottleSettings {
        self.state.lock().settings
    }

    /// Remaining pause time, if intake is closed.
    pub fn paused_for(&self) -> Option<Duration> {
        self.resume_if_expired();
        let state = self.state.lock();
        state
            .paused_until
            .map(|until| until.saturating_duration_since(Instant::now()))
    }

    /// True whenever settings are below defaults or intake is closed.
    pub fn is_throttled(&self) -> bool {
        self.resume_if_expired();
        let state = self.state.lock();
        state.paused_until.is_some() || state.halted || state.settings != self.limits.defaults
    }

    /// Closes intake for `duration`. A pause never shortens an existing one.
    pub fn pause_intake(self: &Arc<Self>, duration: Duration) {
        self.close_until(duration, false);
    }

    /// Emergency: closes intake and halts all pool operations for `duration`.
    pub fn halt(self: &Arc<Self>, duration: Duration) {
        self.close_until(duration, true);
    }

    fn close_until(self: &Arc<Self>, duration: Duration, halt: bool) {
        let deadline = Instant::now() + duration;
        {
            let mut state = self.state.lock();
            state.paused_until = Some(match state.paused_until {
                Some(existing) if existing > deadline => existing,
                _ => deadline,
            });
            state.halted |= halt;
        }

        if halt {
            log::error!("[{}] halted for {:?}", self.name, duration);
        } else {
            log::warn!("[{}] intake paused for {:?}", self.name, duration);
        }

        // Outside a runtime the lazy check in the getters still reopens the gate
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let gate = Arc::clone(self);
            handle.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                gate.resume_if_expired();
            });
        }
    }

    /// Reopens the gate once the pause deadline has passed. Returns true if
    /// this call reopened it.
    pub fn resume_if_expired(&self) -> bool {
        let reopened = {
            let mut state = self.state.lock();
            match state.paused_until {
                Some(until) if until <= Instant::now() => {
                    state.paused_until = None;
                    state.halted = false;
                    true
                }
                _ => false,
            }
        };

        if reopened {
            log::info!("[{}] intake resumed", self.name);
            self.resumed.notify_waiters();
        }
        reopened
    }

    /// Waits until intake is open again. Returns immediately when it already is.
    pub async fn wait_until_open(&self) {
        loop {
            let notified = self.resumed.notified();
            let Some(remaining) = self.paused_for() else {
                return;
            };
            // The timer task normally wakes us; the timeout covers a missing runtime timer
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    /// Warning tier: halve the batch size and step the rate limit down, never
    /// below the warning floors.
    pub fn degrade_warning(&self) {
        let mut state = self.state.lock();
        let floor = self.limits.warning_floor;
        let current = state.settings;
        // Floors never raise settings that a critical pass already clamped lower
        state.settings.batch_size = (current.batch_size / 2)
            .max(floor.batch_size)
            .min(current.batch_size);
        state.settings.rate_limit = current
            .rate_limit
            .saturating_sub(self.limits.rate_step)
            .max(floor.rate_limit)
            .min(current.rate_limit);
    }

    /// CPU warning tier: step the rate limit down to the CPU floor.
    pub fn reduce_rate(&self) {
        let mut state = self.state.lock();
        let current = state.settings.rate_limit;
        state.settings.rate_limit = current
            .saturating_sub(self.limits.rate_step)
            .max(self.limits.cpu_warning_rate_floor)
            .min(current);
    }

    /// Critical memory tier: both settings to their minimums.
    pub fn clamp_to_minimum(&self) {
        self.state.lock().settings = self.limits.minimum;
    }

    /// Critical CPU tier: rate limit to its minimum.
    pub fn clamp_rate_to_minimum(&self) {
        self.state.lock().settings.rate_limit = self.limits.minimum.rate_limit;
    }

    /// Restores default settings. Returns true if anything changed.
    /// Pauses are left to run out on their own timer.
    pub fn restore_defaults(&self) -> bool {
        let mut state = self.state.lock();
        let changed = state.settings != self.limits.defaults;
        state.settings = self.limits.defaults;
        changed
    }
}

/// Something the resource monitor can throttle.
///
/// Implemented by the quiz worker pool and the broadcast manager, which each
/// own an [`AdmissionControl`].
pub trait Throttle: Send + Sync {
    fn admission(&self) -> &Arc<AdmissionControl>;

    /// Drops work that has not started yet. Returns how many items were dropped.
    fn drain_pending(&self) -> usize {
        0
    }

    /// Light cleanup: returns spare capacity of internal bookkeeping.
    fn trim(&self) {}

    /// Releases caches that can be rebuilt on demand.
    fn clear_caches(&self) {}

    /// Work currently executing, for diagnostics.
    fn in_flight(&self) -> usize {
        0
    }

    /// Receives every resource sample, for stats display.
    fn observe(&self, _memory_bytes: u64, _cpu_percent: f32) {}
}
