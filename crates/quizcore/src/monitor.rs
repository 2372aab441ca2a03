//! Resource monitor: samples process memory and CPU on a fixed period and
//! applies graded mitigation to every registered [`Throttle`].
//!
//! Tiers, lowest to highest:
//!
//! | Tier | Action |
//! |---|---|
//! | CPU warning | step rate limit down (floor 15/s) |
//! | memory warning | halve batch size, step rate down, light cleanup |
//! | CPU critical | pause intake 30s, rate to minimum |
//! | memory critical | batch and rate to minimum, pause intake 60s, full cleanup |
//! | memory emergency | critical actions, halt, drain queues, diagnostics |
//!
//! Only the highest triggered tier is applied per pass. Defaults come back once
//! memory drops below the warning threshold less a hysteresis margin and CPU is
//! calm; pauses always run out on their own timer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics::Metrics;
use crate::quiz::admission::Throttle;
use crate::quiz::pool::WorkerPoolStats;

const MB: u64 = 1024 * 1024;

/// One sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    /// Resident set size in bytes
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub cpu_percent: f32,
    pub thread_count: Option<usize>,
    pub open_files: Option<usize>,
}

impl ResourceSample {
    pub fn new(memory_bytes: u64, cpu_percent: f32) -> Self {
        Self {
            timestamp: Utc::now(),
            memory_bytes,
            virtual_memory_bytes: 0,
            cpu_percent,
            thread_count: None,
            open_files: None,
        }
    }

    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / MB as f64
    }
}

/// One OS thread of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: u32,
    pub name: Option<String>,
}

/// Thread and descriptor listing taken when memory reaches the emergency tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticSnapshot {
    pub threads: Vec<ThreadInfo>,
    /// `fd -> target` for every open descriptor
    pub open_files: Vec<String>,
    /// Set when either list was cut at the configured limit
    pub truncated: bool,
}

/// Source of resource samples.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> AppResult<ResourceSample>;

    /// Lists threads and open descriptors, at most `limit` of each.
    /// Samplers without process access return an empty snapshot.
    fn diagnostics(&self, _limit: usize) -> AppResult<DiagnosticSnapshot> {
        Ok(DiagnosticSnapshot::default())
    }
}

/// Samples the current process through `sysinfo`.
pub struct SysinfoSampler {
    pid: sysinfo::Pid,
    system: Mutex<sysinfo::System>,
}

impl SysinfoSampler {
    pub fn new() -> AppResult<Self> {
        use sysinfo::{ProcessRefreshKind, RefreshKind, System};

        let pid = sysinfo::get_current_pid()
            .map_err(|e| AppError::Validation(format!("cannot resolve own pid: {}", e)))?;
        let system = System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::everything()));

        Ok(Self {
            pid,
            system: Mutex::new(system),
        })
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> AppResult<ResourceSample> {
        use sysinfo::{ProcessRefreshKind, ProcessesToUpdate};

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        let process = system
            .process(self.pid)
            .ok_or_else(|| AppError::Validation(format!("process {} not visible to sysinfo", self.pid)))?;

        Ok(ResourceSample {
            timestamp: Utc::now(),
            memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            cpu_percent: process.cpu_usage(),
            thread_count: process.tasks().map(|tasks| tasks.len().max(1)),
            open_files: count_open_files(),
        })
    }

    fn diagnostics(&self, limit: usize) -> AppResult<DiagnosticSnapshot> {
        let mut thread_ids: Vec<u32> = {
            let system = self.system.lock();
            let process = system
                .process(self.pid)
                .ok_or_else(|| AppError::Validation(format!("process {} not visible to sysinfo", self.pid)))?;
            process
                .tasks()
                .map(|tasks| tasks.iter().map(|tid| tid.as_u32()).collect())
                .unwrap_or_default()
        };
        thread_ids.sort_unstable();

        let mut truncated = thread_ids.len() > limit;
        let threads = thread_ids
            .into_iter()
            .take(limit)
            .map(|id| ThreadInfo {
                id,
                name: thread_name(id),
            })
            .collect();

        let (open_files, files_truncated) = list_open_files(limit);
        truncated |= files_truncated;

        Ok(DiagnosticSnapshot {
            threads,
            open_files,
            truncated,
        })
    }
}

#[cfg(target_os = "linux")]
fn count_open_files() -> Option<usize> {
    std::fs::read_dir("/proc/self/fd").ok().map(|entries| entries.count())
}

#[cfg(not(target_os = "linux"))]
fn count_open_files() -> Option<usize> {
    None
}

#[cfg(target_os = "linux")]
fn thread_name(id: u32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/self/task/{}/comm", id))
        .ok()
        .map(|name| name.trim_end().to_string())
}

#[cfg(not(target_os = "linux"))]
fn thread_name(_id: u32) -> Option<String> {
    None
}

#[cfg(target_os = "linux")]
fn list_open_files(limit: usize) -> (Vec<String>, bool) {
    let Ok(entries) = std::fs::read_dir("/proc/self/fd") else {
        return (Vec::new(), false);
    };

    let mut files: Vec<(u32, String)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let fd = entry.file_name().to_string_lossy().parse::<u32>().ok()?;
            let target = std::fs::read_link(entry.path()).ok()?;
            Some((fd, target.display().to_string()))
        })
        .collect();
    files.sort_unstable_by_key(|(fd, _)| *fd);

    let truncated = files.len() > limit;
    let listed = files
        .into_iter()
        .take(limit)
        .map(|(fd, target)| format!("{} -> {}", fd, target))
        .collect();
    (listed, truncated)
}

#[cfg(not(target_os = "linux"))]
fn list_open_files(_limit: usize) -> (Vec<String>, bool) {
    (Vec::new(), false)
}

/// Graded mitigation levels, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MitigationTier {
    CpuWarning,
    MemoryWarning,
    CpuCritical,
    MemoryCritical,
    MemoryEmergency,
}

impl MitigationTier {
    pub fn label(&self) -> &'static str {
        match self {
            MitigationTier::CpuWarning => "cpu_warning",
            MitigationTier::MemoryWarning => "memory_warning",
            MitigationTier::CpuCritical => "cpu_critical",
            MitigationTier::MemoryCritical => "memory_critical",
            MitigationTier::MemoryEmergency => "memory_emergency",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub memory_warning_bytes: u64,
    pub memory_critical_bytes: u64,
    pub memory_emergency_bytes: u64,
    pub cpu_warning_percent: f32,
    pub cpu_critical_percent: f32,
    pub check_interval: Duration,
    /// Wait after a failed sampling pass
    pub error_backoff: Duration,
    /// Period of the light cleanup pass, independent of load
    pub cleanup_interval: Duration,
    pub history_size: usize,
    /// Threads and descriptors listed per emergency snapshot
    pub diagnostic_list_limit: usize,
    pub memory_critical_cooldown: Duration,
    pub cpu_critical_cooldown: Duration,
    pub emergency_halt: Duration,
    /// Share of the warning threshold memory must drop below it before relaxing
    pub hysteresis_ratio: f64,
    pub cpu_hysteresis_percent: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        use config::monitor::*;

        Self {
            memory_warning_bytes: *MEMORY_WARNING_MB * MB,
            memory_critical_bytes: *MEMORY_CRITICAL_MB * MB,
            memory_emergency_bytes: *MEMORY_EMERGENCY_MB * MB,
            cpu_warning_percent: *CPU_WARNING_PERCENT,
            cpu_critical_percent: *CPU_CRITICAL_PERCENT,
            check_interval: check_interval(),
            error_backoff: error_backoff(),
            cleanup_interval: cleanup_interval(),
            history_size: HISTORY_SIZE,
            diagnostic_list_limit: DIAGNOSTIC_LIST_LIMIT,
            memory_critical_cooldown: Duration::from_secs(MEMORY_CRITICAL_COOLDOWN_SECS),
            cpu_critical_cooldown: Duration::from_secs(CPU_CRITICAL_COOLDOWN_SECS),
            emergency_halt: Duration::from_secs(EMERGENCY_HALT_SECS),
            hysteresis_ratio: HYSTERESIS_RATIO,
            cpu_hysteresis_percent: CPU_HYSTERESIS_PERCENT,
        }
    }
}

impl MonitorConfig {
    /// Thresholds must be strictly increasing within each resource.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.memory_warning_bytes < self.memory_critical_bytes
            && self.memory_critical_bytes < self.memory_emergency_bytes)
        {
            return Err(AppError::Validation(
                "memory thresholds must satisfy warning < critical < emergency".to_string(),
            ));
        }
        if self.cpu_warning_percent >= self.cpu_critical_percent {
            return Err(AppError::Validation(
                "cpu thresholds must satisfy warning < critical".to_string(),
            ));
        }
        if self.history_size == 0 {
            return Err(AppError::Validation("history size must be positive".to_string()));
        }
        Ok(())
    }

    /// Highest tier triggered by `sample`, if any.
    pub fn classify(&self, sample: &ResourceSample) -> Option<MitigationTier> {
        let memory = sample.memory_bytes;
        let cpu = sample.cpu_percent;

        let memory_tier = if memory > self.memory_emergency_bytes {
            Some(MitigationTier::MemoryEmergency)
        } else if memory > self.memory_critical_bytes {
            Some(MitigationTier::MemoryCritical)
        } else if memory > self.memory_warning_bytes {
            Some(MitigationTier::MemoryWarning)
        } else {
            None
        };

        let cpu_tier = if cpu > self.cpu_critical_percent {
            Some(MitigationTier::CpuCritical)
        } else if cpu > self.cpu_warning_percent {
            Some(MitigationTier::CpuWarning)
        } else {
            None
        };

        memory_tier.max(cpu_tier)
    }

    /// Whether load is low enough to restore default settings.
    fn is_calm(&self, sample: &ResourceSample) -> bool {
        let memory_floor = self.memory_warning_bytes as f64 * (1.0 - self.hysteresis_ratio);
        (sample.memory_bytes as f64) < memory_floor
            && sample.cpu_percent < self.cpu_warning_percent - self.cpu_hysteresis_percent
    }
}

/// Snapshot returned by [`ResourceMonitor::get_performance_stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceStats {
    pub latest: Option<ResourceSample>,
    /// True while any target runs below default settings or has intake closed
    pub is_throttled: bool,
    pub accepting_new: bool,
    pub active_tier: Option<MitigationTier>,
    pub samples_retained: usize,
    pub peak_memory_bytes: u64,
}

struct MonitorState {
    history: VecDeque<ResourceSample>,
    active_tier: Option<MitigationTier>,
    last_cleanup: Instant,
    last_diagnostics: Option<DiagnosticSnapshot>,
}

pub struct ResourceMonitor {
    config: MonitorConfig,
    sampler: Arc<dyn ResourceSampler>,
    targets: Vec<Arc<dyn Throttle>>,
    state: Mutex<MonitorState>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

impl ResourceMonitor {
    pub fn new(
        config: MonitorConfig,
        sampler: Arc<dyn ResourceSampler>,
        targets: Vec<Arc<dyn Throttle>>,
        metrics: Arc<Metrics>,
    ) -> AppResult<Arc<Self>> {
        config.validate()?;
        let history = VecDeque::with_capacity(config.history_size);

        Ok(Arc::new(Self {
            config,
            sampler,
            targets,
            state: Mutex::new(MonitorState {
                history,
                active_tier: None,
                last_cleanup: Instant::now(),
                last_diagnostics: None,
            }),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
            metrics,
        }))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Runs one sampling pass and applies at most one mitigation tier.
    pub fn check(&self) -> AppResult<Option<MitigationTier>> {
        for target in &self.targets {
            target.admission().resume_if_expired();
        }

        let sample = self.sampler.sample()?;
        self.record(&sample);

        let tier = self.config.classify(&sample);
        match tier {
            Some(tier) => self.apply(tier, &sample),
            None if self.config.is_calm(&sample) => self.relax(),
            None => {}
        }

        self.run_periodic_cleanup();
        self.metrics
            .throttled
            .set(i64::from(self.is_throttled()));
        Ok(tier)
    }

    fn record(&self, sample: &ResourceSample) {
        {
            let mut state = self.state.lock();
            if state.history.len() >= self.config.history_size {
                state.history.pop_front();
            }
            state.history.push_back(sample.clone());
        }

        self.metrics
            .process_memory_bytes
            .set(i64::try_from(sample.memory_bytes).unwrap_or(i64::MAX));
        self.metrics.process_cpu_percent.set(f64::from(sample.cpu_percent));
        for target in &self.targets {
            target.observe(sample.memory_bytes, sample.cpu_percent);
        }
    }

    fn apply(&self, tier: MitigationTier, sample: &ResourceSample) {
        self.metrics
            .mitigations_total
            .with_label_values(&[tier.label()])
            .inc();

        match tier {
            MitigationTier::CpuWarning => {
                log::warn!("CPU warning: {:.1}%", sample.cpu_percent);
                for target in &self.targets {
                    target.admission().reduce_rate();
                }
            }
            MitigationTier::MemoryWarning => {
                log::warn!("Memory warning: {:.0}MB", sample.memory_mb());
                for target in &self.targets {
                    target.admission().degrade_warning();
                }
                self.light_cleanup();
            }
            MitigationTier::CpuCritical => {
                log::error!("CPU critical: {:.1}%", sample.cpu_percent);
                for target in &self.targets {
                    let admission = target.admission();
                    admission.clamp_rate_to_minimum();
                    admission.pause_intake(self.config.cpu_critical_cooldown);
                }
            }
            MitigationTier::MemoryCritical => {
                log::error!("Memory critical: {:.0}MB", sample.memory_mb());
                for target in &self.targets {
                    let admission = target.admission();
                    admission.clamp_to_minimum();
                    admission.pause_intake(self.config.memory_critical_cooldown);
                }
                self.full_cleanup();
            }
            MitigationTier::MemoryEmergency => {
                log::error!("MEMORY EMERGENCY: {:.0}MB", sample.memory_mb());
                let mut drained = 0;
                for target in &self.targets {
                    let admission = target.admission();
                    admission.clamp_to_minimum();
                    admission.halt(self.config.emergency_halt);
                    drained += target.drain_pending();
                }
                self.full_cleanup();
                self.log_diagnostics(sample, drained);
            }
        }

        self.state.lock().active_tier = Some(tier);
    }

    fn relax(&self) {
        let mut restored = false;
        for target in &self.targets {
            restored |= target.admission().restore_defaults();
        }
        if restored {
            log::info!("Load back to normal, default throughput restored");
        }
        self.state.lock().active_tier = None;
    }

    /// Drops spare capacity without discarding anything that would need rebuilding.
    fn light_cleanup(&self) {
        for target in &self.targets {
            target.trim();
        }
        self.state.lock().history.shrink_to(self.config.history_size);
    }

    /// Light cleanup plus dropping caches.
    fn full_cleanup(&self) {
        self.light_cleanup();
        for target in &self.targets {
            target.clear_caches();
        }
        self.state.lock().last_cleanup = Instant::now();
    }

    fn run_periodic_cleanup(&self) {
        let due = {
            let mut state = self.state.lock();
            let due = state.last_cleanup.elapsed() >= self.config.cleanup_interval;
            if due {
                state.last_cleanup = Instant::now();
            }
            due
        };
        if due {
            log::debug!("Periodic light cleanup");
            self.light_cleanup();
        }
    }

    fn log_diagnostics(&self, sample: &ResourceSample, drained: usize) {
        let (retained, min_mb, max_mb) = {
            let state = self.state.lock();
            let min = state.history.iter().map(|s| s.memory_bytes).min().unwrap_or(0);
            let max = state.history.iter().map(|s| s.memory_bytes).max().unwrap_or(0);
            (state.history.len(), min / MB, max / MB)
        };

        log::error!("━━━━━━━━━━━━━━━━ Emergency diagnostics ━━━━━━━━━━━━━━━━");
        log::error!("  rss:            {:.0}MB", sample.memory_mb());
        log::error!("  virtual:        {}MB", sample.virtual_memory_bytes / MB);
        log::error!("  cpu:            {:.1}%", sample.cpu_percent);
        match sample.thread_count {
            Some(threads) => log::error!("  threads:        {}", threads),
            None => log::error!("  threads:        unavailable"),
        }
        match sample.open_files {
            Some(files) => log::error!("  open files:     {}", files),
            None => log::error!("  open files:     unavailable"),
        }
        log::error!("  drained tasks:  {}", drained);
        log::error!("  memory trend:   {}MB..{}MB over {} samples", min_mb, max_mb, retained);
        for target in &self.targets {
            let admission = target.admission();
            log::error!(
                "  {}: {} in flight, settings {:?}, paused for {:?}",
                admission.name(),
                target.in_flight(),
                admission.settings(),
                admission.paused_for()
            );
        }

        match self.sampler.diagnostics(self.config.diagnostic_list_limit) {
            Ok(snapshot) => {
                log::error!("  threads listed: {}", snapshot.threads.len());
                for thread in &snapshot.threads {
                    log::error!(
                        "    thread {} ({})",
                        thread.id,
                        thread.name.as_deref().unwrap_or("unnamed")
                    );
                }
                log::error!("  open descriptors listed: {}", snapshot.open_files.len());
                for file in &snapshot.open_files {
                    log::error!("    fd {}", file);
                }
                if snapshot.truncated {
                    log::error!("  (lists cut at {} entries)", self.config.diagnostic_list_limit);
                }
                self.state.lock().last_diagnostics = Some(snapshot);
            }
            Err(e) => log::error!("  thread and descriptor listing failed: {}", e),
        }
    }

    /// Snapshot taken by the most recent emergency pass.
    pub fn last_diagnostics(&self) -> Option<DiagnosticSnapshot> {
        self.state.lock().last_diagnostics.clone()
    }

    fn is_throttled(&self) -> bool {
        self.targets.iter().any(|target| target.admission().is_throttled())
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        let is_throttled = self.is_throttled();
        let accepting_new = self.targets.iter().all(|target| target.admission().is_accepting());
        let state = self.state.lock();

        PerformanceStats {
            latest: state.history.back().cloned(),
            is_throttled,
            accepting_new,
            active_tier: state.active_tier,
            samples_retained: state.history.len(),
            peak_memory_bytes: state.history.iter().map(|s| s.memory_bytes).max().unwrap_or(0),
        }
    }

    /// Retained samples, oldest first.
    pub fn history(&self) -> Vec<ResourceSample> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Spawns the periodic sampling loop. Sampling failures are logged and
    /// retried after the error back-off; they never stop the loop.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            log::info!(
                "Resource monitor started (every {:?}, memory tiers {}/{}/{}MB)",
                monitor.config.check_interval,
                monitor.config.memory_warning_bytes / MB,
                monitor.config.memory_critical_bytes / MB,
                monitor.config.memory_emergency_bytes / MB
            );
            loop {
                let wait = match monitor.check() {
                    Ok(_) => monitor.config.check_interval,
                    Err(e) => {
                        log::error!("Resource check failed: {}", e);
                        monitor.config.error_backoff
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = monitor.shutdown.cancelled() => break,
                }
            }
            log::info!("Resource monitor stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Resource monitor task ended abnormally: {}", e);
            }
        }
    }
}

/// Renders the operator `/performance` report.
pub fn format_performance_report(perf: &PerformanceStats, pool: &WorkerPoolStats) -> String {
    let mut report = String::from("📊 Performance\n\n");

    match &perf.latest {
        Some(sample) => {
            report.push_str(&format!("💾 Memory: {:.1} MB\n", sample.memory_mb()));
            report.push_str(&format!("⚡ CPU: {:.1}%\n", sample.cpu_percent));
            if let Some(threads) = sample.thread_count {
                report.push_str(&format!("🧵 Threads: {}\n", threads));
            }
            report.push_str(&format!("🕐 Sampled: {}\n", sample.timestamp.format("%H:%M:%S UTC")));
        }
        None => report.push_str("No samples yet\n"),
    }
    report.push_str(&format!("📈 Peak memory: {:.1} MB\n", perf.peak_memory_bytes as f64 / MB as f64));

    report.push_str("\n🎯 Quiz workers\n");
    report.push_str(&format!("Active: {}/{}\n", pool.active_threads, pool.max_workers));
    report.push_str(&format!("Queued: {}\n", pool.queued_tasks));
    report.push_str(&format!("Active chats: {}\n", pool.active_chat_count));
    report.push_str(&format!("Batch size: {}\n", pool.batch_size));
    report.push_str(&format!("Rate limit: {}/s\n", pool.rate_limit));

    let status = if !perf.accepting_new {
        "⏸ Paused"
    } else if perf.is_throttled {
        "⚠️ Throttled"
    } else {
        "✅ Normal"
    };
    report.push_str(&format!("\nStatus: {}", status));
    if let Some(tier) = perf.active_tier {
        report.push_str(&format!(" ({})", tier.label()));
    }
    report
}
