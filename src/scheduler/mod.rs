//! Restart scheduler - the long-running control loop of one server instance.
//!
//! Every tick re-reads the instance configuration, then:
//! 1. warns players at 60/30/10/5/1 minutes before a scheduled restart hour
//!    and runs the restart sequence when the hour is reached;
//! 2. if enabled, checks the workshop for updated mods at most every 15 minutes
//!    and runs a five-minute countdown followed by the restart sequence when
//!    anything changed.
//!
//! The restart sequence is: final broadcast, quit and disconnect RCON, stop the
//! service, optional backup, map cleanup, start the service. Every step is
//! logged to the instance event log and no step aborts the sequence.
//!
//! The scheduler is generic over its collaborators so the loop can be driven
//! by a simulated clock and recording fakes.

pub mod schedule;

use crate::config::ConfigManager;
use crate::logging::EventLog;
use crate::metrics::SchedulerMetrics;
use crate::models::InstanceConfig;
use crate::services::map_cleanup;
use crate::services::rcon::RemoteConsole;
use crate::services::system::{BackupError, BackupRunner, ServiceControl};
use crate::services::update_checker::UpdateChecker;
use crate::services::workshop::WorkshopApi;
use crate::state::{Phase, RestartReason, StateChange, StateManager};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};

pub use schedule::{
    NextRestart, WARNING_THRESHOLDS, describe_next_restart, minutes_until_next_restart,
    next_restart,
};

/// Sleep between ordinary ticks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Sleep after a scheduled restart, long enough to leave the restart minute.
pub const POST_RESTART_SLEEP: Duration = Duration::from_secs(65);

/// Minimum time between two workshop update checks.
pub const MOD_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Pause between the final broadcast and shutting the server down.
pub const FINAL_WARNING_PAUSE: Duration = Duration::from_secs(5);

/// Length of the countdown before a mod-update restart, in minutes.
pub const MOD_UPDATE_COUNTDOWN_MINUTES: u32 = 5;

const COUNTDOWN_STEP: Duration = Duration::from_secs(60);

/// When the next tick starts, relative to the tick that just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTick {
    /// Measured from the start of the finished tick.
    FromStart(Duration),
    /// Measured from the end of the finished tick. Returned after a restart
    /// sequence, whose length varies.
    AfterCycle(Duration),
}

/// Log a metrics line every this many ticks (about hourly).
const METRICS_EVERY: u64 = 60;

/// Source of local wall-clock time.
#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// The system's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Restart scheduler for a single instance.
///
/// `connect_console` builds a fresh console client from the configuration
/// snapshot of the current tick, so RCON settings edited while the scheduler
/// runs take effect on the next tick.
pub struct Scheduler<C, F, S, B, W> {
    instance: String,
    configs: ConfigManager,
    clock: C,
    connect_console: F,
    service: S,
    backup: B,
    updates: UpdateChecker<W>,
    events: EventLog,
    state: StateManager,
    metrics: Arc<SchedulerMetrics>,
}

impl<C, F, R, S, B, W> Scheduler<C, F, S, B, W>
where
    C: Clock,
    F: FnMut(&InstanceConfig) -> R,
    R: RemoteConsole,
    S: ServiceControl,
    B: BackupRunner,
    W: WorkshopApi,
{
    pub fn new(
        instance: impl Into<String>,
        configs: ConfigManager,
        clock: C,
        connect_console: F,
        service: S,
        backup: B,
        updates: UpdateChecker<W>,
    ) -> Self {
        let instance = instance.into();
        let events = EventLog::new(&configs.log_dir(), &instance);
        Self {
            instance,
            configs,
            clock,
            connect_console,
            service,
            backup,
            updates,
            events,
            state: StateManager::new(),
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Run until the process is killed.
    pub async fn run(&mut self) {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` completes.
    ///
    /// Shutdown is only observed between ticks; a restart sequence in progress
    /// always runs to completion. Ordinary ticks are spaced from their start,
    /// so the time a tick takes doesn't accumulate as drift. After a restart
    /// sequence the full wait is observed from its end.
    pub async fn run_until<Fut>(&mut self, shutdown: Fut)
    where
        Fut: Future<Output = ()>,
    {
        tracing::info!("Scheduler starting for instance: {}", self.instance);
        self.events.record("Scheduler service started.");
        if !self.configs.instance_exists(&self.instance) {
            let msg = format!(
                "Instance config not found at {}. Using defaults.",
                self.configs.instance_path(&self.instance)
            );
            tracing::warn!("{}", msg);
            self.events.record(&msg);
        }
        self.state.set_phase(Phase::Polling);
        tokio::pin!(shutdown);

        loop {
            let started = Instant::now();
            let deadline = match self.tick().await {
                Ok(NextTick::FromStart(wait)) => started + wait,
                Ok(NextTick::AfterCycle(wait)) => Instant::now() + wait,
                Err(e) => {
                    tracing::error!("Loop Error: {:#}", e);
                    self.events.record(&format!("Loop Error: {:#}", e));
                    self.metrics.record_loop_error();
                    started + POLL_INTERVAL
                }
            };

            if self.metrics.iterations.load(Ordering::Relaxed) % METRICS_EVERY == 0 {
                self.metrics.log_periodic();
            }

            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = &mut shutdown => break,
            }
        }

        tracing::info!("Scheduler stopping for instance: {}", self.instance);
        self.events.record("Scheduler service stopped.");
        self.state.set_phase(Phase::Idle);
        self.metrics.log_summary();
    }

    /// One pass of the control loop.
    ///
    /// # Returns
    /// When the next tick should start
    pub async fn tick(&mut self) -> Result<NextTick> {
        self.metrics.record_iteration();

        let config = self
            .configs
            .load_instance_config(&self.instance)
            .with_context(|| format!("Failed to load config for instance '{}'", self.instance))?;
        let now = self.clock.now();

        if let Some(minutes_left) = minutes_until_next_restart(&config.restart_times, now.time()) {
            if schedule::is_warning_point(minutes_left) {
                self.send_warning(&config, minutes_left).await;
            }

            if minutes_left == 0 {
                tracing::info!("Scheduled time reached, restarting");
                self.events.record("Scheduled time reached. Restarting.");
                self.restart(&config, RestartReason::Scheduled, &[], None).await;
                return Ok(NextTick::AfterCycle(POST_RESTART_SLEEP));
            }
        }

        let checked_at = Instant::now();
        if config.enable_mod_update_check
            && self
                .state
                .read(|s| s.mod_check_due(checked_at, MOD_CHECK_INTERVAL))
        {
            self.state.record_mod_check(now, checked_at);
            self.metrics.record_update_check();
            tracing::info!("Checking for mod updates...");

            let updated = self.updates.check(&config).await?;
            if !updated.is_empty() {
                let msg = format!("Mod updates detected for IDs: {}", updated.join(", "));
                tracing::info!("{}", msg);
                self.events.record(&msg);
                self.state.emit(StateChange::ModUpdatesDetected {
                    ids: updated.clone(),
                });

                self.mod_update_restart(&config, &updated).await;
                return Ok(NextTick::AfterCycle(POLL_INTERVAL));
            }
        }

        Ok(NextTick::FromStart(POLL_INTERVAL))
    }

    /// Broadcast a scheduled-restart warning. Skipped if RCON is unreachable.
    async fn send_warning(&mut self, config: &InstanceConfig, minutes_left: u32) {
        tracing::info!("Warning: Restart in {} min", minutes_left);

        let mut console = (self.connect_console)(config);
        if !console.connect().await {
            tracing::warn!("RCON unavailable, {} minute warning not sent", minutes_left);
            return;
        }

        console
            .broadcast(&format!("WARNING: Scheduled Restart in {} minutes!", minutes_left))
            .await;
        console.disconnect();

        self.metrics.record_warning();
        self.state.emit(StateChange::WarningBroadcast { minutes_left });
    }

    /// Five-minute countdown over one console session, then the restart
    /// sequence.
    async fn mod_update_restart(&mut self, config: &InstanceConfig, updated: &[String]) {
        self.events.record("Initiating Mod Update Restart Sequence (5 min)");
        self.state.set_phase(Phase::Countdown);

        let mut console = (self.connect_console)(config);
        if !console.connect().await {
            tracing::warn!("RCON unavailable, counting down without broadcasts");
        }

        for minutes_left in (1..=MOD_UPDATE_COUNTDOWN_MINUTES).rev() {
            let msg = format!(
                "WARNING: Critical Mod Update Detected! Restart in {} minutes.",
                minutes_left
            );
            tracing::info!("{}", msg);
            if console.is_connected() {
                console.broadcast(&msg).await;
            }
            sleep(COUNTDOWN_STEP).await;
        }

        self.restart(config, RestartReason::ModUpdate, updated, Some(console)).await;
    }

    /// The restart sequence. Failures are logged and the remaining steps
    /// still run.
    async fn restart(
        &mut self,
        config: &InstanceConfig,
        reason: RestartReason,
        updated: &[String],
        console: Option<R>,
    ) {
        self.state.begin_restart(reason, updated);

        let mut console = match console {
            Some(console) => console,
            None => {
                let mut console = (self.connect_console)(config);
                console.connect().await;
                console
            }
        };

        if console.is_connected() {
            let final_message = match reason {
                RestartReason::Scheduled => "Server restarting NOW for Scheduled Maintenance...",
                RestartReason::ModUpdate => "Server restarting for updates NOW...",
            };
            console.broadcast(final_message).await;
            sleep(FINAL_WARNING_PAUSE).await;
            console.quit().await;
        } else {
            tracing::warn!("RCON unavailable, restarting without a final warning");
        }
        console.disconnect();

        tracing::info!("Stopping service {}", config.service_name);
        match self.service.stop(config).await {
            Ok(()) => self.events.record("Service stopped."),
            Err(e) => {
                tracing::error!("Failed to stop service: {}", e);
                self.events.record(&format!("Service stop FAILED: {}", e));
            }
        }

        if config.auto_backup {
            match self.backup.run_backup(config).await {
                Ok(()) => self.events.record("Auto-backup completed successfully."),
                Err(BackupError::NotConfigured) => {
                    tracing::debug!("Auto-backup enabled without a backup command, skipping");
                }
                Err(e) => {
                    tracing::error!("Auto-backup failed: {}", e);
                    self.metrics.record_backup_failure();
                    self.events.record(&format!("Auto-backup FAILED: {}", e));
                }
            }
        }

        tracing::info!("Performing map cleanup...");
        let outcome = map_cleanup::cleanup_reset_zones(config, &self.events);
        self.metrics.record_files_cleaned(outcome.deleted());

        tracing::info!("Starting service {}", config.service_name);
        match self.service.start(config).await {
            Ok(()) => self.events.record("Service restart command issued."),
            Err(e) => {
                tracing::error!("Failed to start service: {}", e);
                self.events.record(&format!("Service start FAILED: {}", e));
            }
        }

        self.state.finish_restart(self.clock.now());
        self.metrics.record_restart(reason == RestartReason::ModUpdate);
        tracing::info!("Restart sequence ({}) complete", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkshopItem;
    use crate::services::system::{BackupError, ServiceError};
    use crate::services::workshop::{MetadataCache, WorkshopError};
    use camino::Utf8PathBuf;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct FakeConsole {
        journal: Journal,
        reachable: bool,
        connected: bool,
    }

    impl RemoteConsole for FakeConsole {
        async fn connect(&mut self) -> bool {
            self.connected = self.reachable;
            self.connected
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn broadcast(&mut self, message: &str) {
            self.journal.borrow_mut().push(format!("broadcast:{}", message));
        }

        async fn quit(&mut self) {
            self.journal.borrow_mut().push("quit".to_string());
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    struct FakeService(Journal);

    impl ServiceControl for FakeService {
        async fn stop(&mut self, _config: &InstanceConfig) -> Result<(), ServiceError> {
            self.0.borrow_mut().push("stop".to_string());
            Ok(())
        }

        async fn start(&mut self, _config: &InstanceConfig) -> Result<(), ServiceError> {
            self.0.borrow_mut().push("start".to_string());
            Ok(())
        }
    }

    struct FakeBackup(Journal);

    impl BackupRunner for FakeBackup {
        async fn run_backup(&mut self, _config: &InstanceConfig) -> Result<(), BackupError> {
            self.0.borrow_mut().push("backup".to_string());
            Ok(())
        }
    }

    struct NoWorkshop;

    impl WorkshopApi for NoWorkshop {
        async fn fetch_details(
            &self,
            _ids: &[String],
        ) -> Result<Vec<(String, WorkshopItem)>, WorkshopError> {
            Ok(Vec::new())
        }
    }

    fn at(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    fn clock_at(hour: u32, min: u32) -> MockClock {
        let mut clock = MockClock::new();
        clock.expect_now().return_const(at(hour, min));
        clock
    }

    fn scheduler(
        temp: &TempDir,
        clock: MockClock,
        reachable: bool,
        journal: &Journal,
    ) -> Scheduler<
        MockClock,
        impl FnMut(&InstanceConfig) -> FakeConsole,
        FakeService,
        FakeBackup,
        NoWorkshop,
    > {
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let configs = ConfigManager::new(root.join("config")).unwrap();
        let mut config = InstanceConfig::for_instance("default");
        config.install_dir = root.join("install");
        config.restart_times = vec![0, 6, 12, 18];
        configs.save_instance_config("default", &config).unwrap();

        let console_journal = Rc::clone(journal);
        let connect = move |_: &InstanceConfig| FakeConsole {
            journal: Rc::clone(&console_journal),
            reachable,
            connected: false,
        };
        let cache = MetadataCache::open(NoWorkshop, configs.workshop_cache_path());

        Scheduler::new(
            "default",
            configs,
            clock,
            connect,
            FakeService(Rc::clone(journal)),
            FakeBackup(Rc::clone(journal)),
            UpdateChecker::new(cache),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_tick_polls_again_in_a_minute() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut scheduler = scheduler(&temp, clock_at(9, 13), true, &journal);

        assert_eq!(scheduler.tick().await.unwrap(), NextTick::FromStart(POLL_INTERVAL));
        assert!(journal.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_broadcast_without_quit() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut scheduler = scheduler(&temp, clock_at(11, 30), true, &journal);
        let mut rx = scheduler.state().subscribe();

        assert_eq!(scheduler.tick().await.unwrap(), NextTick::FromStart(POLL_INTERVAL));
        assert_eq!(
            *journal.borrow(),
            vec!["broadcast:WARNING: Scheduled Restart in 30 minutes!"]
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StateChange::WarningBroadcast { minutes_left: 30 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_console_skips_warning() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut scheduler = scheduler(&temp, clock_at(17, 55), false, &journal);

        assert_eq!(scheduler.tick().await.unwrap(), NextTick::FromStart(POLL_INTERVAL));
        assert!(journal.borrow().is_empty());
        assert_eq!(
            scheduler.metrics().warnings_sent.load(Ordering::Relaxed),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_hour_runs_sequence() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut scheduler = scheduler(&temp, clock_at(6, 0), true, &journal);

        assert_eq!(
            scheduler.tick().await.unwrap(),
            NextTick::AfterCycle(POST_RESTART_SLEEP)
        );
        assert_eq!(
            *journal.borrow(),
            vec![
                "broadcast:Server restarting NOW for Scheduled Maintenance...",
                "quit",
                "stop",
                "backup",
                "start",
            ]
        );

        let state = scheduler.state().snapshot();
        assert_eq!(state.restarts_completed, 1);
        assert_eq!(state.phase, Phase::Polling);
        assert_eq!(state.last_restart, Some(at(6, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_without_console_still_cycles_service() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut scheduler = scheduler(&temp, clock_at(0, 0), false, &journal);

        scheduler.tick().await.unwrap();
        assert_eq!(*journal.borrow(), vec!["stop", "backup", "start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::default();
        let mut scheduler = scheduler(&temp, MockClock::new(), true, &journal);

        let config_path = Utf8PathBuf::try_from(temp.path().join("config"))
            .unwrap()
            .join("instances")
            .join("default.yaml");
        std::fs::write(&config_path, "restart_times: not-a-list\n").unwrap();

        assert!(scheduler.tick().await.is_err());
    }
}
