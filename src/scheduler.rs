use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{self, DispatchSummary};
use crate::notify::ReminderPayload;
use crate::push::{PushTransport, SendOptions};
use crate::schedule::{self, TickMode};
use crate::store::{FAILURE_CEILING, FileStore, RETENTION_DAYS};

/// Both modes tick once a minute; mode changes what the evaluator does with
/// a tick, not how often ticks happen.
pub const TICK_PERIOD: Duration = Duration::from_secs(60);

// --- Tick authorization ---

/// Consulted before each tick. A horizontally scaled deployment implements
/// this over its lock service so only one instance sends per tick; refusal
/// skips the cycle silently.
#[async_trait::async_trait]
pub trait TickGate: Send + Sync {
    async fn authorize(&self) -> bool;
}

/// Single-instance deployment: every tick is authorized.
pub struct SoleInstance;

#[async_trait::async_trait]
impl TickGate for SoleInstance {
    async fn authorize(&self) -> bool {
        true
    }
}

// --- Engine ---

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    /// Active subscriptions considered this tick.
    pub considered: usize,
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub deactivated: usize,
}

/// One full reminder cycle: load subscriptions, evaluate due-ness, build
/// the payload, dispatch. The minute ticker and the manual trigger run
/// exactly this, so test and production delivery cannot drift apart.
pub struct ReminderEngine {
    store: Arc<FileStore>,
    transport: Arc<dyn PushTransport>,
    options: SendOptions,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<FileStore>,
        transport: Arc<dyn PushTransport>,
        options: SendOptions,
    ) -> Self {
        Self {
            store,
            transport,
            options,
        }
    }

    pub async fn run_cycle(&self, mode: TickMode) -> Result<CycleSummary> {
        self.run_cycle_at(mode, Utc::now()).await
    }

    // Clock is a parameter so tests can pin it.
    async fn run_cycle_at(&self, mode: TickMode, now: DateTime<Utc>) -> Result<CycleSummary> {
        let candidates = self.store.list_active_with_prefs();
        let considered = candidates.len();

        // Each user's wall clock resolves in their own zone; the deployment
        // zone is only a fallback.
        let mut due = Vec::new();
        for (sub, prefs) in candidates {
            let zone = prefs.timezone.unwrap_or(self.store.default_zone());
            let local = now.with_timezone(&zone);
            if schedule::is_due(&prefs, local.hour(), local.minute(), mode) {
                due.push(sub);
            }
        }

        if due.is_empty() {
            tracing::debug!("No reminders due ({considered} subscriptions considered)");
            return Ok(CycleSummary {
                considered,
                ..Default::default()
            });
        }

        let payload = match mode {
            TickMode::Production => ReminderPayload::reminder(),
            TickMode::Test => ReminderPayload::test_reminder(),
        };
        let outcomes = dispatch::dispatch(
            &self.store,
            self.transport.as_ref(),
            &due,
            &payload,
            &self.options,
        )
        .await?;
        let summary = DispatchSummary::from_outcomes(&outcomes);
        tracing::info!(
            "Reminder cycle: {} due, {} sent, {} failed, {} deactivated",
            due.len(),
            summary.sent,
            summary.failed,
            summary.deactivated
        );
        Ok(CycleSummary {
            considered,
            due: due.len(),
            sent: summary.sent,
            failed: summary.failed,
            deactivated: summary.deactivated,
        })
    }
}

// --- Scheduler ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Stopped,
    Production,
    Test,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub mode: Mode,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_tick_in_seconds: Option<u64>,
}

struct RunState {
    mode: Mode,
    cancel: Option<CancellationToken>,
    started_at: Option<DateTime<Utc>>,
}

/// Owns the ticker task. Exactly one ticker runs at a time; switching modes
/// cancels the previous one before spawning the next. Constructed by the
/// composition root and shared behind an `Arc`; there is no global handle.
pub struct Scheduler {
    engine: Arc<ReminderEngine>,
    gate: Arc<dyn TickGate>,
    production_locked: bool,
    state: Mutex<RunState>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<ReminderEngine>,
        gate: Arc<dyn TickGate>,
        production_locked: bool,
    ) -> Self {
        Self {
            engine,
            gate,
            production_locked,
            state: Mutex::new(RunState {
                mode: Mode::Stopped,
                cancel: None,
                started_at: None,
            }),
        }
    }

    /// Start (or switch to) the production ticker.
    pub fn start(&self) {
        self.spawn_ticker(Mode::Production);
    }

    /// Start (or switch to) the accelerated test ticker. Refused on locked
    /// deployments.
    pub fn start_test(&self) -> Result<()> {
        anyhow::ensure!(
            !self.production_locked,
            "test mode is disabled on this deployment"
        );
        self.spawn_ticker(Mode::Test);
        Ok(())
    }

    /// Idempotent: stopping a stopped scheduler is a no-op. A tick already
    /// in flight finishes; no further ticks start.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.mode = Mode::Stopped;
        state.started_at = None;
    }

    /// Whether this deployment refuses test mode and manual triggers.
    pub fn locked(&self) -> bool {
        self.production_locked
    }

    /// One synchronous due-check-and-dispatch cycle, bypassing the timer
    /// but reusing the ticker's exact path. Refused on locked deployments.
    pub async fn trigger_once(&self, mode: TickMode) -> Result<CycleSummary> {
        anyhow::ensure!(
            !self.production_locked,
            "manual triggers are disabled on this deployment"
        );
        self.engine.run_cycle(mode).await
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().expect("scheduler state poisoned");
        let next_tick_in_seconds = state.started_at.map(|started| {
            let period = TICK_PERIOD.as_secs();
            let elapsed = (Utc::now() - started).num_seconds().max(0) as u64;
            period - (elapsed % period)
        });
        SchedulerStatus {
            mode: state.mode,
            running: state.mode != Mode::Stopped,
            started_at: state.started_at,
            next_tick_in_seconds,
        }
    }

    fn spawn_ticker(&self, mode: Mode) {
        let tick_mode = match mode {
            Mode::Test => TickMode::Test,
            _ => TickMode::Production,
        };

        let mut state = self.state.lock().expect("scheduler state poisoned");
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        state.mode = mode;
        state.started_at = Some(Utc::now());
        drop(state);

        let engine = self.engine.clone();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            // A slow tick delays the next one; two ticks never overlap, and
            // missed ticks are dropped rather than replayed in a burst.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                "Scheduler ticking every {}s ({tick_mode:?} mode)",
                TICK_PERIOD.as_secs()
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if !gate.authorize().await {
                            tracing::debug!("Tick not authorized; skipping");
                            continue;
                        }
                        // A failing tick is logged, never fatal to the loop.
                        if let Err(e) = engine.run_cycle(tick_mode).await {
                            tracing::error!("Reminder tick failed: {e:#}");
                        }
                    }
                }
            }
            tracing::info!("Scheduler ticker stopped");
        });
    }
}

// --- Daily cleanup ---

/// Maintenance sweep at a fixed local time, independent of the minute
/// ticker: hard-delete subscriptions past the failure ceiling or idle past
/// the retention window.
pub fn spawn_cleanup(
    store: Arc<FileStore>,
    hour: u32,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_hour(store.default_zone(), hour, Utc::now());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    match store.delete_stale(RETENTION_DAYS, FAILURE_CEILING) {
                        Ok(0) => tracing::debug!("Cleanup: nothing to remove"),
                        Ok(removed) => {
                            tracing::info!("Cleanup: removed {removed} stale subscriptions");
                        }
                        Err(e) => tracing::error!("Cleanup failed: {e:#}"),
                    }
                }
            }
        }
    })
}

fn until_next_hour(zone: Tz, hour: u32, now: DateTime<Utc>) -> Duration {
    let local = now.with_timezone(&zone);
    let mut date = local.date_naive();
    if local.hour() >= hour {
        date = date.succ_opt().unwrap_or(date);
    }
    let wall = date
        .and_hms_opt(hour, 0, 0)
        .expect("cleanup hour is validated at config load");
    match zone.from_local_datetime(&wall).earliest() {
        Some(next) => (next.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(TICK_PERIOD),
        // The wall-clock time doesn't exist today (DST gap); retry in a day.
        None => Duration::from_secs(24 * 60 * 60),
    }
}
