//! Periodic reclamation of idle sessions.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use agent_relay_core::{IsolationMode, RelayConfig, SessionState};
use tokio::task::JoinHandle;

use crate::{registry::SessionRegistry, session::Teardown};

/// Shortest interval the spawned sweeper will tick at.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub reaped: usize,
    /// Stale but claimed by another task, or still starting.
    pub skipped: usize,
    /// Reaped, but some teardown step failed.
    pub failed: usize,
}

/// Removes sessions that have been inactive for too long.
pub struct ReapSweeper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    direct_timeout: Duration,
    container_timeout: Duration,
}

impl ReapSweeper {
    #[must_use]
    pub const fn new(
        registry: Arc<SessionRegistry>,
        interval: Duration,
        direct_timeout: Duration,
        container_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            interval,
            direct_timeout,
            container_timeout,
        }
    }

    #[must_use]
    pub fn from_config(registry: Arc<SessionRegistry>, config: &RelayConfig) -> Self {
        Self::new(
            registry,
            config.sweep_interval,
            config.direct_idle_timeout,
            config.container_idle_timeout,
        )
    }

    const fn threshold(&self, mode: IsolationMode) -> Duration {
        match mode {
            IsolationMode::Direct => self.direct_timeout,
            IsolationMode::Container => self.container_timeout,
        }
    }

    /// Run one pass as of `now`.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.registry.snapshot().await {
            report.examined += 1;
            if session.idle_for(now) < self.threshold(session.mode()) {
                continue;
            }
            if session.state() == SessionState::Starting {
                report.skipped += 1;
                continue;
            }

            match session.try_teardown().await {
                Teardown::Busy => {
                    tracing::debug!(session = %session.key(), "Session busy, skipping");
                    report.skipped += 1;
                    continue;
                }
                Teardown::AlreadyReleased => {}
                Teardown::Released { clean } => {
                    report.reaped += 1;
                    if !clean {
                        report.failed += 1;
                    }
                    tracing::info!(
                        session = %session.key(),
                        idle_secs = session.idle_for(now).as_secs(),
                        "Reaped inactive session"
                    );
                }
            }
            self.registry.remove_session(&session).await;
        }

        if report.reaped > 0 || report.skipped > 0 {
            tracing::info!(?report, "Sweep finished");
        }
        report
    }

    /// Sweep on a fixed interval until the task is aborted.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        let period = if self.interval.is_zero() {
            tracing::warn!("Sweep interval is zero, using {MIN_SWEEP_INTERVAL:?}");
            MIN_SWEEP_INTERVAL
        } else {
            self.interval
        };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep(Instant::now()).await;
            }
        })
    }
}
