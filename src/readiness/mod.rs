// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Polling readiness checks with a hard deadline.
//!
//! A probe reports `Ok(true)` when its target is ready. `Ok(false)` and
//! transient probe errors (the target doesn't exist yet, connection refused)
//! keep the loop going; only a terminal probe error, the deadline or
//! cancellation end it early. The interval is fixed: targets here converge
//! within seconds and are not rate limited.

pub mod probes;

use crate::constants::readiness::{POLL_INTERVAL_SECS, TIMEOUT_SECS};
use crate::error::{ProvisionError, Result};
use crate::orchestrator::phase::{run_phase, Task};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub use probes::{http_health, tcp_port};

#[derive(Debug, Error)]
pub enum ProbeError {
    /// Not ready yet; keep polling
    #[error("{0}")]
    Transient(String),
    /// The target can never become ready; stop waiting
    #[error("{0}")]
    Terminal(String),
}

pub type ProbeResult = std::result::Result<bool, ProbeError>;

type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, ProbeResult> + Send + Sync>;

/// A polled condition gating progress
#[derive(Clone)]
pub struct ReadinessCheck {
    pub target: String,
    pub interval: Duration,
    pub timeout: Duration,
    probe: ProbeFn,
}

impl ReadinessCheck {
    pub fn new<F, Fut>(target: impl Into<String>, probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        Self {
            target: target.into(),
            interval: Duration::from_secs(POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(TIMEOUT_SECS),
            probe: Arc::new(move || probe().boxed()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluate the probe once
    pub async fn evaluate(&self) -> ProbeResult {
        (self.probe)().await
    }
}

impl fmt::Debug for ReadinessCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessCheck")
            .field("target", &self.target)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Poll `check` until it reports ready, fails terminally, times out or is cancelled.
#[instrument(skip(check, cancel), fields(target = %check.target))]
pub async fn wait_until_ready(check: &ReadinessCheck, cancel: &CancellationToken) -> Result<()> {
    let started = Instant::now();
    let deadline = started + check.timeout;
    let mut attempts = 0u32;

    info!(
        "Waiting up to {:?} for {} to become ready",
        check.timeout, check.target
    );

    loop {
        attempts += 1;

        // The evaluation that lands on the deadline still counts, bounded by
        // one interval. Earlier ones are cut off at the deadline.
        let last = Instant::now() >= deadline;
        let cutoff = if last {
            Instant::now() + check.interval
        } else {
            deadline
        };
        let evaluation = tokio::select! {
            outcome = timeout_at(cutoff, check.evaluate()) => outcome,
            _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
        };

        match evaluation {
            Err(_) => break,
            Ok(Ok(true)) => {
                info!(
                    attempts,
                    elapsed = ?started.elapsed(),
                    "{} is ready",
                    check.target
                );
                return Ok(());
            }
            Ok(Ok(false)) => debug!(attempts, "{} not ready yet", check.target),
            Ok(Err(ProbeError::Transient(e))) => {
                debug!(attempts, error = %e, "{} not ready yet", check.target)
            }
            Ok(Err(ProbeError::Terminal(message))) => {
                return Err(ProvisionError::NotReady {
                    target: check.target.clone(),
                    message,
                });
            }
        }

        if last {
            break;
        }

        let next = (Instant::now() + check.interval).min(deadline);
        tokio::select! {
            _ = sleep_until(next) => {}
            _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
        }
    }

    Err(ProvisionError::ReadinessTimeout {
        target: check.target.clone(),
        elapsed: started.elapsed(),
    })
}

/// A group of checks with an explicit ordering choice
#[derive(Clone, Debug)]
pub enum ReadinessStage {
    /// One after another, for checks with a true dependency order
    Sequential(Vec<ReadinessCheck>),
    /// All at once, for independent checks
    Concurrent(Vec<ReadinessCheck>),
}

impl ReadinessStage {
    pub fn checks(&self) -> &[ReadinessCheck] {
        match self {
            ReadinessStage::Sequential(checks) | ReadinessStage::Concurrent(checks) => checks,
        }
    }
}

pub async fn wait_for_stage(stage: &ReadinessStage, cancel: &CancellationToken) -> Result<()> {
    match stage {
        ReadinessStage::Sequential(checks) => {
            for check in checks {
                wait_until_ready(check, cancel).await?;
            }
            Ok(())
        }
        ReadinessStage::Concurrent(checks) => {
            let tasks = checks
                .iter()
                .cloned()
                .map(|check| {
                    let cancel = cancel.clone();
                    Task::new(check.target.clone(), async move {
                        wait_until_ready(&check, &cancel).await
                    })
                })
                .collect();
            run_phase("readiness", tasks).await?;
            Ok(())
        }
    }
}

/// Wait for each stage in order
pub async fn wait_for_stages(stages: &[ReadinessStage], cancel: &CancellationToken) -> Result<()> {
    for stage in stages {
        wait_for_stage(stage, cancel).await?;
    }
    Ok(())
}
