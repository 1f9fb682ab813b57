// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Image build for {service} failed: {message}")]
    BuildError { service: String, message: String },

    #[error("Cluster {0} already exists")]
    ClusterExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid manifest {name}: {message}")]
    ManifestError { name: String, message: String },

    #[error("Failed to apply {resource}: {message}")]
    ApplyError { resource: String, message: String },

    #[error("Timed out waiting for {target} after {elapsed:?}")]
    ReadinessTimeout { target: String, elapsed: Duration },

    #[error("{target} will not become ready: {message}")]
    NotReady { target: String, message: String },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task {task} did not complete: {message}")]
    TaskAborted { task: String, message: String },
}

impl ProvisionError {
    /// True when the error means the target is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProvisionError::NotFound(_) => true,
            ProvisionError::KubeError(e) => is_not_found(e),
            _ => false,
        }
    }

    /// True when the error is a cancellation, or a phase whose every failed
    /// task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ProvisionError::Cancelled => true,
            ProvisionError::Phase(phase) => {
                !phase.failures.is_empty()
                    && phase.failures.iter().all(|failure| failure.error.is_cancelled())
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// A single failed task inside a phase.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: ProvisionError,
}

/// Composite error for a phase: every failed task, not just the first one.
#[derive(Debug)]
pub struct PhaseError {
    pub phase: String,
    pub total: usize,
    pub failures: Vec<TaskFailure>,
}

impl PhaseError {
    pub fn failed_tasks(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.task.as_str())
    }
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "phase '{}' failed: {} of {} task(s) failed",
            self.phase,
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.task, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for PhaseError {}

/// Cleanup failures collected during teardown. Reported, never fatal.
#[derive(Debug, Default)]
pub struct TeardownError {
    pub failures: Vec<(String, ProvisionError)>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown finished with {} error(s)", self.failures.len())?;
        for (step, error) in &self.failures {
            write!(f, "\n  - {}: {}", step, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// `409 AlreadyExists` from the API server. A `409 Conflict` is a different
/// failure and does not match.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}
