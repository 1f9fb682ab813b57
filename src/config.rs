// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::readiness;

/// Run configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_name: String,
    /// Namespace used for resources that don't name one
    pub namespace: String,
    /// Build and deploy with coverage instrumentation
    pub coverage: bool,
    /// Container tool used for builds and image export (podman or docker)
    pub container_tool: String,
    pub kubeconfig: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub plan: Option<PathBuf>,
    pub test_command: Option<String>,
    /// Leave the cluster running after the run
    pub keep_cluster: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cluster_name = lookup("TESTBED_CLUSTER_NAME").unwrap_or_else(|| "testbed".to_string());
        let namespace = lookup("TESTBED_NAMESPACE").unwrap_or_else(|| "testbed".to_string());
        let coverage = parse_flag(lookup("TESTBED_COVERAGE"), "TESTBED_COVERAGE")?;
        let keep_cluster = parse_flag(lookup("TESTBED_KEEP_CLUSTER"), "TESTBED_KEEP_CLUSTER")?;
        let container_tool =
            lookup("TESTBED_CONTAINER_TOOL").unwrap_or_else(|| "podman".to_string());

        let kubeconfig = lookup("TESTBED_KUBECONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join(format!("testbed-{}.kubeconfig", cluster_name)));
        let diagnostics_dir = lookup("TESTBED_DIAGNOSTICS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("testbed-diagnostics"));

        let poll_interval = parse_secs(
            lookup("TESTBED_POLL_INTERVAL_SECS"),
            "TESTBED_POLL_INTERVAL_SECS",
            readiness::POLL_INTERVAL_SECS,
        )?;
        let ready_timeout = parse_secs(
            lookup("TESTBED_READY_TIMEOUT_SECS"),
            "TESTBED_READY_TIMEOUT_SECS",
            readiness::TIMEOUT_SECS,
        )?;

        Ok(Config {
            cluster_name,
            namespace,
            coverage,
            container_tool,
            kubeconfig,
            diagnostics_dir,
            poll_interval,
            ready_timeout,
            plan: lookup("TESTBED_PLAN").map(PathBuf::from),
            test_command: lookup("TESTBED_TEST_COMMAND").filter(|c| !c.trim().is_empty()),
            keep_cluster,
        })
    }
}

fn parse_flag(value: Option<String>, key: &str) -> Result<bool> {
    match value {
        None => Ok(false),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            other => anyhow::bail!("{} must be a boolean, got '{}'", key, other),
        },
    }
}

fn parse_secs(value: Option<String>, key: &str, default: u64) -> Result<Duration> {
    let secs = match value {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a number of seconds", key))?,
        None => default,
    };
    Ok(Duration::from_secs(secs))
}
