// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use testbed::config::Config;
use testbed::orchestrator::{Orchestrator, OrchestratorConfig};
use testbed::plan::Plan;
use testbed::platform::Platform;
use testbed::process::{self, CommandSpec};
use testbed::teardown::teardown;
use testbed::types::ClusterHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting testbed");

    // Load configuration
    let config = Config::from_env()?;
    let plan_path = config
        .plan
        .clone()
        .context("TESTBED_PLAN must point to a plan file")?;
    info!(
        "Configuration loaded: cluster={}, namespace={}, coverage={}",
        config.cluster_name, config.namespace, config.coverage
    );

    let plan = Plan::load(&plan_path)
        .await?
        .with_coverage(config.coverage)
        .into_provision_plan()
        .await?;

    let platform = Platform::local(&config);
    let orchestrator = Orchestrator::new(platform.clone(), OrchestratorConfig::from(&config));

    // Ctrl-C cancels in-flight builds, commands and waits
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let environment = match orchestrator.provision(plan, &cancel).await {
        Ok(environment) => environment,
        Err(failure) => {
            error!("Provisioning failed: {}", failure.error);
            if let Some(cluster) = &failure.cluster {
                cleanup(&platform, &config, cluster, true).await;
            }
            return Err(failure).context("Failed to provision the test environment");
        }
    };

    for endpoint in &environment.endpoints {
        info!("{} is reachable at {}", endpoint.service, endpoint);
    }

    let tests_failed = match &config.test_command {
        Some(command) => {
            // Relative paths in the test command resolve like the plan's own
            let workdir = plan_path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let cmd = CommandSpec::new("sh")
                .args(["-c", command.as_str()])
                .current_dir(workdir)
                .env("TESTBED_KUBECONFIG", environment.cluster.kubeconfig.to_string_lossy())
                .envs(environment.endpoints.iter().map(|e| {
                    (
                        format!("TESTBED_{}_ENDPOINT", env_key(&e.service)),
                        e.to_string(),
                    )
                }));
            match process::run(&cmd, &cancel).await {
                Ok(_) => {
                    info!("Tests passed");
                    false
                }
                Err(e) => {
                    error!("Tests failed: {}", e);
                    true
                }
            }
        }
        None => false,
    };

    cleanup(&platform, &config, &environment.cluster, tests_failed).await;

    if tests_failed {
        anyhow::bail!("Test command failed");
    }
    Ok(())
}

async fn cleanup(platform: &Platform, config: &Config, cluster: &ClusterHandle, failed: bool) {
    if config.keep_cluster {
        info!(
            "Keeping cluster {}, kubeconfig at {}",
            cluster.name,
            cluster.kubeconfig.display()
        );
        return;
    }

    // Teardown errors are reported but don't change the outcome
    if let Err(e) = teardown(
        platform.provisioner.as_ref(),
        cluster,
        failed,
        &config.diagnostics_dir,
    )
    .await
    {
        warn!("{}", e);
    }
}

/// `my-api` becomes `MY_API`
fn env_key(service: &str) -> String {
    service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
