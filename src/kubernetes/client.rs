// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster client creation from an exported kubeconfig

use crate::error::{ProvisionError, Result};
use crate::types::ClusterHandle;
use kube::{config::KubeConfigOptions, Client};
use tracing::{debug, instrument};

/// Create a Kubernetes client for an ephemeral cluster
#[instrument(skip(handle), fields(cluster = %handle.name))]
pub async fn client_for(handle: &ClusterHandle) -> Result<Client> {
    let kubeconfig = tokio::fs::read_to_string(&handle.kubeconfig)
        .await
        .map_err(|e| {
            ProvisionError::KubeconfigError(format!(
                "Failed to read kubeconfig {} for cluster {}: {}",
                handle.kubeconfig.display(),
                handle.name,
                e
            ))
        })?;

    debug!("Using kubeconfig {}", handle.kubeconfig.display());
    create_client_from_kubeconfig(&kubeconfig).await
}

/// Create a Kubernetes client from a kubeconfig string
async fn create_client_from_kubeconfig(kubeconfig: &str) -> Result<Client> {
    use kube::config::Kubeconfig;

    let kubeconfig_parsed: Kubeconfig = serde_yaml::from_str(kubeconfig)
        .map_err(|e| ProvisionError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))?;

    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig_parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                ProvisionError::KubeconfigError(format!("Failed to create config: {}", e))
            })?;

    Client::try_from(client_config)
        .map_err(|e| ProvisionError::KubeconfigError(format!("Failed to create client: {}", e)))
}
