// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! kind clusters and image loading

use super::{ClusterProvisioner, ImageLoader};
use crate::error::{ProvisionError, Result};
use crate::kubernetes::{client_for, diagnostics::export_cluster_state};
use crate::process::{self, CommandSpec};
use crate::types::{BuiltImage, ClusterHandle};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Ephemeral clusters managed by the `kind` CLI
pub struct KindCluster {
    kind: String,
    container_tool: String,
    kubeconfig: PathBuf,
}

impl KindCluster {
    /// `kubeconfig` is where the credentials of created clusters are written
    pub fn new(container_tool: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kind: "kind".to_string(),
            container_tool: container_tool.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    /// Use a different `kind` executable
    pub fn with_binary(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    fn kind(&self) -> CommandSpec {
        CommandSpec::new(&self.kind)
    }

    async fn exists(&self, name: &str, cancel: &CancellationToken) -> Result<bool> {
        let output = process::run(&self.kind().args(["get", "clusters"]), cancel).await?;
        let exists = cluster_names(&output.stdout).any(|cluster| cluster == name);
        Ok(exists)
    }

    async fn export_logs(&self, cluster: &ClusterHandle, dir: &Path) -> Result<()> {
        let cmd = self
            .kind()
            .args(["export", "logs"])
            .arg(dir.join("kind").to_string_lossy())
            .args(["--name", cluster.name.as_str()]);
        process::run(&cmd, &CancellationToken::new()).await?;
        Ok(())
    }

    async fn export_state(&self, cluster: &ClusterHandle, dir: &Path) -> Result<()> {
        let client = client_for(cluster).await?;
        export_cluster_state(&client, &dir.join("cluster")).await?;
        Ok(())
    }
}

/// Cluster names printed by `kind get clusters`
fn cluster_names(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("No kind clusters"))
}

#[async_trait]
impl ClusterProvisioner for KindCluster {
    #[instrument(skip(self, cancel))]
    async fn create_cluster(
        &self,
        name: &str,
        config: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle> {
        if self.exists(name, cancel).await? {
            return Err(ProvisionError::ClusterExists(name.to_string()));
        }

        info!("Creating kind cluster: {}", name);
        let mut create = self.kind().args(["create", "cluster", "--name", name]);
        if let Some(config) = config {
            create = create.arg("--config").arg(config.to_string_lossy());
        }
        process::run(&create, cancel).await?;

        let export = self
            .kind()
            .args(["export", "kubeconfig", "--name", name, "--kubeconfig"])
            .arg(self.kubeconfig.to_string_lossy());
        process::run(&export, cancel).await?;

        info!("Cluster {} is up, kubeconfig at {}", name, self.kubeconfig.display());
        Ok(ClusterHandle::new(name, &self.kubeconfig))
    }

    #[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
    async fn delete_cluster(&self, cluster: &ClusterHandle) -> Result<()> {
        // Teardown runs after cancellation too, so it never observes the run's token
        let cancel = CancellationToken::new();
        if !self.exists(&cluster.name, &cancel).await? {
            return Err(ProvisionError::NotFound(format!("cluster {}", cluster.name)));
        }

        info!("Deleting kind cluster: {}", cluster.name);
        let delete = self
            .kind()
            .args(["delete", "cluster", "--name", cluster.name.as_str()]);
        process::run(&delete, &cancel).await?;

        match tokio::fs::remove_file(&cluster.kubeconfig).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!("Failed to remove {}: {}", cluster.kubeconfig.display(), e)
            }
            _ => {}
        }
        Ok(())
    }

    #[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
    async fn export_diagnostics(&self, cluster: &ClusterHandle, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;

        let logs = self.export_logs(cluster, dir).await;
        let state = self.export_state(cluster, dir).await;
        if let Err(e) = &state {
            warn!("Cluster state export failed: {}", e);
        }

        logs.and(state)?;
        info!("Diagnostics written to {}", dir.display());
        Ok(())
    }
}

#[async_trait]
impl ImageLoader for KindCluster {
    #[instrument(skip(self, image, cluster, cancel), fields(image = %image.reference, cluster = %cluster.name))]
    async fn load_image(
        &self,
        image: &BuiltImage,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let archive = std::env::temp_dir().join(format!(
            "testbed-{}-{}.tar",
            image.service,
            Uuid::new_v4().simple()
        ));
        let archive_path = archive.to_string_lossy().to_string();

        let save = CommandSpec::new(&self.container_tool)
            .args(["save", "-o", archive_path.as_str()])
            .arg(&image.reference);
        let load = self
            .kind()
            .args(["load", "image-archive", archive_path.as_str()])
            .args(["--name", cluster.name.as_str()]);

        let loaded = async {
            process::run(&save, cancel).await?;
            process::run(&load, cancel).await?;
            Ok::<_, ProvisionError>(())
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!("Archive {} not removed: {}", archive.display(), e);
        }

        loaded?;
        info!("Loaded {} into {}", image.reference, cluster.name);
        Ok(())
    }
}
