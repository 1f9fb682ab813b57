// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Collaborators that touch the outside world.
//!
//! The orchestrator only sees these traits. `Platform::local` wires the
//! podman/kind/kube implementations; tests substitute in-memory fakes.

pub mod kind;
pub mod podman;

use crate::config::Config;
use crate::error::Result;
use crate::kubernetes::{ApplyMode, KubeDeployer};
use crate::manifest::Manifest;
use crate::types::{BuildSpec, BuiltImage, ClusterHandle};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use kind::KindCluster;
pub use podman::PodmanBuilder;

/// Builds one container image
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<BuiltImage>;
}

/// Creates and destroys ephemeral clusters
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Create a cluster named `name`. An existing cluster with that name is
    /// reported as `ClusterExists`.
    async fn create_cluster(
        &self,
        name: &str,
        config: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle>;

    /// Delete the cluster. A missing cluster is reported as `NotFound`.
    async fn delete_cluster(&self, cluster: &ClusterHandle) -> Result<()>;

    /// Dump logs and cluster state below `dir`
    async fn export_diagnostics(&self, cluster: &ClusterHandle, dir: &Path) -> Result<()>;
}

/// Makes a locally built image available to the cluster's nodes
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load_image(
        &self,
        image: &BuiltImage,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Applies declarative resources. Applying an unchanged manifest twice must
/// succeed both times.
#[async_trait]
pub trait ResourceDeployer: Send + Sync {
    async fn apply(
        &self,
        manifest: &Manifest,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// The full set of collaborators for one run
#[derive(Clone)]
pub struct Platform {
    pub builder: Arc<dyn ImageBuilder>,
    pub provisioner: Arc<dyn ClusterProvisioner>,
    pub loader: Arc<dyn ImageLoader>,
    pub deployer: Arc<dyn ResourceDeployer>,
}

impl Platform {
    /// podman (or docker) builds, a kind cluster and server-side apply
    pub fn local(config: &Config) -> Self {
        let kind = Arc::new(KindCluster::new(
            config.container_tool.clone(),
            config.kubeconfig.clone(),
        ));
        Self {
            builder: Arc::new(PodmanBuilder::new(config.container_tool.clone())),
            provisioner: kind.clone(),
            loader: kind,
            deployer: Arc::new(KubeDeployer::new(
                config.namespace.clone(),
                ApplyMode::ServerSide,
            )),
        }
    }
}
