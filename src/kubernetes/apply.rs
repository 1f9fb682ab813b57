// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Idempotent apply of declarative resource sets.
//!
//! Applying the same manifest twice always succeeds. Server-side apply is
//! idempotent by construction; in create mode an `AlreadyExists` answer is
//! classified as success while every other error, including a `409 Conflict`,
//! still surfaces.

use crate::constants::{CLUSTER_SCOPED_KINDS, FIELD_MANAGER};
use crate::error::{is_already_exists, ProvisionError, Result};
use crate::kubernetes::client::client_for;
use crate::kubernetes::namespaces::ensure_namespace_exists;
use crate::manifest::{describe, Manifest};
use crate::platform::ResourceDeployer;
use crate::types::ClusterHandle;
use async_trait::async_trait;
use kube::{
    api::{DynamicObject, Patch, PatchParams, PostParams},
    core::{ApiResource, GroupVersionKind},
    Api, Client,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// How documents are written to the API server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Forced server-side apply: creates or updates to the desired state
    #[default]
    ServerSide,
    /// Create only; a resource that already exists is left untouched
    Create,
}

/// `ResourceDeployer` backed by the Kubernetes API.
///
/// Clients are cached per cluster name. The target namespace of a manifest is
/// created on first use; applies into other namespaces don't wait on it.
pub struct KubeDeployer {
    mode: ApplyMode,
    default_namespace: String,
    pinned: Option<Client>,
    clients: Mutex<HashMap<String, Client>>,
    namespaces: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl KubeDeployer {
    pub fn new(default_namespace: impl Into<String>, mode: ApplyMode) -> Self {
        Self {
            mode,
            default_namespace: default_namespace.into(),
            pinned: None,
            clients: Mutex::default(),
            namespaces: Mutex::default(),
        }
    }

    /// Use an existing client instead of the cluster's kubeconfig
    pub fn with_client(client: Client, default_namespace: impl Into<String>, mode: ApplyMode) -> Self {
        Self {
            mode,
            default_namespace: default_namespace.into(),
            pinned: Some(client),
            clients: Mutex::default(),
            namespaces: Mutex::default(),
        }
    }

    async fn client(&self, cluster: &ClusterHandle) -> Result<Client> {
        if let Some(client) = &self.pinned {
            return Ok(client.clone());
        }
        if let Some(client) = self.clients.lock().await.get(&cluster.name) {
            return Ok(client.clone());
        }

        let client = client_for(cluster).await?;
        Ok(self
            .clients
            .lock()
            .await
            .entry(cluster.name.clone())
            .or_insert(client)
            .clone())
    }

    async fn ensure_namespace(&self, client: &Client, namespace: &str) -> Result<()> {
        let cell = self
            .namespaces
            .lock()
            .await
            .entry(namespace.to_string())
            .or_default()
            .clone();

        // A failed attempt leaves the cell empty, so the next apply retries
        cell.get_or_try_init(|| ensure_namespace_exists(client, namespace))
            .await?;
        Ok(())
    }

    async fn apply_in_cluster(&self, manifest: &Manifest, cluster: &ClusterHandle) -> Result<()> {
        let client = self.client(cluster).await?;
        let namespace = manifest
            .namespace
            .as_deref()
            .unwrap_or(&self.default_namespace);

        self.ensure_namespace(&client, namespace).await?;
        apply_manifest(&client, manifest, namespace, self.mode).await
    }
}

#[async_trait]
impl ResourceDeployer for KubeDeployer {
    async fn apply(
        &self,
        manifest: &Manifest,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
            applied = self.apply_in_cluster(manifest, cluster) => applied,
        }
    }
}

/// Apply every document of `manifest` in order
#[instrument(skip(client, manifest), fields(manifest = %manifest.name, documents = manifest.len()))]
pub async fn apply_manifest(
    client: &Client,
    manifest: &Manifest,
    default_namespace: &str,
    mode: ApplyMode,
) -> Result<()> {
    for object in &manifest.documents {
        apply_object(client, object, default_namespace, mode).await?;
    }
    info!("Applied {} resource(s) from {}", manifest.len(), manifest.name);
    Ok(())
}

/// Apply a single document idempotently
pub async fn apply_object(
    client: &Client,
    object: &DynamicObject,
    default_namespace: &str,
    mode: ApplyMode,
) -> Result<()> {
    let resource = describe(object);
    let (api, name) = api_for(client, object, default_namespace)?;

    let outcome = match mode {
        ApplyMode::ServerSide => {
            let pp = PatchParams::apply(FIELD_MANAGER).force();
            api.patch(&name, &pp, &Patch::Apply(object)).await.map(|_| ())
        }
        ApplyMode::Create => match api.create(&PostParams::default(), object).await {
            Err(e) if is_already_exists(&e) => {
                debug!("{} already exists, leaving it as is", resource);
                Ok(())
            }
            other => other.map(|_| ()),
        },
    };

    outcome.map_err(|e| ProvisionError::ApplyError {
        resource: resource.clone(),
        message: e.to_string(),
    })?;
    debug!("Applied {}", resource);
    Ok(())
}

/// Resolve the dynamic API for a document without a discovery round trip
fn api_for(
    client: &Client,
    object: &DynamicObject,
    default_namespace: &str,
) -> Result<(Api<DynamicObject>, String)> {
    let invalid = |message: String| ProvisionError::ManifestError {
        name: describe(object),
        message,
    };

    let types = object
        .types
        .as_ref()
        .ok_or_else(|| invalid("missing apiVersion/kind".to_string()))?;
    let gvk = GroupVersionKind::try_from(types).map_err(|e| invalid(e.to_string()))?;
    let name = object
        .metadata
        .name
        .clone()
        .ok_or_else(|| invalid("missing metadata.name".to_string()))?;
    let resource = ApiResource::from_gvk(&gvk);

    let api = if CLUSTER_SCOPED_KINDS.contains(&gvk.kind.as_str()) {
        Api::all_with(client.clone(), &resource)
    } else {
        let namespace = object
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(default_namespace);
        Api::namespaced_with(client.clone(), namespace, &resource)
    };
    Ok((api, name))
}
