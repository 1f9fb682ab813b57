// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management utilities

use crate::error::{is_already_exists, ProvisionError, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use tracing::{debug, info, instrument};

/// Ensure a namespace exists in the cluster, create if it doesn't.
///
/// An existing namespace is success; any other API error is returned.
#[instrument(skip(client))]
pub async fn ensure_namespace_exists(client: &Client, namespace: &str) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            info!("Namespace {} created", namespace);
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            debug!("Namespace {} already exists", namespace);
            Ok(())
        }
        Err(e) => Err(ProvisionError::ApplyError {
            resource: format!("Namespace/{}", namespace),
            message: e.to_string(),
        }),
    }
}
