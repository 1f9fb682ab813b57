// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Readiness probes for deployments and pods

use crate::readiness::{ProbeError, ProbeResult, ReadinessCheck};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client};
use tracing::debug;

/// Ready once every desired replica of the deployment is updated and available
pub fn deployment_available(
    client: Client,
    namespace: impl Into<String>,
    name: impl Into<String>,
) -> ReadinessCheck {
    let namespace = namespace.into();
    let name = name.into();
    let target = format!("deployment {}/{}", namespace, name);

    ReadinessCheck::new(target, move || {
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
        let name = name.clone();
        async move {
            match deployments.get_opt(&name).await {
                Ok(Some(deployment)) => is_deployment_available(&deployment),
                Ok(None) => Ok(false),
                Err(e) => Err(ProbeError::Transient(e.to_string())),
            }
        }
    })
}

/// Availability of a deployment's current rollout.
///
/// A rollout that exceeded its progress deadline will not recover on its own
/// and is reported as terminal.
pub fn is_deployment_available(deployment: &Deployment) -> ProbeResult {
    let Some(status) = deployment.status.as_ref() else {
        return Ok(false);
    };

    let stalled = status.conditions.as_ref().is_some_and(|conditions| {
        conditions.iter().any(|c| {
            c.type_ == "Progressing"
                && c.status == "False"
                && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        })
    });
    if stalled {
        return Err(ProbeError::Terminal(
            "rollout exceeded its progress deadline".to_string(),
        ));
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let observed = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        (Some(_), None) => false,
        (None, _) => true,
    };
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    debug!(desired, updated, available, observed, "Deployment rollout status");
    Ok(observed && updated >= desired && available >= desired)
}

/// Ready once at least one pod matches `selector` and all matching pods are Ready
pub fn pods_ready(
    client: Client,
    namespace: impl Into<String>,
    selector: impl Into<String>,
) -> ReadinessCheck {
    let namespace = namespace.into();
    let selector = selector.into();
    let target = format!("pods {} in {}", selector, namespace);

    ReadinessCheck::new(target, move || {
        let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        let params = ListParams::default().labels(&selector);
        async move {
            let list = pods
                .list(&params)
                .await
                .map_err(|e| ProbeError::Transient(e.to_string()))?;
            if list.items.is_empty() {
                return Ok(false);
            }
            Ok(list.items.iter().all(is_pod_ready))
        }
    })
}

pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}
