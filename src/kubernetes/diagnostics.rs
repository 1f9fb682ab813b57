// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster state dump for failed runs

use crate::error::Result;
use crate::kubernetes::workloads::is_pod_ready;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::{
    api::{ListParams, LogParams},
    Api, Client,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

const LOG_TAIL_LINES: i64 = 200;

/// Write events, pods and the logs of every non-ready pod below `dir`.
///
/// Returns the files written. A pod whose logs can't be fetched is skipped.
#[instrument(skip(client), fields(dir = %dir.display()))]
pub async fn export_cluster_state(client: &Client, dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let mut written = Vec::new();

    let events: Api<Event> = Api::all(client.clone());
    let events = events.list(&ListParams::default()).await?;
    written.push(write_yaml(dir, "events.yaml", &events.items).await?);

    let pods: Api<Pod> = Api::all(client.clone());
    let pods = pods.list(&ListParams::default()).await?;
    written.push(write_yaml(dir, "pods.yaml", &pods.items).await?);

    for pod in pods.items.iter().filter(|pod| !is_pod_ready(pod)) {
        let (Some(namespace), Some(name)) =
            (pod.metadata.namespace.as_deref(), pod.metadata.name.as_deref())
        else {
            continue;
        };

        let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(LOG_TAIL_LINES),
            ..Default::default()
        };
        match api.logs(name, &params).await {
            Ok(logs) => {
                let path = dir.join(format!("{}_{}.log", namespace, name));
                tokio::fs::write(&path, logs).await?;
                written.push(path);
            }
            Err(e) => warn!("No logs for pod {}/{}: {}", namespace, name, e),
        }
    }

    info!("Exported {} diagnostic file(s)", written.len());
    Ok(written)
}

async fn write_yaml<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<PathBuf> {
    let yaml = serde_yaml::to_string(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize {}: {}", file, e),
        )
    })?;
    let path = dir.join(file);
    tokio::fs::write(&path, yaml).await?;
    Ok(path)
}
