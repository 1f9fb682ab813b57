// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Requested shape of the ephemeral cluster
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Provider specific cluster config file (a kind config for `KindCluster`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}

/// A running ephemeral cluster and the credentials to reach it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterHandle {
    pub name: String,
    pub kubeconfig: PathBuf,
}

impl ClusterHandle {
    pub fn new(name: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kubeconfig: kubeconfig.into(),
        }
    }
}
