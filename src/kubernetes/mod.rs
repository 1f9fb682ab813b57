// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities: client creation, idempotent apply, namespaces,
//! readiness probes and diagnostics.

pub mod apply;
pub mod client;
pub mod crd;
pub mod diagnostics;
pub mod namespaces;
pub mod workloads;

pub use apply::{ApplyMode, KubeDeployer};
pub use client::client_for;
pub use crd::crd_established;
pub use namespaces::ensure_namespace_exists;
pub use workloads::{deployment_available, pods_ready};
