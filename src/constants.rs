// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "testbed";

/// Labels stamped onto every rendered resource
pub mod labels {
    pub const APP: &str = "app.kubernetes.io/name";
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

/// Readiness polling defaults
pub mod readiness {
    /// Poll interval in seconds
    pub const POLL_INTERVAL_SECS: u64 = 2;
    /// Overall deadline in seconds for a single readiness check
    pub const TIMEOUT_SECS: u64 = 300;
}

/// Coverage instrumentation wiring for builds and deployments
pub mod coverage {
    pub const BUILD_ARG: &str = "COVERAGE=1";
    pub const VOLUME_NAME: &str = "coverage";
    pub const MOUNT_PATH: &str = "/coverage";
    pub const ENV_VAR: &str = "COVERAGE_DIR";
}

/// Kinds that are never namespaced, used when a document carries no namespace
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];
