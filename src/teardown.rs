// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Best-effort cleanup of an ephemeral cluster.
//!
//! Every step runs even when an earlier one failed. Errors are logged and
//! returned together; they never change the verdict of the test run.

use crate::error::TeardownError;
use crate::platform::ClusterProvisioner;
use crate::types::ClusterHandle;
use std::path::Path;
use tracing::{error, info, instrument, warn};

/// Tear down `cluster`, exporting diagnostics first when the tests failed.
///
/// A cluster that is already gone counts as deleted, so a second teardown
/// succeeds as well.
#[instrument(skip(provisioner, cluster, diagnostics_dir), fields(cluster = %cluster.name))]
pub async fn teardown(
    provisioner: &dyn ClusterProvisioner,
    cluster: &ClusterHandle,
    tests_failed: bool,
    diagnostics_dir: &Path,
) -> Result<(), TeardownError> {
    let mut failures = TeardownError::default();

    if tests_failed {
        info!("Exporting diagnostics to {}", diagnostics_dir.display());
        if let Err(e) = provisioner.export_diagnostics(cluster, diagnostics_dir).await {
            error!("Diagnostics export failed: {}", e);
            failures.failures.push(("export diagnostics".to_string(), e));
        }
    }

    match provisioner.delete_cluster(cluster).await {
        Ok(()) => info!("Cluster {} deleted", cluster.name),
        Err(e) if e.is_not_found() => warn!("Cluster {} was already gone", cluster.name),
        Err(e) => {
            error!("Failed to delete cluster {}: {}", cluster.name, e);
            failures.failures.push(("delete cluster".to_string(), e));
        }
    }

    if failures.failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakePlatform;
    use tokio_util::sync::CancellationToken;

    async fn running_cluster(fake: &FakePlatform) -> ClusterHandle {
        fake.create_cluster("testbed", None, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_teardown_twice_succeeds() {
        let fake = FakePlatform::new();
        let cluster = running_cluster(&fake).await;

        teardown(&fake, &cluster, false, Path::new("diag")).await.unwrap();
        teardown(&fake, &cluster, false, Path::new("diag")).await.unwrap();

        assert!(!fake.has_cluster("testbed"));
        assert!(!fake.called("diagnostics:testbed"));
    }

    #[tokio::test]
    async fn test_diagnostics_exported_before_delete() {
        let fake = FakePlatform::new();
        let cluster = running_cluster(&fake).await;

        teardown(&fake, &cluster, true, Path::new("diag")).await.unwrap();

        assert_eq!(
            fake.events(),
            vec![
                "create:testbed".to_string(),
                "diagnostics:testbed".to_string(),
                "delete:testbed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_are_collected() {
        let fake = FakePlatform::new()
            .failing("diagnostics:testbed")
            .failing("delete:testbed");
        let cluster = running_cluster(&fake).await;

        let err = teardown(&fake, &cluster, true, Path::new("diag"))
            .await
            .unwrap_err();

        let steps: Vec<_> = err.failures.iter().map(|(step, _)| step.as_str()).collect();
        assert_eq!(steps, vec!["export diagnostics", "delete cluster"]);
        assert!(err.to_string().starts_with("teardown finished with 2 error(s)"));
    }

    #[tokio::test]
    async fn test_delete_runs_after_failed_export() {
        let fake = FakePlatform::new().failing("diagnostics:testbed");
        let cluster = running_cluster(&fake).await;

        let err = teardown(&fake, &cluster, true, Path::new("diag"))
            .await
            .unwrap_err();

        assert_eq!(err.failures.len(), 1);
        assert!(!fake.has_cluster("testbed"));
    }
}
