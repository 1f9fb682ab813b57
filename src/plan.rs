// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The plan file: what a run builds, deploys and waits for.
//!
//! ```yaml
//! cluster:
//!   config: kind.yaml
//! builds:
//!   - service: api
//!     image: localhost/api
//!     dockerfile: api/Dockerfile
//!     context: .
//! prerequisites:
//!   - manifests/crds.yaml
//! services:
//!   - service: api
//!     port: 8080
//!     nodePort: 30080
//!     healthPath: /healthz
//! readiness:
//!   - mode: sequential
//!     checks:
//!       - type: crd
//!         name: workflows.example.io
//!   - mode: concurrent
//!     timeoutSecs: 120
//!     checks:
//!       - type: deployment
//!         name: api
//!       - type: serviceHealth
//!         service: api
//!         path: /healthz
//! ```
//!
//! Relative paths are resolved against the directory of the plan file.

use crate::error::{ProvisionError, Result};
use crate::kubernetes::{client_for, crd_established, deployment_available, pods_ready};
use crate::manifest::{Manifest, ServiceManifest};
use crate::orchestrator::{Environment, OrchestratorConfig, ProvisionPlan};
use crate::readiness::{http_health, tcp_port, ReadinessCheck, ReadinessStage};
use crate::types::{BuildSpec, ClusterSpec};
use anyhow::Context;
use kube::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub cluster: ClusterSpec,
    #[serde(default)]
    pub builds: Vec<BuildSpec>,
    /// Manifest files applied alongside the image loads
    #[serde(default)]
    pub prerequisites: Vec<PathBuf>,
    #[serde(default)]
    pub services: Vec<ServiceManifest>,
    #[serde(default)]
    pub readiness: Vec<ReadinessStageSpec>,
}

/// A readiness stage as written in the plan
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessStageSpec {
    pub mode: StageMode,
    /// Overrides the configured readiness timeout for the checks of this stage
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub checks: Vec<CheckSpec>,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageMode {
    Sequential,
    Concurrent,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CheckSpec {
    Http {
        url: String,
    },
    Tcp {
        address: String,
    },
    /// HTTP health of a deployed service through its published endpoint
    ServiceHealth {
        service: String,
        #[serde(default = "default_health_path")]
        path: String,
    },
    Deployment {
        name: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    Pods {
        selector: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    Crd {
        name: String,
    },
    /// A check built in code; keeps its own interval and timeout
    #[serde(skip_deserializing)]
    Custom(ReadinessCheck),
}

fn default_health_path() -> String {
    "/".to_string()
}

impl Plan {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse plan")
    }

    /// Load a plan file, resolving relative paths against its directory
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        let plan = Self::from_yaml(&yaml)
            .with_context(|| format!("Invalid plan {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(plan.relative_to(base))
    }

    fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };

        self.cluster.config = self.cluster.config.as_deref().map(resolve);
        for build in &mut self.builds {
            build.dockerfile = resolve(build.dockerfile.as_path());
            build.context = resolve(build.context.as_path());
        }
        self.prerequisites = self.prerequisites.iter().map(|p| resolve(p.as_path())).collect();
        self
    }

    /// Switch coverage instrumentation on for every build and service
    pub fn with_coverage(mut self, coverage: bool) -> Self {
        if coverage {
            self.builds.iter_mut().for_each(|b| b.coverage = true);
            self.services.iter_mut().for_each(|s| s.coverage = true);
        }
        self
    }

    /// Read the prerequisite manifests and produce the runtime plan
    pub async fn into_provision_plan(self) -> anyhow::Result<ProvisionPlan> {
        let mut prerequisites = Vec::with_capacity(self.prerequisites.len());
        for path in &self.prerequisites {
            let manifest = Manifest::from_file(path)
                .await
                .with_context(|| format!("Failed to load prerequisite {}", path.display()))?;
            debug!("Loaded {} with {} document(s)", manifest.name, manifest.len());
            prerequisites.push(manifest);
        }

        info!(
            builds = self.builds.len(),
            prerequisites = prerequisites.len(),
            services = self.services.len(),
            "Plan loaded"
        );
        Ok(ProvisionPlan {
            cluster: self.cluster,
            builds: self.builds,
            prerequisites,
            services: self.services,
            readiness: self.readiness,
            post_deploy: Vec::new(),
        })
    }
}

/// Turns declarative checks into probes against a provisioned environment.
/// A cluster client is only created if a check needs one.
struct Resolver<'a> {
    environment: &'a Environment,
    config: &'a OrchestratorConfig,
    client: OnceCell<Client>,
}

impl Resolver<'_> {
    async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| client_for(&self.environment.cluster))
            .await
            .cloned()
    }

    fn namespace(&self, namespace: &Option<String>) -> String {
        namespace
            .clone()
            .unwrap_or_else(|| self.config.namespace.clone())
    }

    async fn check(&self, spec: &CheckSpec, timeout: Duration) -> Result<ReadinessCheck> {
        let check = match spec {
            CheckSpec::Custom(check) => return Ok(check.clone()),
            CheckSpec::Http { url } => http_health(parse_url(url)?),
            CheckSpec::Tcp { address } => tcp_port(address.clone()),
            CheckSpec::ServiceHealth { service, path } => {
                let endpoint = self.environment.endpoint(service).ok_or_else(|| {
                    ProvisionError::NotFound(format!("published endpoint of service {}", service))
                })?;
                let url = endpoint.url(path).map_err(|e| invalid_check(e.to_string()))?;
                http_health(url)
            }
            CheckSpec::Deployment { name, namespace } => {
                deployment_available(self.client().await?, self.namespace(namespace), name.clone())
            }
            CheckSpec::Pods {
                selector,
                namespace,
            } => pods_ready(self.client().await?, self.namespace(namespace), selector.clone()),
            CheckSpec::Crd { name } => crd_established(self.client().await?, name.clone()),
        };

        Ok(check
            .with_interval(self.config.poll_interval)
            .with_timeout(timeout))
    }
}

/// Resolve the plan's readiness stages for `environment`
pub async fn resolve_stages(
    specs: &[ReadinessStageSpec],
    environment: &Environment,
    config: &OrchestratorConfig,
) -> Result<Vec<ReadinessStage>> {
    let resolver = Resolver {
        environment,
        config,
        client: OnceCell::new(),
    };

    let mut stages = Vec::with_capacity(specs.len());
    for spec in specs {
        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(config.ready_timeout);
        let mut checks = Vec::with_capacity(spec.checks.len());
        for check in &spec.checks {
            checks.push(resolver.check(check, timeout).await?);
        }
        stages.push(match spec.mode {
            StageMode::Sequential => ReadinessStage::Sequential(checks),
            StageMode::Concurrent => ReadinessStage::Concurrent(checks),
        });
    }
    Ok(stages)
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| invalid_check(format!("{}: {}", url, e)))
}

fn invalid_check(message: String) -> ProvisionError {
    ProvisionError::ManifestError {
        name: "readiness".to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BuiltImages, ClusterHandle, ServiceEndpoint};

    const PLAN: &str = r#"
cluster:
  name: e2e
  config: kind.yaml
builds:
  - service: api
    image: localhost/api
    dockerfile: api/Dockerfile
    context: .
    buildArgs:
      PROFILE: release
  - service: worker
    image: localhost/worker
    dockerfile: /src/worker/Dockerfile
    context: /src
    tag:
      fixed: dev
prerequisites:
  - manifests/crds.yaml
services:
  - service: api
    port: 8080
    nodePort: 30080
    healthPath: /healthz
    env:
      LOG_LEVEL: debug
  - service: worker
    port: 9000
    replicas: 2
readiness:
  - mode: sequential
    checks:
      - type: crd
        name: workflows.example.io
  - mode: concurrent
    timeoutSecs: 120
    checks:
      - type: serviceHealth
        service: api
        path: /healthz
      - type: tcp
        address: localhost:30080
"#;

    fn environment() -> Environment {
        Environment {
            cluster: ClusterHandle::new("e2e", "/nonexistent/kubeconfig"),
            images: BuiltImages::default(),
            endpoints: vec![ServiceEndpoint {
                service: "api".to_string(),
                host: "localhost".to_string(),
                port: 30080,
            }],
        }
    }

    #[test]
    fn test_parse_plan() {
        let plan = Plan::from_yaml(PLAN).unwrap();

        assert_eq!(plan.cluster.name.as_deref(), Some("e2e"));
        assert_eq!(plan.builds.len(), 2);
        assert_eq!(plan.builds[0].build_args["PROFILE"], "release");
        assert_eq!(plan.builds[1].tag, crate::types::TagStrategy::Fixed("dev".to_string()));
        assert_eq!(plan.services[0].node_port, Some(30080));
        assert_eq!(plan.services[1].replicas, 2);
        assert_eq!(plan.readiness.len(), 2);
        assert_eq!(plan.readiness[0].mode, StageMode::Sequential);
        assert_eq!(plan.readiness[1].timeout_secs, Some(120));
        assert!(matches!(
            &plan.readiness[1].checks[0],
            CheckSpec::ServiceHealth { service, path } if service == "api" && path == "/healthz"
        ));
    }

    #[test]
    fn test_unknown_check_type_is_rejected() {
        let err = Plan::from_yaml("readiness:\n  - mode: concurrent\n    checks:\n      - type: custom\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse plan"));
    }

    #[test]
    fn test_relative_paths_follow_the_plan() {
        let plan = Plan::from_yaml(PLAN)
            .unwrap()
            .relative_to(Path::new("/work/e2e"));

        assert_eq!(plan.cluster.config, Some(PathBuf::from("/work/e2e/kind.yaml")));
        assert_eq!(plan.builds[0].dockerfile, PathBuf::from("/work/e2e/api/Dockerfile"));
        assert_eq!(plan.builds[0].context, PathBuf::from("/work/e2e/."));
        assert_eq!(plan.builds[1].dockerfile, PathBuf::from("/src/worker/Dockerfile"));
        assert_eq!(
            plan.prerequisites,
            vec![PathBuf::from("/work/e2e/manifests/crds.yaml")]
        );
    }

    #[test]
    fn test_coverage_applies_to_builds_and_services() {
        let plan = Plan::from_yaml(PLAN).unwrap().with_coverage(true);

        assert!(plan.builds.iter().all(|b| b.coverage));
        assert!(plan.services.iter().all(|s| s.coverage));
    }

    #[tokio::test]
    async fn test_load_reads_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("manifests")).unwrap();
        std::fs::write(
            dir.path().join("manifests/settings.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("plan.yaml"),
            "prerequisites:\n  - manifests/settings.yaml\n",
        )
        .unwrap();

        let plan = Plan::load(&dir.path().join("plan.yaml"))
            .await
            .unwrap()
            .into_provision_plan()
            .await
            .unwrap();

        assert_eq!(plan.prerequisites.len(), 1);
        assert_eq!(plan.prerequisites[0].name, "settings.yaml");
        assert_eq!(plan.prerequisites[0].len(), 1);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_is_reported() {
        let plan = Plan {
            prerequisites: vec![PathBuf::from("/nonexistent/crds.yaml")],
            ..Default::default()
        };

        let err = plan.into_provision_plan().await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/crds.yaml"));
    }

    #[tokio::test]
    async fn test_network_checks_resolve_without_cluster_access() {
        let plan = Plan::from_yaml(PLAN).unwrap();
        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(500),
            ..Default::default()
        };

        let stages = resolve_stages(&plan.readiness[1..], &environment(), &config)
            .await
            .unwrap();

        let checks = stages[0].checks();
        assert!(matches!(stages[0], ReadinessStage::Concurrent(_)));
        assert_eq!(checks[0].target, "HTTP http://localhost:30080/healthz");
        assert_eq!(checks[0].timeout, Duration::from_secs(120));
        assert_eq!(checks[0].interval, Duration::from_millis(500));
        assert_eq!(checks[1].target, "TCP localhost:30080");
    }

    #[tokio::test]
    async fn test_cluster_checks_need_a_kubeconfig() {
        let plan = Plan::from_yaml(PLAN).unwrap();

        let err = resolve_stages(&plan.readiness[..1], &environment(), &OrchestratorConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::KubeconfigError(_)));
    }

    #[tokio::test]
    async fn test_health_of_unpublished_service_is_an_error() {
        let specs = vec![ReadinessStageSpec {
            mode: StageMode::Concurrent,
            timeout_secs: None,
            checks: vec![CheckSpec::ServiceHealth {
                service: "worker".to_string(),
                path: "/".to_string(),
            }],
        }];

        let err = resolve_stages(&specs, &environment(), &OrchestratorConfig::default())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}
