// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Sequential phase driver: build, cluster, prerequisites, deploy, readiness
//! and post-deploy, each one a barrier for the next.

use crate::config::Config;
use crate::constants::readiness::{POLL_INTERVAL_SECS, TIMEOUT_SECS};
use crate::error::{ProvisionError, Result};
use crate::manifest::{Manifest, ServiceManifest};
use crate::orchestrator::phase::{run_phase, Task};
use crate::plan::{resolve_stages, ReadinessStageSpec};
use crate::platform::Platform;
use crate::readiness::wait_for_stages;
use crate::types::{BuildSpec, BuiltImages, ClusterHandle, ClusterSpec, ServiceEndpoint};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Settings handed to the orchestrator at construction
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Used when the plan doesn't name its cluster
    pub cluster_name: String,
    /// Namespace for services and checks that don't name one
    pub namespace: String,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cluster_name: "testbed".to_string(),
            namespace: "testbed".to_string(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            ready_timeout: Duration::from_secs(TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            namespace: config.namespace.clone(),
            poll_interval: config.poll_interval,
            ready_timeout: config.ready_timeout,
        }
    }
}

/// Everything one run provisions
#[derive(Debug, Default)]
pub struct ProvisionPlan {
    pub cluster: ClusterSpec,
    pub builds: Vec<BuildSpec>,
    /// Resources that don't depend on built images, applied with the image loads
    pub prerequisites: Vec<Manifest>,
    pub services: Vec<ServiceManifest>,
    pub readiness: Vec<ReadinessStageSpec>,
    pub post_deploy: Vec<PostDeployHook>,
}

/// A provisioned environment, handed to test code
#[derive(Clone, Debug)]
pub struct Environment {
    pub cluster: ClusterHandle,
    pub images: BuiltImages,
    pub endpoints: Vec<ServiceEndpoint>,
}

impl Environment {
    pub fn endpoint(&self, service: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.iter().find(|e| e.service == service)
    }
}

type HookFn =
    Arc<dyn Fn(Arc<Environment>, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Test-data seeding run once the environment is ready
#[derive(Clone)]
pub struct PostDeployHook {
    pub name: String,
    run: HookFn,
}

impl PostDeployHook {
    pub fn new<F, Fut>(name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(Arc<Environment>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |env, cancel| hook(env, cancel).boxed()),
        }
    }
}

impl fmt::Debug for PostDeployHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostDeployHook")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A failed run. `cluster` is set once a cluster was created, so the caller
/// can still tear it down.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ProvisionFailure {
    pub error: ProvisionError,
    pub cluster: Option<ClusterHandle>,
}

impl ProvisionFailure {
    fn new(error: ProvisionError, cluster: Option<&ClusterHandle>) -> Self {
        Self {
            error,
            cluster: cluster.cloned(),
        }
    }
}

pub struct Orchestrator {
    platform: Platform,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(platform: Platform, config: OrchestratorConfig) -> Self {
        Self { platform, config }
    }

    /// Provision the environment described by `plan`.
    ///
    /// Phases run strictly in order and the first failing phase ends the run.
    pub async fn provision(
        &self,
        plan: ProvisionPlan,
        cancel: &CancellationToken,
    ) -> std::result::Result<Environment, ProvisionFailure> {
        let cluster_name = plan
            .cluster
            .name
            .clone()
            .unwrap_or_else(|| self.config.cluster_name.clone());
        let span = info_span!("provision", cluster = %cluster_name);

        let result = self
            .run(plan, cluster_name, cancel)
            .instrument(span)
            .await;

        // Tasks that stopped on cancellation surface as phase failures
        result.map_err(|failure| {
            if cancel.is_cancelled() && failure.error.is_cancelled() {
                ProvisionFailure {
                    error: ProvisionError::Cancelled,
                    ..failure
                }
            } else {
                failure
            }
        })
    }

    async fn run(
        &self,
        plan: ProvisionPlan,
        cluster_name: String,
        cancel: &CancellationToken,
    ) -> std::result::Result<Environment, ProvisionFailure> {
        let started = Instant::now();
        let before_cluster = |error: ProvisionError| ProvisionFailure::new(error, None);

        validate(&plan).map_err(before_cluster)?;

        checkpoint(cancel).map_err(before_cluster)?;
        let images = self
            .build(&plan.builds, cancel)
            .await
            .map_err(before_cluster)?;

        checkpoint(cancel).map_err(before_cluster)?;
        let cluster = self
            .create_cluster(cluster_name, plan.cluster.config.clone(), cancel)
            .await
            .map_err(before_cluster)?;
        let with_cluster = |error: ProvisionError| ProvisionFailure::new(error, Some(&cluster));

        checkpoint(cancel).map_err(with_cluster)?;
        self.prerequisites(&images, plan.prerequisites, &cluster, cancel)
            .await
            .map_err(with_cluster)?;

        checkpoint(cancel).map_err(with_cluster)?;
        let endpoints = self
            .deploy(&images, plan.services, &cluster, cancel)
            .await
            .map_err(with_cluster)?;

        let environment = Environment {
            cluster: cluster.clone(),
            images,
            endpoints,
        };

        checkpoint(cancel).map_err(with_cluster)?;
        self.wait_until_ready(&plan.readiness, &environment, cancel)
            .await
            .map_err(with_cluster)?;

        checkpoint(cancel).map_err(with_cluster)?;
        self.post_deploy(plan.post_deploy, &environment, cancel)
            .await
            .map_err(with_cluster)?;

        info!(
            elapsed = ?started.elapsed(),
            "Environment ready with {} endpoint(s)",
            environment.endpoints.len()
        );
        Ok(environment)
    }

    async fn build(&self, builds: &[BuildSpec], cancel: &CancellationToken) -> Result<BuiltImages> {
        let tasks = builds
            .iter()
            .cloned()
            .map(|spec| {
                let builder = self.platform.builder.clone();
                let cancel = cancel.clone();
                Task::new(spec.service.clone(), async move {
                    builder.build(&spec, &cancel).await
                })
            })
            .collect();

        Ok(run_phase("build", tasks).await?.into_iter().collect())
    }

    async fn create_cluster(
        &self,
        name: String,
        config: Option<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle> {
        let provisioner = self.platform.provisioner.clone();
        let cancel = cancel.clone();
        let task = Task::new(name.clone(), async move {
            provisioner
                .create_cluster(&name, config.as_deref(), &cancel)
                .await
        });

        run_phase("cluster", vec![task])
            .await?
            .pop()
            .ok_or_else(|| ProvisionError::NotFound("cluster handle".to_string()))
    }

    async fn prerequisites(
        &self,
        images: &BuiltImages,
        manifests: Vec<Manifest>,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut tasks: Vec<Task<()>> = images
            .iter()
            .cloned()
            .map(|image| {
                let loader = self.platform.loader.clone();
                let cluster = cluster.clone();
                let cancel = cancel.clone();
                Task::new(format!("load {}", image.service), async move {
                    loader.load_image(&image, &cluster, &cancel).await
                })
            })
            .collect();

        tasks.extend(manifests.into_iter().map(|manifest| {
            let deployer = self.platform.deployer.clone();
            let cluster = cluster.clone();
            let cancel = cancel.clone();
            Task::new(format!("apply {}", manifest.name), async move {
                deployer.apply(&manifest, &cluster, &cancel).await
            })
        }));

        run_phase("prerequisites", tasks).await?;
        Ok(())
    }

    async fn deploy(
        &self,
        images: &BuiltImages,
        services: Vec<ServiceManifest>,
        cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceEndpoint>> {
        let tasks = services
            .into_iter()
            .map(|service| {
                let image = match &service.image {
                    Some(image) => Ok(image.clone()),
                    None => images
                        .get(&service.service)
                        .map(|built| built.reference.clone()),
                };
                let namespace = self.config.namespace.clone();
                let deployer = self.platform.deployer.clone();
                let cluster = cluster.clone();
                let cancel = cancel.clone();
                Task::new(format!("deploy {}", service.service), async move {
                    let manifest = service.render(&image?, &namespace)?;
                    deployer.apply(&manifest, &cluster, &cancel).await?;
                    Ok(service.endpoint())
                })
            })
            .collect();

        Ok(run_phase("deploy", tasks)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    async fn wait_until_ready(
        &self,
        stages: &[ReadinessStageSpec],
        environment: &Environment,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if stages.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let stages = resolve_stages(stages, environment, &self.config).await?;
        info!("Waiting for {} readiness stage(s)", stages.len());
        wait_for_stages(&stages, cancel).await?;
        info!(elapsed = ?started.elapsed(), "Environment is ready");
        Ok(())
    }

    async fn post_deploy(
        &self,
        hooks: Vec<PostDeployHook>,
        environment: &Environment,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if hooks.is_empty() {
            return Ok(());
        }

        let environment = Arc::new(environment.clone());
        let tasks = hooks
            .into_iter()
            .map(|hook| Task::new(hook.name.clone(), (hook.run)(environment.clone(), cancel.clone())))
            .collect();

        run_phase("post-deploy", tasks).await?;
        Ok(())
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        warn!("Cancellation requested, not starting the next phase");
        return Err(ProvisionError::Cancelled);
    }
    Ok(())
}

/// Reject plans that can't succeed before anything is started
fn validate(plan: &ProvisionPlan) -> Result<()> {
    let invalid = |name: &str, message: String| ProvisionError::ManifestError {
        name: name.to_string(),
        message,
    };

    let mut builds = HashSet::new();
    for build in &plan.builds {
        if !builds.insert(build.service.as_str()) {
            return Err(invalid(&build.service, "built more than once".to_string()));
        }
    }

    let mut services = HashSet::new();
    for service in &plan.services {
        if !services.insert(service.service.as_str()) {
            return Err(invalid(&service.service, "deployed more than once".to_string()));
        }
        if service.image.is_none() && !builds.contains(service.service.as_str()) {
            return Err(invalid(
                &service.service,
                "no build for this service and no image given".to_string(),
            ));
        }
    }
    Ok(())
}
