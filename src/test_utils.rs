// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a scripted Kubernetes API and in-memory platform fakes.

use crate::error::{ProvisionError, Result};
use crate::manifest::Manifest;
use crate::platform::{ClusterProvisioner, ImageBuilder, ImageLoader, Platform, ResourceDeployer};
use crate::types::{BuildSpec, BuiltImage, ClusterHandle};
use async_trait::async_trait;
use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::Service;

type Route = (String, String);

/// A mock HTTP service that returns scripted responses based on method and path.
///
/// Responses registered for the same route are served in order; the last one
/// keeps answering once the others are used up.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<Route, VecDeque<(u16, String)>>>>,
    requests: Arc<Mutex<Vec<Route>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Method and path of every request received so far
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let mut responses = self.responses.lock().unwrap();

        // Exact match first, then the longest registered prefix
        let route = (method.to_string(), path.to_string());
        let key = if responses.contains_key(&route) {
            route
        } else {
            responses
                .keys()
                .filter(|(m, p)| m == method && path.starts_with(p.as_str()))
                .max_by_key(|(_, p)| p.len())
                .cloned()?
        };

        let queue = responses.get_mut(&key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        self.requests
            .lock()
            .unwrap()
            .push((method.clone(), path.clone()));
        let (status, body) = self
            .find_response(&method, &path)
            .unwrap_or_else(|| (404, not_found_json("resource", &path)));

        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": "test-uid"
        }
    })
    .to_string()
}

/// A `Status` failure body
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
}

/// Create a 409 already exists response
pub fn already_exists_json(resource: &str, name: &str) -> String {
    status_json(
        409,
        "AlreadyExists",
        &format!("{} \"{}\" already exists", resource, name),
    )
}

#[derive(Default)]
struct FakeState {
    events: Vec<String>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    clusters: HashSet<String>,
}

/// In-memory stand-in for every platform collaborator.
///
/// Each call is recorded as `"<operation>:<subject>"`, e.g. `build:api`,
/// `create:testbed`, `load:api`, `apply:settings`, `delete:testbed` and
/// `diagnostics:testbed`. The same keys select failures and delays.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the call recorded under `key` fail
    pub fn failing(self, key: &str) -> Self {
        self.state.lock().unwrap().failing.insert(key.to_string());
        self
    }

    /// Make the call recorded under `key` take `delay` before answering
    pub fn delayed(self, key: &str, delay: Duration) -> Self {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(key.to_string(), delay);
        self
    }

    /// Pretend a cluster with this name is already running
    pub fn with_cluster(self, name: &str) -> Self {
        self.state.lock().unwrap().clusters.insert(name.to_string());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn called(&self, key: &str) -> bool {
        self.events().iter().any(|event| event == key)
    }

    pub fn has_cluster(&self, name: &str) -> bool {
        self.state.lock().unwrap().clusters.contains(name)
    }

    pub fn into_platform(self) -> Platform {
        let fake = Arc::new(self);
        Platform {
            builder: fake.clone(),
            provisioner: fake.clone(),
            loader: fake.clone(),
            deployer: fake,
        }
    }

    /// Record the call, honour its delay and report whether it should fail
    async fn call(&self, key: String, cancel: &CancellationToken) -> Result<bool> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.events.push(key.clone());
            (state.delays.get(&key).copied(), state.failing.contains(&key))
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
            }
        }
        Ok(fail)
    }

    fn failure(key: &str) -> ProvisionError {
        ProvisionError::CommandFailed {
            command: key.to_string(),
            status: "exit status: 1".to_string(),
            stderr: format!("simulated failure of {}", key),
        }
    }
}

#[async_trait]
impl ImageBuilder for FakePlatform {
    async fn build(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<BuiltImage> {
        if self.call(format!("build:{}", spec.service), cancel).await? {
            return Err(ProvisionError::BuildError {
                service: spec.service.clone(),
                message: format!("simulated build failure of {}", spec.service),
            });
        }
        Ok(BuiltImage {
            service: spec.service.clone(),
            reference: format!("{}:test", spec.image),
        })
    }
}

#[async_trait]
impl ClusterProvisioner for FakePlatform {
    async fn create_cluster(
        &self,
        name: &str,
        _config: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle> {
        let key = format!("create:{}", name);
        if self.call(key.clone(), cancel).await? {
            return Err(Self::failure(&key));
        }
        if !self.state.lock().unwrap().clusters.insert(name.to_string()) {
            return Err(ProvisionError::ClusterExists(name.to_string()));
        }
        Ok(ClusterHandle::new(name, format!("/tmp/{}.kubeconfig", name)))
    }

    async fn delete_cluster(&self, cluster: &ClusterHandle) -> Result<()> {
        let key = format!("delete:{}", cluster.name);
        if self.call(key.clone(), &CancellationToken::new()).await? {
            return Err(Self::failure(&key));
        }
        if !self.state.lock().unwrap().clusters.remove(&cluster.name) {
            return Err(ProvisionError::NotFound(format!("cluster {}", cluster.name)));
        }
        Ok(())
    }

    async fn export_diagnostics(&self, cluster: &ClusterHandle, _dir: &Path) -> Result<()> {
        let key = format!("diagnostics:{}", cluster.name);
        if self.call(key.clone(), &CancellationToken::new()).await? {
            return Err(Self::failure(&key));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageLoader for FakePlatform {
    async fn load_image(
        &self,
        image: &BuiltImage,
        _cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = format!("load:{}", image.service);
        if self.call(key.clone(), cancel).await? {
            return Err(Self::failure(&key));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceDeployer for FakePlatform {
    async fn apply(
        &self,
        manifest: &Manifest,
        _cluster: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = format!("apply:{}", manifest.name);
        if self.call(key.clone(), cancel).await? {
            return Err(ProvisionError::ApplyError {
                resource: manifest.name.clone(),
                message: format!("simulated failure of {}", key),
            });
        }
        Ok(())
    }
}
