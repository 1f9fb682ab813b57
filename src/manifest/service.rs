// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed Deployment + Service rendering for one test service.

use super::Manifest;
use crate::constants::{coverage, labels, FIELD_MANAGER};
use crate::error::Result;
use crate::types::ServiceEndpoint;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, HostPathVolumeSource, PodSpec,
    PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_replicas() -> i32 {
    1
}

/// Deployment settings for a service, rendered into resources at deploy time
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    /// Name of the service; also the `BuildSpec` whose image is deployed
    pub service: String,
    /// Prebuilt image to run instead of a built one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Container port
    pub port: u16,
    /// Node port published to the host, exposed as an endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<u16>,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default)]
    pub coverage: bool,
    /// HTTP path used as the pod readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
}

impl ServiceManifest {
    pub fn new(service: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            image: None,
            namespace: None,
            port,
            node_port: None,
            replicas: default_replicas(),
            env: BTreeMap::new(),
            args: Vec::new(),
            coverage: false,
            health_path: None,
        }
    }

    pub fn with_node_port(mut self, node_port: u16) -> Self {
        self.node_port = Some(node_port);
        self
    }

    /// Render the Deployment and Service running `image`
    pub fn render(&self, image: &str, default_namespace: &str) -> Result<Manifest> {
        let namespace = self.namespace.as_deref().unwrap_or(default_namespace);
        let mut manifest = Manifest::new(self.service.clone()).with_namespace(namespace);
        manifest.push(&self.deployment(image, namespace))?;
        manifest.push(&self.service_resource(namespace))?;
        Ok(manifest)
    }

    /// Endpoint reachable from the host, if a node port is published
    pub fn endpoint(&self) -> Option<ServiceEndpoint> {
        self.node_port.map(|port| ServiceEndpoint {
            service: self.service.clone(),
            host: "localhost".to_string(),
            port,
        })
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (labels::APP.to_string(), self.service.clone()),
            (labels::MANAGED_BY.to_string(), FIELD_MANAGER.to_string()),
        ])
    }

    fn metadata(&self, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.service.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    pub fn deployment(&self, image: &str, namespace: &str) -> Deployment {
        let selector = BTreeMap::from([(labels::APP.to_string(), self.service.clone())]);

        let mut env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();
        let mut volume_mounts = Vec::new();
        let mut volumes = Vec::new();

        if self.coverage {
            env.push(EnvVar {
                name: coverage::ENV_VAR.to_string(),
                value: Some(coverage::MOUNT_PATH.to_string()),
                ..Default::default()
            });
            volume_mounts.push(VolumeMount {
                name: coverage::VOLUME_NAME.to_string(),
                mount_path: coverage::MOUNT_PATH.to_string(),
                ..Default::default()
            });
            volumes.push(Volume {
                name: coverage::VOLUME_NAME.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: coverage::MOUNT_PATH.to_string(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            });
        }

        let readiness_probe = self.health_path.as_ref().map(|path| Probe {
            http_get: Some(HTTPGetAction {
                path: Some(path.clone()),
                port: IntOrString::Int(i32::from(self.port)),
                ..Default::default()
            }),
            period_seconds: Some(2),
            ..Default::default()
        });

        let container = Container {
            name: self.service.clone(),
            image: Some(image.to_string()),
            // Images are loaded straight into the nodes; there is no registry to pull from
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: (!self.args.is_empty()).then(|| self.args.clone()),
            ports: Some(vec![ContainerPort {
                container_port: i32::from(self.port),
                ..Default::default()
            }]),
            env: (!env.is_empty()).then_some(env),
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            readiness_probe,
            ..Default::default()
        };

        Deployment {
            metadata: self.metadata(namespace),
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: (!volumes.is_empty()).then_some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn service_resource(&self, namespace: &str) -> Service {
        let selector = BTreeMap::from([(labels::APP.to_string(), self.service.clone())]);

        Service {
            metadata: self.metadata(namespace),
            spec: Some(ServiceSpec {
                type_: Some(
                    if self.node_port.is_some() {
                        "NodePort"
                    } else {
                        "ClusterIP"
                    }
                    .to_string(),
                ),
                selector: Some(selector),
                ports: Some(vec![ServicePort {
                    port: i32::from(self.port),
                    target_port: Some(IntOrString::Int(i32::from(self.port))),
                    node_port: self.node_port.map(i32::from),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(deployment: &Deployment) -> &Container {
        &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn test_render_produces_deployment_and_service() {
        let manifest = ServiceManifest::new("api", 8080)
            .render("localhost/api:abc", "testbed")
            .unwrap();

        assert_eq!(manifest.name, "api");
        assert_eq!(manifest.namespace.as_deref(), Some("testbed"));
        let kinds: Vec<_> = manifest
            .documents
            .iter()
            .map(|d| d.types.as_ref().unwrap().kind.clone())
            .collect();
        assert_eq!(kinds, vec!["Deployment", "Service"]);
        assert_eq!(
            manifest.documents[0].data["spec"]["template"]["spec"]["containers"][0]["image"],
            "localhost/api:abc"
        );
    }

    #[test]
    fn test_explicit_namespace_wins() {
        let mut service = ServiceManifest::new("db", 5432);
        service.namespace = Some("data".to_string());

        let manifest = service.render("postgres:16", "testbed").unwrap();
        assert_eq!(manifest.documents[0].metadata.namespace.as_deref(), Some("data"));
    }

    #[test]
    fn test_coverage_adds_env_and_volume() {
        let mut service = ServiceManifest::new("api", 8080);
        service.coverage = true;

        let deployment = service.deployment("api:1", "testbed");
        let container = container(&deployment);

        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == coverage::ENV_VAR && e.value.as_deref() == Some(coverage::MOUNT_PATH)));
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            coverage::MOUNT_PATH
        );
        let volumes = deployment.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert_eq!(volumes[0].name, coverage::VOLUME_NAME);
    }

    #[test]
    fn test_no_coverage_means_no_volume() {
        let deployment = ServiceManifest::new("api", 8080).deployment("api:1", "testbed");

        assert!(container(&deployment).volume_mounts.is_none());
        assert!(deployment.spec.unwrap().template.spec.unwrap().volumes.is_none());
    }

    #[test]
    fn test_health_path_becomes_readiness_probe() {
        let mut service = ServiceManifest::new("api", 8080);
        service.health_path = Some("/healthz".to_string());

        let deployment = service.deployment("api:1", "testbed");
        let probe = container(&deployment).readiness_probe.as_ref().unwrap();
        let http_get = probe.http_get.as_ref().unwrap();

        assert_eq!(http_get.path.as_deref(), Some("/healthz"));
        assert_eq!(http_get.port, IntOrString::Int(8080));
    }

    #[test]
    fn test_node_port_service_and_endpoint() {
        let service = ServiceManifest::new("api", 8080).with_node_port(30080);

        let resource = service.service_resource("testbed");
        let spec = resource.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.unwrap()[0].node_port, Some(30080));

        let endpoint = service.endpoint().unwrap();
        assert_eq!(endpoint.to_string(), "localhost:30080");
    }

    #[test]
    fn test_cluster_ip_without_node_port() {
        let service = ServiceManifest::new("worker", 9000);

        let spec = service.service_resource("testbed").spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(service.endpoint().is_none());
    }

    #[test]
    fn test_from_yaml_defaults() {
        let service: ServiceManifest =
            serde_yaml::from_str("service: api\nport: 8080\nnodePort: 30080\n").unwrap();

        assert_eq!(service.replicas, 1);
        assert_eq!(service.node_port, Some(30080));
        assert!(!service.coverage);
        assert!(service.image.is_none());
    }
}
