// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Declarative resource sets handed to a `ResourceDeployer`.

pub mod service;

use crate::error::{ProvisionError, Result};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use service::ServiceManifest;

/// An ordered set of resources applied as one unit
#[derive(Clone, Debug)]
pub struct Manifest {
    pub name: String,
    /// Namespace for namespaced documents that don't set one
    pub namespace: Option<String>,
    pub documents: Vec<DynamicObject>,
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            documents: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Parse a multi-document YAML stream. Empty documents are skipped.
    pub fn from_yaml(name: impl Into<String>, yaml: &str) -> Result<Self> {
        let mut manifest = Self::new(name);
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| manifest.invalid(e.to_string()))?;
            if value.is_null() {
                continue;
            }
            let object: DynamicObject =
                serde_yaml::from_value(value).map_err(|e| manifest.invalid(e.to_string()))?;
            manifest.push_object(object)?;
        }
        Ok(manifest)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProvisionError::ManifestError {
                name: path.display().to_string(),
                message: e.to_string(),
            }
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_yaml(name, &yaml)
    }

    /// Append a typed resource such as a k8s-openapi `Deployment`
    pub fn push<K: Serialize>(&mut self, resource: &K) -> Result<()> {
        let value = serde_json::to_value(resource).map_err(|e| self.invalid(e.to_string()))?;
        let object: DynamicObject =
            serde_json::from_value(value).map_err(|e| self.invalid(e.to_string()))?;
        self.push_object(object)
    }

    fn push_object(&mut self, object: DynamicObject) -> Result<()> {
        if object.types.is_none() {
            return Err(self.invalid("document has no apiVersion/kind".to_string()));
        }
        if object.metadata.name.is_none() {
            return Err(self.invalid("document has no metadata.name".to_string()));
        }
        self.documents.push(object);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn invalid(&self, message: String) -> ProvisionError {
        ProvisionError::ManifestError {
            name: self.name.clone(),
            message,
        }
    }
}

/// `Kind/namespace/name` or `Kind/name`, for log lines and errors
pub fn describe(object: &DynamicObject) -> String {
    let kind = object
        .types
        .as_ref()
        .map(|t| t.kind.as_str())
        .unwrap_or("Unknown");
    let name = object.metadata.name.as_deref().unwrap_or("<unnamed>");
    match object.metadata.namespace.as_deref() {
        Some(ns) => format!("{}/{}/{}", kind, ns, name),
        None => format!("{}/{}", kind, name),
    }
}
