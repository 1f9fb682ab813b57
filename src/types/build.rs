// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::error::{ProvisionError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// What to build for one service. Immutable once orchestration starts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    pub service: String,
    /// Image repository, without tag
    pub image: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    #[serde(default)]
    pub coverage: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
    /// `tag: unique` or `tag: {fixed: v1}`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub tag: TagStrategy,
}

impl BuildSpec {
    pub fn new(
        service: impl Into<String>,
        image: impl Into<String>,
        dockerfile: impl Into<PathBuf>,
        context: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service: service.into(),
            image: image.into(),
            dockerfile: dockerfile.into(),
            context: context.into(),
            coverage: false,
            build_args: BTreeMap::new(),
            tag: TagStrategy::Unique,
        }
    }

    pub fn with_coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    /// Fully qualified reference for this build, resolving the tag strategy
    pub fn next_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag.resolve())
    }
}

/// How a build's tag is chosen
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TagStrategy {
    /// Timestamp plus a random suffix, distinct on every build so parallel
    /// runs on one host never share an image
    #[default]
    Unique,
    Fixed(String),
}

impl TagStrategy {
    pub fn resolve(&self) -> String {
        match self {
            TagStrategy::Unique => {
                let suffix = Uuid::new_v4().simple().to_string();
                format!(
                    "{}-{}",
                    Utc::now().format("%Y%m%d%H%M%S"),
                    &suffix[..8]
                )
            }
            TagStrategy::Fixed(tag) => tag.clone(),
        }
    }
}

/// An image produced by the build phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltImage {
    pub service: String,
    pub reference: String,
}

/// Images of one run keyed by service name
#[derive(Clone, Debug, Default)]
pub struct BuiltImages {
    images: BTreeMap<String, BuiltImage>,
}

impl BuiltImages {
    pub fn get(&self, service: &str) -> Result<&BuiltImage> {
        self.images
            .get(service)
            .ok_or_else(|| ProvisionError::NotFound(format!("image for service {}", service)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltImage> {
        self.images.values()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl FromIterator<BuiltImage> for BuiltImages {
    fn from_iter<I: IntoIterator<Item = BuiltImage>>(iter: I) -> Self {
        Self {
            images: iter
                .into_iter()
                .map(|image| (image.service.clone(), image))
                .collect(),
        }
    }
}
