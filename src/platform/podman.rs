// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Image builds through the podman (or docker) CLI

use super::ImageBuilder;
use crate::constants::coverage;
use crate::error::{ProvisionError, Result};
use crate::process::{self, CommandSpec};
use crate::types::{BuildSpec, BuiltImage};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub struct PodmanBuilder {
    tool: String,
}

impl PodmanBuilder {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Default for PodmanBuilder {
    fn default() -> Self {
        Self::new("podman")
    }
}

#[async_trait]
impl ImageBuilder for PodmanBuilder {
    #[instrument(skip(self, spec, cancel), fields(service = %spec.service))]
    async fn build(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<BuiltImage> {
        let reference = spec.next_reference();
        let cmd = build_command(&self.tool, spec, &reference);

        info!("Building {}", reference);
        process::run(&cmd, cancel).await.map_err(|e| match e {
            ProvisionError::Cancelled => ProvisionError::Cancelled,
            other => ProvisionError::BuildError {
                service: spec.service.clone(),
                message: other.to_string(),
            },
        })?;

        info!("Built {}", reference);
        Ok(BuiltImage {
            service: spec.service.clone(),
            reference,
        })
    }
}

/// `<tool> build -t <reference> -f <dockerfile> [--build-arg ..] <context>`
pub fn build_command(tool: &str, spec: &BuildSpec, reference: &str) -> CommandSpec {
    let mut cmd = CommandSpec::new(tool)
        .args(["build", "-t", reference])
        .arg("-f")
        .arg(spec.dockerfile.to_string_lossy());

    for (key, value) in &spec.build_args {
        cmd = cmd.arg("--build-arg").arg(format!("{}={}", key, value));
    }
    if spec.coverage {
        cmd = cmd.arg("--build-arg").arg(coverage::BUILD_ARG);
    }

    cmd.arg(spec.context.to_string_lossy())
}
