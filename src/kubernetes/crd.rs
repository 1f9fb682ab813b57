// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking

use crate::error::is_not_found;
use crate::readiness::{ProbeError, ReadinessCheck};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::wait::{conditions, Condition};
use kube::{Api, Client};

/// Ready once the CRD named `name` (e.g. `workflows.example.io`) is established
pub fn crd_established(client: Client, name: impl Into<String>) -> ReadinessCheck {
    let name = name.into();
    let target = format!("CRD {}", name);

    ReadinessCheck::new(target, move || {
        let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
        let name = name.clone();
        async move {
            match crds.get_opt(&name).await {
                Ok(crd) => Ok(conditions::is_crd_established().matches_object(crd.as_ref())),
                Err(e) if is_not_found(&e) => Ok(false),
                Err(e) => Err(ProbeError::Transient(e.to_string())),
            }
        }
    })
}
