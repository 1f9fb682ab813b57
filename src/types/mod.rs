// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Data carried between provisioning phases.

pub mod build;
pub mod cluster;
pub mod endpoint;

pub use build::{BuildSpec, BuiltImage, BuiltImages, TagStrategy};
pub use cluster::{ClusterHandle, ClusterSpec};
pub use endpoint::ServiceEndpoint;
