// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod config;
pub mod constants;
pub mod error;
pub mod kubernetes;
pub mod manifest;
pub mod orchestrator;
pub mod plan;
pub mod platform;
pub mod process;
pub mod readiness;
pub mod teardown;
pub mod types;

#[cfg(test)]
pub mod test_utils;
