// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Phased provisioning.
//!
//! A run is a fixed sequence of phases. Tasks inside a phase run concurrently
//! and the phase boundary is a barrier: the next phase starts only after every
//! task of the current one has completed and been reported.

pub mod driver;
pub mod phase;

pub use driver::{
    Environment, Orchestrator, OrchestratorConfig, PostDeployHook, ProvisionFailure,
    ProvisionPlan,
};
pub use phase::{collect_phase, run_phase, Task, TaskResult};
