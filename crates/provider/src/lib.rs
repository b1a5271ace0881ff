//! driftless convergence engine
//!
//! Drives cloud resources on a remote control plane toward a declared
//! state. Given a desired spec and the observed state, the engine issues
//! the ordered remote calls that make the two match, recovering
//! soft-deleted resources, bracketing offline changes with stop/start, and
//! polling long-running tasks.
//!
//! Entry points live on [`Engine`]; each resource kind implements
//! [`resources::Resource`].

pub mod client;
pub mod diff;
pub mod existence;
pub mod lifecycle;
pub mod loader;
pub mod orchestrator;
pub mod poller;
pub mod resources;
pub mod sequencer;
pub mod warnings;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{Api, ApiClient, CallClass, HttpApiClient, Method, Params};
pub use existence::{ApiExistence, ExistenceLookup};
pub use orchestrator::{CreateOptions, Deleted, Engine};
pub use resources::{
    ComputeResource, DiskResource, K8sResource, ObservedCompute, ObservedDisk, ObservedK8s,
    ObservedVins, Resource, VinsResource,
};
pub use warnings::{Converged, Warning, Warnings};
