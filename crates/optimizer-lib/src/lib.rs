//! Infrastructure optimization library
//!
//! This crate provides the core functionality for:
//! - Cluster data models built from compute, storage and baremetal inventories
//! - Goals, strategies and the audits that run them
//! - Planning solutions into ordered action plans
//! - Applying action plans as workflows with rollback
//! - Leader election, periodic jobs and the RPC surface
//! - Health checks and observability

pub mod action;
pub mod adapters;
pub mod applier;
pub mod bus;
pub mod cdm;
pub mod collector;
pub mod datasource;
pub mod decision;
pub mod error;
pub mod goal;
pub mod health;
pub mod models;
pub mod observability;
pub mod planner;
pub mod pool;
pub mod retry;
pub mod rpc;
pub mod schema;
pub mod scope;
pub mod scoring;
pub mod service;
pub mod simulator;
pub mod solution;
pub mod store;
pub mod strategy;

pub use error::{ErrorKind, OptimizerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OptimizerMetrics, StructuredLogger};
