//! switchyard API server: the runtime orchestrator and its HTTP surface.
//!
//! - [`orchestrator`] -- boot sequence, builder registry, runtime-change
//!   dispatch and secret bootstrap.
//! - [`router`] / [`route_table`] -- frame assembly and the swappable root.
//! - [`builder`] -- per-project builders.
//! - [`admin`] -- dashboard and metadata-manager transports.
//! - [`auth`], [`middleware`], [`telemetry`], [`upgrader`] -- collaborators
//!   wired in at boot.

pub mod admin;
pub mod auth;
pub mod builder;
pub mod config;
pub mod config_factory;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod route_table;
pub mod router;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod upgrader;
pub mod variant;

pub use orchestrator::{InitOptions, Orchestrator, OrchestratorParts};
