//! Domain types shared by every switchyard crate.
//!
//! - [`project`] -- tenant projects and their lifecycle status.
//! - [`config`] -- the platform configuration object and its loader.
//! - [`error`] -- domain-level error type.

pub mod config;
pub mod error;
pub mod project;
pub mod types;
