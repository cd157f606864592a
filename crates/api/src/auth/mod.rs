//! Authentication for project-scoped requests.
//!
//! - [`jwt`] -- token generation and validation.
//! - [`controller`] -- the [`AuthController`](controller::AuthController)
//!   interface and its JWT implementation.

pub mod controller;
pub mod jwt;
