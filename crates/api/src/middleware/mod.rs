//! The fixed request middleware chain.
//!
//! - [`context`] -- [`RequestContext`](context::RequestContext) injection.
//! - [`client_ip`] -- [`ClientIp`](client_ip::ClientIp) extraction.
//! - [`cookies`] -- [`Cookies`](cookies::Cookies) parsing.
//! - [`body`] -- capped JSON body parsing into [`JsonBody`](body::JsonBody).
//! - [`project_scope`] -- [`ProjectScope`](project_scope::ProjectScope)
//!   from query, body or path.
//! - [`audit`] -- one audit log line per request.
//!
//! [`build_frame`](crate::router::build_frame) installs them in that order;
//! project scope reads the parsed body, and audit reads both the scope and
//! the client ip.

pub mod audit;
pub mod body;
pub mod client_ip;
pub mod context;
pub mod cookies;
pub mod project_scope;
