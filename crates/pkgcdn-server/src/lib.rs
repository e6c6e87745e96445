//! # pkgcdn-server
//!
//! Serves files out of npm package archives over HTTP.
//!
//! - `coordinator`: resolves a request to a redirect or an archive entry
//! - `http`: routing, CORS, static files and the connection loop
//! - `output`: startup banner and error formatting for the binary

pub mod coordinator;
pub mod http;
pub mod output;

pub use coordinator::{Reply, RequestCoordinator};
pub use http::{serve, HttpService};
