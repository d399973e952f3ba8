//! Browser-facing chat and workspace gateway.
//!
//! Serves the HTML shell, echoes user messages, demultiplexes the
//! upstream's global event stream into per-browser SSE views, and
//! reverse-proxies the sandbox terminal and a discovered user application
//! port. See the route table in [`routes`].

pub mod cookies;
pub mod middleware;
pub mod render;
pub mod routes;
pub mod sandbox;
pub mod state;
pub mod templates;

pub use routes::router;
pub use state::AppState;
