//! HTTP surface: state, routes, middleware chain, server

pub mod middleware;
pub mod router;
pub mod server;

pub use middleware::{AuthContext, FlagGate, resolve_client_id};
pub use router::{AppState, control_router};
pub use server::Server;
