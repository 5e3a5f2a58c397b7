//! Gateway implementation

pub mod auth;
pub mod context;
pub mod cors;
pub mod forward;
pub mod policy;
mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::Gateway;
