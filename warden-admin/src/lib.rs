//! Administrative HTTP surface for the lanwarden gateway
//!
//! Callers are trusted; there is no authentication.

pub mod error;
pub mod routes;
pub mod server;

pub use error::{AdminError, Result};
pub use routes::{route, AdminState, ApiResponse};
pub use server::AdminServer;
