//! Chat server: unary and chunked HTTP endpoints plus the persistent
//! channel endpoint, all backed by a pluggable `ModelProvider`.

pub mod echo;
pub mod filter;
pub mod history;
pub mod routes;
pub mod server;
pub mod ws;

pub use echo::EchoProvider;
pub use filter::ContentFilter;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
