//! Linna Server — hosts extension modules and serves their RPCs and
//! authentication providers over HTTP.

pub mod logging;
pub mod modules;
pub mod network;
pub mod service;
pub mod session;
pub mod status;
pub mod storage;

pub use network::NetworkModule;
pub use service::{Host, HostBuilder, ServerConfig};
pub use session::{SessionClaims, SessionIssuer};
