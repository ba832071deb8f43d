//! Embedded-content proxy: fetches HTTP resources and rewrites HTML/CSS references
//! so HTTPS pages can embed them.

pub mod access;
pub mod config;
pub mod css;
pub mod error;
pub mod fetch;
pub mod html;
pub mod proxy;
pub mod resolve;
pub mod shared;

pub use config::Config;
pub use proxy::{router, start_proxy_server};
pub use shared::ProxyState;
