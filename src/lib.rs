#![cfg_attr(docsrs, feature(doc_cfg))]
//! Fixed window rate limiting.
//!
//! A [Gatekeeper] counts requests per key in a [CounterStore](store::CounterStore) and decides
//! whether each one is admitted. Keys are produced by a [KeyDeriver], and
//! [GatekeeperMiddleware] plugs the whole thing into actix-web.
//!
//! ```no_run
//! # #[cfg(feature = "dashmap")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use gatekeeper::store::memory::InMemoryStore;
//! use gatekeeper::{Gatekeeper, GatekeeperMiddleware, Interval, KeyBuilder, RateLimitConfig};
//! use actix_web::{App, HttpServer};
//!
//! let config = RateLimitConfig::per(100, Interval::Minute)?;
//! let gatekeeper = Gatekeeper::new(InMemoryStore::builder().build(), config);
//! HttpServer::new(move || {
//!     App::new().wrap(
//!         GatekeeperMiddleware::builder(gatekeeper.clone(), KeyBuilder::new().peer_ip_key())
//!             .add_headers()
//!             .build(),
//!     )
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod key;
mod middleware;
pub mod store;

pub use config::{ConfigError, Interval, RateLimitConfig};
pub use engine::{Decision, Gatekeeper, ResponseMetadata};
pub use key::{KeyBuilder, KeyDeriver, DEFAULT_FALLBACK_KEY};
pub use middleware::builder::{
    GatekeeperMiddlewareBuilder, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET,
};
pub use middleware::{GatekeeperMiddleware, GatekeeperService};
