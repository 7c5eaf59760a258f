use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Args;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::relay::DEFAULT_OUTBOX_CAPACITY;

/// Flags for `beach-ring serve`.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "BEACH_RING_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Seconds to linger after a shutdown signal before exiting.
    #[arg(long, env = "BEACH_RING_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,

    /// Allowed cross-origin caller; `*` allows any origin.
    #[arg(long, env = "BEACH_RING_CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,

    /// Events queued per connection before further ones are dropped.
    #[arg(long, env = "BEACH_RING_OUTBOX_CAPACITY", default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            shutdown_grace_secs: 2,
            cors_origin: "*".to_string(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigin {
    Any,
    Exact(HeaderValue),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub shutdown_grace: Duration,
    pub cors_origin: CorsOrigin,
    pub outbox_capacity: usize,
}

impl Config {
    pub fn cors_layer(&self) -> CorsLayer {
        let origin = match &self.cors_origin {
            CorsOrigin::Any => AllowOrigin::from(Any),
            CorsOrigin::Exact(value) => AllowOrigin::exact(value.clone()),
        };
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
    }
}

impl TryFrom<ServeArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        let cors_origin = match args.cors_origin.trim() {
            "*" => CorsOrigin::Any,
            origin => CorsOrigin::Exact(
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin: {origin}"))?,
            ),
        };
        if args.outbox_capacity == 0 {
            anyhow::bail!("outbox capacity must be greater than zero");
        }
        Ok(Config {
            listen_addr,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
            cors_origin,
            outbox_capacity: args.outbox_capacity,
        })
    }
}
