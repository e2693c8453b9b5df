//! Shared HTTP client with persistent connection pooling.
//!
//! All provider adapters send their requests through one lazily initialised
//! `reqwest::Client`.  Reusing the client keeps TLS sessions and DNS lookups
//! warm, which matters when fallback chains and parallel teams issue many
//! concurrent requests to the same upstream hosts.

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            // Keep idle connections alive so bursts of requests reuse them.
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            // Generous overall timeout; streaming reads enforce their own
            // idle timeout on top of this.
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}
