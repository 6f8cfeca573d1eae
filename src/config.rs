//! Enumerated gateway configuration (spec.md §6).

use std::time::Duration;

use clap::Parser;

/// Gateway configuration.
///
/// Every field maps directly to a row of spec.md §6's configuration table.
/// `clap` parses CLI flags and falls back to the matching `GATEWAY_*`
/// environment variable (via `#[arg(env = ...)]`), which is how
/// `gateway-server` is actually invoked; library consumers can also build
/// this struct directly without going through `clap` at all.
#[derive(Parser, Debug, Clone)]
#[command(name = "gateway-server", about = "Connect/gRPC/gRPC-Web to GraphQL gateway")]
pub struct Config {
    /// Root directory containing service bundles.
    #[arg(long, env = "GATEWAY_SERVICES_DIR")]
    pub services_dir: std::path::PathBuf,

    /// Upstream GraphQL URL. `http://` is prepended if no scheme is given.
    #[arg(long, env = "GATEWAY_GRAPHQL_ENDPOINT")]
    pub graphql_endpoint: String,

    /// Bind address.
    #[arg(long, env = "GATEWAY_LISTEN_ADDR", default_value = "0.0.0.0:5026")]
    pub listen_addr: String,

    /// Outbound HTTP timeout, in seconds.
    #[arg(long, env = "GATEWAY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Normalizes `graphql_endpoint`, prepending `http://` when no scheme is
    /// present, per spec.md §6.
    pub fn normalized_graphql_endpoint(&self) -> String {
        normalize_endpoint(&self.graphql_endpoint)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// Default read/write/idle/request timeouts (spec.md §4.8 "Defaults").
pub const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5026";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_scheme_prepended() {
        assert_eq!(normalize_endpoint("api.example.com/graphql"), "http://api.example.com/graphql");
        assert_eq!(normalize_endpoint("https://api.example.com/graphql"), "https://api.example.com/graphql");
    }
}
