//! Server config (spec §6 "Environment"), grounded on `restflow-server/src/
//! config.rs`'s env-var-with-defaults shape, without its TOML file layer:
//! this platform's ambient config surface is the Registry (spec §4.1), not
//! a server-process config file, so the server process itself only needs
//! its own bind address plus whether a tools gateway is reachable at all.

use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Each tool's own `endpoint` field (spec §3) carries its URL; this
    /// only gates whether `HttpToolsGateway` is wired in at all, versus
    /// `NullToolsGateway` for deployments with no tools configured.
    pub tools_gateway_enabled: bool,
}

impl ServerConfig {
    pub fn load() -> Self {
        let host = env::var("CONCLAVE_SERVER_HOST").unwrap_or_else(|_| default_host());
        let port = env::var("CONCLAVE_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or_else(default_port);
        let tools_gateway_enabled = env::var("CONCLAVE_TOOLS_GATEWAY_ENABLED")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            host,
            port,
            tools_gateway_enabled,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8089
}
