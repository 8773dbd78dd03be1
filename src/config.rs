// Environment-driven configuration

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chain_id: u64,
    pub http_url: String,
    pub ws_url: Option<String>,
    pub initiator_key: String,
    pub match_executor_address: Address,
    pub exchange_address: Address,
    pub flashbots_auth_key: Option<String>,
    pub relay_url: String,
    pub redis_url: Option<String>,
    pub mode: Mode,
    pub enable_forking: bool,
    pub debug: bool,
}

impl Config {
    /// Load from the environment. Missing required options and a
    /// non-loopback http URL under forking abort startup.
    pub fn from_env() -> Result<Self> {
        let chain_id: u64 = require("CHAIN_ID")?
            .parse()
            .context("CHAIN_ID must be an integer")?;
        let http_url = require("HTTP_URL")?;
        let ws_url = optional("WS_URL");
        let initiator_key = require("INITIATOR_KEY")?;
        let match_executor_address = parse_address(&require("MATCH_EXECUTOR_ADDRESS")?)?;
        let exchange_address = parse_address(&require("EXCHANGE_ADDRESS")?)?;
        let flashbots_auth_key = optional("FLASHBOTS_AUTH_SIGNER_KEY");
        let relay_url = optional("RELAY_URL").unwrap_or_else(|| "https://relay.flashbots.net".to_string());
        let redis_url = optional("REDIS_URL");
        let mode = match optional("MODE").as_deref() {
            Some("prod") => Mode::Prod,
            Some("dev") | None => Mode::Dev,
            Some(other) => bail!("MODE must be dev or prod, got {}", other),
        };
        let enable_forking = flag("ENABLE_FORKING");
        let debug = flag("DEBUG");

        if enable_forking && !is_loopback(&http_url) {
            bail!("forking is enabled but HTTP_URL {} does not resolve to loopback", http_url);
        }

        Ok(Self {
            chain_id,
            http_url,
            ws_url,
            initiator_key,
            match_executor_address,
            exchange_address,
            flashbots_auth_key,
            relay_url,
            redis_url,
            mode,
            enable_forking,
            debug,
        })
    }

    /// The private-relay bundle path is the production behavior; direct RPC
    /// serves dev and fork runs.
    pub fn use_relay(&self) -> bool {
        self.flashbots_auth_key.is_some() && !self.enable_forking
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} environment variable required", name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

pub fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .with_context(|| format!("invalid address: {}", value))
}

fn is_loopback(url: &str) -> bool {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or("");
    if let Some(v6) = authority.strip_prefix('[') {
        return v6.starts_with("::1]");
    }
    let host = authority.split(':').next().unwrap_or("");
    matches!(host, "127.0.0.1" | "localhost")
}
