//! Runtime configuration.
//!
//! Values come from built-in defaults, then `COUNTER_*` environment variables, then
//! command-line flags.

use crate::counter::types::{CounterSettings, DEFAULT_CACHE_TTL, DEFAULT_FLUSH_INTERVAL};
use crate::storage::ring::DEFAULT_VIRTUAL_NODES;
use crate::storage::types::NodeId;

use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use std::time::Duration;

pub const ENV_NODES: &str = "COUNTER_NODES";
pub const ENV_VIRTUAL_NODES: &str = "COUNTER_VIRTUAL_NODES";
pub const ENV_CACHE_TTL_MS: &str = "COUNTER_CACHE_TTL_MS";
pub const ENV_FLUSH_INTERVAL_MS: &str = "COUNTER_FLUSH_INTERVAL_MS";
pub const ENV_BIND: &str = "COUNTER_BIND";

const DEFAULT_NODE: &str = "memory://local";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub nodes: Vec<NodeId>,
    pub virtual_nodes: usize,
    pub cache_ttl: Duration,
    pub flush_interval: Duration,
    pub flush_on_shutdown: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            nodes: vec![NodeId::from(DEFAULT_NODE)],
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            cache_ttl: DEFAULT_CACHE_TTL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_on_shutdown: true,
        }
    }
}

/// Splits a comma-separated node list, dropping blanks and duplicates.
pub fn parse_node_list(raw: &str) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let node = NodeId::from(part);
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }
    nodes
}

fn parse_millis(name: &str, raw: &str) -> Result<Duration> {
    let millis: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a number of milliseconds, got '{}'", name, raw))?;
    if millis == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(Duration::from_millis(millis))
}

fn parse_virtual_nodes(name: &str, raw: &str) -> Result<usize> {
    let count: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got '{}'", name, raw))?;
    if count == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(count)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_NODES) {
            let nodes = parse_node_list(&raw);
            if nodes.is_empty() {
                bail!("{} is set but lists no nodes", ENV_NODES);
            }
            config.nodes = nodes;
        }
        if let Some(raw) = lookup(ENV_VIRTUAL_NODES) {
            config.virtual_nodes = parse_virtual_nodes(ENV_VIRTUAL_NODES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL_MS) {
            config.cache_ttl = parse_millis(ENV_CACHE_TTL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FLUSH_INTERVAL_MS) {
            config.flush_interval = parse_millis(ENV_FLUSH_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BIND) {
            config.bind = raw
                .trim()
                .parse()
                .with_context(|| format!("{} is not a socket address: '{}'", ENV_BIND, raw))?;
        }

        Ok(config)
    }

    /// Applies command-line flags on top of the current values.
    ///
    /// The first `--node` replaces the configured list; later ones append to it.
    pub fn apply_args(&mut self, args: &[String]) -> Result<()> {
        let mut cli_nodes: Vec<NodeId> = Vec::new();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let next = args.get(i + 1).map(String::as_str);
            let value = || next.with_context(|| format!("{} needs a value", flag));

            match flag {
                "--bind" => {
                    let raw = value()?;
                    self.bind = raw
                        .parse()
                        .with_context(|| format!("--bind is not a socket address: '{}'", raw))?;
                    i += 2;
                }
                "--node" => {
                    cli_nodes.extend(parse_node_list(value()?));
                    i += 2;
                }
                "--virtual-nodes" => {
                    self.virtual_nodes = parse_virtual_nodes("--virtual-nodes", value()?)?;
                    i += 2;
                }
                "--cache-ttl-ms" => {
                    self.cache_ttl = parse_millis("--cache-ttl-ms", value()?)?;
                    i += 2;
                }
                "--flush-interval-ms" => {
                    self.flush_interval = parse_millis("--flush-interval-ms", value()?)?;
                    i += 2;
                }
                "--no-final-flush" => {
                    self.flush_on_shutdown = false;
                    i += 1;
                }
                other => {
                    tracing::warn!("Ignoring unknown argument '{}'", other);
                    i += 1;
                }
            }
        }

        if !cli_nodes.is_empty() {
            self.nodes = cli_nodes;
        }
        Ok(())
    }

    pub fn counter_settings(&self) -> CounterSettings {
        CounterSettings {
            cache_ttl: self.cache_ttl,
            flush_interval: self.flush_interval,
            flush_on_shutdown: self.flush_on_shutdown,
        }
    }
}
