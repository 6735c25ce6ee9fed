//! Load host config from file and environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use duochat_core::config::DEFAULT_READ_BUFFER_SIZE;
use duochat_core::PeerHandle;
use serde::Deserialize;

/// Host configuration. File: ~/.config/duochat/config.toml or /etc/duochat/config.toml.
/// Env overrides: DUOCHAT_LISTEN_ADDR, DUOCHAT_LISTEN_PORT, DUOCHAT_NAME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the listener binds (default 0.0.0.0).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,
    /// Listener TCP port (default 47800).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Name shown to the remote side.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Paired peers, addressable by name in `/connect`.
    #[serde(default)]
    pub peers: Vec<KnownPeer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnownPeer {
    pub name: String,
    /// `host:port` of the peer's listener.
    pub address: String,
}

fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_listen_port() -> u16 {
    47800
}
fn default_name() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "duochat".to_string())
}
fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            name: default_name(),
            read_buffer_size: default_read_buffer_size(),
            peers: Vec::new(),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }

    /// Session settings handed to the core controller.
    pub fn session_config(&self) -> duochat_core::Config {
        duochat_core::Config {
            service_name: self.name.clone(),
            read_buffer_size: self.read_buffer_size,
            ..duochat_core::Config::default()
        }
    }

    /// Map `/connect` input to a peer: a known peer by name (any case) or address,
    /// otherwise the input itself taken as an address.
    pub fn resolve_peer(&self, target: &str) -> PeerHandle {
        let target = target.trim();
        self.peers
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(target) || p.address == target)
            .map(|p| PeerHandle::new(p.address.clone(), p.name.clone()))
            .unwrap_or_else(|| PeerHandle::from_address(target))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("DUOCHAT_LISTEN_ADDR") {
            match s.parse::<IpAddr>() {
                Ok(a) => self.listen_addr = a,
                Err(_) => tracing::warn!(value = %s, "ignoring invalid DUOCHAT_LISTEN_ADDR"),
            }
        }
        if let Some(s) = var("DUOCHAT_LISTEN_PORT") {
            match s.parse::<u16>() {
                Ok(p) => self.listen_port = p,
                Err(_) => tracing::warn!(value = %s, "ignoring invalid DUOCHAT_LISTEN_PORT"),
            }
        }
        if let Some(s) = var("DUOCHAT_NAME") {
            if !s.trim().is_empty() {
                self.name = s;
            }
        }
    }
}

/// Load config: explicit path, else the first default path present, else defaults;
/// then env vars. The result is validated.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match path {
        Some(p) => load_from(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_from(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    c.session_config()
        .validate()
        .context("invalid configuration")?;
    Ok(c)
}

pub fn load_from(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/duochat/config.toml"));
    }
    out.push(PathBuf::from("/etc/duochat/config.toml"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(s: &str) -> Config {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let c = parse("");
        assert_eq!(c.listen_port, 47800);
        assert_eq!(c.bind_addr().to_string(), "0.0.0.0:47800");
        assert_eq!(c.read_buffer_size, 1024);
        assert!(c.peers.is_empty());
    }

    #[test]
    fn reads_peers_and_overrides() {
        let c = parse(
            r#"
            listen_addr = "127.0.0.1"
            listen_port = 5000
            name = "desk"
            read_buffer_size = 512

            [[peers]]
            name = "Pixel"
            address = "192.168.1.20:47800"
            "#,
        );
        assert_eq!(c.bind_addr().to_string(), "127.0.0.1:5000");
        assert_eq!(c.session_config().service_name, "desk");
        assert_eq!(c.session_config().read_buffer_size, 512);
        assert_eq!(
            c.peers,
            vec![KnownPeer {
                name: "Pixel".into(),
                address: "192.168.1.20:47800".into()
            }]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut c = parse("listen_port = 5000");
        let env: HashMap<&str, &str> = [
            ("DUOCHAT_LISTEN_ADDR", "::1"),
            ("DUOCHAT_LISTEN_PORT", "6000"),
            ("DUOCHAT_NAME", "laptop"),
        ]
        .into_iter()
        .collect();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.bind_addr().to_string(), "[::1]:6000");
        assert_eq!(c.name, "laptop");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut c = parse("listen_port = 5000");
        c.apply_env(|k| (k == "DUOCHAT_LISTEN_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(c.listen_port, 5000);
    }

    #[test]
    fn resolve_peer_prefers_known_names() {
        let c = parse(
            r#"
            [[peers]]
            name = "Pixel"
            address = "10.0.0.2:47800"
            "#,
        );
        let p = c.resolve_peer("pixel");
        assert_eq!(p.address(), "10.0.0.2:47800");
        assert_eq!(p.name(), "Pixel");
        assert_eq!(c.resolve_peer("10.0.0.2:47800").name(), "Pixel");
        let raw = c.resolve_peer(" 10.0.0.9:47800 ");
        assert_eq!(raw.address(), "10.0.0.9:47800");
        assert_eq!(raw.name(), "10.0.0.9:47800");
    }

    #[test]
    fn explicit_path_must_exist() {
        let missing = std::env::temp_dir().join("duochat-no-such-config.toml");
        assert!(load(Some(&missing)).is_err());
    }
}
