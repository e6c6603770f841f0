/*
 * SPDX-FileCopyrightText: 2022 Empo Inc.
 *
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::fs;
use std::io;
use std::time::Duration;

use custom_error::custom_error;
use serde::Deserialize;

use wgctrl::{BackendCfg, BackendKind};

use crate::network::{Subnet, SubnetV6};

custom_error! {pub ConfigError
    Read{path: String, source: io::Error} = "Cannot read config file {path}: {source}",
    Parse{source: toml::de::Error} = "Invalid config file: {source}",
    Invalid{msg: String} = "Invalid configuration: {msg}",
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub wireguard: WireguardConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub peers: PeersConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Api {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub apikey: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireguardConfig {
    pub interface: Option<String>,
    pub backend: Option<String>,
    pub wg_path: Option<String>,
    pub wg_quick_path: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub ipv4_pool: Vec<String>,
    #[serde(default)]
    pub ipv6_pool: Vec<String>,
    #[serde(default)]
    pub reserved: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeersConfig {
    pub default_keepalive: Option<u16>,
}

/// Address pools and reserved addresses, split by family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pools {
    pub v4: Vec<Subnet>,
    pub v6: Vec<SubnetV6>,
    pub reserved_v4: Vec<Subnet>,
    pub reserved_v6: Vec<SubnetV6>,
}

const DEFAULT_LISTEN: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8081;
const DEFAULT_INTERFACE: &str = "wg0";
const DEFAULT_WG: &str = "wg";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_V4_POOL: &str = "10.0.0.0/24";

impl Api {
    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl WireguardConfig {
    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or(DEFAULT_INTERFACE)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn backend_cfg(&self) -> Result<BackendCfg, ConfigError> {
        let kind = match &self.backend {
            Some(x) => x
                .parse::<BackendKind>()
                .map_err(|e| ConfigError::Invalid { msg: e.to_string() })?,
            None => BackendKind::Cli,
        };

        Ok(BackendCfg {
            kind,
            ifname: self.interface().to_string(),
            wg_path: self
                .wg_path
                .clone()
                .unwrap_or_else(|| DEFAULT_WG.to_string()),
            wg_quick_path: self.wg_quick_path.clone(),
        })
    }
}

fn parse_subnet<T: std::str::FromStr>(entry: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    entry.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        msg: format!("network.{}: {}", key, e),
    })
}

impl NetworkConfig {
    pub fn pools(&self) -> Result<Pools, ConfigError> {
        let mut pools = Pools::default();

        for entry in self.ipv4_pool.iter() {
            pools.v4.push(parse_subnet(entry, "ipv4_pool")?);
        }
        for entry in self.ipv6_pool.iter() {
            pools.v6.push(parse_subnet(entry, "ipv6_pool")?);
        }
        for entry in self.reserved.iter() {
            match entry.contains(':') {
                true => pools.reserved_v6.push(parse_subnet(entry, "reserved")?),
                false => pools.reserved_v4.push(parse_subnet(entry, "reserved")?),
            }
        }

        if pools.v4.is_empty() {
            return Err(ConfigError::Invalid {
                msg: "network.ipv4_pool must not be empty".to_string(),
            });
        }

        Ok(pools)
    }
}

fn get_default_config() -> Config {
    Config {
        network: NetworkConfig {
            ipv4_pool: vec![DEFAULT_V4_POOL.to_string()],
            ..Default::default()
        },
        ..Default::default()
    }
}

fn parse_toml(tomlstr: &str) -> Result<Config, ConfigError> {
    let mut cfg: Config = toml::from_str(tomlstr)?;

    if cfg.network.ipv4_pool.is_empty() {
        cfg.network.ipv4_pool = get_default_config().network.ipv4_pool;
    }

    // Surface pool errors at load time rather than on first use
    cfg.network.pools()?;
    cfg.wireguard.backend_cfg()?;

    Ok(cfg)
}

/// Reads `cfgpath`. A missing file yields the built-in defaults unless
/// `required` is set.
pub fn read_config(cfgpath: &str, required: bool) -> Result<Config, ConfigError> {
    match fs::read_to_string(cfgpath) {
        Ok(x) => parse_toml(&x),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !required => Ok(get_default_config()),
        Err(e) => Err(ConfigError::Read {
            path: cfgpath.to_string(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_baseline_config() {
        let cfg = parse_toml(
            r##"
        [api]
        apikey = "crowbar"
        "##,
        )
        .unwrap();

        assert_eq!(cfg.api.apikey.as_deref(), Some("crowbar"));
        assert_eq!(cfg.api.listen(), "0.0.0.0");
        assert_eq!(cfg.api.port(), 8081);
        assert_eq!(cfg.wireguard.interface(), "wg0");
        assert_eq!(cfg.wireguard.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.network.ipv4_pool, vec!["10.0.0.0/24".to_string()]);
        assert_eq!(cfg.peers.default_keepalive, None);
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_toml(
            r##"
        [api]
        listen = "127.0.0.1"
        port = 9000
        log_level = "debug"

        [wireguard]
        interface = "wg1"
        backend = "memory"
        timeout_secs = 3

        [network]
        ipv4_pool = ["10.8.0.0/16", "10.9.0.0/24"]
        ipv6_pool = ["fd42::/112"]
        reserved = ["10.8.0.1", "fd42::1"]

        [peers]
        default_keepalive = 25
        "##,
        )
        .unwrap();

        assert_eq!(cfg.api.port(), 9000);
        assert_eq!(cfg.wireguard.timeout(), Duration::from_secs(3));
        assert_eq!(cfg.peers.default_keepalive, Some(25));

        let backend = cfg.wireguard.backend_cfg().unwrap();
        assert_eq!(backend.kind, BackendKind::Memory);
        assert_eq!(backend.ifname, "wg1");
        assert_eq!(backend.wg_path, "wg");
        assert_eq!(backend.wg_quick_path, None);

        let pools = cfg.network.pools().unwrap();
        assert_eq!(pools.v4.len(), 2);
        assert_eq!(pools.v6, vec!["fd42::/112".parse::<SubnetV6>().unwrap()]);
        assert_eq!(pools.reserved_v4, vec!["10.8.0.1/32".parse::<Subnet>().unwrap()]);
        assert_eq!(pools.reserved_v6, vec!["fd42::1/128".parse::<SubnetV6>().unwrap()]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            parse_toml("[network]\nipv4_pool = [\"10.0.0.1/24\"]\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_toml("[wireguard]\nbackend = \"netlink\"\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_toml("[api]\nport = \"eighty\"\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_config() {
        let cfg = read_config("/nonexistent/wirerestd.toml", false).unwrap();
        assert_eq!(cfg.network.ipv4_pool, vec!["10.0.0.0/24".to_string()]);

        assert!(matches!(
            read_config("/nonexistent/wirerestd.toml", true),
            Err(ConfigError::Read { .. })
        ));
    }
}
