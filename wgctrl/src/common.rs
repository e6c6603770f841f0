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

use std::str::FromStr;

use ipnet::IpNet;

use crate::error::WgctrlError;
use crate::key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// `wg` / `wg-quick` command line tools
    Cli,
    /// Interface state kept in process memory, nothing touches the host
    Memory,
}

impl FromStr for BackendKind {
    type Err = WgctrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cli" => Ok(BackendKind::Cli),
            "memory" => Ok(BackendKind::Memory),
            _ => Err(WgctrlError::BadParameter {
                msg: format!("Unknown backend kind {}", s),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendCfg {
    pub kind: BackendKind,
    pub ifname: String,
    pub wg_path: String,
    pub wg_quick_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgInterface {
    pub private_key: String,
    pub public_key: String,
    pub listen_port: u16,
    pub fwmark: u32,
}

/// Desired configuration of a peer, as handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgPeerCfg {
    pub pubkey: String,
    pub psk: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNet>,
    pub keep_alive: Option<u16>,
}

/// A peer as reported by the running interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgPeer {
    pub pubkey: String,
    pub psk: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNet>,
    pub keep_alive: Option<u16>,
    /// Seconds since the epoch, 0 if the peer never completed a handshake
    pub latest_handshake: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl From<WgPeerCfg> for WgPeer {
    fn from(cfg: WgPeerCfg) -> Self {
        WgPeer {
            pubkey: cfg.pubkey,
            psk: cfg.psk,
            endpoint: cfg.endpoint,
            allowed_ips: cfg.allowed_ips,
            keep_alive: cfg.keep_alive,
            ..Default::default()
        }
    }
}

/// Operations on a live WireGuard interface.
///
/// Implementations are synchronous and may be slow (process spawns, disk
/// writes). Mutations must be reflected both in the running interface and in
/// whatever persistent configuration the implementation maintains.
pub trait WgBackend: Send + Sync {
    fn fetch_interface(&self) -> Result<WgInterface, WgctrlError>;
    fn fetch_peers(&self) -> Result<Vec<WgPeer>, WgctrlError>;
    /// Fails with `DuplicatedEntry` if a peer with the same public key exists.
    fn add_peer(&self, peer: &WgPeerCfg) -> Result<(), WgctrlError>;
    /// Replaces preshared key, keepalive and allowed IPs of an existing peer.
    fn update_peer(&self, peer: &WgPeerCfg) -> Result<(), WgctrlError>;
    fn remove_peer(&self, pubkey: &str) -> Result<(), WgctrlError>;

    /// Returns `(private, public)`.
    fn generate_keypair(&self) -> (String, String) {
        key::generate_keypair()
    }

    fn generate_preshared(&self) -> String {
        key::generate_preshared()
    }

    fn derive_public(&self, private_key: &str) -> Result<String, WgctrlError> {
        key::derive_public(private_key)
    }
}
