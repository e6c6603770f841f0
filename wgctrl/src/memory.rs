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

use parking_lot::Mutex;

use crate::common::{WgBackend, WgInterface, WgPeer, WgPeerCfg};
use crate::error::WgctrlError;
use crate::key;

/// Backend that never touches the host: the interface identity and its peers
/// live in memory for the lifetime of the process.
pub struct MemoryBackend {
    iface: WgInterface,
    peers: Mutex<Vec<WgPeer>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (private_key, public_key) = key::generate_keypair();
        MemoryBackend::with_peers(
            WgInterface {
                private_key,
                public_key,
                listen_port: 51820,
                fwmark: 0,
            },
            Vec::new(),
        )
    }

    pub fn with_peers(iface: WgInterface, peers: Vec<WgPeer>) -> Self {
        MemoryBackend {
            iface,
            peers: Mutex::new(peers),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

impl WgBackend for MemoryBackend {
    fn fetch_interface(&self) -> Result<WgInterface, WgctrlError> {
        Ok(self.iface.clone())
    }

    fn fetch_peers(&self) -> Result<Vec<WgPeer>, WgctrlError> {
        Ok(self.peers.lock().clone())
    }

    fn add_peer(&self, peer: &WgPeerCfg) -> Result<(), WgctrlError> {
        key::validate_key(&peer.pubkey)?;

        let mut peers = self.peers.lock();
        if peers.iter().any(|x| x.pubkey == peer.pubkey) {
            return Err(WgctrlError::DuplicatedEntry {
                msg: "Duplicated peer".to_string(),
            });
        }

        peers.push(WgPeer::from(peer.clone()));
        Ok(())
    }

    fn update_peer(&self, peer: &WgPeerCfg) -> Result<(), WgctrlError> {
        let mut peers = self.peers.lock();
        let current = match peers.iter_mut().find(|x| x.pubkey == peer.pubkey) {
            Some(x) => x,
            None => {
                return Err(WgctrlError::EntryNotFound {
                    msg: "Peer not found".to_string(),
                })
            }
        };

        current.psk = peer.psk.clone();
        current.keep_alive = peer.keep_alive;
        current.allowed_ips = peer.allowed_ips.clone();
        if peer.endpoint.is_some() {
            current.endpoint = peer.endpoint.clone();
        }
        Ok(())
    }

    fn remove_peer(&self, pubkey: &str) -> Result<(), WgctrlError> {
        let mut peers = self.peers.lock();
        match peers.iter().position(|x| x.pubkey == pubkey) {
            Some(idx) => {
                peers.remove(idx);
                Ok(())
            }
            None => Err(WgctrlError::EntryNotFound {
                msg: "Peer not found".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer_cfg(pubkey: &str, ip: &str) -> WgPeerCfg {
        WgPeerCfg {
            pubkey: pubkey.to_string(),
            psk: None,
            endpoint: None,
            allowed_ips: vec![ip.parse().unwrap()],
            keep_alive: Some(25),
        }
    }

    #[test]
    fn test_add_and_remove_peer() {
        let backend = MemoryBackend::new();
        let (_, pubk) = key::generate_keypair();

        backend.add_peer(&peer_cfg(&pubk, "10.0.0.2/32")).unwrap();
        let peers = backend.fetch_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].keep_alive, Some(25));

        backend.remove_peer(&pubk).unwrap();
        assert!(backend.fetch_peers().unwrap().is_empty());
    }

    #[test]
    fn test_duplicated_peer() {
        let backend = MemoryBackend::new();
        let (_, pubk) = key::generate_keypair();

        backend.add_peer(&peer_cfg(&pubk, "10.0.0.2/32")).unwrap();
        assert!(matches!(
            backend.add_peer(&peer_cfg(&pubk, "10.0.0.3/32")),
            Err(WgctrlError::DuplicatedEntry { .. })
        ));
    }

    #[test]
    fn test_missing_peer() {
        let backend = MemoryBackend::new();
        let (_, pubk) = key::generate_keypair();

        assert!(matches!(
            backend.remove_peer(&pubk),
            Err(WgctrlError::EntryNotFound { .. })
        ));
        assert!(matches!(
            backend.update_peer(&peer_cfg(&pubk, "10.0.0.2/32")),
            Err(WgctrlError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn test_update_keeps_counters() {
        let (_, pubk) = key::generate_keypair();
        let backend = MemoryBackend::with_peers(
            MemoryBackend::new().fetch_interface().unwrap(),
            vec![WgPeer {
                pubkey: pubk.clone(),
                allowed_ips: vec!["10.0.0.2/32".parse().unwrap()],
                rx_bytes: 10,
                tx_bytes: 20,
                ..Default::default()
            }],
        );

        backend.update_peer(&peer_cfg(&pubk, "10.0.0.4/30")).unwrap();

        let peer = &backend.fetch_peers().unwrap()[0];
        assert_eq!(peer.allowed_ips, vec!["10.0.0.4/30".parse().unwrap()]);
        assert_eq!(peer.rx_bytes, 10);
        assert_eq!(peer.tx_bytes, 20);
    }
}
