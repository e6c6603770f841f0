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

use rocket::serde::{Deserialize, Serialize};

use wgctrl::WgInterface;

use crate::error::ServiceError;
use crate::peer::{
    AllowedSubnets, CreatedPeer, IpAllocationRequest, Page, PageRequest, Peer,
    PeerCreationRequest, PeerUpdate, DEFAULT_PAGE_LIMIT,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub(crate) struct PeerDto {
    pub(crate) public_key: String,
    pub(crate) preshared_key: Option<String>,
    pub(crate) endpoint: Option<String>,
    pub(crate) allowed_ips: Vec<String>,
    pub(crate) latest_handshake: u64,
    pub(crate) transfer_rx: u64,
    pub(crate) transfer_tx: u64,
    pub(crate) persistent_keepalive: Option<u16>,
}

impl From<Peer> for PeerDto {
    fn from(peer: Peer) -> Self {
        PeerDto {
            allowed_ips: peer.allowed_subnets.to_strings(),
            public_key: peer.public_key,
            preshared_key: peer.preshared_key,
            endpoint: peer.endpoint,
            latest_handshake: peer.latest_handshake,
            transfer_rx: peer.transfer_rx,
            transfer_tx: peer.transfer_tx,
            persistent_keepalive: peer.persistent_keepalive,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub(crate) struct CreatedPeerDto {
    pub(crate) public_key: String,
    pub(crate) private_key: Option<String>,
    pub(crate) preshared_key: Option<String>,
    pub(crate) allowed_ips: Vec<String>,
    pub(crate) persistent_keepalive: Option<u16>,
}

impl From<CreatedPeer> for CreatedPeerDto {
    fn from(created: CreatedPeer) -> Self {
        CreatedPeerDto {
            allowed_ips: created.peer.allowed_subnets.to_strings(),
            public_key: created.peer.public_key,
            private_key: created.private_key,
            preshared_key: created.peer.preshared_key,
            persistent_keepalive: created.peer.persistent_keepalive,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub(crate) struct PageDto<T> {
    pub(crate) total_pages: usize,
    pub(crate) current_page: usize,
    pub(crate) content: Vec<T>,
}

impl From<Page<Peer>> for PageDto<PeerDto> {
    fn from(page: Page<Peer>) -> Self {
        PageDto {
            total_pages: page.total_pages,
            current_page: page.current_page,
            content: page.content.into_iter().map(PeerDto::from).collect(),
        }
    }
}

/// The private key never leaves the daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub(crate) struct InterfaceDto {
    pub(crate) public_key: String,
    pub(crate) listen_port: u16,
    pub(crate) fwmark: u32,
}

impl From<WgInterface> for InterfaceDto {
    fn from(iface: WgInterface) -> Self {
        InterfaceDto {
            public_key: iface.public_key,
            listen_port: iface.listen_port,
            fwmark: iface.fwmark,
        }
    }
}

#[derive(Debug, FromForm)]
pub(crate) struct PageQuery {
    pub(crate) page: Option<i64>,
    pub(crate) limit: Option<i64>,
    pub(crate) sort: Option<String>,
}

impl PageQuery {
    pub(crate) fn to_request(&self) -> Result<PageRequest, ServiceError> {
        PageRequest::new(
            self.page.unwrap_or(0),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT as i64),
            self.sort.as_deref(),
        )
    }
}

#[derive(Debug, FromForm)]
pub(crate) struct PeerKeyQuery {
    #[field(name = "publicKey")]
    pub(crate) public_key: String,
}

#[derive(Debug, FromForm)]
pub(crate) struct CreatePeerQuery {
    #[field(name = "publicKey")]
    pub(crate) public_key: Option<String>,
    #[field(name = "presharedKey")]
    pub(crate) preshared_key: Option<String>,
    #[field(name = "privateKey")]
    pub(crate) private_key: Option<String>,
    #[field(name = "allowedIps")]
    pub(crate) allowed_ips: Option<Vec<String>>,
    #[field(name = "persistentKeepalive")]
    pub(crate) persistent_keepalive: Option<u16>,
}

fn non_empty(x: &Option<String>) -> Option<String> {
    x.as_ref()
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
}

impl CreatePeerQuery {
    pub(crate) fn to_request(&self) -> Result<PeerCreationRequest, ServiceError> {
        let allowed = AllowedSubnets::parse_all(self.allowed_ips.as_deref().unwrap_or(&[]))?;

        Ok(PeerCreationRequest {
            public_key: non_empty(&self.public_key),
            preshared_key: non_empty(&self.preshared_key),
            private_key: non_empty(&self.private_key),
            allocation: IpAllocationRequest::OneIfEmpty(allowed),
            persistent_keepalive: self.persistent_keepalive,
        })
    }
}

#[derive(Debug, FromForm)]
pub(crate) struct UpdatePeerQuery {
    #[field(name = "publicKey")]
    pub(crate) public_key: String,
    #[field(name = "presharedKey")]
    pub(crate) preshared_key: Option<String>,
    #[field(name = "allowedIps")]
    pub(crate) allowed_ips: Option<Vec<String>>,
    #[field(name = "persistentKeepalive")]
    pub(crate) persistent_keepalive: Option<u16>,
}

impl UpdatePeerQuery {
    pub(crate) fn to_update(&self) -> Result<PeerUpdate, ServiceError> {
        let allowed_subnets = match &self.allowed_ips {
            Some(x) if !x.is_empty() => Some(AllowedSubnets::parse_all(x)?),
            _ => None,
        };

        Ok(PeerUpdate {
            preshared_key: non_empty(&self.preshared_key),
            persistent_keepalive: self.persistent_keepalive,
            allowed_subnets,
        })
    }
}
