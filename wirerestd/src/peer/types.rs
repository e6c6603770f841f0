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

use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use ipnet::IpNet;

use wgctrl::WgPeer;

use crate::error::ServiceError;
use crate::network::{Subnet, SubnetParseError, SubnetV6};

/// Subnets routed to a peer, split by address family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedSubnets {
    pub v4: Vec<Subnet>,
    pub v6: Vec<SubnetV6>,
}

impl AllowedSubnets {
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Host bits reported by the interface are dropped.
    pub fn from_ipnets(nets: &[IpNet]) -> Result<Self, SubnetParseError> {
        let mut subnets = AllowedSubnets::default();
        for net in nets.iter() {
            match net.trunc() {
                IpNet::V4(x) => subnets.v4.push(Subnet::try_from(x)?),
                IpNet::V6(x) => subnets.v6.push(SubnetV6::try_from(x)?),
            }
        }
        Ok(subnets)
    }

    pub fn to_ipnets(&self) -> Vec<IpNet> {
        let v4 = self.v4.iter().map(|x| IpNet::V4((*x).into()));
        let v6 = self.v6.iter().map(|x| IpNet::V6((*x).into()));
        v4.chain(v6).collect()
    }

    /// Parses user supplied entries. Each entry may hold several comma
    /// separated subnets or bare addresses.
    pub fn parse_all<T: AsRef<str>>(entries: &[T]) -> Result<Self, ServiceError> {
        let mut subnets = AllowedSubnets::default();
        let items = entries
            .iter()
            .flat_map(|x| x.as_ref().split(','))
            .map(|x| x.trim())
            .filter(|x| !x.is_empty());

        for item in items {
            let invalid = |e: SubnetParseError| ServiceError::Validation { msg: e.to_string() };
            match item.contains(':') {
                true => subnets.v6.push(item.parse().map_err(invalid)?),
                false => subnets.v4.push(item.parse().map_err(invalid)?),
            }
        }
        Ok(subnets)
    }

    pub fn to_strings(&self) -> Vec<String> {
        let v4 = self.v4.iter().map(|x| x.to_string());
        let v6 = self.v6.iter().map(|x| x.to_string());
        v4.chain(v6).collect()
    }
}

impl fmt::Display for AllowedSubnets {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.to_strings().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_subnets: AllowedSubnets,
    pub latest_handshake: u64,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
    pub persistent_keepalive: Option<u16>,
}

impl TryFrom<WgPeer> for Peer {
    type Error = ServiceError;

    fn try_from(peer: WgPeer) -> Result<Self, Self::Error> {
        let allowed_subnets =
            AllowedSubnets::from_ipnets(&peer.allowed_ips).map_err(|e| ServiceError::Internal {
                msg: format!("Backend reported bad allowed ips for {}: {}", peer.pubkey, e),
            })?;

        Ok(Peer {
            public_key: peer.pubkey,
            preshared_key: peer.psk,
            endpoint: peer.endpoint,
            allowed_subnets,
            latest_handshake: peer.latest_handshake,
            transfer_rx: peer.rx_bytes,
            transfer_tx: peer.tx_bytes,
            persistent_keepalive: peer.keep_alive,
        })
    }
}

/// Result of a creation. `private_key` is only known when it was generated or
/// supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPeer {
    pub peer: Peer,
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpAllocationRequest {
    /// Reserve exactly these subnets.
    Subnets(AllowedSubnets),
    /// One free /32, plus one free /128 when an IPv6 pool exists.
    NextFree,
    /// A free subnet of the given prefix per family.
    FreePrefix { v4: Option<u8>, v6: Option<u8> },
    /// `Subnets`, or `NextFree` when the set is empty.
    OneIfEmpty(AllowedSubnets),
}

impl Default for IpAllocationRequest {
    fn default() -> Self {
        IpAllocationRequest::NextFree
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCreationRequest {
    pub public_key: Option<String>,
    pub preshared_key: Option<String>,
    pub private_key: Option<String>,
    pub allocation: IpAllocationRequest,
    pub persistent_keepalive: Option<u16>,
}

/// Fields left as `None` are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerUpdate {
    pub preshared_key: Option<String>,
    pub persistent_keepalive: Option<u16>,
    pub allowed_subnets: Option<AllowedSubnets>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    PublicKey,
    PresharedKey,
    Endpoint,
    TransferRx,
    TransferTx,
    LatestHandshake,
}

impl FromStr for SortField {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = [
            ("PublicKey", SortField::PublicKey),
            ("PresharedKey", SortField::PresharedKey),
            ("Endpoint", SortField::Endpoint),
            ("TransferRx", SortField::TransferRx),
            ("TransferTx", SortField::TransferTx),
            ("LatestHandshake", SortField::LatestHandshake),
        ];
        fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, field)| *field)
            .ok_or_else(|| ServiceError::Parsing {
                msg: format!("Unknown sort field {}", s),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub direction: Direction,
}

impl FromStr for Sort {
    type Err = ServiceError;

    /// `<Field>[.asc|.desc]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.rsplit_once('.') {
            Some((field, dir)) => (field, dir),
            None => (s, "asc"),
        };
        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" => Direction::Asc,
            "desc" => Direction::Desc,
            _ => {
                return Err(ServiceError::Parsing {
                    msg: format!("Unknown sort direction {}", direction),
                })
            }
        };

        Ok(Sort {
            field: field.parse()?,
            direction,
        })
    }
}

impl Sort {
    pub fn compare(&self, a: &Peer, b: &Peer) -> Ordering {
        let ord = match self.field {
            SortField::PublicKey => a.public_key.cmp(&b.public_key),
            SortField::PresharedKey => a.preshared_key.cmp(&b.preshared_key),
            SortField::Endpoint => a.endpoint.cmp(&b.endpoint),
            SortField::TransferRx => a.transfer_rx.cmp(&b.transfer_rx),
            SortField::TransferTx => a.transfer_tx.cmp(&b.transfer_tx),
            SortField::LatestHandshake => a.latest_handshake.cmp(&b.latest_handshake),
        };
        match self.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
    pub sort: Option<Sort>,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 0,
            limit: DEFAULT_PAGE_LIMIT,
            sort: None,
        }
    }
}

impl PageRequest {
    /// Validates raw paging parameters as received from a client.
    pub fn new(page: i64, limit: i64, sort: Option<&str>) -> Result<Self, ServiceError> {
        if page < 0 {
            return Err(ServiceError::Validation {
                msg: format!("page must not be negative, got {}", page),
            });
        }
        if limit < 1 {
            return Err(ServiceError::Validation {
                msg: format!("limit must be at least 1, got {}", limit),
            });
        }
        let sort = match sort {
            Some(x) if !x.is_empty() => Some(x.parse()?),
            _ => None,
        };

        Ok(PageRequest {
            page: usize::try_from(page).unwrap_or(usize::MAX),
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
            sort,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub total_pages: usize,
    pub current_page: usize,
    pub content: Vec<T>,
}

impl Page<Peer> {
    /// Sorts (stable) and cuts one page out of `peers`.
    pub fn of(mut peers: Vec<Peer>, request: &PageRequest) -> Self {
        if let Some(sort) = &request.sort {
            peers.sort_by(|a, b| sort.compare(a, b));
        }

        let total = peers.len();
        let total_pages = (total + request.limit - 1) / request.limit;
        let content = peers
            .into_iter()
            .skip(request.page.saturating_mul(request.limit))
            .take(request.limit)
            .collect();

        Page {
            total_pages,
            current_page: request.page,
            content,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer(key: &str, rx: u64, endpoint: Option<&str>) -> Peer {
        Peer {
            public_key: key.to_string(),
            preshared_key: None,
            endpoint: endpoint.map(|x| x.to_string()),
            allowed_subnets: AllowedSubnets::default(),
            latest_handshake: 0,
            transfer_rx: rx,
            transfer_tx: 0,
            persistent_keepalive: None,
        }
    }

    #[test]
    fn test_parse_allowed_subnets() {
        let subnets =
            AllowedSubnets::parse_all(&["10.0.0.1", "10.0.1.0/24, fd42::/64", " ", "fd42:1::5"])
                .unwrap();

        assert_eq!(subnets.to_strings(), vec![
            "10.0.0.1/32",
            "10.0.1.0/24",
            "fd42::/64",
            "fd42:1::5/128"
        ]);

        assert!(matches!(
            AllowedSubnets::parse_all(&["10.0.0.1/24"]),
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            AllowedSubnets::parse_all(&["hello"]),
            Err(ServiceError::Validation { .. })
        ));
        assert!(AllowedSubnets::parse_all::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_ipnet_conversion() {
        let nets: Vec<IpNet> = vec!["10.0.0.1/24".parse().unwrap(), "fd42::1/128".parse().unwrap()];
        let subnets = AllowedSubnets::from_ipnets(&nets).unwrap();

        assert_eq!(subnets.to_strings(), vec!["10.0.0.0/24", "fd42::1/128"]);
        assert_eq!(
            subnets.to_ipnets(),
            vec![
                "10.0.0.0/24".parse::<IpNet>().unwrap(),
                "fd42::1/128".parse::<IpNet>().unwrap()
            ]
        );
    }

    #[test]
    fn test_sort_parse() {
        assert_eq!(
            "TransferRx.desc".parse::<Sort>().unwrap(),
            Sort {
                field: SortField::TransferRx,
                direction: Direction::Desc
            }
        );
        assert_eq!(
            "publicKey".parse::<Sort>().unwrap(),
            Sort {
                field: SortField::PublicKey,
                direction: Direction::Asc
            }
        );
        assert!(matches!(
            "Nonsense.asc".parse::<Sort>(),
            Err(ServiceError::Parsing { .. })
        ));
        assert!(matches!(
            "Endpoint.up".parse::<Sort>(),
            Err(ServiceError::Parsing { .. })
        ));
    }

    #[test]
    fn test_page_request_validation() {
        let err = PageRequest::new(-1, 2, None).unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
        assert!(err.to_string().contains("page"));

        let err = PageRequest::new(0, 0, None).unwrap_err();
        assert!(err.to_string().contains("limit"));

        assert!(matches!(
            PageRequest::new(0, 10, Some("Height.asc")),
            Err(ServiceError::Parsing { .. })
        ));
        assert_eq!(PageRequest::new(0, 20, Some("")).unwrap(), PageRequest::default());
    }

    #[test]
    fn test_paging_and_sorting() {
        let peers = vec![
            peer("c", 5, None),
            peer("a", 7, Some("1.2.3.4:51820")),
            peer("b", 1, None),
            peer("d", 5, Some("1.1.1.1:51820")),
            peer("e", 3, None),
        ];

        let request = PageRequest::new(0, 2, Some("PublicKey.asc")).unwrap();
        let page = Page::of(peers.clone(), &request);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 0);
        let keys: Vec<&str> = page.content.iter().map(|x| x.public_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);

        let request = PageRequest::new(2, 2, Some("PublicKey.asc")).unwrap();
        let page = Page::of(peers.clone(), &request);
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].public_key, "e");

        // stable for equal keys
        let request = PageRequest::new(0, 10, Some("TransferRx.desc")).unwrap();
        let keys: Vec<String> = Page::of(peers.clone(), &request)
            .content
            .into_iter()
            .map(|x| x.public_key)
            .collect();
        assert_eq!(keys, vec!["a", "c", "d", "e", "b"]);

        let request = PageRequest::new(7, 2, None).unwrap();
        let page = Page::of(peers, &request);
        assert!(page.content.is_empty());
        assert_eq!(page.total_pages, 3);
    }
}
