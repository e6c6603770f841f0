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

use std::sync::Arc;
use std::time::Duration;

use log::info;

use wgctrl::{BackendFactory, WgBackend};

use crate::config::{Config, Pools};
use crate::error::StartupError;
use crate::events::{EventBus, LogListener, PeerEventListener};
use crate::metrics::Metrics;
use crate::network::{QueuedSubnetSolver, SubnetSolver};

mod backend;
mod service;
mod types;

pub use backend::BackendHandle;
pub use service::PeerService;
pub use types::{
    AllowedSubnets, CreatedPeer, Direction, IpAllocationRequest, Page, PageRequest, Peer,
    PeerCreationRequest, PeerUpdate, Sort, SortField, DEFAULT_PAGE_LIMIT,
};

/// Builds the backend named in `cfg` and everything on top of it.
pub async fn bootstrap(cfg: &Config) -> Result<(Arc<PeerService>, Arc<Metrics>), StartupError> {
    let pools = cfg.network.pools()?;
    let backend = BackendFactory::get_backend(&cfg.wireguard.backend_cfg()?)?;
    info!(
        "Managing interface {} with pools {:?} {:?}",
        cfg.wireguard.interface(),
        pools.v4,
        pools.v6
    );

    bootstrap_with(
        Arc::from(backend),
        pools,
        cfg.wireguard.timeout(),
        cfg.peers.default_keepalive,
    )
    .await
}

/// Starts the solvers, wires metrics and events, and reconciles the solvers
/// with the peers already present on `backend`.
pub async fn bootstrap_with(
    backend: Arc<dyn WgBackend>,
    pools: Pools,
    timeout: Duration,
    default_keepalive: Option<u16>,
) -> Result<(Arc<PeerService>, Arc<Metrics>), StartupError> {
    let v4 = QueuedSubnetSolver::start(SubnetSolver::new(pools.v4.clone()))?;
    let v6 = match pools.v6.is_empty() {
        true => None,
        false => Some(QueuedSubnetSolver::start(SubnetSolver::new(
            pools.v6.clone(),
        ))?),
    };

    let metrics = Arc::new(Metrics::new(v4.clone(), v6.clone())?);
    let listeners: Vec<Arc<dyn PeerEventListener>> = vec![Arc::new(LogListener), metrics.clone()];

    let service = Arc::new(PeerService::new(
        BackendHandle::new(backend, timeout, metrics.backend_latency()),
        v4,
        v6,
        EventBus::new(listeners),
        default_keepalive,
    ));

    let peers = service
        .reconcile(&pools.reserved_v4, &pools.reserved_v6)
        .await?;
    metrics.set_peers(peers);
    metrics.refresh_pool_gauges();

    Ok((service, metrics))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ServiceError;
    use wgctrl::memory::MemoryBackend;
    use wgctrl::{key, WgInterface, WgPeer};

    fn pools(v4: &str, reserved: &[&str]) -> Pools {
        Pools {
            v4: vec![v4.parse().unwrap()],
            reserved_v4: reserved.iter().map(|x| x.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    fn wg_peer(ips: &[&str]) -> WgPeer {
        WgPeer {
            pubkey: key::generate_keypair().1,
            allowed_ips: ips.iter().map(|x| x.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    fn backend(peers: Vec<WgPeer>) -> Arc<dyn WgBackend> {
        let (private_key, public_key) = key::generate_keypair();
        Arc::new(MemoryBackend::with_peers(
            WgInterface {
                private_key,
                public_key,
                listen_port: 51820,
                fwmark: 0,
            },
            peers,
        ))
    }

    #[tokio::test]
    async fn test_reconcile_existing_peers() {
        let peers = vec![
            wg_peer(&["10.0.0.2/32", "192.168.77.0/24"]),
            wg_peer(&["10.0.0.4/30", "fd42::2/128"]),
        ];
        let (service, metrics) = bootstrap_with(
            backend(peers),
            pools("10.0.0.0/24", &["10.0.0.1"]),
            Duration::from_secs(1),
            None,
        )
        .await
        .unwrap();

        let used = service.v4_solver().used_subnets().await.unwrap();
        let used: Vec<String> = used.iter().map(|x| x.to_string()).collect();
        assert_eq!(used, vec!["10.0.0.1/32", "10.0.0.2/32", "10.0.0.4/30"]);
        assert!(metrics.render().unwrap().contains("wirerest_peers 2"));
    }

    #[tokio::test]
    async fn test_reconcile_overlap_is_fatal() {
        let peers = vec![wg_peer(&["10.0.0.1/32"]), wg_peer(&["10.0.0.0/30"])];
        let result = bootstrap_with(
            backend(peers),
            pools("10.0.0.0/24", &[]),
            Duration::from_secs(1),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(StartupError::Service {
                source: ServiceError::Reconciliation { .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_reconcile_reserved_overlap_is_fatal() {
        let result = bootstrap_with(
            backend(vec![wg_peer(&["10.0.0.1/32"])]),
            pools("10.0.0.0/24", &["10.0.0.1"]),
            Duration::from_secs(1),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(StartupError::Service {
                source: ServiceError::Reconciliation { .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_from_config() {
        let cfg: Config = toml::from_str(
            r##"
        [wireguard]
        backend = "memory"
        [network]
        ipv4_pool = ["10.1.0.0/30"]
        ipv6_pool = ["fd42::/126"]
        "##,
        )
        .unwrap();

        let (service, _) = bootstrap(&cfg).await.unwrap();
        assert_eq!(service.v4_solver().total_count(), 4);
        assert_eq!(service.v6_solver().map(|x| x.total_count()), Some(4));
    }
}
