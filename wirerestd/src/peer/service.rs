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

use std::convert::TryFrom;
use std::future::Future;
use std::sync::Arc;

use log::{error, info, warn};

use wgctrl::{key, WgInterface, WgPeerCfg};

use crate::error::ServiceError;
use crate::events::{EventBus, PeerEvent};
use crate::network::{
    IpSubnet, QueuedSubnetSolver, SolverError, Subnet, SubnetV6, V4Solver, V6Solver,
};

use super::backend::{BackendHandle, Straggler};
use super::types::{
    AllowedSubnets, CreatedPeer, IpAllocationRequest, Page, PageRequest, Peer,
    PeerCreationRequest, PeerUpdate,
};

const V4_HOST_PREFIX: u8 = 32;
const V6_HOST_PREFIX: u8 = 128;

/// Subnets reserved during one request, released in reverse order unless the
/// request commits.
struct Compensation {
    v4: V4Solver,
    v6: Option<V6Solver>,
    held: Vec<Reservation>,
}

enum Reservation {
    V4(Subnet),
    V6(SubnetV6),
}

impl Compensation {
    fn new(v4: &V4Solver, v6: &Option<V6Solver>) -> Self {
        Compensation {
            v4: v4.clone(),
            v6: v6.clone(),
            held: Vec::new(),
        }
    }

    fn v6(&self) -> Result<&V6Solver, ServiceError> {
        self.v6.as_ref().ok_or_else(|| ServiceError::Validation {
            msg: "No IPv6 pool configured".to_string(),
        })
    }

    async fn obtain_v4(&mut self, subnet: Subnet) -> Result<(), ServiceError> {
        self.v4.obtain(subnet).await?;
        self.held.push(Reservation::V4(subnet));
        Ok(())
    }

    async fn obtain_v6(&mut self, subnet: SubnetV6) -> Result<(), ServiceError> {
        self.v6()?.obtain(subnet).await?;
        self.held.push(Reservation::V6(subnet));
        Ok(())
    }

    async fn obtain_free_v4(&mut self, prefix: u8) -> Result<(), ServiceError> {
        let subnet = self.v4.obtain_free(prefix).await?;
        self.held.push(Reservation::V4(subnet));
        Ok(())
    }

    async fn obtain_free_v6(&mut self, prefix: u8) -> Result<(), ServiceError> {
        let subnet = self.v6()?.obtain_free(prefix).await?;
        self.held.push(Reservation::V6(subnet));
        Ok(())
    }

    async fn obtain_all(&mut self, subnets: &AllowedSubnets) -> Result<(), ServiceError> {
        for subnet in subnets.v4.iter() {
            self.obtain_v4(*subnet).await?;
        }
        for subnet in subnets.v6.iter() {
            self.obtain_v6(*subnet).await?;
        }
        Ok(())
    }

    fn reserved(&self) -> AllowedSubnets {
        let mut subnets = AllowedSubnets::default();
        for r in self.held.iter() {
            match r {
                Reservation::V4(x) => subnets.v4.push(*x),
                Reservation::V6(x) => subnets.v6.push(*x),
            }
        }
        subnets
    }

    /// Keeps every reservation.
    fn commit(mut self) {
        self.held.clear();
    }

    /// Release failures are logged, never returned.
    async fn unwind(mut self) {
        while let Some(r) = self.held.pop() {
            let (subnet, result) = match r {
                Reservation::V4(x) => (x.to_string(), self.v4.release(x).await),
                Reservation::V6(x) => match &self.v6 {
                    Some(v6) => (x.to_string(), v6.release(x).await),
                    None => continue,
                },
            };
            match result {
                Ok(()) => info!("Released {} after failed request", subnet),
                Err(e) => warn!("Failed to release {}: {}", subnet, e),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ResolvedKeys {
    public_key: String,
    private_key: Option<String>,
    preshared_key: Option<String>,
}

fn invalid_key(what: &str) -> impl Fn(wgctrl::WgctrlError) -> ServiceError + '_ {
    move |e| ServiceError::Validation {
        msg: format!("Invalid {}: {}", what, e),
    }
}

pub struct PeerService {
    backend: BackendHandle,
    v4: V4Solver,
    v6: Option<V6Solver>,
    events: EventBus,
    default_keepalive: Option<u16>,
}

impl PeerService {
    pub fn new(
        backend: BackendHandle,
        v4: V4Solver,
        v6: Option<V6Solver>,
        events: EventBus,
        default_keepalive: Option<u16>,
    ) -> Self {
        PeerService {
            backend,
            v4,
            v6,
            events,
            default_keepalive,
        }
    }

    pub fn v4_solver(&self) -> &V4Solver {
        &self.v4
    }

    pub fn v6_solver(&self) -> Option<&V6Solver> {
        self.v6.as_ref()
    }

    pub async fn interface(&self) -> Result<WgInterface, ServiceError> {
        self.backend.fetch_interface().await
    }

    pub async fn peers(&self) -> Result<Vec<Peer>, ServiceError> {
        self.backend
            .fetch_peers()
            .await?
            .into_iter()
            .map(Peer::try_from)
            .collect()
    }

    pub async fn list_peers(&self, request: &PageRequest) -> Result<Page<Peer>, ServiceError> {
        Ok(Page::of(self.peers().await?, request))
    }

    pub async fn find_by_public_key(&self, public_key: &str) -> Result<Peer, ServiceError> {
        self.peers()
            .await?
            .into_iter()
            .find(|x| x.public_key == public_key)
            .ok_or_else(|| ServiceError::NotFound {
                msg: format!("Peer with public key {} not found", public_key),
            })
    }

    /// Runs `f` on its own task so that a dropped caller cannot interrupt a
    /// reservation, backend call or compensation halfway.
    async fn detached<T, F, Fut>(self: &Arc<Self>, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        tokio::spawn(f(self.clone()))
            .await
            .map_err(|e| ServiceError::Internal {
                msg: format!("Peer operation aborted: {}", e),
            })?
    }

    pub async fn create_peer(
        self: &Arc<Self>,
        request: PeerCreationRequest,
    ) -> Result<CreatedPeer, ServiceError> {
        self.detached(|svc| async move { svc.do_create(request).await })
            .await
    }

    pub async fn update_peer(
        self: &Arc<Self>,
        public_key: String,
        update: PeerUpdate,
    ) -> Result<Peer, ServiceError> {
        self.detached(|svc| async move { svc.do_update(&public_key, update).await })
            .await
    }

    pub async fn delete_peer(self: &Arc<Self>, public_key: String) -> Result<Peer, ServiceError> {
        self.detached(|svc| async move { svc.do_delete(&public_key).await })
            .await
    }

    fn resolve_keys(&self, request: &PeerCreationRequest) -> Result<ResolvedKeys, ServiceError> {
        if let Some(psk) = &request.preshared_key {
            key::validate_key(psk).map_err(invalid_key("preshared key"))?;
        }

        match (&request.public_key, &request.private_key) {
            (Some(public_key), private_key) => {
                key::validate_key(public_key).map_err(invalid_key("public key"))?;
                if let Some(private_key) = private_key {
                    if &self.backend.derive_public(private_key)? != public_key {
                        return Err(ServiceError::Validation {
                            msg: "Public key does not match private key".to_string(),
                        });
                    }
                }
                Ok(ResolvedKeys {
                    public_key: public_key.clone(),
                    private_key: private_key.clone(),
                    preshared_key: request.preshared_key.clone(),
                })
            }
            (None, Some(private_key)) => Ok(ResolvedKeys {
                public_key: self.backend.derive_public(private_key)?,
                private_key: Some(private_key.clone()),
                preshared_key: request
                    .preshared_key
                    .clone()
                    .or_else(|| Some(self.backend.generate_preshared())),
            }),
            (None, None) => {
                let (private_key, public_key) = self.backend.generate_keypair();
                Ok(ResolvedKeys {
                    public_key,
                    private_key: Some(private_key),
                    preshared_key: request
                        .preshared_key
                        .clone()
                        .or_else(|| Some(self.backend.generate_preshared())),
                })
            }
        }
    }

    async fn allocate(
        &self,
        allocation: &IpAllocationRequest,
        reserved: &mut Compensation,
    ) -> Result<(), ServiceError> {
        match allocation {
            IpAllocationRequest::Subnets(subnets) => reserved.obtain_all(subnets).await,
            IpAllocationRequest::OneIfEmpty(subnets) if !subnets.is_empty() => {
                reserved.obtain_all(subnets).await
            }
            IpAllocationRequest::NextFree | IpAllocationRequest::OneIfEmpty(_) => {
                reserved.obtain_free_v4(V4_HOST_PREFIX).await?;
                if self.v6.is_some() {
                    reserved.obtain_free_v6(V6_HOST_PREFIX).await?;
                }
                Ok(())
            }
            IpAllocationRequest::FreePrefix { v4, v6 } => {
                if v4.is_none() && v6.is_none() {
                    return Err(ServiceError::Validation {
                        msg: "No prefix requested".to_string(),
                    });
                }
                if let Some(prefix) = v4 {
                    reserved.obtain_free_v4(*prefix).await?;
                }
                if let Some(prefix) = v6 {
                    reserved.obtain_free_v6(*prefix).await?;
                }
                Ok(())
            }
        }
    }

    async fn do_create(&self, request: PeerCreationRequest) -> Result<CreatedPeer, ServiceError> {
        let keys = self.resolve_keys(&request)?;

        let mut reserved = Compensation::new(&self.v4, &self.v6);
        if let Err(e) = self.allocate(&request.allocation, &mut reserved).await {
            reserved.unwind().await;
            return Err(e);
        }
        let allowed_subnets = reserved.reserved();

        let peer = Peer {
            public_key: keys.public_key,
            preshared_key: keys.preshared_key,
            endpoint: None,
            allowed_subnets,
            latest_handshake: 0,
            transfer_rx: 0,
            transfer_tx: 0,
            persistent_keepalive: request.persistent_keepalive.or(self.default_keepalive),
        };

        if let Err(failure) = self.backend.add_peer(peer_cfg(&peer)).await {
            error!("Failed to add peer {}: {}", peer.public_key, failure);
            match failure.straggler {
                Some(late) => self.settle_add(late, peer.public_key.clone(), reserved),
                None => reserved.unwind().await,
            }
            return Err(failure.error);
        }
        reserved.commit();

        self.events.publish(&PeerEvent::Created(peer.clone()));
        Ok(CreatedPeer {
            peer,
            private_key: keys.private_key,
        })
    }

    async fn do_update(&self, public_key: &str, update: PeerUpdate) -> Result<Peer, ServiceError> {
        if let Some(psk) = &update.preshared_key {
            key::validate_key(psk).map_err(invalid_key("preshared key"))?;
        }
        let current = self.find_by_public_key(public_key).await?;

        let target = update
            .allowed_subnets
            .unwrap_or_else(|| current.allowed_subnets.clone());
        let added = AllowedSubnets {
            v4: difference(&target.v4, &current.allowed_subnets.v4),
            v6: difference(&target.v6, &current.allowed_subnets.v6),
        };
        let removed = AllowedSubnets {
            v4: difference(&current.allowed_subnets.v4, &target.v4),
            v6: difference(&current.allowed_subnets.v6, &target.v6),
        };

        let mut reserved = Compensation::new(&self.v4, &self.v6);
        if let Err(e) = self
            .allocate(&IpAllocationRequest::Subnets(added), &mut reserved)
            .await
        {
            reserved.unwind().await;
            return Err(e);
        }

        let previous = peer_cfg(&current);
        let peer = Peer {
            preshared_key: update.preshared_key.or(current.preshared_key),
            persistent_keepalive: update.persistent_keepalive.or(current.persistent_keepalive),
            allowed_subnets: target,
            ..current
        };

        if let Err(failure) = self.backend.update_peer(peer_cfg(&peer)).await {
            error!("Failed to update peer {}: {}", peer.public_key, failure);
            match failure.straggler {
                Some(late) => self.settle_update(late, previous, reserved),
                None => reserved.unwind().await,
            }
            return Err(failure.error);
        }
        reserved.commit();

        self.release_all(&removed).await;
        self.events.publish(&PeerEvent::Updated(peer.clone()));
        Ok(peer)
    }

    async fn do_delete(self: &Arc<Self>, public_key: &str) -> Result<Peer, ServiceError> {
        let peer = self.find_by_public_key(public_key).await?;

        if let Err(failure) = self.backend.remove_peer(peer.public_key.clone()).await {
            error!("Failed to remove peer {}: {}", peer.public_key, failure);
            if let Some(late) = failure.straggler {
                self.settle_remove(late, peer);
            }
            return Err(failure.error);
        }
        self.release_all(&peer.allowed_subnets).await;

        self.events.publish(&PeerEvent::Deleted(peer.clone()));
        Ok(peer)
    }

    /// Holds the reservations of a timed-out `add_peer` until the call
    /// finishes. A peer that got installed anyway is removed again before its
    /// addresses return to the pool.
    fn settle_add(&self, late: Straggler<()>, public_key: String, reserved: Compensation) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if late.settle().await.is_some() {
                if let Err(e) = backend.remove_peer(public_key.clone()).await {
                    error!("Cannot remove late peer {}, keeping its addresses: {}", public_key, e);
                    reserved.commit();
                    return;
                }
                info!("Removed peer {} installed after its timeout", public_key);
            }
            reserved.unwind().await;
        });
    }

    /// Like [`settle_add`](Self::settle_add) for `update_peer`: a late update
    /// is reverted to `previous` before the added subnets are released.
    fn settle_update(&self, late: Straggler<()>, previous: WgPeerCfg, reserved: Compensation) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if late.settle().await.is_some() {
                let public_key = previous.pubkey.clone();
                if let Err(e) = backend.update_peer(previous).await {
                    error!("Cannot restore peer {}, keeping its addresses: {}", public_key, e);
                    reserved.commit();
                    return;
                }
                info!("Restored peer {} after a late update", public_key);
            }
            reserved.unwind().await;
        });
    }

    /// A timed-out `remove_peer` that still succeeds frees the peer's subnets.
    fn settle_remove(self: &Arc<Self>, late: Straggler<()>, peer: Peer) {
        let svc = self.clone();
        tokio::spawn(async move {
            if late.settle().await.is_some() {
                svc.release_all(&peer.allowed_subnets).await;
                svc.events.publish(&PeerEvent::Deleted(peer));
            }
        });
    }

    /// Subnets the solvers do not manage are skipped by the solver itself.
    async fn release_all(&self, subnets: &AllowedSubnets) {
        for subnet in subnets.v4.iter() {
            if let Err(e) = self.v4.release(*subnet).await {
                warn!("Failed to release {}: {}", subnet, e);
            }
        }
        if let Some(v6) = &self.v6 {
            for subnet in subnets.v6.iter() {
                if let Err(e) = v6.release(*subnet).await {
                    warn!("Failed to release {}: {}", subnet, e);
                }
            }
        }
    }

    /// Imports reserved addresses and the backend's peers into the solvers.
    /// Returns the number of peers found.
    pub async fn reconcile(
        &self,
        reserved_v4: &[Subnet],
        reserved_v6: &[SubnetV6],
    ) -> Result<usize, ServiceError> {
        for subnet in reserved_v4.iter() {
            reconcile_one(&self.v4, *subnet, "reserved range").await?;
        }
        if let Some(v6) = &self.v6 {
            for subnet in reserved_v6.iter() {
                reconcile_one(v6, *subnet, "reserved range").await?;
            }
        }

        let peers = self.peers().await?;
        for peer in peers.iter() {
            for subnet in peer.allowed_subnets.v4.iter() {
                reconcile_one(&self.v4, *subnet, &peer.public_key).await?;
            }
            for subnet in peer.allowed_subnets.v6.iter() {
                match &self.v6 {
                    Some(v6) => reconcile_one(v6, *subnet, &peer.public_key).await?,
                    None => info!(
                        "Peer {}: {} is not managed, no IPv6 pool configured",
                        peer.public_key, subnet
                    ),
                }
            }
        }

        info!(
            "Reconciled {} peers, {} of {} IPv4 addresses in use",
            peers.len(),
            self.v4.used_count(),
            self.v4.total_count()
        );
        Ok(peers.len())
    }
}

async fn reconcile_one<S: IpSubnet>(
    solver: &QueuedSubnetSolver<S>,
    subnet: S,
    owner: &str,
) -> Result<(), ServiceError> {
    match solver.obtain(subnet).await {
        Ok(()) => Ok(()),
        Err(SolverError::OutOfPool { .. }) => {
            info!("{}: {} is outside of the pool, not managed", owner, subnet);
            Ok(())
        }
        Err(e @ SolverError::AlreadyUsed { .. }) => {
            error!("{}: {} overlaps another peer or reserved range", owner, subnet);
            Err(ServiceError::Reconciliation {
                msg: format!("{}: {}", owner, e),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn difference<S: IpSubnet>(a: &[S], b: &[S]) -> Vec<S> {
    a.iter().filter(|x| !b.contains(x)).copied().collect()
}

fn peer_cfg(peer: &Peer) -> WgPeerCfg {
    WgPeerCfg {
        pubkey: peer.public_key.clone(),
        psk: peer.preshared_key.clone(),
        endpoint: peer.endpoint.clone(),
        allowed_ips: peer.allowed_subnets.to_ipnets(),
        keep_alive: peer.persistent_keepalive,
    }
}
