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

use log::debug;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::events::{ListenerError, PeerEvent, PeerEventListener};
use crate::network::{SolverStats, V4Solver, V6Solver};
use crate::peer::Peer;

fn to_i64(x: u64) -> i64 {
    i64::try_from(x).unwrap_or(i64::MAX)
}

pub struct Metrics {
    registry: Registry,
    peers: IntGauge,
    free_v4: Gauge,
    used_v4: Gauge,
    free_v6: Gauge,
    used_v6: Gauge,
    created: IntCounter,
    updated: IntCounter,
    deleted: IntCounter,
    backend_latency: HistogramVec,
    transfer_rx: IntGaugeVec,
    transfer_tx: IntGaugeVec,
    v4: V4Solver,
    v6: Option<V6Solver>,
}

impl Metrics {
    pub fn new(v4: V4Solver, v6: Option<V6Solver>) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let metrics = Metrics {
            peers: IntGauge::new("wirerest_peers", "Number of configured peers")?,
            free_v4: Gauge::new("wirerest_free_v4_ips", "Free IPv4 addresses in the pool")?,
            used_v4: Gauge::new("wirerest_used_v4_ips", "Used IPv4 addresses in the pool")?,
            free_v6: Gauge::new("wirerest_free_v6_ips", "Free IPv6 addresses in the pool")?,
            used_v6: Gauge::new("wirerest_used_v6_ips", "Used IPv6 addresses in the pool")?,
            created: IntCounter::new("wirerest_peers_created_total", "Peers created")?,
            updated: IntCounter::new("wirerest_peers_updated_total", "Peers updated")?,
            deleted: IntCounter::new("wirerest_peers_deleted_total", "Peers deleted")?,
            backend_latency: HistogramVec::new(
                HistogramOpts::new(
                    "wirerest_backend_operation_duration_seconds",
                    "Latency of wireguard backend operations",
                ),
                &["operation"],
            )?,
            transfer_rx: IntGaugeVec::new(
                Opts::new("wirerest_peer_transfer_rx_bytes", "Bytes received from peer"),
                &["public_key"],
            )?,
            transfer_tx: IntGaugeVec::new(
                Opts::new("wirerest_peer_transfer_tx_bytes", "Bytes sent to peer"),
                &["public_key"],
            )?,
            registry,
            v4,
            v6,
        };

        let r = &metrics.registry;
        r.register(Box::new(metrics.peers.clone()))?;
        r.register(Box::new(metrics.free_v4.clone()))?;
        r.register(Box::new(metrics.used_v4.clone()))?;
        r.register(Box::new(metrics.free_v6.clone()))?;
        r.register(Box::new(metrics.used_v6.clone()))?;
        r.register(Box::new(metrics.created.clone()))?;
        r.register(Box::new(metrics.updated.clone()))?;
        r.register(Box::new(metrics.deleted.clone()))?;
        r.register(Box::new(metrics.backend_latency.clone()))?;
        r.register(Box::new(metrics.transfer_rx.clone()))?;
        r.register(Box::new(metrics.transfer_tx.clone()))?;

        #[cfg(target_os = "linux")]
        r.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        metrics.refresh_pool_gauges();
        Ok(metrics)
    }

    pub fn backend_latency(&self) -> HistogramVec {
        self.backend_latency.clone()
    }

    pub fn set_peers(&self, count: usize) {
        self.peers.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn refresh_pool_gauges(&self) {
        let v4 = self.v4.stats();
        self.free_v4.set(v4.available as f64);
        self.used_v4.set(v4.used as f64);

        let v6 = match &self.v6 {
            Some(x) => x.stats(),
            None => SolverStats::default(),
        };
        self.free_v6.set(v6.available as f64);
        self.used_v6.set(v6.used as f64);
    }

    /// Publishes the counters of a fresh backend snapshot.
    pub fn observe_transfer(&self, peers: &[Peer]) {
        for peer in peers.iter() {
            self.transfer_rx
                .with_label_values(&[peer.public_key.as_str()])
                .set(to_i64(peer.transfer_rx));
            self.transfer_tx
                .with_label_values(&[peer.public_key.as_str()])
                .set(to_i64(peer.transfer_tx));
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::<u8>::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl PeerEventListener for Metrics {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_event(&self, event: &PeerEvent) -> Result<(), ListenerError> {
        match event {
            PeerEvent::Created(_) => {
                self.peers.inc();
                self.created.inc();
            }
            PeerEvent::Updated(_) => self.updated.inc(),
            PeerEvent::Deleted(peer) => {
                self.peers.dec();
                self.deleted.inc();
                // Series only exist once a scrape has seen the peer
                for vec in [&self.transfer_rx, &self.transfer_tx].iter() {
                    if vec.remove_label_values(&[peer.public_key.as_str()]).is_err() {
                        debug!("No transfer series for {}", peer.public_key);
                    }
                }
            }
        }
        self.refresh_pool_gauges();
        Ok(())
    }
}
