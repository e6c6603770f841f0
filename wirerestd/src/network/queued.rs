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

use std::io;
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use super::solver::{SolverError, SubnetSolver};
use super::subnet::IpSubnet;

const QUEUE_DEPTH: usize = 64;

/// Address counts as last published by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl<S: IpSubnet> From<&SubnetSolver<S>> for SolverStats {
    fn from(solver: &SubnetSolver<S>) -> Self {
        SolverStats {
            total: solver.total_count(),
            used: solver.used_count(),
            available: solver.available_count(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SolverError>>;

enum Command<S> {
    ObtainFree { prefix: u8, reply: Reply<S> },
    Obtain { subnet: S, reply: Reply<()> },
    Release { subnet: S, reply: Reply<()> },
    UsedSubnets { reply: Reply<Vec<S>> },
}

/// Front end of a [`SubnetSolver`] owned by a dedicated worker thread.
///
/// Mutations are queued and applied one at a time in arrival order. Counters
/// are served from a snapshot the worker refreshes before answering, so a
/// caller that saw its reply also sees the counts that include it.
pub struct QueuedSubnetSolver<S: IpSubnet> {
    tx: mpsc::Sender<Command<S>>,
    stats: Arc<RwLock<SolverStats>>,
}

impl<S: IpSubnet> Clone for QueuedSubnetSolver<S> {
    fn clone(&self) -> Self {
        QueuedSubnetSolver {
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<S: IpSubnet> QueuedSubnetSolver<S> {
    /// Moves `solver` onto a new worker thread. The worker exits once every
    /// handle is dropped.
    pub fn start(solver: SubnetSolver<S>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let stats = Arc::new(RwLock::new(SolverStats::from(&solver)));

        let worker_stats = stats.clone();
        thread::Builder::new()
            .name("subnet-solver".to_string())
            .spawn(move || run_worker(solver, rx, worker_stats))?;

        Ok(QueuedSubnetSolver { tx, stats })
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command<S>,
    ) -> Result<T, SolverError> {
        let (reply, result) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SolverError::WorkerStopped)?;
        result.await.map_err(|_| SolverError::WorkerStopped)?
    }

    pub async fn obtain_free(&self, prefix: u8) -> Result<S, SolverError> {
        self.submit(|reply| Command::ObtainFree { prefix, reply }).await
    }

    pub async fn obtain(&self, subnet: S) -> Result<(), SolverError> {
        self.submit(|reply| Command::Obtain { subnet, reply }).await
    }

    #[cfg(test)]
    pub async fn obtain_ip(&self, ip: S::Addr) -> Result<(), SolverError> {
        self.obtain(S::host(ip)).await
    }

    pub async fn release(&self, subnet: S) -> Result<(), SolverError> {
        self.submit(|reply| Command::Release { subnet, reply }).await
    }

    /// Ordered copy of the used-set.
    pub async fn used_subnets(&self) -> Result<Vec<S>, SolverError> {
        self.submit(|reply| Command::UsedSubnets { reply }).await
    }

    pub fn stats(&self) -> SolverStats {
        *self.stats.read()
    }

    pub fn total_count(&self) -> u64 {
        self.stats().total
    }

    pub fn used_count(&self) -> u64 {
        self.stats().used
    }

    pub fn available_count(&self) -> u64 {
        self.stats().available
    }
}

fn run_worker<S: IpSubnet>(
    mut solver: SubnetSolver<S>,
    mut rx: mpsc::Receiver<Command<S>>,
    stats: Arc<RwLock<SolverStats>>,
) {
    debug!(
        "subnet solver started for {:?}",
        solver.pool().collect::<Vec<_>>()
    );

    while let Some(cmd) = rx.blocking_recv() {
        let delivered = match cmd {
            Command::ObtainFree { prefix, reply } => {
                let result = solver.obtain_free(prefix);
                *stats.write() = SolverStats::from(&solver);
                reply.send(result).is_ok()
            }
            Command::Obtain { subnet, reply } => {
                let result = solver.obtain(subnet);
                *stats.write() = SolverStats::from(&solver);
                reply.send(result).is_ok()
            }
            Command::Release { subnet, reply } => {
                let result = solver.release(subnet);
                *stats.write() = SolverStats::from(&solver);
                reply.send(result).is_ok()
            }
            Command::UsedSubnets { reply } => {
                reply.send(Ok(solver.used().copied().collect())).is_ok()
            }
        };
        if !delivered {
            // Mutation stays applied; the caller went away.
            warn!("subnet solver reply dropped by caller");
        }
    }

    debug!("subnet solver stopped");
}
