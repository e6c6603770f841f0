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

use std::collections::BTreeSet;
use std::convert::TryFrom;

use custom_error::custom_error;

use super::subnet::IpSubnet;

custom_error! {pub SolverError
    NoFreeRange{prefix: u8} = "No free ip range with prefix /{prefix} left in the pool",
    AlreadyUsed{subnet: String} = "Subnet {subnet} is already used",
    OutOfPool{subnet: String} = "Subnet {subnet} is outside of the ip pool",
    PartialRelease{subnet: String} = "Subnet {subnet} only partially overlaps a used subnet",
    InvalidPrefix{prefix: u8, max: u8} = "Prefix /{prefix} is out of range 0..{max}",
    WorkerStopped = "Subnet solver is not running",
}

fn saturate(count: u128) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// Tracks which parts of an immutable pool are handed out.
///
/// Free space is the complement of the used-set within the pool, stored as
/// aligned subnets in canonical form: two free siblings are always merged into
/// their parent. Any aligned free range is therefore contained in exactly one
/// free block.
pub struct SubnetSolver<S: IpSubnet> {
    // Same canonical form as the free space, so every range `obtain_free`
    // can return lies inside a single pool block
    pool: BTreeSet<S>,
    free: BTreeSet<S>,
    used: BTreeSet<S>,
    total: u128,
    used_count: u128,
}

impl<S: IpSubnet> SubnetSolver<S> {
    pub fn new<I: IntoIterator<Item = S>>(pool: I) -> Self {
        let mut subnets: Vec<S> = pool.into_iter().collect();
        subnets.sort();

        // A container sorts before everything it contains
        let mut normalized: Vec<S> = Vec::new();
        for subnet in subnets {
            if !normalized.iter().any(|x| x.contains(&subnet)) {
                normalized.push(subnet);
            }
        }

        let mut solver = SubnetSolver {
            total: normalized
                .iter()
                .fold(0u128, |acc, x| acc.saturating_add(x.size())),
            pool: BTreeSet::new(),
            free: BTreeSet::new(),
            used: BTreeSet::new(),
            used_count: 0,
        };
        for subnet in normalized {
            solver.insert_free(subnet);
        }
        solver.pool = solver.free.clone();
        solver
    }

    /// Reserves the numerically smallest free subnet of the given prefix.
    pub fn obtain_free(&mut self, prefix: u8) -> Result<S, SolverError> {
        if prefix > S::MAX_PREFIX {
            return Err(SolverError::InvalidPrefix {
                prefix,
                max: S::MAX_PREFIX,
            });
        }

        let block = match self.free.iter().find(|x| x.prefix() <= prefix) {
            Some(x) => *x,
            None => return Err(SolverError::NoFreeRange { prefix }),
        };
        self.free.remove(&block);

        let mut candidate = block;
        while candidate.prefix() < prefix {
            let (lower, upper) = match candidate.split() {
                Some(x) => x,
                None => break,
            };
            self.free.insert(upper);
            candidate = lower;
        }

        self.mark_used(candidate);
        Ok(candidate)
    }

    pub fn obtain(&mut self, subnet: S) -> Result<(), SolverError> {
        if Self::floor(&self.pool, &subnet).filter(|x| x.contains(&subnet)).is_none() {
            return Err(SolverError::OutOfPool {
                subnet: subnet.to_string(),
            });
        }

        let already_used = || SolverError::AlreadyUsed {
            subnet: subnet.to_string(),
        };
        if self.overlapping_used(&subnet).is_some() {
            return Err(already_used());
        }
        let block = self.free_block_containing(&subnet).ok_or_else(already_used)?;

        self.free.remove(&block);
        for rest in block.subtract(&subnet) {
            self.free.insert(rest);
        }

        self.mark_used(subnet);
        Ok(())
    }

    #[cfg(test)]
    pub fn obtain_ip(&mut self, ip: S::Addr) -> Result<(), SolverError> {
        self.obtain(S::host(ip))
    }

    /// Returns an exactly matching used subnet to the free space. Releasing a
    /// subnet nobody holds is a no-op; releasing one that cuts through a used
    /// subnet is refused.
    pub fn release(&mut self, subnet: S) -> Result<(), SolverError> {
        if self.used.remove(&subnet) {
            self.used_count -= subnet.size();
            self.insert_free(subnet);
            return Ok(());
        }

        match self.overlapping_used(&subnet) {
            Some(_) => Err(SolverError::PartialRelease {
                subnet: subnet.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn total_count(&self) -> u64 {
        saturate(self.total)
    }

    pub fn used_count(&self) -> u64 {
        saturate(self.used_count)
    }

    pub fn available_count(&self) -> u64 {
        saturate(
            self.free
                .iter()
                .fold(0u128, |acc, x| acc.saturating_add(x.size())),
        )
    }

    pub fn pool(&self) -> impl Iterator<Item = &S> {
        self.pool.iter()
    }

    pub fn used(&self) -> impl Iterator<Item = &S> {
        self.used.iter()
    }

    #[cfg(test)]
    pub fn free_blocks(&self) -> impl Iterator<Item = &S> {
        self.free.iter()
    }

    fn mark_used(&mut self, subnet: S) {
        self.used_count += subnet.size();
        self.used.insert(subnet);
    }

    fn insert_free(&mut self, subnet: S) {
        let mut block = subnet;
        while let Some(sibling) = block.sibling() {
            if !self.free.remove(&sibling) {
                break;
            }
            block = match block.parent() {
                Some(x) => x,
                None => break,
            };
        }
        self.free.insert(block);
    }

    // Greatest element whose base is not above the base of `subnet`
    fn floor(set: &BTreeSet<S>, subnet: &S) -> Option<S> {
        set.range(..=S::raw(subnet.bits(), S::MAX_PREFIX))
            .next_back()
            .copied()
    }

    fn overlapping_used(&self, subnet: &S) -> Option<S> {
        if let Some(before) = Self::floor(&self.used, subnet) {
            if before.overlaps(subnet) {
                return Some(before);
            }
        }
        self.used
            .range(S::raw(subnet.bits(), S::MAX_PREFIX)..)
            .next()
            .filter(|x| x.overlaps(subnet))
            .copied()
    }

    fn free_block_containing(&self, subnet: &S) -> Option<S> {
        Self::floor(&self.free, subnet).filter(|x| x.contains(subnet))
    }
}
