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

pub mod cli;
pub mod common;
pub mod error;
pub mod key;
pub mod memory;

pub use common::{BackendCfg, BackendKind, WgBackend, WgInterface, WgPeer, WgPeerCfg};
pub use error::WgctrlError;

pub struct BackendFactory;

impl BackendFactory {
    pub fn get_backend(cfg: &BackendCfg) -> Result<Box<dyn WgBackend>, WgctrlError> {
        match cfg.kind {
            BackendKind::Cli => Ok(Box::new(cli::WgCliBackend::new(
                &cfg.ifname,
                &cfg.wg_path,
                cfg.wg_quick_path.as_deref(),
            )?)),
            BackendKind::Memory => Ok(Box::new(memory::MemoryBackend::new())),
        }
    }
}
