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

use custom_error::custom_error;

use wgctrl::WgctrlError;

use crate::config::ConfigError;
use crate::network::SolverError;

custom_error! {pub ServiceError
    Validation{msg: String} = "{msg}",
    NotFound{msg: String} = "{msg}",
    Parsing{msg: String} = "{msg}",
    Solver{source: SolverError} = "{source}",
    Backend{source: WgctrlError} = "{source}",
    BackendTimeout{operation: String} = "Backend operation {operation} timed out",
    Reconciliation{msg: String} = "Reconciliation failed: {msg}",
    Internal{msg: String} = "{msg}",
}

custom_error! {pub StartupError
    Config{source: ConfigError} = "{source}",
    Backend{source: WgctrlError} = "Failed to initialize backend: {source}",
    Worker{source: std::io::Error} = "Failed to start subnet solver: {source}",
    Metrics{source: prometheus::Error} = "Failed to set up metrics: {source}",
    Service{source: ServiceError} = "{source}",
}
