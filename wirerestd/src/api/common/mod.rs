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

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};

use wgctrl::WgctrlError;

use crate::error::ServiceError;
use crate::metrics::Metrics;
use crate::network::SolverError;
use crate::peer::PeerService;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(crate = "rocket::serde")]
pub(crate) struct ApiError {
    pub(crate) code: u16,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn new(status: Status, message: &str) -> Json<Self> {
        Json(ApiError {
            code: status.code,
            message: message.to_string(),
        })
    }
}

pub(crate) type ApiResponseType<T> = (Status, Result<Json<T>, Json<ApiError>>);

pub(crate) fn ok<T>(status: Status, data: T) -> ApiResponseType<T> {
    (status, Ok(Json(data)))
}

pub(crate) fn err<T>(e: &ServiceError) -> ApiResponseType<T> {
    let status = error_status(e);
    (status, Err(ApiError::new(status, &e.to_string())))
}

pub(crate) fn solver_status(e: &SolverError) -> Status {
    match e {
        SolverError::InvalidPrefix { .. } | SolverError::OutOfPool { .. } => Status::BadRequest,
        SolverError::AlreadyUsed { .. } | SolverError::PartialRelease { .. } => Status::Conflict,
        SolverError::NoFreeRange { .. } | SolverError::WorkerStopped => {
            Status::InternalServerError
        }
    }
}

pub(crate) fn backend_status(e: &WgctrlError) -> Status {
    match e {
        WgctrlError::BadParameter { .. } => Status::BadRequest,
        WgctrlError::DuplicatedEntry { .. } => Status::Conflict,
        WgctrlError::EntryNotFound { .. } => Status::NotFound,
        WgctrlError::Internal { .. } => Status::ServiceUnavailable,
    }
}

pub(crate) fn error_status(e: &ServiceError) -> Status {
    match e {
        ServiceError::Validation { .. } | ServiceError::Parsing { .. } => Status::BadRequest,
        ServiceError::NotFound { .. } => Status::NotFound,
        ServiceError::Solver { source } => solver_status(source),
        ServiceError::Backend { source } => backend_status(source),
        ServiceError::BackendTimeout { .. } => Status::ServiceUnavailable,
        ServiceError::Reconciliation { .. } | ServiceError::Internal { .. } => {
            Status::InternalServerError
        }
    }
}

pub(crate) struct PeerServiceStore {
    pub(crate) service: Arc<PeerService>,
}

pub(crate) struct PrometheusStore {
    pub(crate) metrics: Arc<Metrics>,
}
