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

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use prometheus::HistogramVec;
use tokio::task::{self, JoinHandle};
use tokio::time;

use wgctrl::{WgBackend, WgInterface, WgPeer, WgPeerCfg, WgctrlError};

use crate::error::ServiceError;

/// A backend call that outlived its timeout and is still running.
pub struct Straggler<T> {
    operation: &'static str,
    handle: JoinHandle<Result<T, WgctrlError>>,
}

impl<T> Straggler<T> {
    /// Waits for the abandoned call. `Some` when it took effect after all.
    pub async fn settle(self) -> Option<T> {
        match self.handle.await {
            Ok(Ok(x)) => {
                warn!("Backend operation {} completed after its timeout", self.operation);
                Some(x)
            }
            Ok(Err(e)) => {
                info!("Backend operation {} failed after its timeout: {}", self.operation, e);
                None
            }
            Err(e) => {
                error!("Backend operation {} aborted: {}", self.operation, e);
                None
            }
        }
    }
}

/// Failed backend call. `straggler` is set when the call timed out and may
/// still change the backend.
pub struct Failure<T> {
    pub error: ServiceError,
    pub straggler: Option<Straggler<T>>,
}

impl<T> From<ServiceError> for Failure<T> {
    fn from(error: ServiceError) -> Self {
        Failure {
            error,
            straggler: None,
        }
    }
}

impl<T> fmt::Display for Failure<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Async front of a synchronous [`WgBackend`].
///
/// Calls run on the blocking pool and are abandoned after `timeout`. Mutating
/// calls hand the abandoned job back as a [`Straggler`] so the caller can
/// decide what to do once it finishes.
#[derive(Clone)]
pub struct BackendHandle {
    backend: Arc<dyn WgBackend>,
    timeout: Duration,
    latency: HistogramVec,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn WgBackend>, timeout: Duration, latency: HistogramVec) -> Self {
        BackendHandle {
            backend,
            timeout,
            latency,
        }
    }

    async fn spawn<T, F>(&self, operation: &'static str, f: F) -> Result<T, Failure<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn WgBackend) -> Result<T, WgctrlError> + Send + 'static,
    {
        let backend = self.backend.clone();
        let timer = self.latency.with_label_values(&[operation]).start_timer();

        let mut handle = task::spawn_blocking(move || f(backend.as_ref()));
        let outcome = time::timeout(self.timeout, &mut handle).await;
        let result = match outcome {
            Ok(Ok(x)) => x.map_err(|e| Failure::from(ServiceError::from(e))),
            Ok(Err(e)) => {
                error!("Backend operation {} aborted: {}", operation, e);
                Err(Failure::from(ServiceError::Internal {
                    msg: format!("Backend operation {} aborted", operation),
                }))
            }
            Err(_) => {
                warn!(
                    "Backend operation {} timed out after {:?}",
                    operation, self.timeout
                );
                Err(Failure {
                    error: ServiceError::BackendTimeout {
                        operation: operation.to_string(),
                    },
                    straggler: Some(Straggler { operation, handle }),
                })
            }
        };

        timer.observe_duration();
        result
    }

    async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn WgBackend) -> Result<T, WgctrlError> + Send + 'static,
    {
        self.spawn(operation, f).await.map_err(|x| x.error)
    }

    pub async fn fetch_interface(&self) -> Result<WgInterface, ServiceError> {
        self.call("fetch_interface", |b| b.fetch_interface()).await
    }

    pub async fn fetch_peers(&self) -> Result<Vec<WgPeer>, ServiceError> {
        self.call("fetch_peers", |b| b.fetch_peers()).await
    }

    pub async fn add_peer(&self, peer: WgPeerCfg) -> Result<(), Failure<()>> {
        self.spawn("add_peer", move |b| b.add_peer(&peer)).await
    }

    pub async fn update_peer(&self, peer: WgPeerCfg) -> Result<(), Failure<()>> {
        self.spawn("update_peer", move |b| b.update_peer(&peer)).await
    }

    pub async fn remove_peer(&self, pubkey: String) -> Result<(), Failure<()>> {
        self.spawn("remove_peer", move |b| b.remove_peer(&pubkey)).await
    }

    pub fn generate_keypair(&self) -> (String, String) {
        self.backend.generate_keypair()
    }

    pub fn generate_preshared(&self) -> String {
        self.backend.generate_preshared()
    }

    pub fn derive_public(&self, private_key: &str) -> Result<String, ServiceError> {
        self.backend
            .derive_public(private_key)
            .map_err(|e| ServiceError::Validation {
                msg: format!("Invalid private key: {}", e),
            })
    }
}
