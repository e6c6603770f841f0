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

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use custom_error::custom_error;
use log::{error, info, warn};

use crate::peer::Peer;

custom_error! {pub ListenerError
    Failed{msg: String} = "{msg}",
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Created(Peer),
    Updated(Peer),
    Deleted(Peer),
}

impl PeerEvent {
    pub fn peer(&self) -> &Peer {
        match self {
            PeerEvent::Created(x) | PeerEvent::Updated(x) | PeerEvent::Deleted(x) => x,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerEvent::Created(_) => "created",
            PeerEvent::Updated(_) => "updated",
            PeerEvent::Deleted(_) => "deleted",
        }
    }
}

pub trait PeerEventListener: Send + Sync {
    fn name(&self) -> &str;
    fn on_event(&self, event: &PeerEvent) -> Result<(), ListenerError>;
}

/// Dispatches events to a fixed set of listeners, in registration order, on
/// the publishing task.
pub struct EventBus {
    listeners: Vec<Arc<dyn PeerEventListener>>,
}

impl EventBus {
    pub fn new(listeners: Vec<Arc<dyn PeerEventListener>>) -> Self {
        EventBus { listeners }
    }

    /// Never fails; listener errors and panics are logged.
    pub fn publish(&self, event: &PeerEvent) {
        for listener in self.listeners.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Listener {} failed on {} event: {}",
                    listener.name(),
                    event.kind(),
                    e
                ),
                Err(_) => error!(
                    "Listener {} panicked on {} event",
                    listener.name(),
                    event.kind()
                ),
            }
        }
    }
}

/// Writes one line per peer change.
pub struct LogListener;

impl PeerEventListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    fn on_event(&self, event: &PeerEvent) -> Result<(), ListenerError> {
        let peer = event.peer();
        info!(
            "Peer {} {} with allowed ips {}",
            peer.public_key,
            event.kind(),
            peer.allowed_subnets
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::AllowedSubnets;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl PeerEventListener for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_event(&self, event: &PeerEvent) -> Result<(), ListenerError> {
            self.seen
                .lock()
                .push(format!("{}:{}:{}", self.name, event.kind(), event.peer().public_key));
            Ok(())
        }
    }

    struct Failing;

    impl PeerEventListener for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_event(&self, _event: &PeerEvent) -> Result<(), ListenerError> {
            Err(ListenerError::Failed {
                msg: "boom".to_string(),
            })
        }
    }

    struct Panicking;

    impl PeerEventListener for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_event(&self, _event: &PeerEvent) -> Result<(), ListenerError> {
            panic!("listener bug")
        }
    }

    fn peer(key: &str) -> Peer {
        Peer {
            public_key: key.to_string(),
            preshared_key: None,
            endpoint: None,
            allowed_subnets: AllowedSubnets::default(),
            latest_handshake: 0,
            transfer_rx: 0,
            transfer_tx: 0,
            persistent_keepalive: None,
        }
    }

    #[test]
    fn test_publish_order_and_isolation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = |name: &str| {
            Arc::new(Recorder {
                name: name.to_string(),
                seen: seen.clone(),
            }) as Arc<dyn PeerEventListener>
        };

        let listeners: Vec<Arc<dyn PeerEventListener>> = vec![
            recorder("first"),
            Arc::new(Failing),
            Arc::new(Panicking),
            recorder("second"),
            Arc::new(LogListener),
        ];
        let bus = EventBus::new(listeners);

        bus.publish(&PeerEvent::Created(peer("k1")));
        bus.publish(&PeerEvent::Deleted(peer("k1")));

        assert_eq!(
            *seen.lock(),
            vec![
                "first:created:k1",
                "second:created:k1",
                "first:deleted:k1",
                "second:deleted:k1"
            ]
        );
    }
}
