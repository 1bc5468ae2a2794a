//! Outbound connects and the reconnect policy.
//!
//! The connector is attached to every runtime's dispatch chain. Connections
//! that should be dialed register an address rotation (and optionally a
//! [`Backoff`] policy) in the connector's side table, keyed by the
//! connection's id. On `CONNECTION_OPEN` the connector dials the next
//! address; on `disconnected` it applies the policy, either redialing
//! immediately or scheduling a timer event addressed to itself.

use crate::backoff::Backoff;
use crate::dispatch::Handler;
use crate::events::EventSource;
use crate::reactor::Registrar;
use crate::socket::SocketAdapter;
use crate::url::Urls;
use capstan_amqp::{Connection, Event, Token};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, error, info};

struct Target {
    urls: Urls,
    reconnect: Option<Backoff>,
}

/// Shared registry of dialable connections.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    targets: Rc<RefCell<HashMap<u64, Target>>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry").finish_non_exhaustive()
    }
}

impl ConnectorRegistry {
    /// Register `conn` as dialable over `urls` with an optional reconnect
    /// policy.
    pub fn register(&self, conn: &Connection, urls: Urls, reconnect: Option<Backoff>) {
        self.targets
            .borrow_mut()
            .insert(conn.id(), Target { urls, reconnect });
    }

    /// Drop a connection's registration (no further reconnects).
    pub fn deregister(&self, conn: &Connection) {
        self.targets.borrow_mut().remove(&conn.id());
    }
}

/// The pipeline stage doing the dialing.
pub struct Connector {
    registry: ConnectorRegistry,
    source: EventSource,
    registrar: Registrar,
    token: Token,
}

impl Connector {
    #[must_use]
    pub fn new(source: EventSource, registrar: Registrar) -> Self {
        Self {
            registry: ConnectorRegistry::default(),
            source,
            registrar,
            token: Token::unique(),
        }
    }

    /// The registry handle the runtime keeps.
    #[must_use]
    pub fn registry(&self) -> ConnectorRegistry {
        self.registry.clone()
    }

    fn dial(&self, conn: &Connection) {
        let url = {
            let mut targets = self.registry.targets.borrow_mut();
            let Some(target) = targets.get_mut(&conn.id()) else {
                return;
            };
            target.urls.next()
        };
        let (host, port) = url.host_port();
        debug!(%host, port, "connecting");
        match SocketAdapter::connect(conn.clone(), self.source.clone(), &url) {
            Ok(adapter) => self.registrar.add(Box::new(adapter)),
            Err(err) => {
                error!(%err, %host, port, "connect setup failed");
                // Feed the failure through the regular disconnect path, but
                // only once the current dispatch round is over.
                self.source
                    .schedule(Instant::now(), Event::disconnected(conn));
            }
        }
    }
}

impl Handler for Connector {
    fn on_connection_open(&mut self, event: &Event) {
        if let Some(conn) = event.connection() {
            self.dial(conn);
        }
    }

    fn on_connection_remote_open(&mut self, event: &Event) {
        let Some(conn) = event.connection() else {
            return;
        };
        let mut targets = self.registry.targets.borrow_mut();
        if let Some(target) = targets.get_mut(&conn.id()) {
            if let Some(policy) = target.reconnect.as_mut() {
                policy.reset();
            }
        }
    }

    fn on_disconnected(&mut self, event: &Event) {
        let Some(conn) = event.connection() else {
            return;
        };
        let delay = {
            let mut targets = self.registry.targets.borrow_mut();
            let Some(target) = targets.get_mut(&conn.id()) else {
                return;
            };
            match target.reconnect.as_mut() {
                Some(policy) => policy.next(),
                None => {
                    debug!("disconnected, no reconnect policy");
                    return;
                }
            }
        };
        if delay.is_zero() {
            info!("disconnected, reconnecting");
            self.dial(conn);
        } else {
            info!(?delay, "disconnected, will reconnect after backoff");
            self.source.schedule(
                Instant::now() + delay,
                Event::timer().with_connection(conn).with_subject(self.token),
            );
        }
    }

    fn on_timer(&mut self, event: &Event) {
        if event.subject() != Some(self.token) {
            return;
        }
        if let Some(conn) = event.connection() {
            self.dial(conn);
        }
    }
}
