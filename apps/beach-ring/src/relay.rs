use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pairing::{PairingError, PairingTable};
use crate::registry::{ConnectionId, ConnectionRegistry, RegistryError};
use crate::signaling::{
    AnswerRequest, ClientMessage, EndCallRequest, IceCandidateRequest, IncomingAnswer,
    IncomingIceCandidate, IncomingOffer, OfferRequest, ServerMessage, REASON_ALREADY_IN_CALL,
    REASON_SELF_CALL, REASON_USERNAME_EMPTY, REASON_USERNAME_TAKEN,
};

/// Outbound queue of one connection; drained by its transport writer.
pub type Outbox = mpsc::Sender<ServerMessage>;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("identity {0:?} is already registered")]
    DuplicateIdentity(String),
    #[error("connection is already registered as {0:?}")]
    AlreadyRegistered(String),
    #[error("identity must not be empty")]
    InvalidIdentity,
    #[error("{0:?} is already in a call")]
    AlreadyInCall(String),
    #[error("cannot place a call to yourself")]
    SelfCall,
    #[error("no connection registered as {0:?}")]
    UnknownTarget(String),
    #[error("connection has not registered an identity")]
    NotRegistered,
    #[error("connection is not attached")]
    UnknownConnection,
}

impl RelayError {
    /// The event reported back to the originating connection, if any.
    ///
    /// Routing misses stay silent: the protocol has no "offline" reply.
    pub fn reply(&self) -> Option<ServerMessage> {
        match self {
            RelayError::DuplicateIdentity(_) => {
                Some(ServerMessage::UsernameError(REASON_USERNAME_TAKEN.to_string()))
            }
            RelayError::AlreadyRegistered(identity) => Some(ServerMessage::UsernameError(
                format!("Already registered as {identity}"),
            )),
            RelayError::InvalidIdentity => {
                Some(ServerMessage::UsernameError(REASON_USERNAME_EMPTY.to_string()))
            }
            RelayError::AlreadyInCall(_) => {
                Some(ServerMessage::CallError(REASON_ALREADY_IN_CALL.to_string()))
            }
            RelayError::SelfCall => Some(ServerMessage::CallError(REASON_SELF_CALL.to_string())),
            RelayError::UnknownTarget(_)
            | RelayError::NotRegistered
            | RelayError::UnknownConnection => None,
        }
    }
}

impl From<RegistryError> for RelayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateIdentity(identity) => RelayError::DuplicateIdentity(identity),
            RegistryError::AlreadyRegistered(identity) => RelayError::AlreadyRegistered(identity),
        }
    }
}

impl From<PairingError> for RelayError {
    fn from(err: PairingError) -> Self {
        RelayError::AlreadyInCall(err.busy)
    }
}

/// What a disconnect cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Departure {
    pub identity: Option<String>,
    pub partner: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: usize,
    pub identities: Vec<String>,
    pub active_calls: usize,
}

/// The signaling service: identity registry, call pairings and the set of
/// open connections, all behind one lock.
///
/// Every operation commits its table changes and queues its outbound events
/// before the lock is released, so handlers never observe a half-applied
/// update and each connection sees events in processing order.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Mutex<RelayTables>>,
    outbox_capacity: usize,
}

impl Default for Relay {
    fn default() -> Self {
        Self::with_outbox_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

#[derive(Default)]
struct RelayTables {
    connections: HashMap<ConnectionId, Outbox>,
    registry: ConnectionRegistry,
    pairings: PairingTable,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each connection may have at most `capacity` undelivered events queued;
    /// further events for it are dropped until its writer catches up.
    pub fn with_outbox_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayTables::default())),
            outbox_capacity: capacity.max(1),
        }
    }

    /// Track a freshly opened connection and hand back the receiving end of
    /// its outbox. The connection receives presence broadcasts but takes no
    /// part in calls until it registers.
    pub fn attach(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let connection = Uuid::new_v4();
        self.inner.lock().connections.insert(connection, tx);
        counter!("beach_ring_connections_total", 1);
        debug!(connection_id = %connection, "connection attached");
        (connection, rx)
    }

    /// Process one inbound event from `connection` to completion.
    ///
    /// User-correctable failures are reported to the sender before returning;
    /// the returned error is for logging only.
    pub fn handle(&self, connection: ConnectionId, message: ClientMessage) -> Result<(), RelayError> {
        let mut tables = self.inner.lock();
        if !tables.connections.contains_key(&connection) {
            return Err(RelayError::UnknownConnection);
        }

        let kind = message.kind();
        let result = tables.dispatch(connection, message);
        if let Err(err) = &result {
            if let Some(reply) = err.reply() {
                tables.deliver(connection, reply);
            } else {
                counter!("beach_ring_dropped_total", 1, "kind" => kind);
            }
        }
        tables.record_gauges();
        result
    }

    /// Tear down everything owned by `connection` and rebroadcast presence.
    pub fn detach(&self, connection: ConnectionId) -> Departure {
        let mut tables = self.inner.lock();
        if tables.connections.remove(&connection).is_none() {
            return Departure::default();
        }
        counter!("beach_ring_disconnects_total", 1);

        let mut departure = Departure::default();
        if let Some(identity) = tables.registry.identity_of(connection).map(str::to_owned) {
            let partner = tables.pairings.partner_of(&identity).map(str::to_owned);
            tables.registry.unregister(connection);
            tables.pairings.end(&identity);
            if let Some(partner) = &partner {
                if tables.notify(partner, ServerMessage::CallEnded).is_ok() {
                    info!(identity = %identity, partner = %partner, "call ended by disconnect");
                }
            }
            info!(identity = %identity, connection_id = %connection, "identity released");
            departure = Departure {
                identity: Some(identity),
                partner,
            };
        }

        tables.broadcast_presence();
        tables.record_gauges();
        departure
    }

    pub fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.inner.lock().registry.resolve(identity)
    }

    pub fn partner_of(&self, identity: &str) -> Option<String> {
        self.inner
            .lock()
            .pairings
            .partner_of(identity)
            .map(str::to_owned)
    }

    pub fn snapshot(&self) -> RelayStats {
        let tables = self.inner.lock();
        RelayStats {
            connections: tables.connections.len(),
            identities: tables.registry.identities(),
            active_calls: tables.pairings.active_calls(),
        }
    }
}

impl RelayTables {
    fn dispatch(&mut self, connection: ConnectionId, message: ClientMessage) -> Result<(), RelayError> {
        match message {
            ClientMessage::Register(identity) => self.register(connection, identity),
            ClientMessage::Offer(request) => {
                let sender = self.sender(connection)?;
                self.offer(&sender, request)
            }
            ClientMessage::Answer(request) => {
                let sender = self.sender(connection)?;
                self.answer(&sender, request)
            }
            ClientMessage::IceCandidate(request) => {
                self.sender(connection)?;
                self.ice_candidate(request)
            }
            ClientMessage::EndCall(request) => {
                let sender = self.sender(connection)?;
                self.end_call(&sender, request)
            }
        }
    }

    /// Only registered connections take part in calls.
    fn sender(&self, connection: ConnectionId) -> Result<String, RelayError> {
        self.registry
            .identity_of(connection)
            .map(str::to_owned)
            .ok_or(RelayError::NotRegistered)
    }

    fn register(&mut self, connection: ConnectionId, identity: String) -> Result<(), RelayError> {
        let outcome = if identity.trim().is_empty() {
            Err(RelayError::InvalidIdentity)
        } else {
            self.registry
                .register(&identity, connection)
                .map_err(RelayError::from)
        };

        match &outcome {
            Ok(()) => {
                counter!("beach_ring_registrations_total", 1, "outcome" => "ok");
                info!(identity = %identity, connection_id = %connection, "identity registered");
                self.broadcast_presence();
            }
            Err(err) => {
                counter!("beach_ring_registrations_total", 1, "outcome" => "rejected");
                warn!(identity = %identity, connection_id = %connection, error = %err, "registration rejected");
            }
        }
        outcome
    }

    fn offer(&mut self, sender: &str, request: OfferRequest) -> Result<(), RelayError> {
        let OfferRequest { to, offer } = request;
        if to == sender {
            counter!("beach_ring_offers_total", 1, "outcome" => "rejected");
            return Err(RelayError::SelfCall);
        }

        if let Err(err) = self.pairings.begin(sender, &to) {
            counter!("beach_ring_offers_total", 1, "outcome" => "busy");
            info!(from = %sender, to = %to, busy = %err.busy, "offer refused");
            return Err(err.into());
        }

        let delivered = self.notify(
            &to,
            ServerMessage::Offer(IncomingOffer {
                from: sender.to_string(),
                offer,
            }),
        );
        if delivered.is_err() {
            // Nobody to ring, so the caller stays free.
            self.pairings.end(sender);
            counter!("beach_ring_offers_total", 1, "outcome" => "unknown_target");
            return delivered;
        }

        counter!("beach_ring_offers_total", 1, "outcome" => "relayed");
        info!(from = %sender, to = %to, "call paired");
        Ok(())
    }

    fn answer(&mut self, sender: &str, request: AnswerRequest) -> Result<(), RelayError> {
        self.notify(
            &request.to,
            ServerMessage::Answer(IncomingAnswer {
                from: sender.to_string(),
                answer: request.answer,
            }),
        )
    }

    fn ice_candidate(&mut self, request: IceCandidateRequest) -> Result<(), RelayError> {
        self.notify(
            &request.to,
            ServerMessage::IceCandidate(IncomingIceCandidate {
                candidate: request.candidate,
            }),
        )
    }

    /// Ends the sender's own pairing; the declared target is only used for
    /// notification, so a stale `to` cannot break someone else's call.
    fn end_call(&mut self, sender: &str, request: EndCallRequest) -> Result<(), RelayError> {
        let partner = self.pairings.end(sender);
        info!(from = %sender, to = %request.to, partner = ?partner, "call ended");

        let result = self.notify(&request.to, ServerMessage::CallEnded);
        if let Some(partner) = partner.filter(|partner| partner != &request.to) {
            let _ = self.notify(&partner, ServerMessage::CallEnded);
        }
        result
    }

    /// Route `message` to the connection registered as `identity`.
    fn notify(&self, identity: &str, message: ServerMessage) -> Result<(), RelayError> {
        let connection = self
            .registry
            .resolve(identity)
            .ok_or_else(|| RelayError::UnknownTarget(identity.to_string()))?;
        self.deliver(connection, message);
        Ok(())
    }

    fn deliver(&self, connection: ConnectionId, message: ServerMessage) {
        let Some(outbox) = self.connections.get(&connection) else {
            return;
        };
        if enqueue(connection, outbox, message) {
            counter!("beach_ring_messages_relayed_total", 1);
        }
    }

    fn broadcast_presence(&self) {
        let users = self.registry.identities();
        debug!(count = users.len(), "broadcasting presence");
        for (connection, outbox) in &self.connections {
            enqueue(*connection, outbox, ServerMessage::Users(users.clone()));
        }
    }

    fn record_gauges(&self) {
        gauge!("beach_ring_identities", self.registry.len() as f64);
        gauge!("beach_ring_active_calls", self.pairings.active_calls() as f64);
    }
}

/// Non-blocking push onto a connection's outbox. A stalled reader loses
/// events instead of growing its queue; a closed one is cleaned up by its
/// own disconnect.
fn enqueue(connection: ConnectionId, outbox: &Outbox, message: ServerMessage) -> bool {
    match outbox.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            counter!("beach_ring_outbox_full_total", 1);
            warn!(connection_id = %connection, "outbox full; dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(connection_id = %connection, "outbox closed; dropping event");
            false
        }
    }
}
