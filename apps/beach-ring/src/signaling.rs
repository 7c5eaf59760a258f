use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REASON_USERNAME_TAKEN: &str = "Username already taken";
pub const REASON_USERNAME_EMPTY: &str = "Username must not be empty";
pub const REASON_ALREADY_IN_CALL: &str = "One of the users is already in a call.";
pub const REASON_SELF_CALL: &str = "Cannot call yourself";

/// Session offer addressed to another identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub to: String,
    #[serde(default)]
    pub offer: Value,
}

/// Session answer addressed to another identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub to: String,
    #[serde(default)]
    pub answer: Value,
}

/// Network-path candidate addressed to another identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub to: String,
    #[serde(default)]
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndCallRequest {
    pub to: String,
}

/// Messages sent from a client to the relay.
///
/// Frames are `{"type": "<event>", "data": <payload>}`. The opaque blobs
/// (`offer`, `answer`, `candidate`) are carried as raw JSON and never inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claim an identity for this connection
    Register(String),
    Offer(OfferRequest),
    Answer(AnswerRequest),
    IceCandidate(IceCandidateRequest),
    EndCall(EndCallRequest),
}

impl ClientMessage {
    /// Event name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Register(_) => "register",
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice-candidate",
            ClientMessage::EndCall(_) => "end-call",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingOffer {
    pub from: String,
    pub offer: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingAnswer {
    pub from: String,
    pub answer: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingIceCandidate {
    pub candidate: Value,
}

/// Messages sent from the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Registration refused; the client should pick another identity
    UsernameError(String),
    /// Offer refused because a party is busy
    CallError(String),
    /// Every registered identity, in registration order
    Users(Vec<String>),
    Offer(IncomingOffer),
    Answer(IncomingAnswer),
    IceCandidate(IncomingIceCandidate),
    /// The partner hung up or went away
    CallEnded,
}
