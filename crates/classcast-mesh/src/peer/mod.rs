//! Point-to-point peer links and their negotiation.
//!
//! The manager owns one `PeerLink` per remote participant the local client
//! must reach. Each link drives an explicit negotiation state machine; the
//! media stack itself sits behind the `PeerConnection` trait.

mod backend;
mod link;
mod manager;
mod negotiation;


use std::fmt;

pub use backend::{
    LinkId, LinkState, PeerConnection, PeerConnectionFactory, PeerEvent, PeerEventKind,
    PeerEventSink,
};
pub use link::PeerLink;
pub use manager::{LinkFailure, LinkIntent, PeerConnectionManager};
pub use negotiation::{
    InvalidTransition, NegotiationState, NegotiationStateMachine, OfferDecision, Renegotiation,
};

/// Which side of a link drives offers. Fixed when the link is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Initiator,
    Responder,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}
