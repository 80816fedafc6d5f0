#![warn(missing_docs)]

//! Wire envelopes and transmission options.
//!
//! Everything crossing the transport boundary is one of three envelopes:
//! a [RequestMessage], a [ReplyMessage] or an [AckMessage], serialized with
//! bincode. An ack confirms that a request arrived and was processed; a reply
//! additionally carries the result and doubles as an ack when it arrives
//! first.

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use super::types::Message;
use crate::error::Error;
use crate::error::Result;
use crate::ring::Link;
use crate::ring::PeerId;

/// How responses to a request are routed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    /// The reply is routed straight to the originating node, even when the
    /// request travelled over multiple hops. Intermediate hops are still
    /// acked individually via their own `msg_id`, which is why the ack id is
    /// distinct from the reply id.
    Direct,
    /// The reply retraces the path that carried the request.
    Aggregate,
    /// No ack, no reply, no bookkeeping: reliability is traded for zero
    /// round-trip overhead.
    NoResponse,
}

/// Retransmission behavior while waiting for an ack.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetransMode {
    /// Send once, never register or retransmit.
    None,
    /// Retransmit on a stretched timer.
    Slow,
    /// Retransmit as soon as the ack timer fires.
    Fast,
    /// Like `Fast` with a doubled retransmission budget.
    Reliable,
}

/// Per-request transmission options.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransOptions {
    /// Response routing.
    pub response_type: ResponseType,
    /// Retransmission behavior.
    pub retrans_mode: RetransMode,
}

impl TransOptions {
    /// Direct response with fast retransmission, the default for protocol
    /// requests.
    pub fn direct() -> Self {
        Self {
            response_type: ResponseType::Direct,
            retrans_mode: RetransMode::Fast,
        }
    }

    /// Direct response with a specific retransmission mode.
    pub fn direct_with(retrans_mode: RetransMode) -> Self {
        Self {
            response_type: ResponseType::Direct,
            retrans_mode,
        }
    }

    /// Fire-and-forget.
    pub fn no_response() -> Self {
        Self {
            response_type: ResponseType::NoResponse,
            retrans_mode: RetransMode::None,
        }
    }

    /// Whether the sender keeps bookkeeping for a response. `NoResponse`
    /// suppresses it entirely; so does `RetransMode::None` combined with
    /// fire-and-forget semantics on the receiving side.
    pub fn expects_response(&self) -> bool {
        self.response_type != ResponseType::NoResponse
    }
}

/// A request addressed to a remote ring member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// The sending member (also the hop to ack).
    pub sender: Link,
    /// The addressed member.
    pub receiver: Link,
    /// Id unique and monotonically assigned per sending node; acks refer to
    /// it.
    pub msg_id: u64,
    /// The root node awaiting the reply.
    pub reply_to: Link,
    /// Id of the pending entry at the root; replies refer to it. Differs from
    /// `msg_id` once a request has been forwarded.
    pub reply_id: u64,
    /// Transmission options.
    pub opts: TransOptions,
    /// Peers the request travelled through, oldest first.
    pub path: Vec<PeerId>,
    /// The protocol body.
    pub body: Message,
}

/// A reply carrying the result of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// The answering member.
    pub sender: Link,
    /// The root node the reply is for.
    pub receiver: Link,
    /// The `reply_id` of the request.
    pub reply_id: u64,
    /// The protocol body.
    pub body: Message,
}

/// A bare receipt confirmation for one hop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    /// The acking member.
    pub sender: Link,
    /// The hop that sent the request.
    pub receiver: Link,
    /// The `msg_id` of the acked request.
    pub ack_id: u64,
}

/// Everything that can travel over the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// A request.
    Request(RequestMessage),
    /// A reply.
    Reply(ReplyMessage),
    /// An ack.
    Ack(AckMessage),
}

impl Envelope {
    /// Serialize for the transport.
    pub fn to_bincode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(Error::BincodeSerialize)
    }

    /// Deserialize from the transport.
    pub fn from_bincode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(Error::BincodeDeserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::Ping;
    use crate::ring::DdllKey;
    use crate::ring::UniqId;

    fn link(raw: i64) -> Link {
        let id = UniqId::from_u64(raw as u64);
        Link::new(id, DdllKey::new(raw, id, "l", 0))
    }

    #[test]
    fn test_envelope_bincode_round_trip() {
        let env = Envelope::Request(RequestMessage {
            sender: link(1),
            receiver: link(2),
            msg_id: 7,
            reply_to: link(1),
            reply_id: 7,
            opts: TransOptions::direct(),
            path: vec![link(1).addr],
            body: Message::Ping(Ping),
        });

        let bytes = env.to_bincode().unwrap();
        let back = Envelope::from_bincode(&bytes).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn test_no_response_expects_nothing() {
        assert!(TransOptions::direct().expects_response());
        assert!(!TransOptions::no_response().expects_response());
    }
}
