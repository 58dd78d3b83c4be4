use coremux_frame::EndpointId;
use serde::{Deserialize, Serialize};

/// CONTROL message type: endpoint offer from the initiator.
pub const CONTROL_BIND: &str = "bind";
/// CONTROL message type: follower accepted the offer.
pub const CONTROL_BIND_ACK: &str = "bind_ack";
/// CONTROL message type: endpoint closed.
pub const CONTROL_UNBIND: &str = "unbind";

/// Sequence number of one offer, echoed in its acknowledgement.
///
/// An id and a name can both be offered again after a timed-out attempt; the
/// sequence number tells the attempts apart.
pub type OfferSeq = u32;

/// Handshake message carried on the control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Bind {
        id: EndpointId,
        name: String,
        offer: OfferSeq,
    },
    BindAck {
        id: EndpointId,
        name: String,
        offer: OfferSeq,
    },
    Unbind {
        id: EndpointId,
    },
}

impl ControlMessage {
    pub fn bind(id: EndpointId, name: impl Into<String>, offer: OfferSeq) -> Self {
        Self::Bind {
            id,
            name: name.into(),
            offer,
        }
    }

    pub fn bind_ack(id: EndpointId, name: impl Into<String>, offer: OfferSeq) -> Self {
        Self::BindAck {
            id,
            name: name.into(),
            offer,
        }
    }

    pub fn unbind(id: EndpointId) -> Self {
        Self::Unbind { id }
    }

    /// Wire name of the message type.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::Bind { .. } => CONTROL_BIND,
            Self::BindAck { .. } => CONTROL_BIND_ACK,
            Self::Unbind { .. } => CONTROL_UNBIND,
        }
    }

    /// Endpoint the message refers to.
    pub fn id(&self) -> EndpointId {
        match self {
            Self::Bind { id, .. } | Self::BindAck { id, .. } | Self::Unbind { id } => *id,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_wire_shape() {
        let payload = ControlMessage::bind(3, "telemetry", 9).to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "bind", "id": 3, "name": "telemetry", "offer": 9 })
        );
    }

    #[test]
    fn parses_ack_and_unbind() {
        assert_eq!(
            ControlMessage::from_payload(br#"{"type":"bind_ack","id":7,"name":"logs","offer":1}"#)
                .unwrap(),
            ControlMessage::bind_ack(7, "logs", 1)
        );
        let unbind = ControlMessage::from_payload(br#"{"id":2,"type":"unbind"}"#).unwrap();
        assert_eq!(unbind.msg_type(), CONTROL_UNBIND);
        assert_eq!(unbind.id(), 2);
    }

    #[test]
    fn rejects_unknown_type_and_bad_id() {
        assert!(ControlMessage::from_payload(br#"{"type":"ping"}"#).is_err());
        assert!(ControlMessage::from_payload(
            br#"{"type":"bind_ack","id":256,"name":"logs","offer":1}"#
        )
        .is_err());
        // Acknowledgements without the offer they answer are not accepted.
        assert!(ControlMessage::from_payload(br#"{"type":"bind_ack","id":0}"#).is_err());
        assert!(ControlMessage::from_payload(b"not json").is_err());
    }
}
