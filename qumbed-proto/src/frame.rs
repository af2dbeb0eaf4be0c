//! Wire frames for the Qumbed pub/sub protocol.
//!
//! A frame is one JSON object on the wire, carrying a numeric `t`
//! discriminator and exactly one variant under a one-letter key
//! (`p`, `s`, `u`, `m`, `a`, `e`, `d`). The transport layer adds a 4-byte
//! big-endian length prefix in front of the JSON body.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Maximum accepted frame body (JSON bytes).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame type discriminator carried in the `t` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Publication of an encrypted payload to a topic.
    Publish = 1,
    /// Registration of interest in a topic.
    Subscribe = 2,
    /// Removal of interest in a topic.
    Unsubscribe = 3,
    /// A relayed message delivered to a subscriber.
    Message = 4,
    /// Acknowledgement of a publish or subscribe.
    Ack = 5,
    /// An error reported by the remote endpoint.
    Error = 6,
    /// Peer announcement for local discovery.
    Discovery = 7,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, ProtoError> {
        match value {
            1 => Ok(FrameType::Publish),
            2 => Ok(FrameType::Subscribe),
            3 => Ok(FrameType::Unsubscribe),
            4 => Ok(FrameType::Message),
            5 => Ok(FrameType::Ack),
            6 => Ok(FrameType::Error),
            7 => Ok(FrameType::Discovery),
            other => Err(ProtoError::UnknownFrameType(other)),
        }
    }
}

/// Byte fields travel as standard base64 strings in the JSON body.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Publication of an encrypted payload to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishFrame {
    /// Topic the payload is published on.
    pub topic: String,
    /// Encrypted envelope, opaque to the relay.
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    /// Schema the plaintext was validated against before encryption.
    pub schema_id: String,
    /// First bytes of the recipient's public key, an opaque routing hint.
    #[serde(with = "b64")]
    pub recipient_key_id: Vec<u8>,
    /// Publisher's public key, forwarded so recipients can open the envelope.
    #[serde(with = "b64")]
    pub sender_public_key: Vec<u8>,
}

/// Registration of interest in a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeFrame {
    /// Topic to subscribe to.
    pub topic: String,
    /// Optional schema filter; empty means "any payload".
    pub schema_id: String,
    /// Subscriber's public key.
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
}

/// Removal of interest in a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeFrame {
    /// Topic to drop.
    pub topic: String,
}

/// A relayed message. The broker forwards the payload without reading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    /// Topic the message was published on.
    pub topic: String,
    /// The publisher's encrypted envelope, byte-for-byte.
    #[serde(with = "b64")]
    pub encrypted_payload: Vec<u8>,
    /// Routing hint copied from the publish frame.
    #[serde(with = "b64")]
    pub sender_key_id: Vec<u8>,
    /// Publisher's public key, needed to open the envelope.
    #[serde(with = "b64")]
    pub sender_public_key: Vec<u8>,
}

/// Acknowledgement of a publish or subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckFrame {
    /// Correlation ID; currently unused and left empty.
    pub message_id: String,
    /// Whether the request was applied.
    pub ok: bool,
}

/// An error reported by the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Stable error code, e.g. `SCHEMA_UNKNOWN`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// Peer announcement for local discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFrame {
    /// Announcing node's identifier.
    pub node_id: String,
    /// Topics the node is interested in.
    pub topics: Vec<String>,
    /// Announcing node's public key.
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    /// Address the node can be reached at.
    pub addr: String,
}

/// Top-level wire message. Exactly one variant is populated per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `t = 1`
    Publish(PublishFrame),
    /// `t = 2`
    Subscribe(SubscribeFrame),
    /// `t = 3`
    Unsubscribe(UnsubscribeFrame),
    /// `t = 4`
    Message(MessageFrame),
    /// `t = 5`
    Ack(AckFrame),
    /// `t = 6`
    Error(ErrorFrame),
    /// `t = 7`
    Discovery(DiscoveryFrame),
}

/// JSON shape of a frame: the discriminator plus one optional slot per
/// variant. Kept private so the sum type is the only public surface.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    t: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    p: Option<PublishFrame>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    s: Option<SubscribeFrame>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    u: Option<UnsubscribeFrame>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    m: Option<MessageFrame>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    a: Option<AckFrame>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    e: Option<ErrorFrame>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    d: Option<DiscoveryFrame>,
}

impl Frame {
    /// The discriminator for this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Publish(_) => FrameType::Publish,
            Frame::Subscribe(_) => FrameType::Subscribe,
            Frame::Unsubscribe(_) => FrameType::Unsubscribe,
            Frame::Message(_) => FrameType::Message,
            Frame::Ack(_) => FrameType::Ack,
            Frame::Error(_) => FrameType::Error,
            Frame::Discovery(_) => FrameType::Discovery,
        }
    }

    /// An acknowledgement frame with an empty correlation ID.
    pub fn ack(ok: bool) -> Self {
        Frame::Ack(AckFrame {
            message_id: String::new(),
            ok,
        })
    }

    /// An error frame with the given code and detail.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Frame::Error(ErrorFrame {
            code: code.to_string(),
            message: message.into(),
        })
    }

    /// Serialize to a JSON body, enforcing the size limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        let body = serde_json::to_vec(&self.wire())?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtoError::FrameTooLarge {
                size: body.len(),
                limit: MAX_FRAME_SIZE,
            });
        }
        Ok(body)
    }

    /// Deserialize from a JSON body (without the length prefix).
    pub fn from_bytes(body: &[u8]) -> Result<Self, ProtoError> {
        let wire: WireFrame = serde_json::from_slice(body)?;
        from_wire(wire)
    }

    fn wire(&self) -> WireFrame {
        let mut wire = WireFrame {
            t: self.frame_type() as u8,
            ..WireFrame::default()
        };
        match self.clone() {
            Frame::Publish(p) => wire.p = Some(p),
            Frame::Subscribe(s) => wire.s = Some(s),
            Frame::Unsubscribe(u) => wire.u = Some(u),
            Frame::Message(m) => wire.m = Some(m),
            Frame::Ack(a) => wire.a = Some(a),
            Frame::Error(e) => wire.e = Some(e),
            Frame::Discovery(d) => wire.d = Some(d),
        }
        wire
    }
}

fn from_wire(wire: WireFrame) -> Result<Frame, ProtoError> {
    match FrameType::try_from(wire.t)? {
        FrameType::Publish => wire
            .p
            .map(Frame::Publish)
            .ok_or(ProtoError::MalformedFrame("publish frame missing body")),
        FrameType::Subscribe => wire
            .s
            .map(Frame::Subscribe)
            .ok_or(ProtoError::MalformedFrame("subscribe frame missing body")),
        FrameType::Unsubscribe => wire
            .u
            .map(Frame::Unsubscribe)
            .ok_or(ProtoError::MalformedFrame("unsubscribe frame missing body")),
        FrameType::Message => wire
            .m
            .map(Frame::Message)
            .ok_or(ProtoError::MalformedFrame("message frame missing body")),
        FrameType::Ack => wire
            .a
            .map(Frame::Ack)
            .ok_or(ProtoError::MalformedFrame("ack frame missing body")),
        FrameType::Error => wire
            .e
            .map(Frame::Error)
            .ok_or(ProtoError::MalformedFrame("error frame missing body")),
        FrameType::Discovery => wire
            .d
            .map(Frame::Discovery)
            .ok_or(ProtoError::MalformedFrame("discovery frame missing body")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_publish() -> Frame {
        Frame::Publish(PublishFrame {
            topic: "sensors/temp".into(),
            payload: vec![1, 2, 3, 4],
            schema_id: "sensor.Temperature".into(),
            recipient_key_id: vec![9; 8],
            sender_public_key: vec![7; 32],
        })
    }

    #[test]
    fn publish_roundtrip() {
        let frame = sample_publish();
        let restored = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(frame, restored);
    }

    #[test]
    fn every_variant_roundtrips() {
        let frames = vec![
            sample_publish(),
            Frame::Subscribe(SubscribeFrame {
                topic: "t/1".into(),
                schema_id: String::new(),
                public_key: vec![1; 32],
            }),
            Frame::Unsubscribe(UnsubscribeFrame { topic: "t/1".into() }),
            Frame::Message(MessageFrame {
                topic: "t/1".into(),
                encrypted_payload: vec![0xAB; 40],
                sender_key_id: vec![2; 8],
                sender_public_key: vec![3; 32],
            }),
            Frame::ack(true),
            Frame::error("SCHEMA_UNKNOWN", "unknown schema: made.Up"),
            Frame::Discovery(DiscoveryFrame {
                node_id: "sensor-1".into(),
                topics: vec!["t/1".into(), "t/2".into()],
                public_key: vec![5; 32],
                addr: "192.168.1.5:6121".into(),
            }),
        ];
        for frame in frames {
            let restored = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
            assert_eq!(frame, restored);
        }
    }

    #[test]
    fn wire_json_uses_short_keys_and_base64() {
        let body = sample_publish().to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["t"], 1);
        assert_eq!(value["p"]["topic"], "sensors/temp");
        // payload is base64("\x01\x02\x03\x04")
        assert_eq!(value["p"]["payload"], "AQIDBA==");
        // no other variant keys are emitted
        assert!(value.get("s").is_none());
        assert!(value.get("m").is_none());
    }

    #[test]
    fn ack_wire_fields() {
        let body = Frame::ack(true).to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["t"], 5);
        assert_eq!(value["a"]["message_id"], "");
        assert_eq!(value["a"]["ok"], true);
    }

    #[test]
    fn unknown_type_is_distinguishable() {
        let body = br#"{"t":42}"#;
        match Frame::from_bytes(body) {
            Err(ProtoError::UnknownFrameType(42)) => {}
            other => panic!("expected UnknownFrameType, got {:?}", other),
        }
    }

    #[test]
    fn missing_variant_is_malformed() {
        let body = br#"{"t":1}"#;
        assert!(matches!(
            Frame::from_bytes(body),
            Err(ProtoError::MalformedFrame(_))
        ));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            Frame::from_bytes(b"not json"),
            Err(ProtoError::Json(_))
        ));
    }

    /// Build an error frame whose serialized body is exactly `target` bytes.
    fn frame_with_body_len(target: usize) -> Frame {
        let empty = Frame::error("X", "").to_bytes().unwrap();
        let padding = target - empty.len();
        Frame::error("X", "a".repeat(padding))
    }

    #[test]
    fn body_at_limit_is_accepted() {
        let frame = frame_with_body_len(MAX_FRAME_SIZE);
        let body = frame.to_bytes().unwrap();
        assert_eq!(body.len(), MAX_FRAME_SIZE);
        assert_eq!(Frame::from_bytes(&body).unwrap(), frame);
    }

    #[test]
    fn body_over_limit_is_rejected() {
        let frame = frame_with_body_len(MAX_FRAME_SIZE + 1);
        match frame.to_bytes() {
            Err(ProtoError::FrameTooLarge { size, limit }) => {
                assert_eq!(size, MAX_FRAME_SIZE + 1);
                assert_eq!(limit, MAX_FRAME_SIZE);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn frame_type_discriminators_are_stable() {
        for (ty, code) in [
            (FrameType::Publish, 1u8),
            (FrameType::Subscribe, 2),
            (FrameType::Unsubscribe, 3),
            (FrameType::Message, 4),
            (FrameType::Ack, 5),
            (FrameType::Error, 6),
            (FrameType::Discovery, 7),
        ] {
            assert_eq!(ty as u8, code);
            assert_eq!(FrameType::try_from(code).unwrap(), ty);
        }
        assert!(FrameType::try_from(0).is_err());
        assert!(FrameType::try_from(8).is_err());
    }
}
