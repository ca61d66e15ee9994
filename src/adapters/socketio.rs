//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only the text subset used by the investigation backend is supported:
//! open/ping/pong/close/message at the Engine.IO layer and
//! connect/disconnect/event/connect-error at the Socket.IO layer.
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,..}   engine open
//! 2 / 3                                   ping / pong
//! 40                                      socket connect (namespace "/")
//! 42["graph_event",{"triage":{..}}]       socket event
//! 42/admin,7["name",..]                   event on /admin with ack id 7
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChannelError;

/// Engine.IO protocol revision spoken by this client
pub const ENGINE_IO_VERSION: u8 = 4;

/// Default Socket.IO namespace
pub const DEFAULT_NAMESPACE: &str = "/";

/// Separator between packets in a polling response body
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Handshake data carried by the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Engine.IO transport-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode one text frame
    pub fn decode(frame: &str) -> Result<Self, ChannelError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChannelError::Protocol("empty engine packet".to_string()))?;
        let data = chars.as_str();

        match kind {
            '0' => {
                let handshake = serde_json::from_str(data).map_err(|e| {
                    ChannelError::Protocol(format!("invalid open handshake: {}", e))
                })?;
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_string())),
            '3' => Ok(Self::Pong(data.to_string())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ChannelError::Protocol(format!(
                "unknown engine packet type '{}'",
                other
            ))),
        }
    }

    /// Encode into one text frame
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{}", data),
            Self::Pong(data) => format!("3{}", data),
            Self::Message(data) => format!("4{}", data),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    /// Split a polling response body into packets
    pub fn decode_payload(body: &str) -> Result<Vec<Self>, ChannelError> {
        body.split(RECORD_SEPARATOR)
            .filter(|frame| !frame.is_empty())
            .map(Self::decode)
            .collect()
    }
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Connect request for the default namespace
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    /// Event on the default namespace without an ack
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            args,
        }
    }

    /// Decode the body of an Engine.IO message
    pub fn decode(message: &str) -> Result<Self, ChannelError> {
        let mut chars = message.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChannelError::Protocol("empty socket packet".to_string()))?;
        let rest = chars.as_str();

        if matches!(kind, '3' | '5' | '6') {
            return Err(ChannelError::Unsupported(format!(
                "socket packet type '{}'",
                kind
            )));
        }

        let (namespace, rest) = split_namespace(rest);
        let (ack_id, rest) = split_ack_id(rest)?;
        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest).map_err(|e| {
                ChannelError::Protocol(format!("invalid socket packet data: {}", e))
            })?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut items = match data {
                    Some(Value::Array(items)) if !items.is_empty() => items,
                    _ => {
                        return Err(ChannelError::Protocol(
                            "event packet without [name, ...] array".to_string(),
                        ))
                    }
                };
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ChannelError::Protocol(format!(
                            "event name is not a string: {}",
                            other
                        )))
                    }
                };
                Ok(Self::Event {
                    namespace,
                    ack_id,
                    name,
                    args: items,
                })
            }
            '4' => Ok(Self::ConnectError { namespace, data }),
            other => Err(ChannelError::Protocol(format!(
                "unknown socket packet type '{}'",
                other
            ))),
        }
    }

    /// Encode as an Engine.IO message body (without the leading `4`)
    pub fn encode(&self) -> String {
        let (kind, namespace, ack_id, data) = match self {
            Self::Connect { namespace, data } => ('0', namespace, None, data.clone()),
            Self::Disconnect { namespace } => ('1', namespace, None, None),
            Self::Event {
                namespace,
                ack_id,
                name,
                args,
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                ('2', namespace, *ack_id, Some(Value::Array(items)))
            }
            Self::ConnectError { namespace, data } => ('4', namespace, None, data.clone()),
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Encode as a complete Engine.IO text frame
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (DEFAULT_NAMESPACE.to_string(), rest);
    }
    match rest.find(',') {
        Some(pos) => (rest[..pos].to_string(), &rest[pos + 1..]),
        None => (rest.to_string(), ""),
    }
}

fn split_ack_id(rest: &str) -> Result<(Option<u64>, &str), ChannelError> {
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Ok((None, rest));
    }
    let id = rest[..digits]
        .parse::<u64>()
        .map_err(|e| ChannelError::Protocol(format!("invalid ack id: {}", e)))?;
    Ok((Some(id), &rest[digits..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25000);
                assert_eq!(handshake.ping_timeout, 20000);
                assert_eq!(handshake.max_payload, Some(1_000_000));
            }
            other => panic!("expected open packet, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(
            EnginePacket::decode("2").unwrap(),
            EnginePacket::Ping(String::new())
        );
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(EnginePacket::Pong("probe".to_string()).encode(), "3probe");
    }

    #[test]
    fn test_decode_unknown_engine_packet() {
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(ChannelError::Protocol(_))
        ));
        assert!(matches!(
            EnginePacket::decode(""),
            Err(ChannelError::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_polling_payload() {
        let body = "0{\"sid\":\"s\",\"pingInterval\":1,\"pingTimeout\":2}\u{1e}40";
        let packets = EnginePacket::decode_payload(body).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[0], EnginePacket::Open(_)));
        assert_eq!(packets[1], EnginePacket::Message("0".to_string()));
    }

    #[test]
    fn test_connect_frames() {
        assert_eq!(SocketPacket::connect().to_frame(), "40");

        let ack = SocketPacket::decode(r#"0{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            ack,
            SocketPacket::Connect {
                namespace: "/".to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );
    }

    #[test]
    fn test_decode_event() {
        let packet =
            SocketPacket::decode(r#"2["graph_event",{"triage":{"risk":"high"}}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/".to_string(),
                ack_id: None,
                name: "graph_event".to_string(),
                args: vec![json!({"triage": {"risk": "high"}})],
            }
        );
    }

    #[test]
    fn test_decode_event_without_args() {
        let packet = SocketPacket::decode(r#"2["graph_finished"]"#).unwrap();
        match packet {
            SocketPacket::Event { name, args, .. } => {
                assert_eq!(name, "graph_finished");
                assert!(args.is_empty());
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = SocketPacket::decode(r#"2/admin,12["ping",1]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/admin".to_string(),
                ack_id: Some(12),
                name: "ping".to_string(),
                args: vec![json!(1)],
            }
        );
        assert_eq!(packet.encode(), r#"2/admin,12["ping",1]"#);
    }

    #[test]
    fn test_encode_investigate_event() {
        let packet = SocketPacket::event(
            "investigate",
            vec![json!({"indicator": "8.8.4.4", "logs": "cat /etc/passwd"})],
        );
        assert_eq!(
            packet.to_frame(),
            r#"42["investigate",{"indicator":"8.8.4.4","logs":"cat /etc/passwd"}]"#
        );
    }

    #[test]
    fn test_rejects_binary_and_ack() {
        assert!(matches!(
            SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#),
            Err(ChannelError::Unsupported(_))
        ));
        assert!(matches!(
            SocketPacket::decode("31[]"),
            Err(ChannelError::Unsupported(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_event() {
        assert!(matches!(
            SocketPacket::decode(r#"2{"not":"array"}"#),
            Err(ChannelError::Protocol(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[42]"),
            Err(ChannelError::Protocol(_))
        ));
    }

    #[test]
    fn test_connect_error() {
        let packet = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::ConnectError {
                namespace: "/".to_string(),
                data: Some(json!({"message": "Not authorized"})),
            }
        );
    }
}
