//! Session protocol messages exchanged with subscribers.

use serde::{Deserialize, Serialize};

use crate::aggregator::frame::SCHEMA_VERSION;

/// Messages the server sends besides telemetry frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage<'a> {
    Hello {
        schema: u32,
        server: &'a str,
        version: &'a str,
    },
    Pong {
        t: f64,
    },
}

/// Messages a subscriber may send. Anything else is ignored.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping {
        #[serde(default)]
        t: f64,
    },
}

/// The handshake sent once to every new session.
pub fn hello(server: &str) -> serde_json::Result<String> {
    serde_json::to_string(&ServerMessage::Hello {
        schema: SCHEMA_VERSION,
        server,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Returns the reply owed to an inbound text message, if any.
pub fn reply_to(text: &str) -> Option<String> {
    match serde_json::from_str::<ClientMessage>(text).ok()? {
        ClientMessage::Ping { t } => serde_json::to_string(&ServerMessage::Pong { t }).ok(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn test_hello_shape() {
        let v: Value = serde_json::from_str(&hello("abyss-sniffer").unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "hello",
                "schema": SCHEMA_VERSION,
                "server": "abyss-sniffer",
                "version": env!("CARGO_PKG_VERSION"),
            })
        );
    }

    #[test]
    fn test_ping_echoes_t() {
        let reply = reply_to(r#"{"type":"ping","t":12.25}"#).unwrap();
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v, json!({"type": "pong", "t": 12.25}));
    }

    #[test]
    fn test_ping_without_t_defaults_to_zero() {
        let reply = reply_to(r#"{"type":"ping"}"#).unwrap();
        let v: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["t"], json!(0.0));
    }

    #[test]
    fn test_ping_extra_fields_ignored() {
        assert!(reply_to(r#"{"type":"ping","t":1,"client":"ui"}"#).is_some());
    }

    #[test]
    fn test_other_messages_ignored() {
        assert!(reply_to(r#"{"type":"subscribe","topic":"flows"}"#).is_none());
        assert!(reply_to("not json").is_none());
        assert!(reply_to(r#"{"t":1.0}"#).is_none());
        assert!(reply_to(r#"{"type":"ping","t":"soon"}"#).is_none());
    }
}
