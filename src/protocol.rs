use anyhow::{Context, Result};
use axum_tws::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::palette::Rgb;

/// An accepted draw, as queued for broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelUpdate {
    pub x: u32,
    pub y: u32,
    pub color_index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    RegionQuery {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },
    DrawRequest {
        x: i64,
        y: i64,
        color_index: i64,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Init {
        identity: Uuid,
        canvas_width: u32,
        canvas_height: u32,
        palette: Vec<Rgb>,
        cooldown_ms: u64,
    },
    Region {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    DrawAccepted {
        next_eligible_at: i64,
    },
    Cooldown {
        remaining_ms: u64,
    },
    BatchUpdate {
        updates: Vec<PixelUpdate>,
    },
}

pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage> {
    serde_json::from_slice(data).context("Malformed client message")
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<Message> {
    let text = serde_json::to_string(msg).context("Failed to serialize server message")?;
    Ok(Message::text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tagged_requests() {
        let query = br#"{"kind":"regionQuery","x":-4,"y":10,"width":32,"height":16}"#;
        assert_eq!(
            decode_client_message(query).unwrap(),
            ClientMessage::RegionQuery {
                x: -4,
                y: 10,
                width: 32,
                height: 16
            }
        );

        let draw = br#"{"kind":"drawRequest","x":5,"y":6,"colorIndex":3}"#;
        assert_eq!(
            decode_client_message(draw).unwrap(),
            ClientMessage::DrawRequest {
                x: 5,
                y: 6,
                color_index: 3
            }
        );
    }

    #[test]
    fn unknown_kinds_decode_to_unknown() {
        let msg = br#"{"kind":"chat","text":"hi"}"#;
        assert_eq!(decode_client_message(msg).unwrap(), ClientMessage::Unknown);
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(decode_client_message(b"not json").is_err());
        assert!(decode_client_message(br#"{"x":1}"#).is_err());
        assert!(decode_client_message(br#"{"kind":"drawRequest","x":1}"#).is_err());
        assert!(
            decode_client_message(br#"{"kind":"regionQuery","x":0,"y":0,"width":-1,"height":2}"#)
                .is_err()
        );
    }

    #[test]
    fn server_messages_use_camel_case_kind_and_fields() {
        let msg = ServerMessage::BatchUpdate {
            updates: vec![PixelUpdate {
                x: 10,
                y: 11,
                color_index: 5,
            }],
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"kind": "batchUpdate", "updates": [{"x": 10, "y": 11, "colorIndex": 5}]})
        );

        let value = serde_json::to_value(ServerMessage::Cooldown { remaining_ms: 1200 }).unwrap();
        assert_eq!(value, json!({"kind": "cooldown", "remainingMs": 1200}));

        let value = serde_json::to_value(ServerMessage::DrawAccepted {
            next_eligible_at: 42,
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "drawAccepted", "nextEligibleAt": 42}));
    }

    #[test]
    fn encodes_as_text_frame() {
        let msg = encode_server_message(&ServerMessage::Cooldown { remaining_ms: 7 }).unwrap();
        assert!(msg.is_text());
    }
}
