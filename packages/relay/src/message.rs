//! Client/relay wire messages, positional arrays per the event-feed protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wayfare_core::Event;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Req {
        verb: &'static str,
        sub_id: String,
        filters: Vec<Value>,
    },
    Event {
        verb: &'static str,
        event: Event,
    },
    Close {
        verb: &'static str,
        sub_id: String,
    },
}

impl ClientMessage {
    pub fn req(sub_id: impl Into<String>, filters: Vec<Value>) -> Self {
        ClientMessage::Req {
            verb: "REQ",
            sub_id: sub_id.into(),
            filters,
        }
    }

    pub fn event(event: Event) -> Self {
        ClientMessage::Event { verb: "EVENT", event }
    }

    pub fn close(sub_id: impl Into<String>) -> Self {
        ClientMessage::Close {
            verb: "CLOSE",
            sub_id: sub_id.into(),
        }
    }

    /// `serde`'s untagged enum can't express a mixed-type JSON array directly
    /// (sub_id is a string, filters are objects); build it by hand instead.
    pub fn to_wire(&self) -> Value {
        match self {
            ClientMessage::Req { sub_id, filters, .. } => {
                let mut arr = vec![Value::String("REQ".into()), Value::String(sub_id.clone())];
                arr.extend(filters.iter().cloned());
                Value::Array(arr)
            }
            ClientMessage::Event { event, .. } => {
                let event_json = serde_json::to_value(event).expect("Event always serializes");
                Value::Array(vec![Value::String("EVENT".into()), event_json])
            }
            ClientMessage::Close { sub_id, .. } => Value::Array(vec![
                Value::String("CLOSE".into()),
                Value::String(sub_id.clone()),
            ]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RelayMessage {
    Event { sub_id: String, event: Event },
    Eose { sub_id: String },
    Ok { id: String, ok: bool, message: String },
    Notice { message: String },
}

/// Parses the positional `["EVENT", sub_id, {...}]` / `["EOSE", sub_id]` /
/// `["OK", id, ok, msg]` / `["NOTICE", msg]` array shapes.
pub fn parse_relay_message(raw: &str) -> Option<RelayMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let arr = value.as_array()?;
    let verb = arr.first()?.as_str()?;
    match verb {
        "EVENT" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            let event: Event = serde_json::from_value(arr.get(2)?.clone()).ok()?;
            Some(RelayMessage::Event { sub_id, event })
        }
        "EOSE" => Some(RelayMessage::Eose {
            sub_id: arr.get(1)?.as_str()?.to_string(),
        }),
        "OK" => Some(RelayMessage::Ok {
            id: arr.get(1)?.as_str()?.to_string(),
            ok: arr.get(2)?.as_bool()?,
            message: arr.get(3).and_then(|v| v.as_str()).unwrap_or("").to_string(),
        }),
        "NOTICE" => Some(RelayMessage::Notice {
            message: arr.get(1)?.as_str().unwrap_or("").to_string(),
        }),
        _ => None,
    }
}
