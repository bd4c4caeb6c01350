//! JSON protocol spoken between the event bus and operator browsers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Message from an operator client, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Subscribe to one or more event types.
    Subscribe {
        event_types: Vec<String>,
        #[serde(default)]
        request_id: Option<i64>,
    },
    /// Drop one or more subscriptions.
    Unsubscribe {
        event_types: Vec<String>,
        #[serde(default)]
        request_id: Option<i64>,
    },
    /// Invoke a named command.
    Command {
        command: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// Message to an operator client, tagged by `type`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Reply to a subscribe request, carrying current values for every
    /// known topic that was requested.
    Subscribe {
        initial_data: BTreeMap<String, serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<i64>,
    },
    /// Reply to an unsubscribe request.
    Unsubscribe {
        unsubscribed_event_types: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<i64>,
    },
    /// A topic update.
    Event {
        event_type: String,
        data: serde_json::Value,
    },
    /// Out-of-band request for the client to reload its page.
    Reload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_messages_parse() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type": "subscribe", "event_types": ["match_list"], "request_id": 7}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Subscribe {
                event_types: vec!["match_list".to_string()],
                request_id: Some(7),
            }
        );

        let msg: InboundMessage = serde_json::from_str(
            r#"{"type": "unsubscribe", "event_types": ["match_list", "realtime_score"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Unsubscribe {
                event_types: vec!["match_list".to_string(), "realtime_score".to_string()],
                request_id: None,
            }
        );

        let msg: InboundMessage = serde_json::from_str(
            r#"{"type": "command", "command": "load_match", "data": {"match_id": "Q1"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Command {
                command: "load_match".to_string(),
                data: json!({"match_id": "Q1"}),
            }
        );
    }

    #[test]
    fn unknown_inbound_type_is_an_error() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"type": "mystery"}"#).is_err());
    }

    #[test]
    fn outbound_messages_serialize() {
        let mut initial = BTreeMap::new();
        initial.insert("ui_settings".to_string(), json!({"swap_red_blue": false}));
        let msg = OutboundMessage::Subscribe {
            initial_data: initial,
            request_id: Some(7),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["initial_data"]["ui_settings"]["swap_red_blue"], false);
        assert_eq!(json["request_id"], 7);

        let msg = OutboundMessage::Event {
            event_type: "arena_connection".to_string(),
            data: json!({"connected": true}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event_type"], "arena_connection");

        let json = serde_json::to_value(&OutboundMessage::Reload).unwrap();
        assert_eq!(json, json!({"type": "reload"}));
    }

    #[test]
    fn absent_request_id_is_omitted() {
        let msg = OutboundMessage::Unsubscribe {
            unsubscribed_event_types: vec![],
            request_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("request_id").is_none());
    }
}
