use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Logical channels multiplexed over the single WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Messages,
    Likes,
    Explore,
}

/// The tagged frame exchanged over the WebSocket in both directions.
/// A frame whose channel is unknown fails envelope deserialization and is
/// dropped; a known (channel, type) pair with a malformed `data` payload is
/// answered with an `error` envelope echoing `cid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ch: Channel,
    pub t: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Commands a client may issue, parsed from known (channel, type) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// explore/next — request the next candidate profile.
    Next,
    /// explore/like or explore/dislike on a target user.
    Decide { target_user_id: i64, is_like: bool },
    /// messages/subscribe to a chat view.
    Subscribe { chat_id: String },
    /// messages/unsubscribe from a chat view.
    Unsubscribe { chat_id: String },
    /// messages/send a text message to a chat.
    Send { chat_id: String, text: String },
}

/// A known command carried a payload that does not validate.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PayloadError(pub String);

#[derive(Debug, Deserialize)]
struct DecidePayload {
    #[serde(rename = "targetUserId", deserialize_with = "de_user_id")]
    target_user_id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatRefPayload {
    #[serde(rename = "chatId")]
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct SendPayload {
    #[serde(rename = "chatId")]
    chat_id: String,
    text: String,
}

impl Envelope {
    /// Resolve this envelope to a typed client command.
    ///
    /// Returns `Ok(None)` for (channel, type) pairs this server does not know —
    /// forward compatibility requires those to be ignored, not rejected.
    pub fn parse_command(&self) -> Result<Option<ClientCommand>, PayloadError> {
        let cmd = match (self.ch, self.t.as_str()) {
            (Channel::Explore, "next") => ClientCommand::Next,
            (Channel::Explore, "like") => ClientCommand::Decide {
                target_user_id: self.payload::<DecidePayload>()?.target_user_id,
                is_like: true,
            },
            (Channel::Explore, "dislike") => ClientCommand::Decide {
                target_user_id: self.payload::<DecidePayload>()?.target_user_id,
                is_like: false,
            },
            (Channel::Messages, "subscribe") => ClientCommand::Subscribe {
                chat_id: self.chat_ref()?,
            },
            (Channel::Messages, "unsubscribe") => ClientCommand::Unsubscribe {
                chat_id: self.chat_ref()?,
            },
            (Channel::Messages, "send") => {
                let p: SendPayload = self.payload()?;
                if p.chat_id.is_empty() {
                    return Err(PayloadError("chatId required".into()));
                }
                ClientCommand::Send {
                    chat_id: p.chat_id,
                    text: p.text,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }

    fn chat_ref(&self) -> Result<String, PayloadError> {
        let p: ChatRefPayload = self.payload()?;
        if p.chat_id.is_empty() {
            return Err(PayloadError("chatId required".into()));
        }
        Ok(p.chat_id)
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data)
            .map_err(|e| PayloadError(format!("invalid {} payload: {}", self.t, e)))
    }

    /// Outbound envelope carrying a serialized payload.
    pub fn event<T: Serialize>(ch: Channel, t: &str, data: &T) -> Self {
        Self {
            ch,
            t: t.to_string(),
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            cid: None,
        }
    }

    /// Outbound envelope with a raw JSON payload (used for the explicit
    /// `data: null` on an empty profile response).
    pub fn event_raw(ch: Channel, t: &str, data: Value) -> Self {
        Self {
            ch,
            t: t.to_string(),
            data: Some(data),
            cid: None,
        }
    }

    /// Acknowledgement without a payload, echoing the correlation id.
    pub fn ack(ch: Channel, cid: Option<String>) -> Self {
        Self {
            ch,
            t: "ack".to_string(),
            data: None,
            cid,
        }
    }

    /// Error envelope with a human-readable message, echoing the correlation id.
    pub fn error(ch: Channel, message: &str, cid: Option<String>) -> Self {
        Self {
            ch,
            t: "error".to_string(),
            data: Some(serde_json::json!({ "message": message })),
            cid,
        }
    }

    pub fn with_cid(mut self, cid: Option<String>) -> Self {
        self.cid = cid;
        self
    }
}

/// Telegram user ids exceed the JSON safe-integer range, so clients may send
/// them as strings. Accept both.
fn de_user_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Num(i64),
        Str(String),
    }

    match IdRepr::deserialize(deserializer)? {
        IdRepr::Num(n) => Ok(n),
        IdRepr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// -- Outbound payloads --

/// Candidate profile shown in the explore flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    pub user_id: String,
    pub display_name: Option<String>,
    pub age: Option<u32>,
    pub city: Option<String>,
    pub photos: Vec<String>,
    pub bio: Option<String>,
}

/// Sent to both parties when a mutual like creates (or finds) a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPayload {
    pub chat_id: String,
}

/// Chat header returned on a successful subscribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfoPayload {
    pub id: String,
    pub title: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
}

/// Ack payload for messages/send, carrying the persisted message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAckPayload {
    pub id: String,
}

/// A chat message fanned out to all connected members.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Unsolicited presence change pushed to subscribed sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub chat_id: String,
    pub user_id: String,
    pub is_online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(json: &str) -> Envelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_explore_next() {
        let e = env(r#"{"ch":"explore","t":"next"}"#);
        assert_eq!(e.parse_command().unwrap(), Some(ClientCommand::Next));
    }

    #[test]
    fn parses_like_with_string_or_number_id() {
        let e = env(r#"{"ch":"explore","t":"like","data":{"targetUserId":"2002"},"cid":"c1"}"#);
        assert_eq!(
            e.parse_command().unwrap(),
            Some(ClientCommand::Decide { target_user_id: 2002, is_like: true })
        );

        let e = env(r#"{"ch":"explore","t":"dislike","data":{"targetUserId":2002}}"#);
        assert_eq!(
            e.parse_command().unwrap(),
            Some(ClientCommand::Decide { target_user_id: 2002, is_like: false })
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let e = env(r#"{"ch":"likes","t":"wave","data":{"x":1}}"#);
        assert_eq!(e.parse_command().unwrap(), None);
    }

    #[test]
    fn unknown_channel_fails_envelope_parse() {
        assert!(serde_json::from_str::<Envelope>(r#"{"ch":"voice","t":"next"}"#).is_err());
    }

    #[test]
    fn malformed_subscribe_payload_is_a_payload_error() {
        let e = env(r#"{"ch":"messages","t":"subscribe","data":{},"cid":"c9"}"#);
        assert!(e.parse_command().is_err());

        let e = env(r#"{"ch":"messages","t":"subscribe","data":{"chatId":""}}"#);
        assert!(e.parse_command().is_err());
    }

    #[test]
    fn parses_send() {
        let e = env(r#"{"ch":"messages","t":"send","data":{"chatId":"abc","text":"hi"}}"#);
        assert_eq!(
            e.parse_command().unwrap(),
            Some(ClientCommand::Send { chat_id: "abc".into(), text: "hi".into() })
        );
    }

    #[test]
    fn error_envelope_echoes_cid() {
        let e = Envelope::error(Channel::Messages, "nope", Some("c7".into()));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["ch"], "messages");
        assert_eq!(v["t"], "error");
        assert_eq!(v["cid"], "c7");
        assert_eq!(v["data"]["message"], "nope");
    }

    #[test]
    fn null_profile_serializes_explicit_null_data() {
        let e = Envelope::event_raw(Channel::Explore, "profile", Value::Null);
        let s = serde_json::to_string(&e).unwrap();
        assert!(s.contains(r#""data":null"#));
    }
}
