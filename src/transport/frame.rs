//! Wire frame shape shared by all three logical channels.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    Req,
    Sub,
    Push,
}

/// A single frame crossing the wire in either direction.
///
/// `id` is the frame's own identifier; `correlation_id` is set on responses
/// to name the request they answer. Request frames leave `correlation_id`
/// unset — the id they're sent with becomes the correlation id a peer
/// replies with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub channel: ChannelKind,
    pub id: String,
    pub correlation_id: Option<String>,
    pub topic: Option<String>,
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn request(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { channel: ChannelKind::Req, id: id.into(), correlation_id: None, topic: None, payload }
    }

    pub fn response(correlation_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: ChannelKind::Req,
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: Some(correlation_id.into()),
            topic: None,
            payload,
        }
    }

    pub fn event(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: ChannelKind::Sub,
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            topic: Some(topic.into()),
            payload,
        }
    }

    pub fn push(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { channel: ChannelKind::Push, id: id.into(), correlation_id: None, topic: None, payload }
    }
}
