use crate::registry::SharedMessage;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

pub const CONNECTED_MESSAGE: &str = "Connected to AI-enhanced stream";

/// Outbound WebSocket text messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Connected {
        message: &'static str,
    },
    Frame {
        /// Base64 JPEG.
        data: String,
        /// Wall-clock seconds since the Unix epoch.
        timestamp: f64,
        status: &'static str,
        objects: usize,
    },
}

impl StreamMessage {
    pub fn connected() -> Self {
        StreamMessage::Connected {
            message: CONNECTED_MESSAGE,
        }
    }

    pub fn to_shared(&self) -> serde_json::Result<SharedMessage> {
        serde_json::to_string(self).map(SharedMessage::from)
    }
}

pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
