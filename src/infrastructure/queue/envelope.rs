use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::QueueResult;

/// One unit of work as it travels through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub queue: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    #[serde(default)]
    pub attempts: u32,
}

impl JobEnvelope {
    pub fn new(queue: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload,
            enqueued_at: OffsetDateTime::now_utc(),
            attempts: 0,
        }
    }

    pub fn to_bytes(&self) -> QueueResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a broker message body delivered on `queue`.
    ///
    /// Bodies that are not envelopes are wrapped into a fresh one so the
    /// handler gets to classify them; nothing read off a queue is discarded
    /// here.
    pub fn from_bytes(queue: &str, data: &[u8]) -> Self {
        if let Ok(mut envelope) = serde_json::from_slice::<JobEnvelope>(data) {
            envelope.queue = queue.to_string();
            return envelope;
        }

        let payload = serde_json::from_slice::<Value>(data)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(data).into_owned()));
        Self::new(queue, payload)
    }
}

/// Broker-specific handle needed to acknowledge a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// AMQP delivery tag on the queue's consumer channel.
    Amqp(u64),
    /// Raw entry in the consumer's Redis processing list.
    Redis(String),
    /// In-memory delivery sequence number.
    Memory(u64),
}

/// An envelope handed to exactly one consumer, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: JobEnvelope,
    pub receipt: Receipt,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_full_envelope() {
        let mut envelope = JobEnvelope::new("transcoding_infos", json!({"track_id": 1}));
        envelope.attempts = 2;
        let bytes = envelope.to_bytes().unwrap();

        let decoded = JobEnvelope::from_bytes("transcoding_infos", &bytes);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn wraps_bare_payload() {
        let decoded = JobEnvelope::from_bytes(
            "transcoding_infos",
            br#"{"track_id": 7, "outcome": "failed"}"#,
        );

        assert_eq!(decoded.queue, "transcoding_infos");
        assert_eq!(decoded.attempts, 0);
        assert_eq!(decoded.payload["track_id"], 7);
    }

    #[test]
    fn wraps_non_json_body_as_string() {
        let decoded = JobEnvelope::from_bytes("transcoding_infos", b"not json");
        assert_eq!(decoded.payload, Value::String("not json".to_string()));
    }

    #[test]
    fn missing_attempts_defaults_to_zero() {
        let body = json!({
            "id": Uuid::new_v4(),
            "queue": "transcoding_infos",
            "payload": {"track_id": 3},
            "enqueued_at": "2024-05-01T10:00:00Z"
        });
        let decoded = JobEnvelope::from_bytes("transcoding_infos", body.to_string().as_bytes());
        assert_eq!(decoded.attempts, 0);
        assert_eq!(decoded.payload["track_id"], 3);
    }
}
