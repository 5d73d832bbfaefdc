//! Keyset cursor for the admin jobs listing.
//!
//! Encodes the `(updated_at, id)` tuple of the last returned row as
//! URL-safe base64. Opaque to clients; any tampering fails decoding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use eventhub_core::JobId;

/// Position in the `(updated_at DESC, id DESC)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCursor {
    /// `updated_at` of the last row on the previous page.
    pub updated_at: DateTime<Utc>,

    /// `id` of the last row on the previous page.
    pub id: JobId,
}

impl JobCursor {
    /// Encodes the cursor as URL-safe base64.
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.updated_at.timestamp_micros(), self.id);
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decodes a client-supplied cursor.
    pub fn decode(cursor: &str) -> Option<Self> {
        let raw = URL_SAFE_NO_PAD.decode(cursor).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (micros, id) = raw.split_once('|')?;

        let micros: i64 = micros.parse().ok()?;
        let updated_at = DateTime::<Utc>::from_timestamp_micros(micros)?;
        let id = JobId(Uuid::parse_str(id).ok()?);

        Some(Self { updated_at, id })
    }
}
