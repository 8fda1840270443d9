use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    catalog::Listing,
    domain::AccountId,
    errors::Error,
    session::PurchaseSession,
    Result,
};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

impl AuditEvent {
    fn new(event: &str, account: &AccountId) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            account: Some(account.to_string()),
            ..Self::default()
        }
    }

    pub fn listing_added(listing: &Listing) -> Self {
        Self {
            listing_id: Some(listing.id.0),
            content: Some(listing.title.clone()),
            ..Self::new("listing_added", &listing.seller)
        }
    }

    pub fn listing_removed(listing: &Listing, by: &AccountId) -> Self {
        Self {
            listing_id: Some(listing.id.0),
            content: Some(listing.title.clone()),
            ..Self::new("listing_removed", by)
        }
    }

    pub fn session_opened(session: &PurchaseSession) -> Self {
        Self {
            listing_id: Some(session.listing_id.0),
            session_id: Some(session.id.0),
            ..Self::new("session_opened", &session.initiator)
        }
    }

    pub fn session_closed(session: &PurchaseSession, by: &AccountId) -> Self {
        Self {
            listing_id: Some(session.listing_id.0),
            session_id: Some(session.id.0),
            ..Self::new("session_closed", by)
        }
    }

    pub fn cooldown_denied(buyer: &AccountId, listing_id: u64, remaining_secs: u64) -> Self {
        Self {
            listing_id: Some(listing_id),
            remaining_secs: Some(remaining_secs),
            ..Self::new("cooldown_denied", buyer)
        }
    }

    pub fn error(account: &AccountId, error: &str, context: Option<&str>) -> Self {
        Self {
            error: Some(error.to_string()),
            context: context.map(|s| s.to_string()),
            ..Self::new("error", account)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::Platform(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Write and only log on failure; audit problems never reach users.
    pub fn record(&self, event: AuditEvent) {
        let name = event.event.clone();
        if let Err(e) = self.write(event) {
            tracing::warn!(event = %name, error = %e, "failed to write audit event");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}
