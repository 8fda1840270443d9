//! Callback actions carried by inline buttons.
//!
//! Every button encodes its target id as data, so one dispatch point can route
//! any press without per-item closures.

use crate::domain::{ListingId, SessionId};

const PURCHASE_PREFIX: &str = "buy";
const CLOSE_PREFIX: &str = "close";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Purchase { listing_id: ListingId },
    CloseSession { session_id: SessionId },
}

impl Action {
    pub fn encode(&self) -> String {
        match self {
            Action::Purchase { listing_id } => format!("{PURCHASE_PREFIX}:{}", listing_id.0),
            Action::CloseSession { session_id } => format!("{CLOSE_PREFIX}:{}", session_id.0),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let (kind, raw_id) = data.split_once(':')?;
        let id = raw_id.trim().parse::<u64>().ok()?;
        match kind {
            PURCHASE_PREFIX if id > 0 => Some(Action::Purchase {
                listing_id: ListingId(id),
            }),
            CLOSE_PREFIX => Some(Action::CloseSession {
                session_id: SessionId(id),
            }),
            _ => None,
        }
    }
}
