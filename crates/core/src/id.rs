//! Monotonic, lexicographically sortable identifiers.
//!
//! Ids look like `msg_0192f3a1b2c3d004a1b2c3d4`: a prefix, sixteen hex digits of
//! `(unix_millis << 12) | counter`, and eight random hex digits. Within one process
//! every id is strictly greater than the previous one, so sorting by id equals
//! sorting by creation order. Message lookup for "last user" / "last assistant"
//! relies on this.

use std::sync::Mutex;
use uuid::Uuid;

const COUNTER_BITS: u32 = 12;

static LAST: Mutex<u64> = Mutex::new(0);

/// Kind of entity an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Session,
    Message,
    Part,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Session => "ses",
            Self::Message => "msg",
            Self::Part => "prt",
        }
    }
}

/// Generate a new ascending id for `kind`.
pub fn ascending(kind: IdKind) -> String {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let candidate = now << COUNTER_BITS;

    let value = {
        let mut last = LAST.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = if candidate > *last { candidate } else { *last + 1 };
        *last = next;
        next
    };

    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{:016x}{}", kind.prefix(), value, &random[..8])
}
