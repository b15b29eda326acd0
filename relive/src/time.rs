//! Local-time handling.
//!
//! Every persisted timestamp and every filename timestamp in this system is
//! naive local time in the platform's zone (`Asia/Shanghai`, UTC+8). This
//! module is the single conversion point; nothing else touches `Utc::now`
//! for domain time.

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Asia::Shanghai;

/// Current time in the canonical local zone, without offset information.
pub fn local_now() -> NaiveDateTime {
    Utc::now().with_timezone(&Shanghai).naive_local()
}
