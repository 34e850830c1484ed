mod error;
mod identity;
mod parse;
mod scheduler;
mod trends;

pub mod client;
pub mod ng;
pub mod post;
pub mod session;
pub mod settings;
pub mod storage;
pub mod timeline;

pub use client::{RealtimeClient, RealtimeSource, DEFAULT_BASE_URL};
pub use error::{Result, SideStreamError};
pub use identity::derive_id;
pub use ng::{filter_posts, NgItem, NgSettings};
pub use parse::{parse_post_element, parse_search_html};
pub use post::{FetchTweetsResult, Post, Tab, TrendItem, TrendResult, TrendState};
pub use scheduler::RefreshScheduler;
pub use session::{HomeTab, Session, Snapshot, View};
pub use settings::{SearchHistory, Settings};
pub use storage::Storage;
pub use timeline::{IngestMode, Timeline};
pub use trends::parse_trends_html;

use time::OffsetDateTime;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
