use serde::{Deserialize, Serialize};

/// A single scraped post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub text: String,
    pub url: String,
    /// Time label exactly as shown by the source ("5秒", "3 minutes", ...).
    pub timestamp: String,
    /// Epoch milliseconds, approximated from `timestamp` at scrape time.
    pub created_at: i64,
    pub author: String,
    pub handle: String,
    pub icon_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retweet_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<String>,
    #[serde(default)]
    pub is_best: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Output of one search page fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchTweetsResult {
    pub best: Option<Post>,
    pub timeline: Vec<Post>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Up,
    Down,
    New,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendItem {
    pub rank: u32,
    pub keyword: String,
    pub state: TrendState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResult {
    pub update_time: String,
    pub items: Vec<TrendItem>,
}

/// Which posts the search view shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    All,
    Text,
    Media,
}
