use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::error::{Result, SideStreamError};
use crate::parse::{parse_search_html, relative_label};
use crate::post::{FetchTweetsResult, Post, TrendResult};
use crate::trends::parse_trends_html;

pub const DEFAULT_BASE_URL: &str = "https://search.yahoo.co.jp";

const AGENT: &str = concat!("sidestream/", env!("CARGO_PKG_VERSION"));

/// Where search results and trends come from.
///
/// Implementations never fail: every error is logged and turned into an
/// empty result.
#[async_trait]
pub trait RealtimeSource: Send + Sync {
    async fn fetch_tweets(&self, keyword: &str, page_offset: u32) -> FetchTweetsResult;

    async fn fetch_more_tweets(
        &self,
        keyword: &str,
        oldest_post_id: &str,
        page_index: u32,
    ) -> Vec<Post>;

    async fn fetch_trends(&self) -> TrendResult;
}

#[derive(TypedBuilder)]
pub struct RealtimeClient {
    #[builder(default)]
    client: Client,

    #[builder(setter(into), default = DEFAULT_BASE_URL.to_owned())]
    base_url: String,
}

impl RealtimeClient {
    fn search_url(&self, keyword: &str, page_offset: u32) -> String {
        let encoded = utf8_percent_encode(keyword, NON_ALPHANUMERIC);
        let mut url = format!(
            "{}/realtime/search?p={}&ei=UTF-8&ord=new",
            self.base(),
            encoded
        );
        if page_offset > 1 {
            url.push_str(&format!("&b={}", page_offset));
        }
        url
    }

    fn pagination_url(&self, keyword: &str, oldest_post_id: &str, page_index: u32) -> String {
        format!(
            "{}/realtime/api/v1/pagination?p={}&ei=UTF-8&ord=new&oldestTweetId={}&page={}",
            self.base(),
            utf8_percent_encode(keyword, NON_ALPHANUMERIC),
            utf8_percent_encode(oldest_post_id, NON_ALPHANUMERIC),
            page_index
        )
    }

    fn trends_url(&self) -> String {
        format!("{}/realtime", self.base())
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SideStreamError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }

    async fn try_fetch_tweets(&self, keyword: &str, page_offset: u32) -> Result<FetchTweetsResult> {
        let html = self.get_text(&self.search_url(keyword, page_offset)).await?;
        Ok(parse_search_html(&html, self.base(), crate::now_millis()))
    }

    async fn try_fetch_more_tweets(
        &self,
        keyword: &str,
        oldest_post_id: &str,
        page_index: u32,
    ) -> Result<Vec<Post>> {
        let url = self.pagination_url(keyword, oldest_post_id, page_index);
        let body = self.get_text(&url).await?;
        let response: PaginationResponse =
            serde_json::from_str(&body).map_err(|e| SideStreamError::Decode(e.to_string()))?;

        let now_ms = crate::now_millis();
        Ok(response
            .timeline
            .entry
            .into_iter()
            .filter_map(|entry| entry.into_post(now_ms))
            .collect())
    }

    async fn try_fetch_trends(&self) -> Result<TrendResult> {
        let html = self.get_text(&self.trends_url()).await?;
        Ok(parse_trends_html(&html))
    }
}

#[async_trait]
impl RealtimeSource for RealtimeClient {
    async fn fetch_tweets(&self, keyword: &str, page_offset: u32) -> FetchTweetsResult {
        if keyword.is_empty() {
            return FetchTweetsResult::default();
        }
        match self.try_fetch_tweets(keyword, page_offset).await {
            Ok(result) => {
                debug!(
                    keyword,
                    best = result.best.is_some(),
                    timeline = result.timeline.len(),
                    "fetched search page"
                );
                result
            }
            Err(e) => {
                warn!(keyword, error = %e, "fetch tweets failed");
                FetchTweetsResult::default()
            }
        }
    }

    async fn fetch_more_tweets(
        &self,
        keyword: &str,
        oldest_post_id: &str,
        page_index: u32,
    ) -> Vec<Post> {
        match self
            .try_fetch_more_tweets(keyword, oldest_post_id, page_index)
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                warn!(keyword, oldest_post_id, page_index, error = %e, "fetch more tweets failed");
                vec![]
            }
        }
    }

    async fn fetch_trends(&self) -> TrendResult {
        self.try_fetch_trends().await.unwrap_or_else(|e| {
            warn!(error = %e, "fetch trends failed");
            TrendResult::default()
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaginationResponse {
    #[serde(default)]
    timeline: PaginationTimeline,
}

#[derive(Debug, Default, Deserialize)]
struct PaginationTimeline {
    #[serde(default)]
    entry: Vec<PaginationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaginationEntry {
    id: String,
    #[serde(default)]
    display_text: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    screen_name: String,
    /// Epoch seconds.
    created_at: i64,
    #[serde(default)]
    profile_image: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    rt_count: Option<u64>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    media: Vec<PaginationMedia>,
    #[serde(default)]
    reply_mentions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PaginationMedia {
    item: PaginationMediaItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaginationMediaItem {
    thumbnail_image_url: Option<String>,
    media_url: Option<String>,
}

impl PaginationEntry {
    /// `None` when `createdAt` is out of range.
    fn into_post(self, now_ms: i64) -> Option<Post> {
        let Some(created_at) = self.created_at.checked_mul(1000) else {
            debug!(
                id = %self.id,
                created_at = self.created_at,
                "skipping entry with bad timestamp"
            );
            return None;
        };
        let handle = if self.screen_name.is_empty() {
            String::new()
        } else {
            format!("@{}", self.screen_name.trim_start_matches('@'))
        };
        let url = if self.url.is_empty() && !self.screen_name.is_empty() {
            format!("https://x.com/{}/status/{}", self.screen_name, self.id)
        } else {
            self.url
        };
        let media_url = self
            .media
            .into_iter()
            .find_map(|m| m.item.thumbnail_image_url.or(m.item.media_url));
        let reply_to = self
            .reply_mentions
            .into_iter()
            .next()
            .map(|h| format!("@{}", h.trim_start_matches('@')));

        Some(Post {
            id: self.id,
            text: self.display_text.trim().to_owned(),
            url,
            timestamp: relative_label(created_at, now_ms),
            created_at,
            author: if self.name.is_empty() {
                "Unknown".to_owned()
            } else {
                self.name
            },
            handle,
            icon_url: self.profile_image,
            media_url,
            retweet_count: self.rt_count.map(|n| n.to_string()),
            like_count: self.like_count.map(|n| n.to_string()),
            is_best: false,
            reply_to,
        })
    }
}
