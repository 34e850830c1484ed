//! The view state controller.
//!
//! A [`Session`] owns what the panel shows: the current keyword, view and
//! tab, the reconciled timeline and the trends list. It runs fetches,
//! applies their results and keeps the auto-refresh timer in step with the
//! view. Results of fetches that were started for a keyword that is no
//! longer current are dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::RealtimeSource;
use crate::ng::filter_posts;
use crate::post::{Post, Tab, TrendResult};
use crate::scheduler::RefreshScheduler;
use crate::settings::{SearchHistory, Settings};
use crate::storage::Storage;
use crate::timeline::{IngestMode, Timeline};

/// Scroll offset in pixels beyond which the view counts as scrolled.
pub const SCROLL_THRESHOLD_PX: u32 = 50;

pub const MAX_TRENDS: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Home,
    Search,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeTab {
    #[default]
    Trends,
    Registered,
    Settings,
}

/// What a renderer needs for one frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub view: View,
    pub keyword: String,
    pub tab: Tab,
    /// Window contents after the tab and NG filters.
    pub posts: Vec<Post>,
    pub pending: usize,
    pub scrolled: bool,
    pub has_more: bool,
    pub trends: TrendResult,
}

struct State {
    view: View,
    home_tab: HomeTab,
    tab: Tab,
    keyword: String,
    /// Bumped whenever the keyword context changes.
    generation: u64,
    timeline: Timeline,
    trends: TrendResult,
    settings: Settings,
    history: SearchHistory,
    storage: Storage,
}

struct Inner {
    source: Arc<dyn RealtimeSource>,
    state: Mutex<State>,
    revision: watch::Sender<u64>,
}

pub struct Session {
    inner: Arc<Inner>,
    scheduler: Mutex<RefreshScheduler>,
}

impl Session {
    pub fn new(source: Arc<dyn RealtimeSource>, mut storage: Storage) -> Self {
        if let Err(e) = storage.migrate() {
            warn!(error = %e, "storage migration failed");
        }
        let state = State {
            view: View::Home,
            home_tab: HomeTab::Trends,
            tab: Tab::All,
            keyword: String::new(),
            generation: 0,
            timeline: Timeline::default(),
            trends: TrendResult::default(),
            settings: Settings::load(&storage),
            history: SearchHistory::load(&storage),
            storage,
        };
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(state),
                revision,
            }),
            scheduler: Mutex::new(RefreshScheduler::default()),
        }
    }

    /// Initial load: trends, plus the current keyword if there is one.
    pub async fn start(&self) {
        self.inner.load_trends().await;
        let has_keyword = !self.inner.state().keyword.is_empty();
        if has_keyword {
            self.inner.load_tweets(IngestMode::Foreground).await;
        }
        self.reschedule();
    }

    /// Searches for `keyword` from scratch. A blank keyword goes home instead.
    pub async fn search(&self, keyword: &str) {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            self.go_home().await;
            return;
        }

        {
            let mut state = self.inner.state();
            let state = &mut *state;
            state.history.add(keyword);
            if let Err(e) = state.history.save(&mut state.storage) {
                warn!(error = %e, "unable to save search history");
            }
            state.timeline.reset();
            state.keyword = keyword.to_owned();
            state.view = View::Search;
            state.generation += 1;
        }
        info!(keyword, "search");
        self.inner.bump();
        self.reschedule();

        self.inner.load_tweets(IngestMode::Foreground).await;
    }

    pub async fn go_home(&self) {
        {
            let mut state = self.inner.state();
            state.keyword.clear();
            state.timeline.reset();
            state.view = View::Home;
            state.generation += 1;
        }
        self.inner.bump();
        self.reschedule();

        self.inner.load_trends().await;
    }

    /// Fetches the first search page for the current keyword and merges it.
    pub async fn load_tweets(&self, mode: IngestMode) {
        self.inner.load_tweets(mode).await;
    }

    /// Appends the next page of older posts. Returns how many were new.
    pub async fn load_more(&self) -> usize {
        self.inner.load_more().await
    }

    pub async fn load_trends(&self) {
        self.inner.load_trends().await;
    }

    /// Shows the pending posts. Returns `true` when the view should scroll
    /// back to the top.
    pub fn merge_pending(&self) -> bool {
        let scroll_to_top = self.inner.state().timeline.merge_pending();
        if scroll_to_top {
            self.inner.bump();
        }
        scroll_to_top
    }

    pub fn set_scroll_offset(&self, offset_px: u32) {
        let scrolled = offset_px > SCROLL_THRESHOLD_PX;
        let changed = {
            let mut state = self.inner.state();
            let changed = state.timeline.is_scrolled() != scrolled;
            state.timeline.set_scrolled(scrolled);
            changed
        };
        if changed {
            self.inner.bump();
        }
    }

    pub fn set_tab(&self, tab: Tab) {
        self.inner.state().tab = tab;
        self.inner.bump();
        self.reschedule();
    }

    pub fn set_home_tab(&self, home_tab: HomeTab) {
        self.inner.state().home_tab = home_tab;
        self.inner.bump();
        self.reschedule();
    }

    pub fn settings(&self) -> Settings {
        self.inner.state().settings.clone()
    }

    /// Applies `update` to the settings, persists them and re-arms the timer.
    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        {
            let mut state = self.inner.state();
            let state = &mut *state;
            update(&mut state.settings);
            if let Err(e) = state.settings.save(&mut state.storage) {
                warn!(error = %e, "unable to save settings");
            }
        }
        self.inner.bump();
        self.reschedule();
    }

    /// Blocks the author of a post.
    pub fn block_user(&self, handle: &str) -> bool {
        let mut added = false;
        self.update_settings(|settings| added = settings.ng.add_user(handle));
        added
    }

    pub fn history(&self) -> SearchHistory {
        self.inner.state().history.clone()
    }

    pub fn remove_history(&self, keyword: &str) {
        let mut state = self.inner.state();
        let state = &mut *state;
        state.history.remove(keyword);
        if let Err(e) = state.history.save(&mut state.storage) {
            warn!(error = %e, "unable to save search history");
        }
    }

    pub fn clear_history(&self) {
        let mut state = self.inner.state();
        let state = &mut *state;
        state.history.clear();
        if let Err(e) = state.history.save(&mut state.storage) {
            warn!(error = %e, "unable to save search history");
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }

    /// A snapshot after every change, starting with the next one.
    pub fn updates(&self) -> impl Stream<Item = Snapshot> {
        let receiver = self.inner.revision.subscribe();
        futures_util::stream::unfold(
            (receiver, self.inner.clone()),
            |(mut receiver, inner)| async move {
                receiver.changed().await.ok()?;
                let snapshot = inner.snapshot();
                Some((snapshot, (receiver, inner)))
            },
        )
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.scheduler().is_armed()
    }

    /// Tears down the timer and arms the one the current view calls for.
    fn reschedule(&self) {
        let (view, home_tab, has_keyword, settings) = {
            let state = self.inner.state();
            (
                state.view,
                state.home_tab,
                !state.keyword.is_empty(),
                state.settings.clone(),
            )
        };

        let mut scheduler = self.scheduler();
        scheduler.cancel();
        if !settings.auto_refresh {
            return;
        }

        let inner = self.inner.clone();
        match view {
            View::Home if home_tab == HomeTab::Trends => {
                scheduler.reschedule(settings.trend_interval(), move || {
                    let inner = inner.clone();
                    async move { inner.load_trends().await }
                });
            }
            View::Search if has_keyword => {
                scheduler.reschedule(settings.search_interval(), move || {
                    let inner = inner.clone();
                    async move { inner.load_tweets(IngestMode::Background).await }
                });
            }
            _ => {}
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, RefreshScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    async fn load_tweets(&self, mode: IngestMode) {
        let (keyword, generation) = {
            let state = self.state();
            (state.keyword.clone(), state.generation)
        };
        if keyword.is_empty() {
            return;
        }

        let result = self.source.fetch_tweets(&keyword, 1).await;

        {
            let mut state = self.state();
            if state.generation != generation {
                debug!(keyword, "discarding result for a stale keyword");
                return;
            }
            state.timeline.ingest(mode, result, crate::now_millis());
        }
        self.bump();
    }

    async fn load_more(&self) -> usize {
        let (keyword, generation, oldest_id, page_index) = {
            let state = self.state();
            let Some(oldest_id) = state.timeline.oldest_id() else {
                return 0;
            };
            if state.keyword.is_empty() || !state.timeline.has_more() {
                return 0;
            }
            (
                state.keyword.clone(),
                state.generation,
                oldest_id.to_owned(),
                state.timeline.page_index(),
            )
        };

        let posts = self
            .source
            .fetch_more_tweets(&keyword, &oldest_id, page_index)
            .await;

        let added = {
            let mut state = self.state();
            if state.generation != generation {
                debug!(keyword, "discarding older page for a stale keyword");
                return 0;
            }
            state.timeline.append_older(posts)
        };
        debug!(keyword, page_index, added, "loaded older posts");
        self.bump();
        added
    }

    async fn load_trends(&self) {
        let mut trends = self.source.fetch_trends().await;
        trends.items.truncate(MAX_TRENDS);
        debug!(items = trends.items.len(), "loaded trends");
        self.state().trends = trends;
        self.bump();
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            view: state.view,
            keyword: state.keyword.clone(),
            tab: state.tab,
            posts: filter_posts(state.timeline.window(), state.tab, &state.settings.ng)
                .into_iter()
                .cloned()
                .collect(),
            pending: state.timeline.pending().len(),
            scrolled: state.timeline.is_scrolled(),
            has_more: state.timeline.has_more(),
            trends: state.trends.clone(),
        }
    }
}
