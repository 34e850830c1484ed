//! Reconciliation of fetched posts against what is already on screen.
//!
//! [`Timeline`] owns the bounded display window and the queue of posts held
//! back while the reader is scrolled away from the top. All mutation goes
//! through its methods; renderers only ever read [`Timeline::window`].

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::post::{FetchTweetsResult, Post};

pub const DEFAULT_CAPACITY: usize = 50;

/// A best post is placed at the top at most once per this window during
/// background refreshes.
pub const BEST_COOLDOWN_MS: i64 = 5 * 60 * 1000;

/// Evicted ids remembered per window slot, with a floor of
/// [`MIN_EVICTED_MEMORY`]. Older ids are forgotten first.
const EVICTED_MEMORY: usize = 4;
const MIN_EVICTED_MEMORY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Explicit search, keyword click or initial load: replaces the window.
    Foreground,
    /// Auto-refresh tick: merges into the window or the pending queue.
    Background,
}

/// How many previously unseen posts one ingest added to each list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ingested {
    pub window: usize,
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    window: Vec<Post>,
    pending: Vec<Post>,
    /// Ids pushed out of the window since the last reset or foreground load.
    evicted: EvictedIds,
    last_best_at: Option<i64>,
    page_index: u32,
    has_more: bool,
    scrolled: bool,
    capacity: usize,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Timeline {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            window: vec![],
            pending: vec![],
            evicted: EvictedIds::new(
                capacity
                    .saturating_mul(EVICTED_MEMORY)
                    .max(MIN_EVICTED_MEMORY),
            ),
            last_best_at: None,
            page_index: 1,
            has_more: true,
            scrolled: false,
            capacity,
        }
    }

    pub fn window(&self) -> &[Post] {
        &self.window
    }

    pub fn pending(&self) -> &[Post] {
        &self.pending
    }

    pub fn is_scrolled(&self) -> bool {
        self.scrolled
    }

    pub fn set_scrolled(&mut self, scrolled: bool) {
        self.scrolled = scrolled;
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// Id of the last post in the window, the cursor for loading older pages.
    pub fn oldest_id(&self) -> Option<&str> {
        self.window.last().map(|post| post.id.as_str())
    }

    /// Merges one search page fetch.
    ///
    /// A best post arriving during a background refresh within
    /// [`BEST_COOLDOWN_MS`] of the last accepted one loses its special
    /// placement and is merged as an ordinary timeline post instead.
    pub fn ingest(&mut self, mode: IngestMode, result: FetchTweetsResult, now_ms: i64) -> Ingested {
        let FetchTweetsResult { best, mut timeline } = result;

        let best = best.and_then(|best| {
            let cooling_down = mode == IngestMode::Background
                && self
                    .last_best_at
                    .is_some_and(|at| now_ms - at < BEST_COOLDOWN_MS);
            if cooling_down {
                debug!(id = %best.id, "best post suppressed by cooldown");
                if !timeline.iter().any(|post| post.id == best.id) {
                    timeline.push(Post {
                        is_best: false,
                        ..best
                    });
                }
                None
            } else {
                self.last_best_at = Some(now_ms);
                Some(best)
            }
        });

        sort_newest_first(&mut timeline);
        let incoming: Vec<Post> = best.into_iter().chain(timeline).collect();

        let ingested = match mode {
            IngestMode::Foreground => {
                self.window = incoming;
                self.evicted.clear();
                self.evict_overflow();
                self.pending.clear();
                Ingested {
                    window: self.window.len(),
                    pending: 0,
                }
            }
            IngestMode::Background if self.scrolled => {
                let known: HashSet<&str> = self
                    .window
                    .iter()
                    .chain(&self.pending)
                    .map(|post| post.id.as_str())
                    .collect();
                let fresh: Vec<Post> = incoming
                    .into_iter()
                    .filter(|post| {
                        !known.contains(post.id.as_str()) && !self.evicted.contains(&post.id)
                    })
                    .collect();
                let added = fresh.len();
                if added > 0 {
                    let mut pending = fresh;
                    pending.append(&mut self.pending);
                    sort_newest_first(&mut pending);
                    self.pending = pending;
                }
                Ingested {
                    window: 0,
                    pending: added,
                }
            }
            IngestMode::Background => {
                let added = self.prepend(incoming);
                self.pending.clear();
                Ingested {
                    window: added,
                    pending: 0,
                }
            }
        };

        debug!(
            ?mode,
            scrolled = self.scrolled,
            added_window = ingested.window,
            added_pending = ingested.pending,
            window = self.window.len(),
            pending = self.pending.len(),
            "ingested"
        );
        ingested
    }

    /// Moves the pending queue to the top of the window.
    ///
    /// Returns `false` without doing anything when there is nothing pending
    /// and the view is already at the top. Otherwise the view should scroll
    /// back to the top.
    pub fn merge_pending(&mut self) -> bool {
        if self.pending.is_empty() && !self.scrolled {
            return false;
        }
        let pending = std::mem::take(&mut self.pending);
        let added = self.prepend(pending);
        self.scrolled = false;
        debug!(added, window = self.window.len(), "merged pending posts");
        true
    }

    /// Appends one page of older posts from the pagination endpoint.
    ///
    /// An empty page ends pagination. Any non-empty page advances the page
    /// index, even when every post on it is already shown.
    pub fn append_older(&mut self, posts: Vec<Post>) -> usize {
        if posts.is_empty() {
            self.has_more = false;
            return 0;
        }
        self.page_index += 1;

        let mut known: HashSet<String> = self
            .window
            .iter()
            .chain(&self.pending)
            .map(|post| post.id.clone())
            .collect();
        let before = self.window.len();
        self.window
            .extend(posts.into_iter().filter(|post| known.insert(post.id.clone())));
        self.window.len() - before
    }

    /// Forgets everything tied to the current keyword.
    pub fn reset(&mut self) {
        self.window.clear();
        self.pending.clear();
        self.evicted.clear();
        self.last_best_at = None;
        self.page_index = 1;
        self.has_more = true;
    }

    /// Puts unseen posts in front of the window. Posts evicted earlier count
    /// as seen, so a refresh that still lists them cannot bring them back on top.
    fn prepend(&mut self, posts: Vec<Post>) -> usize {
        let known: HashSet<&str> = self.window.iter().map(|post| post.id.as_str()).collect();
        let mut merged: Vec<Post> = posts
            .into_iter()
            .filter(|post| !known.contains(post.id.as_str()) && !self.evicted.contains(&post.id))
            .collect();
        let added = merged.len();
        if added > 0 {
            merged.append(&mut self.window);
            self.window = merged;
            self.evict_overflow();
        }
        added
    }

    fn evict_overflow(&mut self) {
        if self.window.len() > self.capacity {
            let overflow = self.window.split_off(self.capacity);
            for post in overflow {
                self.evicted.insert(post.id);
            }
        }
    }
}

/// Top-level posts newest first, then replies newest first.
///
/// A reply's time is when it was seen, not when the thread it belongs to
/// was active, so replies never interleave with top-level posts.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by_key(|post| (post.is_reply(), Reverse(post.created_at)));
}

/// Most recently evicted ids, oldest forgotten first.
#[derive(Debug, Clone)]
struct EvictedIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    limit: usize,
}

impl EvictedIds {
    fn new(limit: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            limit,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.limit {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::{quickcheck, TestResult};

    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn post(id: &str, created_at: i64) -> Post {
        Post {
            id: id.to_owned(),
            text: format!("text {id}"),
            url: String::new(),
            timestamp: String::new(),
            created_at,
            author: "A".to_owned(),
            handle: "@a".to_owned(),
            icon_url: String::new(),
            media_url: None,
            retweet_count: None,
            like_count: None,
            is_best: false,
            reply_to: None,
        }
    }

    fn reply(id: &str, created_at: i64) -> Post {
        Post {
            reply_to: Some("@b".to_owned()),
            ..post(id, created_at)
        }
    }

    fn best(id: &str, created_at: i64) -> Post {
        Post {
            is_best: true,
            ..post(id, created_at)
        }
    }

    fn timeline(posts: Vec<Post>) -> FetchTweetsResult {
        FetchTweetsResult {
            best: None,
            timeline: posts,
        }
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_foreground_sorts_and_puts_replies_last() {
        let mut t = Timeline::default();
        let result = FetchTweetsResult {
            best: Some(best("b", T0 - 50_000)),
            timeline: vec![
                post("1", T0 - 3000),
                reply("r1", T0),
                post("2", T0 - 1000),
                reply("r2", T0 - 5000),
                post("3", T0 - 2000),
            ],
        };
        let added = t.ingest(IngestMode::Foreground, result, T0);
        assert_eq!(ids(t.window()), vec!["b", "2", "3", "1", "r1", "r2"]);
        assert_eq!(added.window, 6);
        assert!(t.window()[0].is_best);
        assert!(t.pending().is_empty());
    }

    #[test]
    fn test_foreground_truncates_and_clears_pending() {
        let mut t = Timeline::with_capacity(3);
        t.set_scrolled(true);
        t.ingest(IngestMode::Background, timeline(vec![post("p", T0)]), T0);
        assert_eq!(t.pending().len(), 1);

        let posts = (0..5).map(|i| post(&i.to_string(), T0 - i)).collect();
        t.ingest(IngestMode::Foreground, timeline(posts), T0);
        assert_eq!(ids(t.window()), vec!["0", "1", "2"]);
        assert!(t.pending().is_empty());
    }

    #[test]
    fn test_background_while_scrolled_goes_to_pending() {
        let mut t = Timeline::default();
        t.ingest(
            IngestMode::Foreground,
            timeline(vec![post("1", T0), post("2", T0 - 1000)]),
            T0,
        );
        t.set_scrolled(true);

        let added = t.ingest(
            IngestMode::Background,
            timeline(vec![post("2", T0 - 1000), post("3", T0 + 1000)]),
            T0 + 1000,
        );
        assert_eq!(added, Ingested { window: 0, pending: 1 });
        assert_eq!(ids(t.pending()), vec!["3"]);
        assert_eq!(ids(t.window()), vec!["1", "2"]);

        // Already pending: not queued twice.
        t.ingest(
            IngestMode::Background,
            timeline(vec![post("3", T0 + 1000), post("4", T0 + 2000)]),
            T0 + 2000,
        );
        assert_eq!(ids(t.pending()), vec!["4", "3"]);

        assert!(t.merge_pending());
        assert_eq!(ids(t.window()), vec!["4", "3", "1", "2"]);
        assert!(t.pending().is_empty());
        assert!(!t.is_scrolled());
    }

    #[test]
    fn test_merge_pending_scenario() {
        let mut t = Timeline::default();
        t.ingest(
            IngestMode::Foreground,
            timeline(vec![post("1", T0), post("2", T0 - 1000)]),
            T0,
        );
        t.set_scrolled(true);
        t.ingest(
            IngestMode::Background,
            timeline(vec![post("2", T0 - 1000), post("3", T0 - 500)]),
            T0,
        );
        assert_eq!(ids(t.pending()), vec!["3"]);

        assert!(t.merge_pending());
        assert_eq!(ids(t.window()), vec!["3", "1", "2"]);
        assert!(t.pending().is_empty());
        assert!(!t.is_scrolled());
    }

    #[test]
    fn test_merge_pending_noop_at_top() {
        let mut t = Timeline::default();
        t.ingest(IngestMode::Foreground, timeline(vec![post("1", T0)]), T0);
        assert!(!t.merge_pending());
        assert_eq!(ids(t.window()), vec!["1"]);

        // Scrolled with nothing pending still asks to scroll to top.
        t.set_scrolled(true);
        assert!(t.merge_pending());
        assert!(!t.is_scrolled());
        assert_eq!(ids(t.window()), vec!["1"]);
    }

    #[test]
    fn test_background_at_top_prepends_and_truncates() {
        let mut t = Timeline::with_capacity(3);
        t.ingest(
            IngestMode::Foreground,
            timeline(vec![post("1", T0), post("2", T0 - 1)]),
            T0,
        );
        let added = t.ingest(
            IngestMode::Background,
            timeline(vec![post("3", T0 + 2), post("4", T0 + 1), post("1", T0)]),
            T0 + 2,
        );
        assert_eq!(added.window, 2);
        assert_eq!(ids(t.window()), vec!["3", "4", "1"]);
    }

    #[test]
    fn test_best_cooldown() {
        let mut t = Timeline::default();
        t.ingest(
            IngestMode::Background,
            FetchTweetsResult {
                best: Some(best("b1", T0)),
                timeline: vec![post("1", T0 - 1000)],
            },
            T0,
        );
        assert_eq!(ids(t.window()), vec!["b1", "1"]);
        assert!(t.window()[0].is_best);

        // Two minutes later a different best post only gets demoted.
        let later = T0 + 120_000;
        t.ingest(
            IngestMode::Background,
            FetchTweetsResult {
                best: Some(best("b2", later - 60_000)),
                timeline: vec![post("2", later)],
            },
            later,
        );
        assert_eq!(ids(t.window()), vec!["2", "b2", "b1", "1"]);
        assert!(!t.window()[1].is_best);

        // After the cooldown a best post is placed on top again.
        let after = T0 + BEST_COOLDOWN_MS + 1;
        t.ingest(
            IngestMode::Background,
            FetchTweetsResult {
                best: Some(best("b3", T0)),
                timeline: vec![],
            },
            after,
        );
        assert_eq!(t.window()[0].id, "b3");
        assert!(t.window()[0].is_best);
    }

    #[test]
    fn test_foreground_best_ignores_and_resets_cooldown() {
        let mut t = Timeline::default();
        t.ingest(
            IngestMode::Background,
            FetchTweetsResult {
                best: Some(best("b1", T0)),
                timeline: vec![],
            },
            T0,
        );
        t.ingest(
            IngestMode::Foreground,
            FetchTweetsResult {
                best: Some(best("b2", T0)),
                timeline: vec![],
            },
            T0 + 1000,
        );
        assert!(t.window()[0].is_best);

        // Cooldown now counts from the foreground acceptance.
        t.ingest(
            IngestMode::Background,
            FetchTweetsResult {
                best: Some(best("b3", T0)),
                timeline: vec![],
            },
            T0 + 1000 + BEST_COOLDOWN_MS - 1,
        );
        assert_eq!(ids(t.window()), vec!["b3", "b2"]);
        assert!(!t.window()[0].is_best);
    }

    #[test]
    fn test_suppressed_best_already_in_timeline() {
        let mut t = Timeline::default();
        t.ingest(
            IngestMode::Foreground,
            FetchTweetsResult {
                best: Some(best("b", T0)),
                timeline: vec![],
            },
            T0,
        );
        t.reset();
        t.ingest(
            IngestMode::Background,
            FetchTweetsResult {
                best: Some(best("x", T0)),
                timeline: vec![],
            },
            T0,
        );
        let result = FetchTweetsResult {
            best: Some(best("y", T0)),
            timeline: vec![post("y", T0)],
        };
        t.ingest(IngestMode::Background, result, T0 + 1);
        assert_eq!(ids(t.window()), vec!["y", "x"]);
    }

    #[test]
    fn test_append_older_and_reset() {
        let mut t = Timeline::with_capacity(2);
        t.ingest(
            IngestMode::Foreground,
            timeline(vec![post("1", T0), post("2", T0 - 1)]),
            T0,
        );
        assert_eq!(t.oldest_id(), Some("2"));
        assert_eq!(t.page_index(), 1);

        let added = t.append_older(vec![post("2", T0 - 1), post("3", T0 - 2), post("4", T0 - 3)]);
        assert_eq!(added, 2);
        assert_eq!(ids(t.window()), vec!["1", "2", "3", "4"]);
        assert_eq!(t.page_index(), 2);

        assert_eq!(t.append_older(vec![post("4", T0 - 3)]), 0);
        assert_eq!(t.page_index(), 3);
        assert!(t.has_more());

        assert_eq!(t.append_older(vec![]), 0);
        assert!(!t.has_more());

        t.reset();
        assert!(t.window().is_empty());
        assert_eq!(t.oldest_id(), None);
        assert_eq!(t.page_index(), 1);
        assert!(t.has_more());
    }

    #[test]
    fn test_reset_clears_best_cooldown() {
        let mut t = Timeline::default();
        let result = FetchTweetsResult {
            best: Some(best("b", T0)),
            timeline: vec![],
        };
        t.ingest(IngestMode::Background, result.clone(), T0);
        t.reset();
        t.ingest(IngestMode::Background, result, T0 + 1);
        assert!(t.window()[0].is_best);
    }

    #[test]
    fn test_evicted_posts_do_not_return_on_top() {
        let mut t = Timeline::with_capacity(2);
        t.ingest(
            IngestMode::Foreground,
            timeline(vec![post("1", T0), post("2", T0 - 1)]),
            T0,
        );
        let refresh = timeline(vec![post("3", T0 + 1), post("2", T0 - 1)]);
        t.ingest(IngestMode::Background, refresh.clone(), T0 + 1);
        assert_eq!(ids(t.window()), vec!["3", "1"]);

        t.ingest(IngestMode::Background, refresh.clone(), T0 + 2);
        assert_eq!(ids(t.window()), vec!["3", "1"]);

        t.set_scrolled(true);
        t.ingest(IngestMode::Background, refresh, T0 + 3);
        assert!(t.pending().is_empty());
    }

    #[test]
    fn test_evicted_memory_is_bounded() {
        let mut t = Timeline::with_capacity(1);
        t.ingest(IngestMode::Foreground, timeline(vec![post("0", T0)]), T0);
        for i in 1..=1200 {
            let page = timeline(vec![post(&i.to_string(), T0 + i)]);
            t.ingest(IngestMode::Background, page, T0 + i);
        }
        assert_eq!(t.evicted.len(), MIN_EVICTED_MEMORY);
        assert_eq!(ids(t.window()), vec!["1200"]);

        // Recently evicted: still kept out.
        t.ingest(IngestMode::Background, timeline(vec![post("1150", T0)]), T0 + 1201);
        assert_eq!(ids(t.window()), vec!["1200"]);

        // Evicted long ago and forgotten.
        t.ingest(IngestMode::Background, timeline(vec![post("1", T0)]), T0 + 1202);
        assert_eq!(ids(t.window()), vec!["1"]);
    }

    /// One generated refresh: (background, scrolled, timeline ids, best id).
    type Step = (bool, bool, Vec<u8>, Option<u8>);

    fn step_result((_, _, ids, best_id): &Step) -> FetchTweetsResult {
        let mut seen = HashSet::new();
        let timeline = ids
            .iter()
            .filter(|id| Some(**id) != *best_id && seen.insert(**id))
            .map(|id| {
                let p = post(&id.to_string(), T0 + i64::from(*id));
                if id % 7 == 0 {
                    Post {
                        reply_to: Some("@r".to_owned()),
                        ..p
                    }
                } else {
                    p
                }
            })
            .collect();
        FetchTweetsResult {
            best: best_id.map(|id| best(&id.to_string(), T0)),
            timeline,
        }
    }

    fn apply(t: &mut Timeline, step: &Step, now_ms: i64) {
        let (background, scrolled, _, _) = step;
        t.set_scrolled(*scrolled);
        let mode = if *background {
            IngestMode::Background
        } else {
            IngestMode::Foreground
        };
        t.ingest(mode, step_result(step), now_ms);
    }

    fn disjoint(t: &Timeline) -> bool {
        let window: HashSet<&str> = t.window().iter().map(|p| p.id.as_str()).collect();
        t.pending().iter().all(|p| !window.contains(p.id.as_str()))
    }

    fn unique(posts: &[Post]) -> bool {
        let mut seen = HashSet::new();
        posts.iter().all(|p| seen.insert(p.id.as_str()))
    }

    #[test]
    fn prop_capacity_and_disjointness() {
        fn prop(steps: Vec<Step>, merges: Vec<bool>) -> bool {
            let mut t = Timeline::with_capacity(10);
            for (i, step) in steps.iter().enumerate() {
                apply(&mut t, step, T0 + i as i64 * 60_000);
                if !(t.window().len() <= 10
                    && disjoint(&t)
                    && unique(t.window())
                    && unique(t.pending()))
                {
                    return false;
                }
                if merges.get(i).copied().unwrap_or(false) {
                    t.merge_pending();
                    if !(t.window().len() <= 10 && t.pending().is_empty() && unique(t.window())) {
                        return false;
                    }
                }
            }
            true
        }
        quickcheck(prop as fn(Vec<Step>, Vec<bool>) -> bool);
    }

    #[test]
    fn prop_ingest_is_idempotent() {
        fn prop(history: Vec<Step>, step: Step) -> TestResult {
            if !step.0 {
                return TestResult::discard();
            }
            let mut t = Timeline::with_capacity(10);
            for (i, s) in history.iter().enumerate() {
                apply(&mut t, s, T0 + i as i64);
            }
            let now = T0 + history.len() as i64;
            apply(&mut t, &step, now);
            let window = t.window().to_vec();
            let pending = t.pending().to_vec();

            apply(&mut t, &step, now + 1);
            TestResult::from_bool(
                t.window() == window.as_slice() && t.pending() == pending.as_slice(),
            )
        }
        quickcheck(prop as fn(Vec<Step>, Step) -> TestResult);
    }

    #[test]
    fn prop_foreground_ordering() {
        fn prop(ids: Vec<u8>) -> bool {
            let mut t = Timeline::default();
            t.ingest(IngestMode::Foreground, step_result(&(false, false, ids, None)), T0);
            let window = t.window();
            let first_reply = window.iter().position(Post::is_reply).unwrap_or(window.len());
            let (top, replies) = window.split_at(first_reply);
            replies.iter().all(Post::is_reply)
                && top.windows(2).all(|w| w[0].created_at >= w[1].created_at)
                && replies.windows(2).all(|w| w[0].created_at >= w[1].created_at)
        }
        quickcheck(prop as fn(Vec<u8>) -> bool);
    }
}
