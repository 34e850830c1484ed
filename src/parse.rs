use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::identity;
use crate::post::{FetchTweetsResult, Post};

static POST_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="Tweet_TweetContainer__"]"#).unwrap());

/// Splits a search results page into its best post and timeline.
///
/// The auto-refresh region comes first, then the best region, then the main
/// timeline. A post id seen in an earlier region is skipped in later ones.
pub fn parse_search_html(html: &str, base_url: &str, now_ms: i64) -> FetchTweetsResult {
    static AUTO_REFRESH_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"#ar, [class*="AutoRefresh_container"]"#).unwrap());
    static BEST_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("#bt").unwrap());
    static TIMELINE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("#sr").unwrap());

    let document = Html::parse_document(html);
    let root = document.root_element();
    let mut seen = HashSet::new();

    let auto_refresh = parse_region(&root, &AUTO_REFRESH_SELECTOR, base_url, now_ms, &mut seen);

    let best = root
        .select(&BEST_SELECTOR)
        .next()
        .and_then(|region| {
            region
                .select(&POST_SELECTOR)
                .find_map(|element| parse_post_element(&element, base_url, now_ms))
        })
        .filter(|post| seen.insert(post.id.clone()))
        .map(|post| Post {
            is_best: true,
            ..post
        });

    let main = parse_region(&root, &TIMELINE_SELECTOR, base_url, now_ms, &mut seen);

    let mut timeline = auto_refresh;
    timeline.extend(main);

    FetchTweetsResult { best, timeline }
}

fn parse_region(
    root: &ElementRef,
    region_selector: &Selector,
    base_url: &str,
    now_ms: i64,
    seen: &mut HashSet<String>,
) -> Vec<Post> {
    let mut posts = vec![];
    for region in root.select(region_selector) {
        for element in region.select(&POST_SELECTOR) {
            if let Some(post) = parse_post_element(&element, base_url, now_ms) {
                if seen.insert(post.id.clone()) {
                    posts.push(post);
                }
            }
        }
    }
    posts
}

/// Parses one post container. Returns `None` when the body is missing or the
/// fragment is otherwise unusable; the caller skips it.
pub fn parse_post_element(element: &ElementRef, base_url: &str, now_ms: i64) -> Option<Post> {
    static BODY_CONTAINER_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_bodyContainer__"]"#).unwrap());

    let body_container = element.select(&BODY_CONTAINER_SELECTOR).next();
    let body = parse_post_body(element, body_container.as_ref())?;

    let icon_url = parse_post_icon(element).unwrap_or_default();
    let (text, reply_to) = parse_post_text(&body);
    let (author, handle) = parse_post_author(element);
    let (timestamp, status_href) = parse_post_time(element);
    let created_at = parse_relative_time(&timestamp, now_ms);

    let detail_href = parse_post_detail_href(element);
    let id = identity::derive_id(
        detail_href.as_deref(),
        status_href.as_deref(),
        &handle,
        &text,
    );
    let url = match (detail_href, status_href) {
        (Some(href), _) => absolute_url(base_url, &href),
        (None, Some(href)) => href,
        (None, None) => String::new(),
    };

    let scope = body_container.unwrap_or(*element);
    let media_url = parse_post_media(&scope, &icon_url);
    let (retweet_count, like_count) = parse_post_counts(element);

    Some(Post {
        id,
        text,
        url,
        timestamp,
        created_at,
        author,
        handle,
        icon_url,
        media_url,
        retweet_count,
        like_count,
        is_best: false,
        reply_to,
    })
}

fn parse_post_body<'a>(
    element: &ElementRef<'a>,
    body_container: Option<&ElementRef<'a>>,
) -> Option<ElementRef<'a>> {
    static BODY_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_body__"]"#).unwrap());

    body_container
        .and_then(|container| container.select(&BODY_SELECTOR).next())
        .or_else(|| element.select(&BODY_SELECTOR).next())
}

fn parse_post_icon(element: &ElementRef) -> Option<String> {
    static ICON_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_icon__"] img"#).unwrap());

    element
        .select(&ICON_SELECTOR)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_owned)
}

/// Body text with the "replying to" marker cut out, and the marker's handle.
fn parse_post_text(body: &ElementRef) -> (String, Option<String>) {
    static REPLY_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet__reply"]"#).unwrap());
    static HANDLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@[A-Za-z0-9_]+").unwrap());

    let mut text: String = body.text().collect();
    let mut reply_to = None;

    if let Some(marker) = body.select(&REPLY_SELECTOR).next() {
        let marker_text: String = marker.text().collect();
        if !marker_text.is_empty() {
            text = text.replacen(&marker_text, "", 1);
            reply_to = HANDLE_RE
                .find(&marker_text)
                .map(|m| m.as_str().to_owned());
        }
    }

    (text.trim().to_owned(), reply_to)
}

fn parse_post_author(element: &ElementRef) -> (String, String) {
    static NAME_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_authorName__"]"#).unwrap());
    static ID_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_authorID__"]"#).unwrap());

    let author = trimmed_text(element, &NAME_SELECTOR)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_owned());
    let handle = trimmed_text(element, &ID_SELECTOR).unwrap_or_default();
    (author, handle)
}

/// Time label and the href of the link wrapped around it, if any.
fn parse_post_time(element: &ElementRef) -> (String, Option<String>) {
    static TIME_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_time__"]"#).unwrap());
    static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());

    let Some(time) = element.select(&TIME_SELECTOR).next() else {
        return (String::new(), None);
    };
    let label = time.text().collect::<String>().trim().to_owned();
    let href = time
        .select(&LINK_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned);
    (label, href)
}

fn parse_post_detail_href(element: &ElementRef) -> Option<String> {
    static DETAIL_LINK_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"a[href*="/realtime/search/tweet/"]"#).unwrap());

    element
        .select(&DETAIL_LINK_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned)
}

/// First image in scope that is neither the avatar nor an emoji glyph.
fn parse_post_media(scope: &ElementRef, icon_url: &str) -> Option<String> {
    static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

    scope.select(&IMG_SELECTOR).find_map(|img| {
        let src = img.value().attr("src")?;
        let is_emoji = img
            .value()
            .attr("class")
            .is_some_and(|class| class.contains("emoji"));
        (src != icon_url && !is_emoji).then(|| src.to_owned())
    })
}

fn parse_post_counts(element: &ElementRef) -> (Option<String>, Option<String>) {
    static ACTION_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Tweet_action__"]"#).unwrap());
    static ITEM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("li").unwrap());
    static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
    static COUNT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());

    let mut retweet_count = None;
    let mut like_count = None;

    let Some(actions) = element.select(&ACTION_SELECTOR).next() else {
        return (retweet_count, like_count);
    };

    for item in actions.select(&ITEM_SELECTOR) {
        let href = item
            .select(&LINK_SELECTOR)
            .next()
            .and_then(|a| a.value().attr("href"));
        let count = trimmed_text(&item, &COUNT_SELECTOR).filter(|s| !s.is_empty());
        let (Some(href), Some(count)) = (href, count) else {
            continue;
        };
        if href.contains("intent/retweet") {
            retweet_count = Some(count);
        } else if href.contains("intent/like") {
            like_count = Some(count);
        }
    }

    (retweet_count, like_count)
}

fn trimmed_text(element: &ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_owned())
}

fn absolute_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_owned()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    }
}

/// Approximate creation time of a post from its relative time label.
///
/// Only seconds and minutes are reconstructed; every other label maps to `now_ms`.
pub fn parse_relative_time(label: &str, now_ms: i64) -> i64 {
    static SECONDS_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<n>\d+)\s*(?:秒|seconds?\b)").unwrap());
    static MINUTES_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?P<n>\d+)\s*(?:分|minutes?\b)").unwrap());

    if label == "Now" {
        return now_ms;
    }

    let amount = |re: &Regex| -> Option<i64> {
        re.captures(label)?.name("n")?.as_str().parse().ok()
    };
    let ago = |n: i64, unit_ms: i64| {
        n.checked_mul(unit_ms)
            .and_then(|ms| now_ms.checked_sub(ms))
            .unwrap_or(now_ms)
    };

    if let Some(n) = amount(&SECONDS_RE) {
        return ago(n, 1000);
    }
    if let Some(n) = amount(&MINUTES_RE) {
        return ago(n, 60_000);
    }
    now_ms
}

/// Relative label for a post whose creation time is known exactly.
pub fn relative_label(created_at_ms: i64, now_ms: i64) -> String {
    let seconds = now_ms.saturating_sub(created_at_ms).max(0) / 1000;
    match seconds {
        s if s < 60 => format!("{}秒前", s),
        s if s < 3600 => format!("{}分前", s / 60),
        s if s < 86_400 => format!("{}時間前", s / 3600),
        s => format!("{}日前", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const BASE: &str = "https://search.yahoo.co.jp";

    fn post_html(id: Option<&str>, handle: &str, body: &str, time: &str) -> String {
        let detail = id
            .map(|id| format!(r#"<a href="/realtime/search/tweet/{id}?p=rust">detail</a>"#))
            .unwrap_or_default();
        format!(
            r#"<div class="Tweet_TweetContainer__abc">
                <div class="Tweet_icon__x"><img src="https://img/icon.png"></div>
                <span class="Tweet_authorName__q">Alice</span>
                <span class="Tweet_authorID__q">{handle}</span>
                <div class="Tweet_bodyContainer__z">
                    <p class="Tweet_body__y">{body}</p>
                </div>
                <time class="Tweet_time__t">{time}</time>
                {detail}
            </div>"#
        )
    }

    fn parse_one(html: &str) -> Option<Post> {
        let fragment = Html::parse_fragment(html);
        let element = fragment.select(&POST_SELECTOR).next()?;
        parse_post_element(&element, BASE, NOW)
    }

    #[test]
    fn test_basic_post() {
        let post = parse_one(&post_html(None, "@alice", "Hello #world", "5 seconds")).unwrap();
        assert_eq!(post.text, "Hello #world");
        assert_eq!(post.author, "Alice");
        assert_eq!(post.handle, "@alice");
        assert_eq!(post.reply_to, None);
        assert_eq!(post.created_at, NOW - 5000);
        assert_eq!(post.icon_url, "https://img/icon.png");
        assert_eq!(post.media_url, None);
        assert!(!post.is_best);
    }

    #[test]
    fn test_reply_marker_is_stripped() {
        let body = r#"<span class="Tweet__reply_abc">Replying to @bob</span>nice!"#;
        let post = parse_one(&post_html(Some("9"), "@alice", body, "1分")).unwrap();
        assert_eq!(post.text, "nice!");
        assert_eq!(post.reply_to.as_deref(), Some("@bob"));
        assert_eq!(post.created_at, NOW - 60_000);
    }

    #[test]
    fn test_reply_marker_without_handle() {
        let body = r#"<span class="Tweet__reply_abc">返信先</span>hi"#;
        let post = parse_one(&post_html(Some("9"), "@alice", body, "")).unwrap();
        assert_eq!(post.text, "hi");
        assert_eq!(post.reply_to, None);
    }

    #[test]
    fn test_missing_body_is_skipped() {
        let html = r#"<div class="Tweet_TweetContainer__abc"><span class="Tweet_authorName__q">A</span></div>"#;
        assert!(parse_one(html).is_none());
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let html = r#"<div class="Tweet_TweetContainer__abc"><p class="Tweet_body__y">only text</p></div>"#;
        let post = parse_one(html).unwrap();
        assert_eq!(post.author, "Unknown");
        assert_eq!(post.handle, "");
        assert_eq!(post.timestamp, "");
        assert_eq!(post.icon_url, "");
        assert_eq!(post.url, "");
        assert_eq!(post.created_at, NOW);
        assert_eq!(post.id, identity::hash_id("", "only text"));
    }

    #[test]
    fn test_identity_is_stable() {
        let with_id = post_html(Some("1234"), "@alice", "same", "Now");
        assert_eq!(parse_one(&with_id).unwrap().id, "1234");
        assert_eq!(parse_one(&with_id).unwrap().id, parse_one(&with_id).unwrap().id);

        let without_id = post_html(None, "@alice", "same", "Now");
        let first = parse_one(&without_id).unwrap().id;
        let second = parse_one(&without_id).unwrap().id;
        assert!(first.starts_with("hash-"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_url_and_time_link_fallback() {
        let with_id = post_html(Some("77"), "@alice", "x", "Now");
        assert_eq!(
            parse_one(&with_id).unwrap().url,
            "https://search.yahoo.co.jp/realtime/search/tweet/77?p=rust"
        );

        let html = r#"<div class="Tweet_TweetContainer__abc">
            <p class="Tweet_body__y">x</p>
            <time class="Tweet_time__t"><a href="https://x.com/alice/status/88">3分</a></time>
        </div>"#;
        let post = parse_one(html).unwrap();
        assert_eq!(post.id, "88");
        assert_eq!(post.url, "https://x.com/alice/status/88");
        assert_eq!(post.timestamp, "3分");
    }

    #[test]
    fn test_media_and_counts() {
        let html = r#"<div class="Tweet_TweetContainer__abc">
            <div class="Tweet_icon__x"><img src="https://img/icon.png"></div>
            <div class="Tweet_bodyContainer__z">
                <p class="Tweet_body__y">look <img class="Tweet_emoji__e" src="https://img/smile.png"></p>
                <img src="https://img/icon.png">
                <img src="https://img/photo.jpg">
                <img src="https://img/second.jpg">
            </div>
            <ul class="Tweet_action__a">
                <li><a href="https://x.com/intent/retweet?tweet_id=1"></a><span> 12 </span></li>
                <li><a href="https://x.com/intent/like?tweet_id=1"></a><span>3.4万</span></li>
                <li><a href="https://x.com/intent/tweet?in_reply_to=1"></a><span>9</span></li>
            </ul>
        </div>"#;
        let post = parse_one(html).unwrap();
        assert_eq!(post.media_url.as_deref(), Some("https://img/photo.jpg"));
        assert_eq!(post.retweet_count.as_deref(), Some("12"));
        assert_eq!(post.like_count.as_deref(), Some("3.4万"));
    }

    #[test]
    fn test_relative_time() {
        assert_eq!(parse_relative_time("Now", NOW), NOW);
        assert_eq!(parse_relative_time("5 seconds", NOW), NOW - 5000);
        assert_eq!(parse_relative_time("12秒", NOW), NOW - 12_000);
        assert_eq!(parse_relative_time("3 minutes", NOW), NOW - 180_000);
        assert_eq!(parse_relative_time("1 minute", NOW), NOW - 60_000);
        assert_eq!(parse_relative_time("2時間", NOW), NOW);
        assert_eq!(parse_relative_time("5月3日", NOW), NOW);
        assert_eq!(parse_relative_time("", NOW), NOW);
    }

    #[test]
    fn test_relative_label() {
        assert_eq!(relative_label(NOW - 5_000, NOW), "5秒前");
        assert_eq!(relative_label(NOW - 180_000, NOW), "3分前");
        assert_eq!(relative_label(NOW - 7_200_000, NOW), "2時間前");
        assert_eq!(relative_label(NOW - 3 * 86_400_000, NOW), "3日前");
        assert_eq!(relative_label(NOW + 10_000, NOW), "0秒前");
        assert_eq!(relative_label(i64::MIN, NOW), format!("{}日前", i64::MAX / 1000 / 86_400));
    }

    #[test]
    fn test_oversized_relative_time() {
        assert_eq!(parse_relative_time("9999999999999999 seconds", NOW), NOW);
        assert_eq!(parse_relative_time("999999999999999999分", NOW), NOW);
        assert_eq!(parse_relative_time("99999999999999999999999 seconds", NOW), NOW);

        let html = format!(
            r#"<div id="sr">{huge}{ok}</div>"#,
            huge = post_html(Some("1"), "@a", "huge", "9999999999999999 seconds"),
            ok = post_html(Some("2"), "@b", "fine", "5 seconds"),
        );
        let result = parse_search_html(&html, BASE, NOW);
        let created: Vec<_> = result.timeline.iter().map(|p| p.created_at).collect();
        assert_eq!(created, vec![NOW, NOW - 5000]);
    }

    #[test]
    fn test_search_page_regions() {
        let html = format!(
            r#"<html><body>
                <div id="ar">{a1}{dup}</div>
                <div id="bt">{broken}{best}{best2}</div>
                <div id="sr">{dup}{t1}{t2}</div>
            </body></html>"#,
            a1 = post_html(Some("1"), "@a", "auto", "Now"),
            dup = post_html(Some("2"), "@b", "dup", "Now"),
            broken = r#"<div class="Tweet_TweetContainer__x"></div>"#,
            best = post_html(Some("3"), "@c", "best", "Now"),
            best2 = post_html(Some("4"), "@d", "second best", "Now"),
            t1 = post_html(Some("5"), "@e", "t1", "Now"),
            t2 = post_html(Some("6"), "@f", "t2", "Now"),
        );
        let result = parse_search_html(&html, BASE, NOW);
        let best = result.best.unwrap();
        assert_eq!(best.id, "3");
        assert!(best.is_best);
        let ids: Vec<_> = result.timeline.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "5", "6"]);
        assert!(result.timeline.iter().all(|p| !p.is_best));
    }

    #[test]
    fn test_best_already_in_auto_refresh() {
        let html = format!(
            r#"<div id="ar">{p}</div><div id="bt">{p}</div><div id="sr"></div>"#,
            p = post_html(Some("1"), "@a", "x", "Now"),
        );
        let result = parse_search_html(&html, BASE, NOW);
        assert!(result.best.is_none());
        assert_eq!(result.timeline.len(), 1);
    }

    #[test]
    fn test_empty_page() {
        let result = parse_search_html("<html><body>nothing</body></html>", BASE, NOW);
        assert_eq!(result, FetchTweetsResult::default());
    }
}
