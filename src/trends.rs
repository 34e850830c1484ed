use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::post::{TrendItem, TrendResult, TrendState};

const UP_FILLS: &[&str] = &["e24949", "e60013"];
const DOWN_FILLS: &[&str] = &["006621"];

static SVG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("svg").unwrap());

/// Parses the trends page. The mobile layout is tried first and the desktop
/// layout only when the mobile one yields nothing.
pub fn parse_trends_html(html: &str) -> TrendResult {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut items = parse_mobile_trends(&root);
    if items.is_empty() {
        items = parse_desktop_trends(&root);
    }
    items.sort_by_key(|item| item.rank);

    TrendResult {
        update_time: parse_update_time(&root),
        items,
    }
}

fn parse_mobile_trends(root: &ElementRef) -> Vec<TrendItem> {
    static ITEM_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="TrendItem_BuzzWord"]"#).unwrap());
    static RANK_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="TrendItem_rank"]"#).unwrap());
    static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
    static DESCRIPTION_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="TrendItem_description"]"#).unwrap());
    static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
    static NEW_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="TrendItem_new"]"#).unwrap());
    static HOT_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="TrendItem_hot"]"#).unwrap());

    root.select(&ITEM_SELECTOR)
        .filter_map(|item| {
            let keyword = first_text(&item, &TITLE_SELECTOR).filter(|k| !k.is_empty())?;

            // The rank element also holds the arrow; only its first node is the number.
            let rank = item
                .select(&RANK_SELECTOR)
                .next()
                .map(|rank| first_node_text(&rank))
                .map(|text| parse_rank(&text))
                .unwrap_or(0);

            let description = first_text(&item, &DESCRIPTION_SELECTOR).filter(|d| !d.is_empty());
            let image_url = item
                .select(&IMG_SELECTOR)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(str::to_owned);

            let state = if item.select(&NEW_SELECTOR).next().is_some() {
                TrendState::New
            } else {
                let hot = item.select(&HOT_SELECTOR).next().is_some();
                match arrow_state(&item) {
                    Some(state) => state,
                    None if hot => TrendState::Up,
                    None => TrendState::Keep,
                }
            };

            Some(TrendItem {
                rank,
                keyword,
                state,
                image_url,
                description,
            })
        })
        .collect()
}

fn parse_desktop_trends(root: &ElementRef) -> Vec<TrendItem> {
    static CONTAINER_SELECTOR: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[class*="Trend_container"]"#).unwrap());
    static ITEM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("li").unwrap());
    static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
    static RANK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());
    static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("article h1").unwrap());

    let Some(container) = root.select(&CONTAINER_SELECTOR).next() else {
        return vec![];
    };

    container
        .select(&ITEM_SELECTOR)
        .filter_map(|item| {
            let anchor = item.select(&ANCHOR_SELECTOR).next()?;
            let rank = first_text(&anchor, &RANK_SELECTOR)?;
            let keyword = first_text(&anchor, &TITLE_SELECTOR).filter(|k| !k.is_empty())?;

            Some(TrendItem {
                rank: parse_rank(&rank),
                keyword,
                state: arrow_state(&anchor).unwrap_or(TrendState::Keep),
                image_url: None,
                description: None,
            })
        })
        .collect()
}

/// Direction from the fill colour of the first trend arrow, if recognised.
fn arrow_state(element: &ElementRef) -> Option<TrendState> {
    let fill = element
        .select(&SVG_SELECTOR)
        .next()?
        .value()
        .attr("fill")
        .unwrap_or_default()
        .to_ascii_lowercase();

    if DOWN_FILLS.iter().any(|c| fill.contains(c)) {
        Some(TrendState::Down)
    } else if UP_FILLS.iter().any(|c| fill.contains(c)) {
        Some(TrendState::Up)
    } else {
        None
    }
}

fn parse_update_time(root: &ElementRef) -> String {
    static UPDATED_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?P<time>\d{1,2}:\d{2})\s*(?P<marker>更新|[Uu]pdated)").unwrap()
    });

    let text: String = root.text().collect();
    match UPDATED_RE.captures(&text) {
        Some(caps) if &caps["marker"] == "更新" => format!("{}更新", &caps["time"]),
        Some(caps) => format!("{} {}", &caps["time"], &caps["marker"]),
        None => String::new(),
    }
}

/// Leading integer of a label, 0 when there is none.
fn parse_rank(text: &str) -> u32 {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

fn first_text(element: &ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_owned())
}

fn first_node_text(element: &ElementRef) -> String {
    let Some(node) = element.children().next() else {
        return String::new();
    };
    match node.value() {
        Node::Text(text) => text.trim().to_owned(),
        Node::Element(_) => ElementRef::wrap(node)
            .map(|e| e.text().collect::<String>().trim().to_owned())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
