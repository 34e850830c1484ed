use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::post::{Post, Tab};

/// One block rule, matched either literally or as a case-insensitive regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NgItem {
    pub id: String,
    pub text: String,
    pub is_reg_exp: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NgSettings {
    #[serde(default)]
    pub comments: Vec<NgItem>,
    #[serde(default)]
    pub user_ids: Vec<NgItem>,
}

impl NgSettings {
    /// Blocks an author handle. Returns `false` if the same text is already blocked.
    pub fn add_user(&mut self, handle: &str) -> bool {
        add_rule(&mut self.user_ids, handle, false)
    }

    /// Blocks every author whose handle matches `pattern`.
    pub fn add_user_pattern(&mut self, pattern: &str) -> bool {
        add_rule(&mut self.user_ids, pattern, true)
    }

    /// Blocks posts containing `text`, or matching it when `is_reg_exp`.
    pub fn add_word(&mut self, text: &str, is_reg_exp: bool) -> bool {
        add_rule(&mut self.comments, text, is_reg_exp)
    }

    /// Removes the rule with `id` from either list.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.comments.len() + self.user_ids.len();
        self.comments.retain(|rule| rule.id != id);
        self.user_ids.retain(|rule| rule.id != id);
        before != self.comments.len() + self.user_ids.len()
    }
}

fn add_rule(rules: &mut Vec<NgItem>, text: &str, is_reg_exp: bool) -> bool {
    if text.trim().is_empty() || rules.iter().any(|rule| rule.text == text) {
        return false;
    }
    rules.push(NgItem {
        id: Uuid::new_v4().to_string(),
        text: text.to_owned(),
        is_reg_exp,
    });
    true
}

/// Posts visible on `tab` that no block rule matches, in their original order.
pub fn filter_posts<'a>(posts: &'a [Post], tab: Tab, ng: &NgSettings) -> Vec<&'a Post> {
    posts
        .iter()
        .filter(|post| matches_tab(post, tab))
        .filter(|post| !ng.user_ids.iter().any(|rule| blocks_user(rule, &post.handle)))
        .filter(|post| !ng.comments.iter().any(|rule| blocks_text(rule, &post.text)))
        .collect()
}

fn matches_tab(post: &Post, tab: Tab) -> bool {
    match tab {
        Tab::All => true,
        Tab::Media => post.media_url.is_some(),
        Tab::Text => post.media_url.is_none(),
    }
}

fn blocks_user(rule: &NgItem, handle: &str) -> bool {
    let target = rule.text.trim();
    if target.is_empty() {
        return false;
    }
    if rule.is_reg_exp {
        regex_matches(target, handle)
    } else {
        handle.trim_start_matches('@') == target.trim_start_matches('@')
    }
}

fn blocks_text(rule: &NgItem, text: &str) -> bool {
    if rule.text.is_empty() {
        return false;
    }
    if rule.is_reg_exp {
        regex_matches(&rule.text, text)
    } else {
        text.contains(&rule.text)
    }
}

/// An invalid pattern never matches.
fn regex_matches(pattern: &str, haystack: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(haystack),
        Err(e) => {
            debug!(pattern, error = %e, "ignoring invalid NG pattern");
            false
        }
    }
}
