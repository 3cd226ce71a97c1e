//! Rewrites `$<role><suffix>` placeholders in a raw benchmark document.
//!
//! Every token carrying a category suffix is replaced in a single pass, so a
//! replacement value is never rescanned and the order of categories does not
//! matter. Tokens for unresolved roles become the empty string and are
//! reported back, so the checks whose probes used them can be flagged.

use crate::facts::{Category, FactSet};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z0-9_-]+)\b").expect("placeholder pattern is valid"))
}

/// Splits a marker body into role and category, trying the longest suffixes
/// first so `kubeletkubeconfig` is never read as a `conf` marker.
fn split_marker(body: &str) -> Option<(&str, Category)> {
    let mut by_length = Category::ALL;
    by_length.sort_by_key(|c| std::cmp::Reverse(c.suffix().len()));
    by_length.into_iter().find_map(|category| {
        body.strip_suffix(category.suffix())
            .filter(|role| !role.is_empty())
            .map(|role| (role, category))
    })
}

/// A rewritten document plus the markers that had no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    pub unresolved: BTreeSet<String>,
}

/// Every category marker in `text`, e.g. `$apiserverbin`, in order of appearance.
pub fn markers(text: &str) -> impl Iterator<Item = &str> {
    placeholder()
        .captures_iter(text)
        .filter(|caps| split_marker(&caps[1]).is_some())
        .filter_map(|caps| caps.get(0))
        .map(|m| m.as_str())
}

pub fn substitute(document: &str, facts: &FactSet) -> Substitution {
    let mut unresolved = BTreeSet::new();
    let text = placeholder()
        .replace_all(document, |caps: &Captures| {
            let Some((role, category)) = split_marker(&caps[1]) else {
                return caps[0].to_string();
            };
            match facts.get(category, role) {
                Some(value) => value.to_string(),
                None => {
                    debug!(marker = &caps[0], "unresolved placeholder; substituting empty string");
                    unresolved.insert(caps[0].to_string());
                    String::new()
                }
            }
        })
        .into_owned();
    Substitution { text, unresolved }
}
