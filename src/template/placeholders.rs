use std::collections::BTreeSet;

use super::types::Template;
use crate::config::Delimiters;

/// Names of all placeholders referenced in `text`, sorted and deduplicated.
///
/// A placeholder is the shortest non-empty span between an opening and a
/// closing delimiter.
pub fn extract_placeholders(text: &str, delimiters: &Delimiters) -> Vec<String> {
    let mut names = BTreeSet::new();
    collect(text, delimiters, &mut names);
    names.into_iter().collect()
}

/// Placeholders in the subject or body that name no header.
///
/// These are left verbatim in the output, so they usually point at a typo.
pub fn unknown_placeholders(template: &Template, headers: &[String]) -> Vec<String> {
    let delimiters = &template.config.delimiters;
    let mut names = BTreeSet::new();
    collect(&template.subject, delimiters, &mut names);
    collect(&template.body, delimiters, &mut names);
    names
        .into_iter()
        .filter(|name| !headers.iter().any(|h| h == name))
        .collect()
}

fn collect(text: &str, delimiters: &Delimiters, names: &mut BTreeSet<String>) {
    if delimiters.open.is_empty() || delimiters.close.is_empty() {
        return;
    }
    let mut start = 0;
    while let Some(pos) = text[start..].find(&delimiters.open) {
        let name_start = start + pos + delimiters.open.len();
        let Some(len) = text[name_start..].find(&delimiters.close) else {
            break;
        };
        let name = &text[name_start..name_start + len];
        // `[[a [[b]]` refers to `b`, not `a [[b`.
        if let Some(inner) = name.rfind(&delimiters.open) {
            start = name_start + inner;
            continue;
        }
        if !name.is_empty() {
            names.insert(name.to_string());
        }
        start = name_start + len + delimiters.close.len();
    }
}
