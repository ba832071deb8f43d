//! Reference rewriting for proxied stylesheets.
//!
//! Two passes over the text: `url(...)` tokens first, then `@import` rules
//! written with a bare string. `@import url(...)` belongs to the first pass,
//! so the second one never sees its own output or the first pass's.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::resolve::{starts_with_ignore_case, RewriteContext};

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)url\(([^)]+)\)").expect("url() regex should compile"));

/// Group 1 marks the `url(` form; groups 2-4 hold a double-quoted,
/// single-quoted or unquoted reference.
static IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:(url\()|"([^"]*)"|'([^']*)'|([^\s;"'()]+))"#)
        .expect("@import regex should compile")
});

pub fn rewrite_css(css: &str, ctx: &RewriteContext<'_>) -> String {
    let with_urls = rewrite_url_tokens(css, ctx);
    rewrite_imports(&with_urls, ctx)
}

/// Rewrite `url(...)` tokens, keeping the original quote style.
pub fn rewrite_url_tokens(css: &str, ctx: &RewriteContext<'_>) -> String {
    URL_REGEX
        .replace_all(css, |caps: &Captures| {
            let token = caps[1].trim();
            let reference = token.trim_matches(['"', '\'']);
            if is_skipped(reference) {
                return caps[0].to_string();
            }
            let resolved = ctx.resolve(reference);
            match quote_of(token) {
                Some(quote) => format!("url({quote}{resolved}{quote})"),
                None => format!("url({resolved})"),
            }
        })
        .into_owned()
}

/// Rewrite `@import "..."` rules into `@import url(...)`.
pub fn rewrite_imports(css: &str, ctx: &RewriteContext<'_>) -> String {
    IMPORT_REGEX
        .replace_all(css, |caps: &Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            let reference = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().trim())
                .unwrap_or_default();
            if is_skipped(reference) {
                return caps[0].to_string();
            }
            format!("@import url({})", ctx.resolve(reference))
        })
        .into_owned()
}

fn is_skipped(reference: &str) -> bool {
    reference.is_empty()
        || starts_with_ignore_case(reference, "data:")
        || starts_with_ignore_case(reference, "javascript:")
}

/// The quote wrapping `token`, when it opens and closes with the same one.
fn quote_of(token: &str) -> Option<char> {
    let first = token.chars().next()?;
    let quoted = matches!(first, '"' | '\'') && token.len() >= 2 && token.ends_with(first);
    quoted.then_some(first)
}
