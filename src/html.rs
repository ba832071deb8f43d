//! Reference rewriting for proxied HTML documents.
//!
//! Works on the raw text with regular expressions rather than a DOM: only
//! quoted `src=`, `href=` and `action=` values are touched, and everything
//! else in the document is copied through unchanged.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::resolve::RewriteContext;

/// `src`/`href`/`action` followed by a single- or double-quoted value on one line.
static ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(src|href|action)=(?:"([^"\n]*)"|'([^'\n]*)')"#)
        .expect("attribute regex should compile")
});

/// Opening `<head>` tag, with or without attributes. Does not match `<header>`.
static HEAD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("head regex should compile"));

static BASE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<base").expect("base regex should compile"));

/// Rewrite every matched attribute and make sure the page carries a `<base>`
/// pointing at the original target.
pub fn rewrite_html(html: &str, ctx: &RewriteContext<'_>) -> String {
    let rewritten = rewrite_attributes(html, ctx);
    inject_base(rewritten, ctx.target)
}

/// Rewrite the quoted values of `src`, `href` and `action` attributes.
pub fn rewrite_attributes(html: &str, ctx: &RewriteContext<'_>) -> String {
    ATTR_REGEX
        .replace_all(html, |caps: &Captures| {
            let attr = &caps[1];
            let (quote, value) = match (caps.get(2), caps.get(3)) {
                (Some(value), _) => ('"', value.as_str()),
                (None, Some(value)) => ('\'', value.as_str()),
                (None, None) => return caps[0].to_string(),
            };
            format!("{attr}={quote}{}{quote}", ctx.resolve(value))
        })
        .into_owned()
}

/// `<base href="...">` for `target`, attribute-escaped.
pub fn base_tag(target: &str) -> String {
    format!(
        r#"<base href="{}">"#,
        html_escape::encode_double_quoted_attribute(target)
    )
}

/// Insert a `<base>` tag right after the opening `<head>` tag, or at the very
/// start of the document when there is none or it is never closed. Documents that already declare a
/// `<base>` are returned as they are.
pub fn inject_base(html: String, target: &str) -> String {
    if BASE_REGEX.is_match(&html) {
        return html;
    }

    let tag = base_tag(target);
    match HEAD_REGEX.find(&html) {
        Some(head) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..head.end()]);
            out.push_str(&tag);
            out.push_str(&html[head.end()..]);
            out
        }
        None => format!("{tag}{html}"),
    }
}
