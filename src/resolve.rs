//! URL classification and absolutization for proxied documents.
//!
//! Every reference found in a fetched page goes through [`Resolver::resolve`],
//! which decides between three outcomes:
//!
//! - leave it alone (anchors, `javascript:`, `data:`, already-proxied URLs,
//!   schemes the proxy cannot fetch),
//! - pass it through as an absolute `https://` URL,
//! - wrap it into `<proxy-path>?target=<encoded absolute URL>` so the browser
//!   loads the plain-HTTP resource through this server.

use url::Url;

/// Default route the proxy is mounted on.
pub const DEFAULT_PROXY_PATH: &str = "/proxy";

/// Builds and recognizes self-referencing proxy URLs.
#[derive(Debug, Clone)]
pub struct Resolver {
    proxy_path: String,
    /// `<proxy_path>?target=`, the prefix every wrapped URL starts with.
    wrapped_prefix: String,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_PATH)
    }
}

impl Resolver {
    pub fn new(proxy_path: impl Into<String>) -> Self {
        let proxy_path = proxy_path.into();
        let wrapped_prefix = format!("{proxy_path}?target=");
        Self {
            proxy_path,
            wrapped_prefix,
        }
    }

    pub fn proxy_path(&self) -> &str {
        &self.proxy_path
    }

    /// Wrap an absolute URL into a proxy URL.
    pub fn wrap(&self, absolute: &str) -> String {
        format!("{}{}", self.wrapped_prefix, urlencoding::encode(absolute))
    }

    /// Recover the absolute target carried by a wrapped URL.
    ///
    /// Returns `None` when `reference` is not a proxy URL produced by
    /// [`Resolver::wrap`] or its parameter is not valid percent-encoded UTF-8.
    pub fn unwrap_target(&self, reference: &str) -> Option<String> {
        let encoded = reference.trim().strip_prefix(&self.wrapped_prefix)?;
        let encoded = encoded.split('&').next().unwrap_or_default();
        urlencoding::decode(encoded).ok().map(|target| target.into_owned())
    }

    pub fn is_wrapped(&self, reference: &str) -> bool {
        reference.starts_with(&self.wrapped_prefix)
    }

    /// Rewrite a single reference found in a document fetched from `base`.
    ///
    /// References that are left alone come back byte-for-byte, surrounding
    /// whitespace included. Absolute results are trimmed.
    pub fn resolve(&self, reference: &str, base: &Url) -> String {
        let trimmed = reference.trim();
        if trimmed.is_empty() || is_inert(trimmed) || self.is_wrapped(trimmed) {
            return reference.to_string();
        }

        let Some(absolute) = absolutize(trimmed, base) else {
            tracing::debug!(reference = %trimmed, base = %base, "reference could not be resolved");
            return reference.to_string();
        };

        match Scheme::of(&absolute) {
            Scheme::Https => absolute,
            Scheme::Http => self.wrap(&absolute),
            Scheme::Other => reference.to_string(),
        }
    }
}

/// Base URL plus the resolver, fixed for one rewrite pass.
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub base: &'a Url,
    pub resolver: &'a Resolver,
    /// Target as the caller spelled it; what `<base href>` carries.
    pub target: &'a str,
}

impl<'a> RewriteContext<'a> {
    pub fn new(base: &'a Url, resolver: &'a Resolver) -> Self {
        Self {
            base,
            resolver,
            target: base.as_str(),
        }
    }

    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = target;
        self
    }

    pub fn resolve(&self, reference: &str) -> String {
        self.resolver.resolve(reference, self.base)
    }
}

/// References that never name a fetchable resource.
fn is_inert(trimmed: &str) -> bool {
    trimmed.starts_with('#')
        || starts_with_ignore_case(trimmed, "javascript:")
        || starts_with_ignore_case(trimmed, "data:")
}

fn absolutize(trimmed: &str, base: &Url) -> Option<String> {
    if trimmed.starts_with("//") {
        return Some(format!("{}:{}", base.scheme(), trimmed));
    }
    if starts_with_ignore_case(trimmed, "http://") || starts_with_ignore_case(trimmed, "https://") {
        return Some(trimmed.to_string());
    }
    base.join(trimmed).ok().map(String::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    Https,
    Other,
}

impl Scheme {
    fn of(absolute: &str) -> Self {
        if starts_with_ignore_case(absolute, "https://") {
            Self::Https
        } else if starts_with_ignore_case(absolute, "http://") {
            Self::Http
        } else {
            Self::Other
        }
    }
}

pub(crate) fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
