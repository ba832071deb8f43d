//! Outbound fetch of proxy targets.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderName, CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use url::Url;

/// Content type assumed when the upstream does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The target is not an absolute `http`/`https` URL.
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(#[source] reqwest::Error),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(err)
        } else {
            Self::UpstreamUnreachable(err)
        }
    }
}

/// One outbound call, as received from the browser.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target: String,
    pub method: Method,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
}

impl ProxyRequest {
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: Method::GET,
            body: None,
            content_type: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The validated target, used as base URL for rewriting.
    pub url: Url,
    /// The target as requested, trimmed but otherwise unnormalized.
    pub target: String,
    pub status: StatusCode,
    pub content_type: String,
    /// `Location` of a redirect response; redirects are never followed.
    pub location: Option<String>,
    pub body: Bytes,
}

/// How a response body is treated, decided once from its content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Other,
}

impl ContentKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let lowered = content_type.to_ascii_lowercase();
        if lowered.contains("text/html") {
            Self::Html
        } else if lowered.contains("text/css") {
            Self::Css
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Other => "other",
        }
    }
}

/// The `charset` parameter of a content type, if any.
pub fn charset_of(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']))
            .filter(|value| !value.is_empty())
    })
}

/// Decode `body` with the charset declared in `content_type`.
///
/// Missing or unknown charsets fall back to UTF-8. Malformed sequences are
/// replaced with U+FFFD instead of failing.
pub fn decode_text(body: &[u8], content_type: &str) -> String {
    let encoding = charset_of(content_type)
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, actual, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::debug!(encoding = actual.name(), "replaced undecodable bytes");
    }
    text.into_owned()
}

/// Parse `target` and check it is something the proxy may fetch.
pub fn validate_target(target: &str) -> Result<Url, FetchError> {
    let url = Url::parse(target.trim())
        .map_err(|err| FetchError::InvalidScheme(format!("{target}: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidScheme(other.to_string())),
    }
}

/// Issues exactly one upstream request per call, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }

    pub async fn fetch(&self, request: ProxyRequest) -> Result<FetchResult, FetchError> {
        let url = validate_target(&request.target)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .header(USER_AGENT, &self.user_agent);

        if request.method != Method::GET {
            if let Some(content_type) = &request.content_type {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
        }

        let response = builder.send().await?;
        let status = response.status();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let location = header(LOCATION);

        let body = response.bytes().await?;

        tracing::debug!(
            url = %url,
            method = %request.method,
            status = status.as_u16(),
            content_type = %content_type,
            bytes = body.len(),
            "upstream responded"
        );

        Ok(FetchResult {
            url,
            target: request.target.trim().to_string(),
            status,
            content_type,
            location,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_dispatch() {
        assert_eq!(ContentKind::from_content_type("text/html"), ContentKind::Html);
        assert_eq!(
            ContentKind::from_content_type("Text/HTML; charset=ISO-8859-1"),
            ContentKind::Html
        );
        assert_eq!(ContentKind::from_content_type("text/css;charset=utf-8"), ContentKind::Css);
        assert_eq!(ContentKind::from_content_type("image/png"), ContentKind::Other);
        assert_eq!(ContentKind::from_content_type("application/javascript"), ContentKind::Other);
        assert_eq!(ContentKind::from_content_type(""), ContentKind::Other);
    }

    #[test]
    fn charset_parameter_parsing() {
        assert_eq!(charset_of("text/html; charset=utf-8"), Some("utf-8"));
        assert_eq!(charset_of("text/html;Charset=\"Shift_JIS\""), Some("Shift_JIS"));
        assert_eq!(charset_of("text/css; media=x; charset=koi8-r"), Some("koi8-r"));
        assert_eq!(charset_of("text/html"), None);
        assert_eq!(charset_of("text/html; charset="), None);
    }

    #[test]
    fn decode_uses_declared_charset() {
        assert_eq!(decode_text(b"caf\xe9", "text/html; charset=iso-8859-1"), "caf\u{e9}");
        assert_eq!(decode_text("caf\u{e9}".as_bytes(), "text/html"), "caf\u{e9}");
    }

    #[test]
    fn decode_replaces_invalid_bytes() {
        assert_eq!(decode_text(b"a\xffb", "text/css; charset=utf-8"), "a\u{fffd}b");
    }

    #[test]
    fn decode_unknown_charset_falls_back_to_utf8() {
        assert_eq!(decode_text("\u{2713}".as_bytes(), "text/html; charset=x-bogus"), "\u{2713}");
    }

    #[test]
    fn validate_accepts_http_and_https() {
        assert_eq!(validate_target("http://a.example/x").unwrap().as_str(), "http://a.example/x");
        assert_eq!(validate_target(" HTTPS://a.example ").unwrap().as_str(), "https://a.example/");
    }

    #[test]
    fn validate_rejects_other_schemes_and_garbage() {
        for target in ["ftp://a.example/x", "file:///etc/passwd", "javascript:alert(1)", "not a url", ""] {
            assert!(
                matches!(validate_target(target), Err(FetchError::InvalidScheme(_))),
                "{target}"
            );
        }
    }

    #[tokio::test]
    async fn invalid_scheme_fails_before_network() {
        let fetcher = Fetcher::new(Duration::from_secs(1), "test-agent").unwrap();
        let err = fetcher.fetch(ProxyRequest::get("ftp://127.0.0.1:9/file")).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidScheme(ref scheme) if scheme == "ftp"));
    }
}
