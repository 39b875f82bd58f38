//! Session and continuity-token handling for multi-step workflows.
//!
//! Server-driven directories thread state through a request chain: hidden
//! form tokens on postback sites, header-declared verification tokens on
//! newer stacks, or nothing but cookies. Each adapter declares its protocol
//! family; the store extracts whatever continuity state the family defines,
//! merges it non-destructively into the session, and injects it into the
//! next outbound request.

use std::collections::{BTreeMap, HashMap};

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;

/// Hidden-form continuity fields used by legacy postback directories.
pub const POSTBACK_FIELDS: &[&str] = &[
    "__VIEWSTATE",
    "__VIEWSTATEGENERATOR",
    "__VIEWSTATEENCRYPTED",
    "__EVENTVALIDATION",
    "__EVENTTARGET",
    "__EVENTARGUMENT",
];

/// Token name used for meta-declared verification tokens.
pub const CSRF_META_TOKEN: &str = "csrf-token";
/// Hidden-input verification token used by newer form stacks.
pub const REQUEST_VERIFICATION_TOKEN: &str = "__RequestVerificationToken";

/// HTTP method for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An outbound request: URL, method, ordered body fields, headers.
/// Immutable once built; a fresh spec is built per request from the current
/// session state.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub method: Method,
    /// Body fields in insertion order. Keys are unique; re-inserting a key
    /// overwrites its value in place without reordering.
    body: Vec<(String, String)>,
    headers: HashMap<String, String>,
}

impl RequestSpec {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            url: url.to_string(),
            method,
            body: Vec::new(),
            headers: HashMap::new(),
        }
    }

    /// Insert a body field, preserving insertion order and key uniqueness.
    pub fn field(mut self, name: &str, value: &str) -> Self {
        set_field(&mut self.body, name, value);
        self
    }

    /// Set a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Body fields in insertion order.
    pub fn body_fields(&self) -> &[(String, String)] {
        &self.body
    }

    /// Headers to send with the request.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Form-encode the body fields.
    pub fn encoded_body(&self) -> String {
        self.body
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Effective URL: for GET requests the body fields ride the query string.
    pub fn effective_url(&self) -> String {
        if self.method == Method::Get && !self.body.is_empty() {
            let sep = if self.url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.url, sep, self.encoded_body())
        } else {
            self.url.clone()
        }
    }

    /// Host component of the request URL, if parseable.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(entry) = fields.iter_mut().find(|(k, _)| k == name) {
        entry.1 = value.to_string();
    } else {
        fields.push((name.to_string(), value.to_string()));
    }
}

/// How a directory threads continuity state between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolFamily {
    /// Legacy hidden-form postback tokens resubmitted with every request.
    FormPostback,
    /// Verification token declared in a meta tag or hidden input, echoed
    /// back as a header or form field.
    HeaderToken,
    /// No body-carried state; continuity rides the cookie jar alone.
    CookieOnly,
}

impl ProtocolFamily {
    /// Scan a response body for this family's continuity fields. Tolerates
    /// attribute-order variation and missing fields; returns whatever subset
    /// is present.
    pub fn extract(&self, body: &str) -> BTreeMap<String, String> {
        match self {
            ProtocolFamily::FormPostback => extract_hidden_fields(body, POSTBACK_FIELDS),
            ProtocolFamily::HeaderToken => extract_header_tokens(body),
            ProtocolFamily::CookieOnly => BTreeMap::new(),
        }
    }

    /// The token this family cannot start a workflow without, or None.
    pub fn required_token(&self) -> Option<&'static str> {
        match self {
            ProtocolFamily::FormPostback => Some("__VIEWSTATE"),
            ProtocolFamily::HeaderToken => Some(CSRF_META_TOKEN),
            ProtocolFamily::CookieOnly => None,
        }
    }
}

fn extract_hidden_fields(body: &str, names: &[&str]) -> BTreeMap<String, String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("input[type=\"hidden\"]").expect("static selector");

    let mut tokens = BTreeMap::new();
    for input in document.select(&selector) {
        let Some(name) = input.value().attr("name") else {
            continue;
        };
        if names.contains(&name) {
            let value = input.value().attr("value").unwrap_or_default();
            tokens.insert(name.to_string(), value.to_string());
        }
    }
    tokens
}

fn extract_header_tokens(body: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(body);
    let mut tokens = BTreeMap::new();

    let meta = Selector::parse("meta[name=\"csrf-token\"]").expect("static selector");
    if let Some(tag) = document.select(&meta).next() {
        if let Some(content) = tag.value().attr("content") {
            tokens.insert(CSRF_META_TOKEN.to_string(), content.to_string());
        }
    }

    let input =
        Selector::parse("input[name=\"__RequestVerificationToken\"]").expect("static selector");
    if let Some(tag) = document.select(&input).next() {
        if let Some(value) = tag.value().attr("value") {
            tokens.insert(REQUEST_VERIFICATION_TOKEN.to_string(), value.to_string());
            // Either marker satisfies the family's continuity requirement.
            tokens
                .entry(CSRF_META_TOKEN.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    tokens
}

/// Continuity state owned by exactly one traversal: token map, host-scoped
/// cookie jar, and an optional cross-request correlation id.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    tokens: BTreeMap<String, String>,
    cookies: HashMap<String, BTreeMap<String, String>>,
    correlation_id: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current continuity tokens.
    pub fn tokens(&self) -> &BTreeMap<String, String> {
        &self.tokens
    }

    /// Set the cross-request correlation id.
    pub fn set_correlation_id(&mut self, id: &str) {
        self.correlation_id = Some(id.to_string());
    }

    /// Merge freshly extracted tokens into the session. Non-destructive: a
    /// key absent from `extracted` keeps its previously captured value, so a
    /// paginated response that only echoes the fields it changed never
    /// erases older state.
    pub fn merge(&mut self, extracted: BTreeMap<String, String>) {
        for (name, value) in extracted {
            self.tokens.insert(name, value);
        }
    }

    /// Append newly issued cookies to the jar for `host`. Existing cookies
    /// with other names survive; a re-issued name takes the new value.
    pub fn absorb_cookies(&mut self, host: &str, cookies: &[(String, String)]) {
        if cookies.is_empty() {
            return;
        }
        let jar = self.cookies.entry(host.to_lowercase()).or_default();
        for (name, value) in cookies {
            jar.insert(name.clone(), value.clone());
        }
        debug!("cookie jar for {} now holds {} cookies", host, jar.len());
    }

    /// Cookie header value for `host`, if any cookies are held for it.
    pub fn cookie_header(&self, host: &str) -> Option<String> {
        let jar = self.cookies.get(&host.to_lowercase())?;
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Build an outbound request from base fields plus the current session
    /// state: continuity tokens overwrite same-named base fields, the cookie
    /// jar and correlation id ride the headers.
    pub fn build_request(
        &self,
        method: Method,
        url: &str,
        base_fields: &[(String, String)],
    ) -> RequestSpec {
        let mut spec = RequestSpec::new(method, url);
        for (name, value) in base_fields {
            spec = spec.field(name, value);
        }
        for (name, value) in &self.tokens {
            spec = spec.field(name, value);
        }
        if let Some(host) = spec.host() {
            if let Some(cookie) = self.cookie_header(&host) {
                spec = spec.header("Cookie", &cookie);
            }
        }
        if let Some(ref id) = self.correlation_id {
            spec = spec.header("X-Correlation-Id", id);
        }
        spec
    }

    /// Verify the first response of a traversal produced the family's
    /// required continuity token. Later responses may echo only what they
    /// change, but an absent token at the start means the workflow cannot
    /// proceed at all.
    pub fn check_continuity(
        &self,
        family: ProtocolFamily,
        target: &str,
    ) -> Result<(), ScrapeError> {
        if let Some(token) = family.required_token() {
            if !self.tokens.contains_key(token) {
                return Err(ScrapeError::MissingContinuityState {
                    target: target.to_string(),
                    token: token.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_postback_tokens() {
        let body = r#"
            <form>
              <input type="hidden" name="__VIEWSTATE" value="dDwtMTQ4" />
              <input type="hidden" name="__EVENTVALIDATION" value="abc123" />
              <input type="text" name="SearchCity" value="" />
            </form>
        "#;
        let tokens = ProtocolFamily::FormPostback.extract(body);
        assert_eq!(tokens.get("__VIEWSTATE").unwrap(), "dDwtMTQ4");
        assert_eq!(tokens.get("__EVENTVALIDATION").unwrap(), "abc123");
        assert!(!tokens.contains_key("SearchCity"));
    }

    #[test]
    fn test_extract_tolerates_attribute_order() {
        // value before name, extra attributes in between.
        let body = r#"<input value="xyz" id="vs" type="hidden" name="__VIEWSTATE" />"#;
        let tokens = ProtocolFamily::FormPostback.extract(body);
        assert_eq!(tokens.get("__VIEWSTATE").unwrap(), "xyz");
    }

    #[test]
    fn test_extract_missing_fields_yields_empty_map() {
        let tokens = ProtocolFamily::FormPostback.extract("<html><body>hi</body></html>");
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_extract_header_token_from_meta() {
        let body = r#"<head><meta name="csrf-token" content="tok-9" /></head>"#;
        let tokens = ProtocolFamily::HeaderToken.extract(body);
        assert_eq!(tokens.get(CSRF_META_TOKEN).unwrap(), "tok-9");
    }

    #[test]
    fn test_extract_header_token_from_hidden_input() {
        let body = r#"<form><input name="__RequestVerificationToken" type="hidden" value="rv-1" /></form>"#;
        let tokens = ProtocolFamily::HeaderToken.extract(body);
        assert_eq!(tokens.get(REQUEST_VERIFICATION_TOKEN).unwrap(), "rv-1");
        assert_eq!(tokens.get(CSRF_META_TOKEN).unwrap(), "rv-1");
    }

    #[test]
    fn test_cookie_only_extracts_nothing() {
        let body = r#"<input type="hidden" name="__VIEWSTATE" value="x" />"#;
        assert!(ProtocolFamily::CookieOnly.extract(body).is_empty());
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let mut session = SessionState::new();
        session.merge(map(&[("__VIEWSTATE", "a"), ("__EVENTVALIDATION", "b")]));
        let before = session.tokens().clone();
        session.merge(BTreeMap::new());
        assert_eq!(session.tokens(), &before);
    }

    #[test]
    fn test_merge_changes_only_present_keys() {
        let mut session = SessionState::new();
        session.merge(map(&[("__VIEWSTATE", "a"), ("__EVENTVALIDATION", "b")]));
        // Paginated response echoes only the field it changed.
        session.merge(map(&[("__VIEWSTATE", "a2")]));
        assert_eq!(session.tokens().get("__VIEWSTATE").unwrap(), "a2");
        assert_eq!(session.tokens().get("__EVENTVALIDATION").unwrap(), "b");
    }

    #[test]
    fn test_build_request_injects_tokens_and_cookies() {
        let mut session = SessionState::new();
        session.merge(map(&[("__VIEWSTATE", "vs")]));
        session.absorb_cookies(
            "registry.example.com",
            &[("ASP.NET_SessionId".to_string(), "s1".to_string())],
        );

        let spec = session.build_request(
            Method::Post,
            "https://registry.example.com/search.aspx",
            &[("SearchCity".to_string(), "Duluth".to_string())],
        );

        assert_eq!(
            spec.body_fields(),
            &[
                ("SearchCity".to_string(), "Duluth".to_string()),
                ("__VIEWSTATE".to_string(), "vs".to_string()),
            ]
        );
        assert_eq!(
            spec.headers().get("Cookie").unwrap(),
            "ASP.NET_SessionId=s1"
        );
    }

    #[test]
    fn test_cookies_accumulate_per_host() {
        let mut session = SessionState::new();
        session.absorb_cookies("a.example.com", &[("one".to_string(), "1".to_string())]);
        session.absorb_cookies("a.example.com", &[("two".to_string(), "2".to_string())]);
        session.absorb_cookies("b.example.com", &[("other".to_string(), "x".to_string())]);

        assert_eq!(
            session.cookie_header("a.example.com").unwrap(),
            "one=1; two=2"
        );
        assert_eq!(session.cookie_header("b.example.com").unwrap(), "other=x");
        assert!(session.cookie_header("c.example.com").is_none());
    }

    #[test]
    fn test_body_fields_ordered_and_unique() {
        let spec = RequestSpec::new(Method::Post, "https://example.com")
            .field("a", "1")
            .field("b", "2")
            .field("a", "3");
        assert_eq!(
            spec.body_fields(),
            &[
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_get_body_rides_query_string() {
        let spec = RequestSpec::new(Method::Get, "https://example.com/roster")
            .field("city", "St Paul")
            .field("page", "2");
        assert_eq!(
            spec.effective_url(),
            "https://example.com/roster?city=St%20Paul&page=2"
        );
    }

    #[test]
    fn test_check_continuity_missing_viewstate() {
        let session = SessionState::new();
        let err = session
            .check_continuity(ProtocolFamily::FormPostback, "bar/duluth")
            .unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::MissingContinuityState { token, .. } if token == "__VIEWSTATE"
        ));
    }

    #[test]
    fn test_check_continuity_cookie_only_never_fails() {
        let session = SessionState::new();
        assert!(session
            .check_continuity(ProtocolFamily::CookieOnly, "roster/rochester")
            .is_ok());
    }
}
