//! Block and verification-challenge detection.
//!
//! Classifies each response before parsing. 429 and 403 are authoritative
//! rate-limit signals regardless of how plausible the body looks. Challenge
//! detection matches the structural chrome of interstitial pages, never the
//! mere presence of a verification vendor's script tag: a page that renders
//! real listing content next to a captcha script reference is Ok.

use scraper::{Html, Selector};
use tracing::debug;

use crate::http::FetchedResponse;

/// Classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Normal response; safe to parse.
    Ok,
    /// Rate limited (429/403); route through the scheduler's backoff.
    RateLimited,
    /// 5xx; candidate for one bounded local retry.
    ServerError,
    /// Connection-level failure or timeout (synthetic status 0).
    NetworkError,
    /// Interactive human-verification interstitial. Terminal for the target:
    /// backoff cannot resolve it.
    ChallengeDetected,
}

/// A classified response with the state the session layer needs from it.
#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub status_class: StatusClass,
    pub status: u16,
    pub body: String,
    /// Cookies newly issued by this response, as (name, value) pairs.
    pub cookies: Vec<(String, String)>,
}

impl ResponseOutcome {
    /// Classify a fetched response, carrying its payload and any newly
    /// observed cookies forward for the session layer.
    pub fn from_response(response: FetchedResponse) -> Self {
        let status_class = classify(response.status, &response.body);
        Self {
            status_class,
            status: response.status,
            body: response.body,
            cookies: response.cookies,
        }
    }
}

/// Container selectors that only appear on challenge interstitials.
const CHALLENGE_SELECTORS: &[&str] = &[
    "#challenge-form",
    "#challenge-running",
    "#challenge-stage",
    "#cf-challenge-running",
    "div.cf-browser-verification",
    "#px-captcha",
    "#distil_ident_block",
];

/// Copy that appears in the visible text of challenge interstitials.
const CHALLENGE_PHRASES: &[&str] = &[
    "verify you are human",
    "verifying you are human",
    "checking your browser before accessing",
    "enable javascript and cookies to continue",
    "please complete the security check",
];

/// Classify a response by status code and body. A synthetic status of 0
/// means the request never completed (timeout, connection reset). Only
/// successful responses are scanned for challenge chrome; an error page that
/// happens to mention verification is not an interstitial.
pub fn classify(status: u16, body: &str) -> StatusClass {
    match status {
        0 => StatusClass::NetworkError,
        429 | 403 => StatusClass::RateLimited,
        s if s >= 500 => StatusClass::ServerError,
        s if (200..300).contains(&s) && is_challenge_page(body) => {
            StatusClass::ChallengeDetected
        }
        _ => StatusClass::Ok,
    }
}

/// Detect challenge-page chrome in a response body.
///
/// Matches structural containers and visible interstitial copy only. Script
/// tags referencing verification vendors are common on fully rendered pages
/// and never count.
pub fn is_challenge_page(body: &str) -> bool {
    let document = Html::parse_document(body);

    for raw in CHALLENGE_SELECTORS {
        let selector = Selector::parse(raw).expect("static selector");
        if document.select(&selector).next().is_some() {
            debug!("challenge marker matched: {}", raw);
            return true;
        }
    }

    let text = visible_text(&document).to_lowercase();
    for phrase in CHALLENGE_PHRASES {
        if text.contains(phrase) {
            debug!("challenge copy matched: {:?}", phrase);
            return true;
        }
    }

    false
}

/// Visible text of a document, excluding script and style contents.
fn visible_text(document: &Html) -> String {
    let body = Selector::parse("body").expect("static selector");
    let skip_parents = ["script", "style", "noscript"];

    let mut out = String::new();
    for root in document.select(&body) {
        for node in root.descendants() {
            if let Some(text) = node.value().as_text() {
                let in_skipped = node
                    .parent()
                    .and_then(|p| p.value().as_element())
                    .map(|e| skip_parents.contains(&e.name()))
                    .unwrap_or(false);
                if !in_skipped {
                    out.push_str(text);
                    out.push(' ');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_codes_are_authoritative() {
        let plausible = "<html><body><table><tr><td>Jane Smith</td></tr></table></body></html>";
        assert_eq!(classify(429, plausible), StatusClass::RateLimited);
        assert_eq!(classify(403, plausible), StatusClass::RateLimited);
    }

    #[test]
    fn test_server_and_network_errors() {
        assert_eq!(classify(500, ""), StatusClass::ServerError);
        assert_eq!(classify(503, ""), StatusClass::ServerError);
        assert_eq!(classify(0, ""), StatusClass::NetworkError);
    }

    #[test]
    fn test_normal_page_is_ok() {
        let body = r#"
            <html><body>
              <table id="results">
                <tr><td>Jane Smith</td><td>Attorney</td></tr>
                <tr><td>Bob Lee</td><td>Attorney</td></tr>
              </table>
            </body></html>
        "#;
        assert_eq!(classify(200, body), StatusClass::Ok);
    }

    #[test]
    fn test_challenge_container_detected() {
        let body = r#"
            <html><body>
              <form id="challenge-form" action="/cdn-cgi/l/chk_jschl">
                <input type="hidden" name="jschl_vc" value="x" />
              </form>
            </body></html>
        "#;
        assert_eq!(classify(200, body), StatusClass::ChallengeDetected);
    }

    #[test]
    fn test_challenge_copy_detected() {
        let body = r#"
            <html><body>
              <h1>One more step</h1>
              <p>Please complete the security check to access the directory.</p>
            </body></html>
        "#;
        assert_eq!(classify(200, body), StatusClass::ChallengeDetected);
    }

    #[test]
    fn test_vendor_script_on_rendered_page_is_ok() {
        // Real listing content alongside a third-party verification script
        // reference must not classify as a challenge.
        let body = r#"
            <html>
              <head>
                <script src="https://www.google.com/recaptcha/api.js"></script>
              </head>
              <body>
                <table id="results">
                  <tr><td>Jane Smith</td><td>St. Paul</td></tr>
                  <tr><td>Bob Lee</td><td>Duluth</td></tr>
                </table>
                <script>var challengeHelper = "verify you are human";</script>
              </body>
            </html>
        "#;
        assert_eq!(classify(200, body), StatusClass::Ok);
    }

    #[test]
    fn test_challenge_copy_on_error_status_is_not_terminal() {
        // A 404 error page quoting verification copy is just a missing page,
        // not an interstitial worth abandoning the target over.
        let body = r#"
            <html><body>
              <h1>Not found</h1>
              <p>If you were asked to please complete the security check,
                 start over from the search page.</p>
            </body></html>
        "#;
        assert_eq!(classify(404, body), StatusClass::Ok);
    }

    #[test]
    fn test_challenge_page_with_no_records() {
        let body = r#"
            <html><body>
              <div class="cf-browser-verification">
                <noscript>Please turn JavaScript on.</noscript>
              </div>
            </body></html>
        "#;
        assert_eq!(classify(200, body), StatusClass::ChallengeDetected);
    }
}
