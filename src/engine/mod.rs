//! Core scraping engine: politeness, session continuity, pagination,
//! block/challenge detection, and the record stream tying them together.

pub mod cache;
pub mod detector;
pub mod pagination;
pub mod scheduler;
pub mod session;
pub mod traversal;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use cache::DomainCache;
pub use detector::{ResponseOutcome, StatusClass};
pub use pagination::{PageDescriptor, PageReport, PaginationController};
pub use scheduler::Scheduler;
pub use session::{Method, ProtocolFamily, RequestSpec, SessionState};

/// Buffered stream items; at most one page's worth of records is ever
/// waiting, so this mainly absorbs signal interleaving.
pub const STREAM_BUFFER: usize = 100;

/// One normalized directory record, opaque to the engine beyond being
/// forwarded downstream.
#[derive(Debug, Clone)]
pub struct ScrapeRecord {
    /// URL the record was parsed from.
    pub url: String,
    /// Display name of the listed professional or firm.
    pub name: String,
    /// Adapter-specific fields (registration number, practice areas, ...).
    pub metadata: serde_json::Value,
    /// When the record was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl ScrapeRecord {
    pub fn new(url: &str, name: &str, metadata: serde_json::Value) -> Self {
        Self {
            url: url.to_string(),
            name: name.to_string(),
            metadata,
            fetched_at: Utc::now(),
        }
    }
}

/// Out-of-band control signals carried on the record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Emitted once per sub-target boundary (e.g. once per city).
    Progress { current: usize, total: usize },
    /// Emitted exactly once when a target is abandoned behind an
    /// unresolvable verification challenge.
    Challenge { target: String, reason: String },
}

/// A stream element: either a record or a control signal.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Record(ScrapeRecord),
    Signal(ControlSignal),
}

/// Lazy, forward-only sequence of records interleaved with control signals.
pub struct ScrapeStream {
    pub receiver: mpsc::Receiver<StreamItem>,
}

impl ScrapeStream {
    /// Receive the next item, or None when every traversal has finished.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }
}

/// What an adapter parsed out of one page.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Records in parse order.
    pub records: Vec<ScrapeRecord>,
    /// Server-declared total result count, if the page exposes one.
    pub total: Option<u64>,
    /// Server-issued postback continuation for the next page, if any.
    pub continuation: Option<(String, String)>,
    /// The server reported a capped result set ("too many results"); the
    /// traversal is marked truncated but otherwise proceeds as complete.
    pub capped: bool,
}

/// Per-site capability interface, composed with the engine by injection.
///
/// An adapter knows how to build a request for a pagination cursor and how
/// to turn a page of markup into records; the engine owns everything else
/// (delays, backoff, continuity threading, termination).
pub trait SiteAdapter: Send + Sync {
    /// Label for this logical target (e.g. `"state-bar/duluth"`), used in
    /// signals and logs.
    fn target(&self) -> &str;

    /// How the site threads continuity state between requests.
    fn family(&self) -> ProtocolFamily;

    /// Records per full page for this site.
    fn nominal_page_size(&self) -> usize;

    /// Cursor for the first page.
    fn first_descriptor(&self) -> PageDescriptor;

    /// Build the request for a cursor from the current session state.
    fn build_request(&self, session: &SessionState, descriptor: &PageDescriptor) -> RequestSpec;

    /// Parse one page of markup into records and pagination facts.
    fn parse_page(&self, body: &str) -> ParsedPage;
}
