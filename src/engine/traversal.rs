//! Per-target traversal driver.
//!
//! Runs the protocol loop for each logical target in turn: politeness delay,
//! request built from session state, classification, continuity extraction,
//! parse, pagination decision. Failures are target-scoped; one blocked or
//! challenged target never aborts the run.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::detector::{ResponseOutcome, StatusClass};
use crate::engine::pagination::{
    PageDecision, PageDescriptor, PageReport, PaginationController, StopReason,
};
use crate::engine::scheduler::{Scheduler, MAX_CONSECUTIVE_BLOCKS};
use crate::engine::session::SessionState;
use crate::engine::{ControlSignal, ScrapeStream, SiteAdapter, StreamItem, STREAM_BUFFER};
use crate::error::ScrapeError;
use crate::http::Fetcher;

/// Cancellation predicate, checked before each new page fetch and each new
/// target. Returning true stops the stream without an error; records already
/// parsed from the in-flight page are still delivered.
pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A predicate that never cancels.
pub fn never_cancelled() -> CancelFn {
    Arc::new(|| false)
}

/// How a single traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOutcome {
    /// Pagination terminated normally.
    Completed(StopReason),
    /// Abandoned behind a verification challenge.
    Challenged,
    /// First response lacked required continuity state.
    MissingContinuity,
    /// Blocking persisted past the cooldown ceiling.
    Blocked,
    /// Stopped by the cancellation predicate.
    Cancelled,
}

/// Summary of one target traversal, logged at completion.
#[derive(Debug, Clone)]
pub struct TraversalSummary {
    pub target: String,
    pub pages: u32,
    pub records: usize,
    /// Server capped the result set; the sweep is known-incomplete.
    pub truncated: bool,
    pub outcome: TraversalOutcome,
}

/// The scraping engine: configuration plus a fetcher, shared across targets.
pub struct Engine {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl Engine {
    /// Create an engine. Configuration is validated here, before any network
    /// activity.
    pub fn new(config: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ScrapeError> {
        config.validate()?;
        Ok(Self { config, fetcher })
    }

    /// Traverse `adapters` in order, yielding records and control signals as
    /// a lazy stream. Each target gets its own scheduler and session;
    /// targets are independent and failures do not propagate between them.
    pub fn stream(&self, adapters: Vec<Arc<dyn SiteAdapter>>, cancel: CancelFn) -> ScrapeStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let config = self.config.clone();
        let fetcher = self.fetcher.clone();

        tokio::spawn(async move {
            let total = adapters.len();
            for (index, adapter) in adapters.iter().enumerate() {
                if cancel() {
                    debug!("run cancelled before target {}", adapter.target());
                    break;
                }
                let progress = ControlSignal::Progress {
                    current: index + 1,
                    total,
                };
                if tx.send(StreamItem::Signal(progress)).await.is_err() {
                    return;
                }

                let summary =
                    run_target(&config, fetcher.as_ref(), adapter.as_ref(), &cancel, &tx).await;
                info!(
                    "target {} finished: {:?}, {} pages, {} records{}",
                    summary.target,
                    summary.outcome,
                    summary.pages,
                    summary.records,
                    if summary.truncated {
                        " (server-capped, incomplete)"
                    } else {
                        ""
                    }
                );
            }
        });

        ScrapeStream { receiver: rx }
    }
}

/// Result of fetching one page, after backoff and local retries.
enum PageFetch {
    Ok(String),
    Challenge,
    Blocked,
}

/// Drive one target to completion.
async fn run_target(
    config: &EngineConfig,
    fetcher: &dyn Fetcher,
    adapter: &dyn SiteAdapter,
    cancel: &CancelFn,
    tx: &mpsc::Sender<StreamItem>,
) -> TraversalSummary {
    let mut scheduler = Scheduler::new(config);
    let mut session = SessionState::new();
    let mut pagination = PaginationController::new(
        adapter.nominal_page_size(),
        config.max_consecutive_empty_pages,
        config.max_pages,
    );
    let mut descriptor = adapter.first_descriptor();
    let mut summary = TraversalSummary {
        target: adapter.target().to_string(),
        pages: 0,
        records: 0,
        truncated: false,
        outcome: TraversalOutcome::Cancelled,
    };
    let mut first_response = true;
    let mut cooldowns_served = 0u32;

    loop {
        if cancel() {
            debug!("traversal of {} cancelled", summary.target);
            summary.outcome = TraversalOutcome::Cancelled;
            return summary;
        }

        let body = match fetch_page(
            config,
            fetcher,
            adapter,
            &mut scheduler,
            &mut session,
            &descriptor,
            &mut cooldowns_served,
        )
        .await
        {
            PageFetch::Ok(body) => body,
            PageFetch::Challenge => {
                let signal = ControlSignal::Challenge {
                    target: summary.target.clone(),
                    reason: "human verification challenge".to_string(),
                };
                let _ = tx.send(StreamItem::Signal(signal)).await;
                summary.outcome = TraversalOutcome::Challenged;
                return summary;
            }
            PageFetch::Blocked => {
                summary.outcome = TraversalOutcome::Blocked;
                return summary;
            }
        };

        if first_response {
            if let Err(e) = session.check_continuity(adapter.family(), adapter.target()) {
                warn!("cannot start workflow: {}", e);
                summary.outcome = TraversalOutcome::MissingContinuity;
                return summary;
            }
            first_response = false;
        }

        let parsed = adapter.parse_page(&body);
        if parsed.capped && !summary.truncated {
            warn!(
                "{} reports a capped result set; results will be incomplete",
                summary.target
            );
            summary.truncated = true;
        }

        let report = PageReport {
            records: parsed.records.len(),
            total: parsed.total,
            continuation: parsed.continuation,
        };
        summary.pages += 1;
        summary.records += parsed.records.len();

        for record in parsed.records {
            if tx.send(StreamItem::Record(record)).await.is_err() {
                // Consumer dropped the stream; nothing left to deliver to.
                summary.outcome = TraversalOutcome::Cancelled;
                return summary;
            }
        }

        match pagination.decide(&descriptor, &report) {
            PageDecision::Continue(next) => descriptor = next,
            PageDecision::Stop(reason) => {
                summary.outcome = TraversalOutcome::Completed(reason);
                return summary;
            }
        }
    }
}

/// Fetch one page, serving backoff for blocking responses and a bounded
/// number of local retries for transient failures. Transient failures past
/// the local budget escalate to the block path with their synthetic status.
async fn fetch_page(
    config: &EngineConfig,
    fetcher: &dyn Fetcher,
    adapter: &dyn SiteAdapter,
    scheduler: &mut Scheduler,
    session: &mut SessionState,
    descriptor: &PageDescriptor,
    cooldowns_served: &mut u32,
) -> PageFetch {
    let mut transient_left = config.transient_retries;

    loop {
        scheduler.wait().await;
        let spec = adapter.build_request(session, descriptor);
        let identity = scheduler.next_identity();
        let outcome = ResponseOutcome::from_response(fetcher.fetch(&spec, identity).await);

        // Cookies accumulate off every response, including blocking ones: a
        // 429 that issues a clearance cookie expects to see it on the retry.
        if let Some(host) = spec.host() {
            session.absorb_cookies(&host, &outcome.cookies);
        }

        match outcome.status_class {
            StatusClass::Ok => {
                scheduler.on_success();
                session.merge(adapter.family().extract(&outcome.body));
                return PageFetch::Ok(outcome.body);
            }
            StatusClass::ChallengeDetected => {
                warn!("challenge page from {}", adapter.target());
                return PageFetch::Challenge;
            }
            StatusClass::RateLimited => {
                if !backoff_or_abandon(scheduler, cooldowns_served, config.max_cooldowns).await {
                    return PageFetch::Blocked;
                }
            }
            StatusClass::ServerError | StatusClass::NetworkError => {
                if transient_left > 0 {
                    transient_left -= 1;
                    debug!(
                        "transient failure (status {}) from {}, retrying locally",
                        outcome.status,
                        adapter.target()
                    );
                    continue;
                }
                if !backoff_or_abandon(scheduler, cooldowns_served, config.max_cooldowns).await {
                    return PageFetch::Blocked;
                }
            }
        }
    }
}

/// Serve the scheduler's backoff for one blocking response. Returns false
/// when the traversal has exhausted its cooldown ceiling and should abandon
/// the target; the scheduler itself never abandons.
async fn backoff_or_abandon(
    scheduler: &mut Scheduler,
    cooldowns_served: &mut u32,
    max_cooldowns: u32,
) -> bool {
    let entering_cooldown = scheduler.consecutive_blocks() + 1 >= MAX_CONSECUTIVE_BLOCKS;
    scheduler.on_blocked().await;
    if entering_cooldown {
        *cooldowns_served += 1;
        if *cooldowns_served > max_cooldowns {
            warn!(
                "blocking persisted through {} long cooldowns, abandoning target",
                cooldowns_served
            );
            return false;
        }
    }
    true
}
