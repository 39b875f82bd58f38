//! Pagination controller.
//!
//! One controller per traversal decides, after each parsed page, whether to
//! fetch another and with what cursor. Termination heuristics are evaluated
//! in a fixed order and the controller sees only counts and descriptors -
//! never record contents - so it works unchanged across every adapter.

use tracing::debug;

/// Opaque pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDescriptor {
    /// Simple 1-based page number.
    Page(u32),
    /// Record offset into the result set.
    Offset(u64),
    /// Server-issued postback continuation: event target and argument
    /// resubmitted with the full form state.
    Postback { target: String, argument: String },
}

/// What an adapter observed on one fetched page, as counts and cursors only.
#[derive(Debug, Clone, Default)]
pub struct PageReport {
    /// Records parsed from this page.
    pub records: usize,
    /// Total result count, when the server declares one.
    pub total: Option<u64>,
    /// Server-issued continuation for the next page, when the site paginates
    /// by postback.
    pub continuation: Option<(String, String)>,
}

/// Why a traversal stopped fetching pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// First page held zero records: target has no results.
    NoResults,
    /// Too many consecutive empty pages.
    EmptyStreak,
    /// Pages fetched cover the server-declared total.
    TotalReached,
    /// Short page implies the last page.
    ShortPage,
    /// Caller-supplied page ceiling hit (bounded test/debug runs).
    PageCeiling,
    /// Postback site stopped issuing a continuation argument.
    NoContinuation,
}

/// The controller's decision after a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDecision {
    /// Fetch another page with this descriptor.
    Continue(PageDescriptor),
    /// Stop fetching for this target.
    Stop(StopReason),
}

/// Per-traversal pagination state machine.
#[derive(Debug)]
pub struct PaginationController {
    nominal_page_size: usize,
    empty_streak_threshold: u32,
    max_pages: Option<u32>,
    pages_fetched: u32,
    empty_streak: u32,
    known_total: Option<u64>,
}

impl PaginationController {
    pub fn new(
        nominal_page_size: usize,
        empty_streak_threshold: u32,
        max_pages: Option<u32>,
    ) -> Self {
        Self {
            nominal_page_size,
            empty_streak_threshold,
            max_pages,
            pages_fetched: 0,
            empty_streak: 0,
            known_total: None,
        }
    }

    /// Pages fetched so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Decide what to do after a successfully parsed page. Rules are
    /// evaluated in order; the first that fires wins.
    pub fn decide(&mut self, current: &PageDescriptor, report: &PageReport) -> PageDecision {
        self.pages_fetched += 1;
        if self.known_total.is_none() {
            self.known_total = report.total;
        }

        if report.records == 0 {
            if self.pages_fetched == 1 {
                return PageDecision::Stop(StopReason::NoResults);
            }
            self.empty_streak += 1;
            debug!(
                "empty page ({} of {} tolerated)",
                self.empty_streak, self.empty_streak_threshold
            );
            if self.empty_streak >= self.empty_streak_threshold {
                return PageDecision::Stop(StopReason::EmptyStreak);
            }
            return self.advance(current, report);
        }
        self.empty_streak = 0;

        if let Some(total) = self.known_total {
            if self.pages_fetched as u64 * self.nominal_page_size as u64 >= total {
                return PageDecision::Stop(StopReason::TotalReached);
            }
        }

        if report.records < self.nominal_page_size {
            return PageDecision::Stop(StopReason::ShortPage);
        }

        if let Some(ceiling) = self.max_pages {
            if self.pages_fetched >= ceiling {
                return PageDecision::Stop(StopReason::PageCeiling);
            }
        }

        self.advance(current, report)
    }

    /// Compute the next descriptor: a simple increment for page/offset
    /// cursors, or the server-issued continuation for postback sites. A
    /// postback site that stops issuing a continuation has no next page.
    fn advance(&self, current: &PageDescriptor, report: &PageReport) -> PageDecision {
        let next = match current {
            PageDescriptor::Page(n) => PageDescriptor::Page(n + 1),
            PageDescriptor::Offset(o) => {
                PageDescriptor::Offset(o + self.nominal_page_size as u64)
            }
            PageDescriptor::Postback { .. } => match &report.continuation {
                Some((target, argument)) => PageDescriptor::Postback {
                    target: target.clone(),
                    argument: argument.clone(),
                },
                None => return PageDecision::Stop(StopReason::NoContinuation),
            },
        };
        PageDecision::Continue(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(records: usize) -> PageReport {
        PageReport {
            records,
            ..Default::default()
        }
    }

    fn run(controller: &mut PaginationController, sizes: &[usize]) -> Vec<PageDecision> {
        let mut descriptor = PageDescriptor::Page(1);
        let mut decisions = Vec::new();
        for &size in sizes {
            let decision = controller.decide(&descriptor, &page(size));
            if let PageDecision::Continue(ref next) = decision {
                descriptor = next.clone();
            }
            decisions.push(decision);
        }
        decisions
    }

    #[test]
    fn test_empty_streak_terminates_after_threshold() {
        let mut controller = PaginationController::new(50, 3, None);
        let decisions = run(&mut controller, &[50, 50, 0, 0, 0]);

        assert_eq!(decisions.len(), 5);
        for decision in &decisions[..4] {
            assert!(matches!(decision, PageDecision::Continue(_)));
        }
        assert_eq!(decisions[4], PageDecision::Stop(StopReason::EmptyStreak));
        assert_eq!(controller.pages_fetched(), 5);
    }

    #[test]
    fn test_nonempty_page_resets_streak() {
        let mut controller = PaginationController::new(50, 3, None);
        let decisions = run(&mut controller, &[50, 0, 0, 50, 0, 0, 0]);
        assert_eq!(decisions[6], PageDecision::Stop(StopReason::EmptyStreak));
        for decision in &decisions[..6] {
            assert!(matches!(decision, PageDecision::Continue(_)));
        }
    }

    #[test]
    fn test_short_page_is_last_page() {
        let mut controller = PaginationController::new(50, 3, None);
        let decision = controller.decide(&PageDescriptor::Page(1), &page(30));
        assert_eq!(decision, PageDecision::Stop(StopReason::ShortPage));
        assert_eq!(controller.pages_fetched(), 1);
    }

    #[test]
    fn test_empty_first_page_means_no_results() {
        let mut controller = PaginationController::new(50, 3, None);
        let decision = controller.decide(&PageDescriptor::Page(1), &page(0));
        assert_eq!(decision, PageDecision::Stop(StopReason::NoResults));
    }

    #[test]
    fn test_known_total_caps_pages() {
        let mut controller = PaginationController::new(50, 3, None);
        let first = PageReport {
            records: 50,
            total: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            controller.decide(&PageDescriptor::Page(1), &first),
            PageDecision::Continue(_)
        ));
        // Second full page covers the declared total of 100.
        assert_eq!(
            controller.decide(&PageDescriptor::Page(2), &page(50)),
            PageDecision::Stop(StopReason::TotalReached)
        );
    }

    #[test]
    fn test_page_ceiling() {
        let mut controller = PaginationController::new(50, 3, Some(2));
        assert!(matches!(
            controller.decide(&PageDescriptor::Page(1), &page(50)),
            PageDecision::Continue(_)
        ));
        assert_eq!(
            controller.decide(&PageDescriptor::Page(2), &page(50)),
            PageDecision::Stop(StopReason::PageCeiling)
        );
    }

    #[test]
    fn test_page_number_increments() {
        let mut controller = PaginationController::new(50, 3, None);
        let decision = controller.decide(&PageDescriptor::Page(4), &page(50));
        assert_eq!(decision, PageDecision::Continue(PageDescriptor::Page(5)));
    }

    #[test]
    fn test_offset_advances_by_page_size() {
        let mut controller = PaginationController::new(25, 3, None);
        let decision = controller.decide(&PageDescriptor::Offset(50), &page(25));
        assert_eq!(decision, PageDecision::Continue(PageDescriptor::Offset(75)));
    }

    #[test]
    fn test_postback_uses_server_continuation() {
        let mut controller = PaginationController::new(50, 3, None);
        let current = PageDescriptor::Postback {
            target: "grdResults".to_string(),
            argument: "Page$2".to_string(),
        };
        let report = PageReport {
            records: 50,
            continuation: Some(("grdResults".to_string(), "Page$3".to_string())),
            ..Default::default()
        };
        assert_eq!(
            controller.decide(&current, &report),
            PageDecision::Continue(PageDescriptor::Postback {
                target: "grdResults".to_string(),
                argument: "Page$3".to_string(),
            })
        );
    }

    #[test]
    fn test_postback_without_continuation_stops() {
        let mut controller = PaginationController::new(50, 3, None);
        let current = PageDescriptor::Postback {
            target: "grdResults".to_string(),
            argument: "Page$9".to_string(),
        };
        assert_eq!(
            controller.decide(&current, &page(50)),
            PageDecision::Stop(StopReason::NoContinuation)
        );
    }
}
