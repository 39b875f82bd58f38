//! registrycrawl - resilient scraping protocol engine for public record
//! directories.
//!
//! Normalizes heterogeneous server-driven directory workflows (professional
//! registries, lawyer rosters) into a lazy stream of records. Site adapters
//! supply markup parsing; the engine supplies everything a polite, resilient
//! traversal needs: randomized delays with exponential backoff, continuity
//! token threading across multi-step form workflows, pagination termination
//! heuristics, and block/challenge detection that abandons one target without
//! taking down the run.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;

pub use config::EngineConfig;
pub use engine::traversal::{CancelFn, Engine, TraversalOutcome, TraversalSummary};
pub use engine::{
    ControlSignal, DomainCache, Method, PageDescriptor, ParsedPage, ProtocolFamily, RequestSpec,
    ScrapeRecord, ScrapeStream, SessionState, SiteAdapter, StreamItem,
};
pub use error::ScrapeError;
