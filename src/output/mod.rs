//! Output module for run results
//!
//! This module handles:
//! - Per-URL outcomes and crawl counters
//! - The run report returned by a crawl
//! - Printing the report and exporting it as markdown

mod markdown;
mod report;
pub mod stats;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use report::{print_report, RunReport};
pub use stats::{CrawlStats, UrlOutcome};
