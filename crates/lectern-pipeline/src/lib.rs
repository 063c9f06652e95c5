//! # lectern-pipeline
//!
//! Runs content-source rules stage by stage: Search, ItemInfo,
//! TableOfContents and Content.
//!
//! Each stage fetches the page it needs through a
//! [`Fetcher`](lectern_source_core::Fetcher), runs the source's rule in the
//! sandbox with the page as `body`, and normalizes the script's return value
//! into typed records. Sandbox outcomes pass through unchanged; fetch
//! failures become [`PipelineResult::UpstreamError`].
//!
//! ## Rules
//!
//! A rule is the body of a Lua function taking `input` and `body`:
//!
//! ```lua
//! local hits = {}
//! for _, node in ipairs(html.select(body, ".result a")) do
//!   table.insert(hits, { name = node.text, itemUrl = node.attrs.href })
//! end
//! return hits
//! ```
//!
//! Stage globals are `source`, `baseUrl`, `item`, `chapter` and, for
//! search, `keyword`.

pub mod error;
pub mod http;
mod normalize;
pub mod pipeline;
pub mod report;
pub mod result;

pub use error::PipelineError;
pub use http::HttpFetcher;
pub use pipeline::{build_stage_script, RulePipeline, StageTimeouts, STAGE_ENTRY};
pub use report::{SourceTestReport, StageReport, PROBE_KEYWORD};
pub use result::{PipelineResult, StageResult};
