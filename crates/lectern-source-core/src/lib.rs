//! # lectern-source-core
//!
//! Core types shared by everything that runs content-source scripts.
//!
//! - [`SourceDefinition`] - A content source: base URL, trust rating and the
//!   four stage rules
//! - [`ResultRecord`], [`ItemRecord`], [`EntryRecord`] - What the stages
//!   produce, deserialized leniently from script output
//! - [`Fetcher`] - The fetch layer the pipeline reads raw pages through
//! - [`SourceCatalog`] - Lookup of source definitions by id

pub mod catalog;
pub mod error;
pub mod fetch;
pub mod record;
pub mod source;

pub use catalog::{load_sources, parse_sources, InMemoryCatalog, SourceCatalog};
pub use error::{FetchError, Result, SourceError};
pub use fetch::{FetchMethod, FetchRequest, FetchResponse, Fetcher, StaticFetcher};
pub use record::{EntryRecord, ItemRecord, ResultRecord};
pub use source::{SourceDefinition, Stage};

pub mod prelude {
    pub use crate::{
        EntryRecord, FetchError, FetchMethod, FetchRequest, FetchResponse, Fetcher,
        InMemoryCatalog, ItemRecord, ResultRecord, SourceCatalog, SourceDefinition, SourceError,
        Stage,
    };
}
