//! The fetch layer.
//!
//! The pipeline never talks to the network directly: it asks a [`Fetcher`]
//! for the raw text of a page and hands that text to the stage script.

use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchMethod {
    #[default]
    Get,
    Post,
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: FetchMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Upper bound for the whole request.
    pub timeout_ms: u64,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            url: url.into(),
            method: FetchMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            timeout_ms,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Raw page text plus the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Fetches raw page text for the rule stages.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// A fetcher serving fixed pages from memory. Unknown URLs answer 404.
///
/// Every request is recorded, which makes it handy in tests and in the
/// debug harness for replaying captured pages.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match self.pages.get(&request.url) {
            Some(body) => Ok(FetchResponse {
                url: request.url.clone(),
                status: 200,
                body: body.clone(),
            }),
            None => Err(FetchError::Status {
                status: 404,
                url: request.url.clone(),
            }),
        }
    }
}
