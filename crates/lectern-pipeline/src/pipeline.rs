//! The four rule stages.
//!
//! Each stage binds its inputs as globals, fetches the page it needs, wraps
//! the source's rule in a stage function and runs it in the sandbox. The
//! script's return value is then normalized into typed records.

use crate::error::PipelineError;
use crate::normalize;
use crate::result::{PipelineResult, StageResult};
use lectern_extension::LogEntry;
use lectern_runtime::{
    CapabilityPolicy, ExecutionContext, RuntimeSet, SandboxRuntime, TrustThresholds,
};
use lectern_source_core::{
    EntryRecord, FetchError, FetchRequest, Fetcher, ItemRecord, ResultRecord, SourceDefinition,
    Stage,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Global function every rule is wrapped in.
pub const STAGE_ENTRY: &str = "__stage";

/// Wrap a rule body as `function __stage(input, body) ... end`.
pub fn build_stage_script(rule: &str) -> String {
    format!("function {}(input, body)\n{}\nend\n", STAGE_ENTRY, rule)
}

/// Wall-clock budget per stage, covering fetch and script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub search_ms: u64,
    pub item_info_ms: u64,
    pub toc_ms: u64,
    pub content_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            search_ms: 15_000,
            item_info_ms: 20_000,
            toc_ms: 30_000,
            content_ms: 45_000,
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let ms = match stage {
            Stage::Search => self.search_ms,
            Stage::ItemInfo => self.item_info_ms,
            Stage::TableOfContents => self.toc_ms,
            Stage::Content => self.content_ms,
        };
        Duration::from_millis(ms)
    }
}

struct StagePlan<'a> {
    source: &'a SourceDefinition,
    stage: Stage,
    input: Value,
    /// Page to fetch before the script runs; `None` means no fetch.
    fetch_url: Option<String>,
    context: ExecutionContext,
}

/// Runs source rules against fetched pages.
#[derive(Clone)]
pub struct RulePipeline {
    runtime: Arc<SandboxRuntime>,
    search_runtime: Arc<SandboxRuntime>,
    fetcher: Arc<dyn Fetcher>,
    timeouts: StageTimeouts,
    thresholds: TrustThresholds,
}

impl RulePipeline {
    /// A pipeline running every stage on `runtime`.
    pub fn new(runtime: Arc<SandboxRuntime>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            search_runtime: Arc::clone(&runtime),
            runtime,
            fetcher,
            timeouts: StageTimeouts::default(),
            thresholds: TrustThresholds::default(),
        }
    }

    /// Search stages on the search pool, everything else on the execution
    /// pool.
    pub fn from_runtimes(runtimes: &RuntimeSet, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            search_runtime: Arc::clone(&runtimes.search),
            ..Self::new(Arc::clone(&runtimes.execution), fetcher)
        }
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_thresholds(mut self, thresholds: TrustThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn timeouts(&self) -> &StageTimeouts {
        &self.timeouts
    }

    fn runtime_for(&self, stage: Stage) -> &SandboxRuntime {
        match stage {
            Stage::Search => &self.search_runtime,
            _ => &self.runtime,
        }
    }

    /// The policy `source` scripts run under.
    pub fn policy_for(&self, source: &SourceDefinition) -> CapabilityPolicy {
        source.policy(&self.thresholds)
    }

    // ========================================================================
    // Stages
    // ========================================================================

    /// Search `source` for `keyword`.
    pub async fn search(
        &self,
        source: &SourceDefinition,
        keyword: &str,
    ) -> Result<StageResult<Vec<ResultRecord>>, PipelineError> {
        let plan = StagePlan {
            source,
            stage: Stage::Search,
            input: json!(keyword),
            fetch_url: search_url(source, keyword),
            context: ExecutionContext::new().with_var("keyword", json!(keyword)),
        };
        let stage = self.run_stage(plan).await?;

        Ok(stage.and_then(|value| {
            let mut results: Vec<ResultRecord> = normalize::records(value)?;
            for result in &mut results {
                result.resolve_links(|href| source.resolve_url(href));
            }
            Ok(results)
        }))
    }

    /// Details for `item`. Fields the rule leaves empty keep the input's
    /// values and `itemUrl` is always the fetched link.
    pub async fn item_info(
        &self,
        source: &SourceDefinition,
        item: &ItemRecord,
    ) -> Result<StageResult<ItemRecord>, PipelineError> {
        let link = source.resolve_url(&item.item_url);
        let plan = StagePlan {
            source,
            stage: Stage::ItemInfo,
            input: json!(item),
            fetch_url: Some(link.clone()),
            context: ExecutionContext::new().with_item(json!(item)),
        };
        let stage = self.run_stage(plan).await?;

        Ok(stage.and_then(|value| {
            let mut record: ItemRecord = normalize::record(value)?;
            record.inherit(item);
            record.resolve_links(|href| source.resolve_url(href));
            record.item_url = link;
            Ok(record)
        }))
    }

    /// Entries of `item`, in the order the rule returns them.
    pub async fn table_of_contents(
        &self,
        source: &SourceDefinition,
        item: &ItemRecord,
    ) -> Result<StageResult<Vec<EntryRecord>>, PipelineError> {
        let plan = StagePlan {
            source,
            stage: Stage::TableOfContents,
            input: json!(item),
            fetch_url: Some(source.resolve_url(item.toc_link())),
            context: ExecutionContext::new().with_item(json!(item)),
        };
        let stage = self.run_stage(plan).await?;

        Ok(stage.and_then(|value| {
            let mut entries: Vec<EntryRecord> = normalize::records(value)?;
            for entry in &mut entries {
                entry.resolve_links(|href| source.resolve_url(href));
            }
            Ok(entries)
        }))
    }

    /// Text of `entry`.
    pub async fn content(
        &self,
        source: &SourceDefinition,
        item: &ItemRecord,
        entry: &EntryRecord,
    ) -> Result<StageResult<String>, PipelineError> {
        let plan = StagePlan {
            source,
            stage: Stage::Content,
            input: json!(entry),
            fetch_url: Some(source.resolve_url(&entry.url)),
            context: ExecutionContext::new()
                .with_item(json!(item))
                .with_chapter(json!(entry)),
        };
        let stage = self.run_stage(plan).await?;
        Ok(stage.and_then(normalize::text))
    }

    // ========================================================================
    // Stage driver
    // ========================================================================

    async fn run_stage(&self, plan: StagePlan<'_>) -> Result<StageResult<Value>, PipelineError> {
        let StagePlan {
            source,
            stage,
            input,
            fetch_url,
            context,
        } = plan;
        if !source.enabled {
            return Err(PipelineError::SourceDisabled(source.id.clone()));
        }

        let started = Instant::now();
        let deadline = started + self.timeouts.for_stage(stage);
        let policy = self.policy_for(source);
        let context = context
            .with_source(source.public_view())
            .with_var("baseUrl", json!(source.base_url));
        let mut logs = Vec::new();
        debug!(source = %source.id, stage = %stage, "Running stage");

        let body = match fetch_url {
            None => Value::Null,
            Some(url) => {
                let headers = match self
                    .request_headers(source, stage, &context, &policy, deadline, &mut logs)
                    .await?
                {
                    Ok(headers) => headers,
                    Err(failure) => return Ok(finish(source, stage, started, failure, logs)),
                };
                match self.fetch(source, stage, url, headers, deadline).await {
                    Ok(body) => Value::String(body),
                    Err(failure) => return Ok(finish(source, stage, started, failure, logs)),
                }
            }
        };

        let Some(policy) = budgeted(&policy, deadline)? else {
            return Ok(finish(source, stage, started, PipelineResult::Timeout, logs));
        };
        let outcome = self
            .runtime_for(stage)
            .execute(
                &build_stage_script(source.rule(stage)),
                Some(STAGE_ENTRY),
                context,
                policy,
                vec![input, body],
            )
            .await?;
        logs.extend(outcome.logs);

        Ok(finish(source, stage, started, outcome.result.into(), logs))
    }

    /// Run the source's header script, if any.
    async fn request_headers(
        &self,
        source: &SourceDefinition,
        stage: Stage,
        context: &ExecutionContext,
        policy: &CapabilityPolicy,
        deadline: Instant,
        logs: &mut Vec<LogEntry>,
    ) -> Result<Result<BTreeMap<String, String>, PipelineResult<Value>>, PipelineError> {
        let script = match source.header_script.as_deref() {
            Some(script) if !script.trim().is_empty() => script,
            _ => return Ok(Ok(BTreeMap::new())),
        };
        let Some(policy) = budgeted(policy, deadline)? else {
            return Ok(Err(PipelineResult::Timeout));
        };

        let outcome = self
            .runtime_for(stage)
            .execute(script, None, context.clone(), policy, vec![])
            .await?;
        logs.extend(outcome.logs);
        Ok(PipelineResult::from(outcome.result)
            .and_then(normalize::headers)
            .into_success())
    }

    async fn fetch(
        &self,
        source: &SourceDefinition,
        stage: Stage,
        url: String,
        headers: BTreeMap<String, String>,
        deadline: Instant,
    ) -> Result<String, PipelineResult<Value>> {
        if url.is_empty() {
            return Err(PipelineResult::UpstreamError(format!(
                "no URL to fetch for {}",
                stage
            )));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PipelineResult::Timeout);
        }

        let request = FetchRequest::get(url, remaining.as_millis() as u64).with_headers(headers);
        match tokio::time::timeout(remaining, self.fetcher.fetch(&request)).await {
            Ok(Ok(response)) => Ok(response.body),
            Ok(Err(FetchError::Timeout(_))) | Err(_) => Err(PipelineResult::Timeout),
            Ok(Err(e)) => {
                warn!(
                    source = %source.id,
                    stage = %stage,
                    url = %request.url,
                    "Fetch failed: {}",
                    e
                );
                Err(PipelineResult::UpstreamError(e.to_string()))
            }
        }
    }
}

/// `policy` with its timeout cut to what is left of the stage budget.
/// `None` once the budget is spent.
fn budgeted(
    policy: &CapabilityPolicy,
    deadline: Instant,
) -> Result<Option<CapabilityPolicy>, PipelineError> {
    let remaining = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
    if remaining == 0 {
        return Ok(None);
    }
    Ok(Some(policy.with_timeout_ms(policy.timeout_ms().min(remaining))?))
}

/// Search page URL with `{{key}}` and `{{page}}` filled in.
fn search_url(source: &SourceDefinition, keyword: &str) -> Option<String> {
    source.search_url.as_ref().map(|template| {
        let key = utf8_percent_encode(keyword, NON_ALPHANUMERIC).to_string();
        source.resolve_url(&template.replace("{{key}}", &key).replace("{{page}}", "1"))
    })
}

fn finish(
    source: &SourceDefinition,
    stage: Stage,
    started: Instant,
    result: PipelineResult<Value>,
    logs: Vec<LogEntry>,
) -> StageResult<Value> {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result.error_message() {
        None => info!(source = %source.id, stage = %stage, elapsed_ms, "Stage finished"),
        Some(error) => {
            info!(source = %source.id, stage = %stage, elapsed_ms, %error, "Stage failed")
        }
    }
    StageResult {
        stage,
        result,
        elapsed_ms,
        logs,
    }
}
