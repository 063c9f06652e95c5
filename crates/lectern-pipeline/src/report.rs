//! End-to-end probing of a source.

use crate::error::PipelineError;
use crate::pipeline::RulePipeline;
use crate::result::StageResult;
use lectern_source_core::{ItemRecord, SourceDefinition, Stage};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Keyword searched when probing a source.
pub const PROBE_KEYWORD: &str = "test";

/// How one stage of a probe went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Stage,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Records produced; characters of text for the content stage.
    pub count: usize,
}

impl StageReport {
    fn from_stage<T>(stage: &StageResult<T>, count: impl FnOnce(&T) -> usize) -> Self {
        Self {
            stage: stage.stage,
            success: stage.result.is_success(),
            elapsed_ms: stage.elapsed_ms,
            error: stage.result.error_message(),
            count: stage.result.as_success().map(count).unwrap_or(0),
        }
    }

    fn not_started(stage: Stage, err: &PipelineError) -> Self {
        Self {
            stage,
            success: false,
            elapsed_ms: 0,
            error: Some(err.to_string()),
            count: 0,
        }
    }
}

/// Append the report for one stage and hand back its value on success. A
/// stage that could not be submitted is reported as failed.
fn record<T>(
    stages: &mut Vec<StageReport>,
    stage: Stage,
    outcome: Result<StageResult<T>, PipelineError>,
    count: impl FnOnce(&T) -> usize,
) -> Option<T> {
    match outcome {
        Ok(result) => {
            stages.push(StageReport::from_stage(&result, count));
            result.result.success()
        }
        Err(err) => {
            warn!(stage = %stage, "Stage could not start: {}", err);
            stages.push(StageReport::not_started(stage, &err));
            None
        }
    }
}

/// Result of [`RulePipeline::test_source`]. Stages that were not reached
/// are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTestReport {
    pub source_id: String,
    pub stages: Vec<StageReport>,
    pub elapsed_ms: u64,
}

impl SourceTestReport {
    /// Whether all four stages ran and succeeded.
    pub fn success(&self) -> bool {
        self.stages.len() == Stage::ALL.len() && self.stages.iter().all(|s| s.success)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}

impl RulePipeline {
    /// Probe `source`: search, then item info on the first hit, then the
    /// table of contents, then the content of the first entry. Each stage
    /// runs only if the previous one produced what it needs.
    pub async fn test_source(
        &self,
        source: &SourceDefinition,
    ) -> Result<SourceTestReport, PipelineError> {
        if !source.enabled {
            return Err(PipelineError::SourceDisabled(source.id.clone()));
        }
        let started = Instant::now();
        let mut stages = Vec::new();

        let search = self.search(source, PROBE_KEYWORD).await;
        let first = record(&mut stages, Stage::Search, search, Vec::len)
            .and_then(|hits| hits.into_iter().next());

        if let Some(hit) = first {
            let info = self.item_info(source, &ItemRecord::from(hit)).await;
            let item = record(&mut stages, Stage::ItemInfo, info, |_| 1);

            if let Some(item) = item {
                let toc = self.table_of_contents(source, &item).await;
                let entry = record(&mut stages, Stage::TableOfContents, toc, Vec::len)
                    .and_then(|entries| entries.into_iter().next());

                if let Some(entry) = entry {
                    let content = self.content(source, &item, &entry).await;
                    record(&mut stages, Stage::Content, content, |text| {
                        text.chars().count()
                    });
                }
            }
        }

        let report = SourceTestReport {
            source_id: source.id.clone(),
            stages,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            source = %source.id,
            stages = report.stages.len(),
            success = report.success(),
            "Source test finished"
        );
        Ok(report)
    }
}
