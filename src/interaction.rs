//! One question, start to finish: refine, query, then prepare the chart for display.
//!
//! Each stage fails on its own terms. A refinement failure aborts the
//! interaction and is returned as `Err`. A query failure becomes a
//! user-facing error with no answer, and chart problems become warnings
//! that leave the textual answer in place.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chart::{is_image_path, load_image_data_uri, remove_export};
use crate::dataset::Dataset;
use crate::error::{ChartError, RefineError};
use crate::llm_interaction::{ChatClient, Credential};
use crate::query::{Answer, ChartArtifact, ChartOutput, QueryExecutor, SmartTable};
use crate::refiner::PromptRefiner;

/// Everything an interaction needs besides the question and credential.
#[derive(Clone, Debug)]
pub struct AppContext {
    pub dataset: Arc<Dataset>,
    pub refine_client: ChatClient,
    pub query_client: ChatClient,
    pub chart_output: ChartOutput,
    /// Used when the user leaves the key field blank.
    pub default_credential: Option<Credential>,
}

impl AppContext {
    /// The user's key if given, else the configured default.
    pub fn credential(&self, supplied: Option<&str>) -> Option<Credential> {
        supplied.and_then(Credential::new).or_else(|| self.default_credential.clone())
    }

    pub fn refiner(&self, credential: Option<Credential>) -> PromptRefiner {
        PromptRefiner::new(self.refine_client.clone(), credential)
    }

    pub fn executor(&self, credential: Option<Credential>) -> SmartTable {
        SmartTable::new(self.dataset.clone(), self.query_client.clone(), credential, self.chart_output.clone())
    }

    /// Runs one interaction with the given key, or `Ok(None)` for a blank question.
    /// The question reaches the model exactly as typed.
    pub async fn ask(&self, question: &str, api_key: Option<&str>) -> Result<Option<InteractionReport>, RefineError> {
        if question.trim().is_empty() {
            return Ok(None);
        }
        let credential = self.credential(api_key);
        let refiner = self.refiner(credential.clone());
        let executor = self.executor(credential);
        run_interaction(&refiner, &executor, question).await.map(Some)
    }
}

/// A chart ready to show.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartView {
    Figure { svg: String, text: String },
    Image { data_uri: String },
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct InteractionReport {
    pub question: String,
    pub refined: String,
    pub wants_chart: bool,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub chart: Option<ChartView>,
    pub warning: Option<String>,
}

pub async fn run_interaction(
    refiner: &PromptRefiner,
    executor: &dyn QueryExecutor,
    question: &str,
) -> Result<InteractionReport, RefineError> {
    let refinement = refiner.refine(question).await?;
    let mut report = InteractionReport {
        question: question.to_string(),
        refined: refinement.refined,
        wants_chart: refinement.wants_chart,
        ..Default::default()
    };

    let answer = match executor.chat(&report.refined).await {
        Ok(answer) => {
            report.answer = Some(answer.value.to_string());
            Some(answer)
        }
        Err(e) => {
            warn!(error = %e, "Query failed");
            report.error = Some(format!("Error during chat: {}", e));
            None
        }
    };

    if let (true, Some(answer)) = (report.wants_chart, &answer) {
        match present_chart(answer) {
            Ok(view) => report.chart = view,
            Err(ChartError::NotFound(path)) => {
                report.warning = Some(format!("Chart image file not found: {}", path.display()));
            }
            Err(e) => report.warning = Some(format!("Chart rendering failed: {}", e)),
        }
    }
    // Exported images live only as long as the interaction; the page carries them inline.
    if let Some(ChartArtifact::ImagePath(path)) = answer.as_ref().map(|a| &a.chart) {
        remove_export(path);
    }

    info!(
        wants_chart = report.wants_chart,
        answered = report.answer.is_some(),
        charted = report.chart.is_some(),
        "Interaction finished"
    );
    Ok(report)
}

/// `Ok(None)` when there is nothing to draw.
pub fn present_chart(answer: &Answer) -> Result<Option<ChartView>, ChartError> {
    match &answer.chart {
        ChartArtifact::Figure(figure) => Ok(Some(ChartView::Figure { svg: figure.to_svg(), text: figure.to_text() })),
        ChartArtifact::ImagePath(path) if is_image_path(path) => {
            let data_uri = load_image_data_uri(path)?;
            Ok(Some(ChartView::Image { data_uri }))
        }
        ChartArtifact::ImagePath(_) | ChartArtifact::None => Ok(None),
    }
}
