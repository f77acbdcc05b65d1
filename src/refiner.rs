//! Prompt classification and refinement.
//!
//! Decides locally whether a question asks for a chart, then has the hosted
//! model rewrite the question with the matching instruction template.

use tracing::{debug, info, instrument};

use crate::error::{LlmError, RefineError};
use crate::llm_interaction::{ChatClient, ChatMessage, Credential};

pub const CHART_KEYWORDS: [&str; 6] = ["chart", "graph", "plot", "visualize", "bar chart", "line chart"];

pub const CHART_INSTRUCTION: &str = "\
You are a data analyst assistant refining user questions for an EV charging dataset.

If the user asks for a chart, generate a refined prompt that will:
- Extract clear X and Y values for plotting
- Avoid using restricted plotting calls like 'gca' or 'tight_layout'
- Prefer simple bar or line plots

Avoid logging, retries, or error tracebacks.
";

pub const TABULAR_INSTRUCTION: &str = "\
You are a data analyst assistant refining user questions for an EV charging dataset.

Return a concise and clean prompt optimized for querying the dataset table.
Avoid any mention of charts or graphs.
Exclude all logs, retries, tracebacks, or internal errors.
";

/// True when the lowercased question contains any chart keyword.
pub fn wants_chart(question: &str) -> bool {
    let lowered = question.to_lowercase();
    CHART_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

pub fn system_instruction(wants_chart: bool) -> &'static str {
    if wants_chart {
        CHART_INSTRUCTION
    } else {
        TABULAR_INSTRUCTION
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Refinement {
    pub refined: String,
    pub wants_chart: bool,
}

pub struct PromptRefiner {
    client: ChatClient,
    credential: Option<Credential>,
}

impl PromptRefiner {
    pub fn new(client: ChatClient, credential: Option<Credential>) -> Self {
        Self { client, credential }
    }

    #[instrument(skip(self, question))]
    pub async fn refine(&self, question: &str) -> Result<Refinement, RefineError> {
        let wants_chart = wants_chart(question);
        info!(wants_chart, "Refining question");

        let credential = self.credential.as_ref().ok_or(LlmError::MissingCredential)?;
        let messages = [
            ChatMessage::system(system_instruction(wants_chart)),
            ChatMessage::user(question),
        ];
        let raw = self.client.complete(credential, &messages).await?;
        let refined = raw.trim().to_string();
        debug!(%refined, "Refined prompt");

        Ok(Refinement { refined, wants_chart })
    }
}
