use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::chart::chart_file_name;
use crate::constants::SCHEMA_SAMPLE_ROWS;
use crate::dataset::Dataset;
use crate::error::{LlmError, QueryError};
use crate::llm_interaction::{ChatClient, ChatMessage, Credential};
use crate::query::plan::QueryPlan;
use crate::query::{Answer, ChartArtifact, QueryExecutor};

const PLANNER_INSTRUCTION: &str = r#"You translate questions about a single data table into a JSON query plan.
Reply with one JSON object and nothing else, using this shape:
{
  "filters": [{"column": "<column>", "op": "eq|ne|contains|gt|gte|lt|lte", "value": "<text or number>"}],
  "aggregate": {"op": "count|count_distinct|sum|mean|min|max|list", "column": "<column, omit for count>"},
  "group_by": "<column or null>",
  "sort": "asc|desc|null",
  "limit": <number or null>,
  "chart": {"kind": "bar|line", "title": "<title>"} or null
}
Rules:
- Use column names exactly as listed.
- sum, mean, min and max need a numeric column.
- Only add "chart" when the question asks for a chart or plot; a chart needs "group_by".
- If the table cannot answer the question, reply {"error": "<short reason>"}.
"#;

/// Where chart figures end up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChartOutput {
    /// Returned as in-memory figures.
    Inline,
    /// Exported as PNG files into this directory.
    SaveTo(PathBuf),
}

/// LLM-planned queries over a shared, read-only dataset.
pub struct SmartTable {
    dataset: Arc<Dataset>,
    client: ChatClient,
    credential: Option<Credential>,
    chart_output: ChartOutput,
}

impl SmartTable {
    pub fn new(dataset: Arc<Dataset>, client: ChatClient, credential: Option<Credential>, chart_output: ChartOutput) -> Self {
        Self { dataset, client, credential, chart_output }
    }

    fn system_prompt(&self) -> String {
        format!("{}\n{}", PLANNER_INSTRUCTION, self.dataset.schema_summary(SCHEMA_SAMPLE_ROWS))
    }

    async fn plan(&self, instruction: &str) -> Result<QueryPlan, QueryError> {
        let credential = self.credential.as_ref().ok_or(LlmError::MissingCredential)?;
        let messages = [ChatMessage::system(self.system_prompt()), ChatMessage::user(instruction)];
        let reply = self.client.complete(credential, &messages).await?;
        let plan = QueryPlan::parse(&reply)?;
        debug!(?plan, "Generated query plan");
        Ok(plan)
    }
}

#[async_trait]
impl QueryExecutor for SmartTable {
    #[instrument(skip(self, instruction), fields(model = %self.client.model()))]
    async fn chat(&self, instruction: &str) -> Result<Answer, QueryError> {
        let plan = self.plan(instruction).await?;
        let result = plan.execute(&self.dataset)?;

        let chart = match (result.figure, &self.chart_output) {
            (None, _) => ChartArtifact::None,
            (Some(figure), _) if figure.points.is_empty() => {
                debug!("Chart plan matched no rows, skipping chart");
                ChartArtifact::None
            }
            (Some(figure), ChartOutput::Inline) => ChartArtifact::Figure(figure),
            (Some(figure), ChartOutput::SaveTo(dir)) => {
                let stamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
                let path = dir.join(chart_file_name(stamp));
                figure.save_png(&path)?;
                info!(path = %path.display(), "Exported chart");
                ChartArtifact::ImagePath(path)
            }
        };

        Ok(Answer { value: result.value, chart })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartKind;
    use crate::llm_interaction::test_support::completion_body;
    use crate::query::AnswerValue;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CSV: &str = "\
Station Name,City,State,Sessions
Plug A,Oakland,CA,120
Plug B,Austin,TX,80
Plug C,Fresno,CA,40
";

    async fn table_replying(reply: &str, chart_output: ChartOutput) -> (MockServer, SmartTable) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("JSON query plan"))
            .and(body_string_contains("Station Name"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(reply)))
            .mount(&server)
            .await;
        let dataset = Arc::new(Dataset::from_reader(CSV.as_bytes()).unwrap());
        let table = SmartTable::new(dataset, ChatClient::new(server.uri(), "gpt-4o-mini"), Credential::new("sk-test"), chart_output);
        (server, table)
    }

    #[tokio::test]
    async fn answers_scalar_question() {
        let reply = r#"```json
{"filters": [{"column": "State", "op": "eq", "value": "CA"}], "aggregate": {"op": "count"}}
```"#;
        let (_server, table) = table_replying(reply, ChartOutput::Inline).await;
        let answer = table.chat("Count stations where State is CA").await.unwrap();
        assert_eq!(answer.value, AnswerValue::Number(2.0));
        assert_eq!(answer.chart, ChartArtifact::None);
    }

    #[tokio::test]
    async fn inline_chart_is_a_figure() {
        let reply = r#"{"aggregate": {"op": "sum", "column": "Sessions"}, "group_by": "City", "chart": {"kind": "bar"}}"#;
        let (_server, table) = table_replying(reply, ChartOutput::Inline).await;
        let answer = table.chat("Total sessions per City as a bar plot").await.unwrap();
        match answer.chart {
            ChartArtifact::Figure(figure) => {
                assert_eq!(figure.kind, ChartKind::Bar);
                assert_eq!(figure.points.len(), 3);
            }
            other => panic!("expected figure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn saved_chart_is_an_image_path() {
        let dir = tempfile::tempdir().unwrap();
        let reply = r#"{"aggregate": {"op": "sum", "column": "Sessions"}, "group_by": "State", "chart": {"kind": "line"}}"#;
        let (_server, table) = table_replying(reply, ChartOutput::SaveTo(dir.path().join("charts"))).await;
        let answer = table.chat("Sessions per state as a line plot").await.unwrap();
        let ChartArtifact::ImagePath(path) = answer.chart else {
            panic!("expected image path");
        };
        assert!(path.starts_with(dir.path().join("charts")));
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[tokio::test]
    async fn empty_chart_is_skipped_in_both_modes() {
        let dir = tempfile::tempdir().unwrap();
        let reply = r#"{"filters": [{"column": "State", "op": "eq", "value": "NY"}], "aggregate": {"op": "sum", "column": "Sessions"}, "group_by": "City", "chart": {"kind": "bar"}}"#;
        for output in [ChartOutput::Inline, ChartOutput::SaveTo(dir.path().to_path_buf())] {
            let (_server, table) = table_replying(reply, output).await;
            let answer = table.chat("Sessions per City in New York as a bar plot").await.unwrap();
            assert_eq!(answer.chart, ChartArtifact::None);
            assert!(matches!(answer.value, AnswerValue::Series { ref rows, .. } if rows.is_empty()));
        }

        let (_server, table) = table_replying(
            r#"{"aggregate": {"op": "count"}, "group_by": "City", "limit": 0, "chart": {"kind": "line"}}"#,
            ChartOutput::SaveTo(dir.path().to_path_buf()),
        )
        .await;
        assert_eq!(table.chat("Plot zero cities").await.unwrap().chart, ChartArtifact::None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn refusal_surfaces_as_error() {
        let (_server, table) = table_replying(r#"{"error": "No pricing column"}"#, ChartOutput::Inline).await;
        let err = table.chat("What does charging cost?").await.unwrap_err();
        assert_eq!(err.to_string(), "No pricing column");
    }

    #[tokio::test]
    async fn garbage_reply_is_invalid_plan() {
        let (_server, table) = table_replying("I am not sure.", ChartOutput::Inline).await;
        assert!(matches!(table.chat("??").await, Err(QueryError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn missing_credential_is_query_error() {
        let dataset = Arc::new(Dataset::from_reader(CSV.as_bytes()).unwrap());
        let table = SmartTable::new(dataset, ChatClient::new("http://127.0.0.1:9", "m"), None, ChartOutput::Inline);
        let err = table.chat("Count stations").await.unwrap_err();
        assert_eq!(err.to_string(), "missing API key");
    }
}
