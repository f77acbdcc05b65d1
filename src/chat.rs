// Terminal front-end: the same interaction as the web UI, printed to stdout.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::interaction::{AppContext, ChartView, InteractionReport};

/// Formats a report the way the web page lays it out.
pub fn render_report(report: &InteractionReport) -> String {
    let mut out = format!("🔍 Refined Prompt: {}\n", report.refined);
    if let Some(answer) = &report.answer {
        out.push_str("\n🤖 Chatbot Response:\n");
        out.push_str(answer);
        out.push('\n');
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("\n{}\n", error));
    }
    match &report.chart {
        Some(ChartView::Figure { text, .. }) => out.push_str(&format!("\n{}", text)),
        Some(ChartView::Image { .. }) => {
            out.push_str("\nGenerated Chart: image output is web-only, use --inline-charts for terminal bars\n")
        }
        None => {}
    }
    if let Some(warning) = &report.warning {
        out.push_str(&format!("\nWarning: {}\n", warning));
    }
    out
}

/// One question. Refinement failures abort with an error.
pub async fn ask_once(context: &AppContext, question: &str, out: &mut impl Write) -> Result<()> {
    match context.ask(question, None).await.context("Interaction failed")? {
        Some(report) => write!(out, "{}", render_report(&report))?,
        None => writeln!(out, "Please enter a question.")?,
    }
    Ok(())
}

/// Reads questions line by line until EOF or `exit`.
pub async fn run_chat(context: &AppContext, input: impl BufRead, out: &mut impl Write) -> Result<()> {
    info!("Starting interactive chat session...");
    write!(out, "Ask a question about the EV station dataset (\"exit\" to quit)\n> ")?;
    out.flush()?;
    for line in input.lines() {
        let line = line.context("Failed to read question")?;
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if !question.is_empty() {
            writeln!(out, "Refining and querying...")?;
            // Each question stands alone; a failed refinement ends only that question.
            if let Err(e) = ask_once(context, question, out).await {
                writeln!(out, "Error: {:#}", e)?;
            }
        }
        write!(out, "\n> ")?;
        out.flush()?;
    }
    info!("Chat session finished.");
    Ok(())
}

pub async fn run_stdin_chat(context: &AppContext) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    run_chat(context, stdin.lock(), &mut stdout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::llm_interaction::test_support::completion_body;
    use crate::llm_interaction::{ChatClient, Credential};
    use crate::query::ChartOutput;
    use crate::refiner::TABULAR_INSTRUCTION;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(llm: &MockServer) -> AppContext {
        let client = ChatClient::new(llm.uri(), "gpt-4o");
        AppContext {
            dataset: Arc::new(Dataset::from_reader("City,Sessions\nOakland,120\nAustin,80\n".as_bytes()).unwrap()),
            refine_client: client.clone(),
            query_client: client,
            chart_output: ChartOutput::Inline,
            default_credential: Credential::new("sk-test"),
        }
    }

    #[test]
    fn report_rendering_sections() {
        let report = InteractionReport {
            refined: "Count stations".into(),
            answer: Some("2".into()),
            warning: Some("Chart image file not found: x.png".into()),
            ..Default::default()
        };
        let text = render_report(&report);
        assert!(text.starts_with("🔍 Refined Prompt: Count stations\n"));
        assert!(text.contains("🤖 Chatbot Response:\n2\n"));
        assert!(text.contains("Warning: Chart image file not found: x.png"));
    }

    #[test]
    fn image_chart_points_to_inline_mode() {
        let report = InteractionReport {
            refined: "Plot sessions".into(),
            chart: Some(ChartView::Image { data_uri: "data:image/png;base64,AAAA".into() }),
            ..Default::default()
        };
        let text = render_report(&report);
        assert!(text.contains("Generated Chart: image output is web-only"));
        assert!(!text.contains("base64"));
    }

    #[tokio::test]
    async fn chat_loop_answers_until_exit() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "messages": [{ "role": "system", "content": TABULAR_INSTRUCTION }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Total sessions")))
            .expect(1)
            .mount(&llm)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("JSON query plan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(
                r#"{"aggregate": {"op": "sum", "column": "Sessions"}}"#,
            )))
            .mount(&llm)
            .await;

        let input = "\nWhat is the total number of sessions?\nexit\nnever asked\n";
        let mut out = Vec::new();
        run_chat(&context(&llm), input.as_bytes(), &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Refined Prompt: Total sessions"));
        assert!(out.contains("Chatbot Response:\n200\n"));
        assert_eq!(out.matches("Refining and querying...").count(), 1);
    }

    #[tokio::test]
    async fn refinement_failure_does_not_end_the_session() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .expect(2)
            .mount(&llm)
            .await;

        let mut out = Vec::new();
        run_chat(&context(&llm), "first?\nsecond?\n".as_bytes(), &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("Error: Interaction failed").count(), 2);
        assert!(out.contains("upstream down"));
    }
}
