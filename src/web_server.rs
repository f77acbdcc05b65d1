use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::constants;
use crate::interaction::{AppContext, InteractionReport};

const PAGE_TITLE: &str = "EV Charging Insight Chatbot";

// Shared application state
#[derive(Clone)]
struct AppState {
    templates: Arc<AutoReloader>,
    context: Arc<AppContext>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryForm {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    question: String,
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: String) -> AutoReloader {
    // Use AutoReloader for development convenience
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        // Watch the templates directory for changes
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

/// Everything the page template can show.
struct Page<'a> {
    question: &'a str,
    report: Option<&'a InteractionReport>,
    fatal_error: Option<String>,
}

fn render_page(state: &AppState, page: Page<'_>, status: StatusCode) -> Response {
    let context = minijinja::context! {
        title => PAGE_TITLE,
        question => page.question,
        has_default_key => state.context.default_credential.is_some(),
        row_count => state.context.dataset.len(),
        report => page.report,
        fatal_error => page.fatal_error,
    };
    // Acquire env, get template, and render within the same block
    state
        .templates
        .acquire_env()
        .and_then(|env| env.get_template("index.html").and_then(|tmpl| tmpl.render(context)))
        .map(|html| (status, Html(html)).into_response())
        .unwrap_or_else(|e| {
            error!("Failed to get or render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(format!("Internal Server Error: {}", e))).into_response()
        })
}

async fn index_handler(State(state): State<AppState>) -> Response {
    render_page(&state, Page { question: "", report: None, fatal_error: None }, StatusCode::OK)
}

/// Runs one interaction to completion before responding.
async fn query_handler(State(state): State<AppState>, Form(form): Form<QueryForm>) -> Response {
    let api_key = Some(form.api_key.as_str()).filter(|k| !k.trim().is_empty());
    match state.context.ask(&form.question, api_key).await {
        Ok(report) => {
            let page = Page { question: &form.question, report: report.as_ref(), fatal_error: None };
            render_page(&state, page, StatusCode::OK)
        }
        Err(e) => {
            warn!(error = %e, "Interaction aborted");
            let page = Page { question: &form.question, report: None, fatal_error: Some(e.to_string()) };
            render_page(&state, page, StatusCode::BAD_GATEWAY)
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

pub fn router(context: Arc<AppContext>, templates_dir: String, static_dir: String) -> Router {
    let state = AppState { templates: Arc::new(create_minijinja_env(templates_dir)), context };

    // Serve static files from the `static` directory
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(|_req: axum::extract::Request| async {
        Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
    }));

    Router::new()
        .route("/", get(index_handler))
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(port: u16, context: Arc<AppContext>) -> Result<()> {
    let app = router(context, constants::TEMPLATES_DIR.clone(), constants::STATIC_DIR.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service()).await.context("Web server failed")?;

    Ok(())
}
