// Process-wide defaults, loaded from the environment (or `.env`) with fallbacks.

use std::env;

lazy_static::lazy_static! {
    pub static ref OPENAI_BASE_URL: String = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    // Model that rewrites the user's question
    pub static ref REFINE_MODEL: String = env::var("EV_REFINE_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
    // Model that turns the refined instruction into a query plan
    pub static ref QUERY_MODEL: String = env::var("EV_QUERY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    pub static ref DATA_PATH: String = env::var("EV_DATA_PATH").unwrap_or_else(|_| "cleaned_ev_data.csv".to_string());
    pub static ref CHART_DIR: String = env::var("EV_CHART_DIR").unwrap_or_else(|_| "exports/charts".to_string());
    pub static ref TEMPLATES_DIR: String = env::var("EV_TEMPLATES_DIR").unwrap_or_else(|_| concat!(env!("CARGO_MANIFEST_DIR"), "/templates").to_string());
    pub static ref STATIC_DIR: String = env::var("EV_STATIC_DIR").unwrap_or_else(|_| concat!(env!("CARGO_MANIFEST_DIR"), "/static").to_string());
}

/// Rows of the dataset shown to the query planner alongside the schema.
pub const SCHEMA_SAMPLE_ROWS: usize = 3;

pub const DEFAULT_PORT: u16 = 8501;
