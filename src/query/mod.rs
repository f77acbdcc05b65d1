//! Natural-language queries over the dataset.

pub mod plan;
pub mod smart_table;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::chart::{format_value, Figure};
use crate::error::QueryError;

pub use plan::QueryPlan;
pub use smart_table::{ChartOutput, SmartTable};

/// Answers a refined instruction against a dataset.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn chat(&self, instruction: &str) -> Result<Answer, QueryError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnswerValue {
    Text(String),
    Number(f64),
    /// One value per group, in display order.
    Series { label: String, value_label: String, rows: Vec<(String, f64)> },
    List(Vec<String>),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Text(text) => f.write_str(text),
            AnswerValue::Number(n) => f.write_str(&format_value(*n)),
            AnswerValue::Series { label, value_label, rows } => {
                write!(f, "{} | {}", label, value_label)?;
                for (key, value) in rows {
                    write!(f, "\n{} | {}", key, format_value(*value))?;
                }
                Ok(())
            }
            AnswerValue::List(items) if items.is_empty() => f.write_str("(none)"),
            AnswerValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Chart produced alongside an answer, if any.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ChartArtifact {
    Figure(Figure),
    ImagePath(PathBuf),
    #[default]
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    pub value: AnswerValue,
    pub chart: ChartArtifact,
}

impl Answer {
    pub fn text(text: impl Into<String>) -> Self {
        Self { value: AnswerValue::Text(text.into()), chart: ChartArtifact::None }
    }
}
