//! Structured query plans and their execution against a [`Dataset`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::chart::{ChartKind, Figure};
use crate::dataset::{parse_number, ColumnKind, Dataset};
use crate::error::QueryError;
use crate::query::AnswerValue;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub sort: Option<SortOrder>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub chart: Option<ChartSpec>,
    /// Set by the planner when the question cannot be answered from the table.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[serde(alias = "=", alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    Contains,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub op: AggregateOp,
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    CountDistinct,
    Sum,
    #[serde(alias = "avg", alias = "average")]
    Mean,
    Min,
    Max,
    List,
}

impl AggregateOp {
    fn name(self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::CountDistinct => "distinct count",
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::List => "list",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    #[serde(default)]
    pub title: Option<String>,
}

/// Result of running a plan: the value and, for charted plans, its figure.
#[derive(Debug, PartialEq)]
pub struct PlanResult {
    pub value: AnswerValue,
    pub figure: Option<Figure>,
}

const BLANK_GROUP: &str = "(blank)";

struct ResolvedFilter {
    col: usize,
    op: FilterOp,
    text: String,
    number: Option<f64>,
}

impl ResolvedFilter {
    fn matches(&self, cell: &str) -> bool {
        let cell_number = parse_number(cell);
        match self.op {
            FilterOp::Eq => equals(cell, cell_number, &self.text, self.number),
            FilterOp::Ne => !equals(cell, cell_number, &self.text, self.number),
            FilterOp::Contains => cell.to_lowercase().contains(&self.text.to_lowercase()),
            FilterOp::Gt => compare(cell_number, self.number, |a, b| a > b),
            FilterOp::Gte => compare(cell_number, self.number, |a, b| a >= b),
            FilterOp::Lt => compare(cell_number, self.number, |a, b| a < b),
            FilterOp::Lte => compare(cell_number, self.number, |a, b| a <= b),
        }
    }
}

fn equals(cell: &str, cell_number: Option<f64>, text: &str, number: Option<f64>) -> bool {
    match (cell_number, number) {
        (Some(a), Some(b)) => a == b,
        _ => cell.eq_ignore_ascii_case(text.trim()),
    }
}

fn compare(cell: Option<f64>, target: Option<f64>, cmp: impl Fn(f64, f64) -> bool) -> bool {
    matches!((cell, target), (Some(a), Some(b)) if cmp(a, b))
}

impl QueryPlan {
    /// Parses the planner's reply, tolerating Markdown code fences and prose around the JSON.
    pub fn parse(reply: &str) -> Result<Self, QueryError> {
        let body = extract_json(reply).ok_or_else(|| QueryError::InvalidPlan("no JSON object in reply".to_string()))?;
        serde_json::from_str(body).map_err(|e| QueryError::InvalidPlan(e.to_string()))
    }

    pub fn execute(&self, dataset: &Dataset) -> Result<PlanResult, QueryError> {
        if let Some(reason) = &self.error {
            return Err(QueryError::Unsupported(reason.clone()));
        }
        let aggregate = self
            .aggregate
            .as_ref()
            .ok_or_else(|| QueryError::InvalidPlan("missing aggregate".to_string()))?;

        let filters = self
            .filters
            .iter()
            .map(|f| {
                let text = match &f.value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    other => return Err(QueryError::InvalidPlan(format!("unsupported filter value {}", other))),
                };
                let number = parse_number(&text);
                if matches!(f.op, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte) && number.is_none() {
                    return Err(QueryError::InvalidPlan(format!("filter on '{}' compares against non-number '{}'", f.column, text)));
                }
                Ok(ResolvedFilter { col: dataset.column_index(&f.column)?, op: f.op, text, number })
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        let selected: Vec<usize> = dataset
            .rows()
            .enumerate()
            .filter(|(_, row)| filters.iter().all(|f| f.matches(&row[f.col])))
            .map(|(i, _)| i)
            .collect();

        let column = match &aggregate.column {
            Some(name) => Some(dataset.column_index(name)?),
            None => None,
        };
        let needs_column = !matches!(aggregate.op, AggregateOp::Count);
        if needs_column && column.is_none() {
            return Err(QueryError::MissingColumn(aggregate.op.name().to_string()));
        }
        if let (Some(col), AggregateOp::Sum | AggregateOp::Mean | AggregateOp::Min | AggregateOp::Max) = (column, aggregate.op) {
            if dataset.column_kind(col) != ColumnKind::Numeric {
                return Err(QueryError::NotNumeric(dataset.column_name(col).to_string()));
            }
        }

        let value_label = match column {
            Some(col) => format!("{} of {}", aggregate.op.name(), dataset.column_name(col)),
            None => aggregate.op.name().to_string(),
        };

        let Some(group_name) = &self.group_by else {
            if self.chart.is_some() {
                return Err(QueryError::ChartWithoutGroups);
            }
            let value = if aggregate.op == AggregateOp::List {
                let col = column.ok_or_else(|| QueryError::MissingColumn(aggregate.op.name().to_string()))?;
                let mut items = distinct_values(dataset, &selected, col);
                if let Some(order) = self.sort {
                    items.sort_by_key(|s| s.to_lowercase());
                    if order == SortOrder::Desc {
                        items.reverse();
                    }
                }
                if let Some(limit) = self.limit {
                    items.truncate(limit);
                }
                AnswerValue::List(items)
            } else {
                let n = aggregate_rows(dataset, &selected, aggregate.op, column).ok_or(QueryError::NoRows)?;
                AnswerValue::Number(n)
            };
            return Ok(PlanResult { value, figure: None });
        };

        if aggregate.op == AggregateOp::List {
            return Err(QueryError::InvalidPlan("list cannot be combined with group_by".to_string()));
        }
        let group_col = dataset.column_index(group_name)?;
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &row in &selected {
            let key = dataset.cell(row, group_col);
            let key = if key.is_empty() { BLANK_GROUP } else { key };
            groups.entry(key.to_string()).or_default().push(row);
        }

        let mut rows: Vec<(String, f64)> = groups
            .into_iter()
            .filter_map(|(key, members)| aggregate_rows(dataset, &members, aggregate.op, column).map(|v| (key, v)))
            .collect();
        match self.sort {
            Some(SortOrder::Asc) => rows.sort_by(|a, b| a.1.total_cmp(&b.1)),
            Some(SortOrder::Desc) => rows.sort_by(|a, b| b.1.total_cmp(&a.1)),
            None => {}
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        let label = dataset.column_name(group_col).to_string();
        let figure = self.chart.as_ref().map(|spec| Figure {
            kind: spec.kind,
            title: spec.title.clone().unwrap_or_else(|| format!("{} by {}", value_label, label)),
            x_label: label.clone(),
            y_label: value_label.clone(),
            points: rows.clone(),
        });

        Ok(PlanResult { value: AnswerValue::Series { label, value_label, rows }, figure })
    }
}

/// `None` when a numeric aggregate has no values to work with.
fn aggregate_rows(dataset: &Dataset, rows: &[usize], op: AggregateOp, column: Option<usize>) -> Option<f64> {
    let numbers = || numeric_cells(dataset, rows, column);
    match op {
        AggregateOp::Count => {
            let count = match column {
                Some(col) => rows.iter().filter(|&&row| !dataset.cell(row, col).is_empty()).count(),
                None => rows.len(),
            };
            Some(count as f64)
        }
        AggregateOp::CountDistinct => column.map(|col| distinct_values(dataset, rows, col).len() as f64),
        AggregateOp::Sum => Some(numbers().sum()),
        AggregateOp::Mean => {
            let (total, count) = numbers().fold((0.0, 0usize), |(t, c), v| (t + v, c + 1));
            (count > 0).then(|| total / count as f64)
        }
        AggregateOp::Min => numbers().reduce(f64::min),
        AggregateOp::Max => numbers().reduce(f64::max),
        AggregateOp::List => None,
    }
}

fn numeric_cells<'a>(dataset: &'a Dataset, rows: &'a [usize], column: Option<usize>) -> impl Iterator<Item = f64> + 'a {
    rows.iter().filter_map(move |&row| column.and_then(|col| dataset.numeric(row, col)))
}

/// Non-empty values in first-seen order.
fn distinct_values(dataset: &Dataset, rows: &[usize], col: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .map(|&row| dataset.cell(row, col))
        .filter(|cell| !cell.is_empty() && seen.insert(cell.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}
