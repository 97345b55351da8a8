//! Host runtime interface
//!
//! The query engine that loads this plugin owns scheduling, caching and
//! limit enforcement. These types are the narrow surface tables see: the
//! columns and quals of a query, and a stream to push rows into.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::mpsc;

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// Comparison operator of a qual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "=" | "==" => Operator::Eq,
            "<>" | "!=" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            _ => bail!("Unknown operator: {}", s),
        })
    }
}

/// A column restriction pushed down by the host
#[derive(Debug, Clone, PartialEq)]
pub struct Qual {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

/// Operators in the order they are tried at a given position, longest first
const OPERATOR_TOKENS: &[&str] = &["<>", "!=", "<=", ">=", "==", "=", "<", ">"];

impl Qual {
    pub fn new(column: &str, operator: Operator, value: Value) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Eq, value.into())
    }

    /// Parse `column<op>value`, e.g. `lifecycle_state=RUNNING` or
    /// `time_created>=2024-01-01`. Numbers and booleans become JSON
    /// numbers/booleans; single or double quotes force a string.
    pub fn parse(expr: &str) -> Result<Self> {
        let Some((pos, token)) = expr
            .char_indices()
            .find_map(|(i, _)| {
                OPERATOR_TOKENS
                    .iter()
                    .find(|t| expr[i..].starts_with(*t))
                    .map(|t| (i, *t))
            })
        else {
            bail!("Qual '{}' has no operator", expr);
        };

        let column = expr[..pos].trim();
        if column.is_empty() {
            bail!("Qual '{}' has no column", expr);
        }
        let raw = expr[pos + token.len()..].trim();

        Ok(Self::new(column, token.parse()?, parse_value(raw)))
    }
}

fn parse_value(raw: &str) -> Value {
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// What the host asks of a table
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// Requested columns; empty means all
    pub columns: Vec<String>,
    pub quals: Vec<Qual>,
    pub limit: Option<u64>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_qual(mut self, qual: Qual) -> Self {
        self.quals.push(qual);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Value of the first `=` qual on `column`
    pub fn equals_qual(&self, column: &str) -> Option<&Value> {
        self.quals
            .iter()
            .find(|q| q.column == column && q.operator == Operator::Eq)
            .map(|q| &q.value)
    }

    /// `=` qual on `column` as a string
    pub fn equals_qual_str(&self, column: &str) -> Option<String> {
        self.equals_qual(column).map(value_to_param)
    }

    pub fn needs_column(&self, name: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == name)
    }
}

/// Render a qual value as a query parameter
pub fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Row channel to the host, enforcing the query limit
pub struct RowStream {
    tx: mpsc::Sender<Row>,
    limit: Option<u64>,
    streamed: AtomicU64,
    closed: AtomicBool,
}

impl RowStream {
    pub fn new(tx: mpsc::Sender<Row>, limit: Option<u64>) -> Self {
        Self {
            tx,
            limit,
            streamed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Send a row. Returns false once the limit is reached or the host
    /// stopped reading, after which callers should stop paginating.
    pub async fn stream(&self, row: Row) -> bool {
        if self.is_done() {
            return false;
        }
        let previous = self.streamed.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(limit) = self.limit {
            if previous >= limit {
                self.streamed.fetch_sub(1, AtomicOrdering::SeqCst);
                return false;
            }
        }
        if self.tx.send(row).await.is_err() {
            tracing::debug!("Host stopped reading rows");
            self.streamed.fetch_sub(1, AtomicOrdering::SeqCst);
            self.closed.store(true, AtomicOrdering::SeqCst);
            return false;
        }
        true
    }

    /// Rows still wanted; `None` when the query has no limit
    pub fn rows_remaining(&self) -> Option<u64> {
        self.limit
            .map(|limit| limit.saturating_sub(self.streamed.load(AtomicOrdering::SeqCst)))
    }

    pub fn is_done(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
            || self.tx.is_closed()
            || self.rows_remaining() == Some(0)
    }

    pub fn streamed(&self) -> u64 {
        self.streamed.load(AtomicOrdering::SeqCst)
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (a, b) => Some(value_to_param(a).cmp(&value_to_param(b))),
    }
}

/// Host-side check of a qual against a finished row. Nulls never match.
pub fn qual_matches(row: &Row, qual: &Qual) -> bool {
    let value = row.get(&qual.column).unwrap_or(&Value::Null);
    compare(value, &qual.value)
        .map(|ordering| qual.operator.accepts(ordering))
        .unwrap_or(false)
}
