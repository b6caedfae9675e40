use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::filter::{is_identifier, Filter};
use super::record::{compare_values, Record};
use crate::error::{LinkError, Result};

/// Default primary key column.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Shape of a table query: projection, filter, ordering and row limit.
///
/// Together with the table name this determines the [`CacheKey`] a consumer
/// is attached to.
///
/// # Example
///
/// ```rust
/// use estate_link::{Filter, QueryOptions};
///
/// let options = QueryOptions::new()
///     .with_filter(Filter::eq("status", "available"))
///     .with_order_by("created_at", false)
///     .with_limit(100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Projection, e.g. `"*"` or `"id,title,price"`.
    #[serde(default = "default_select")]
    pub select: String,

    #[serde(default)]
    pub filter: Filter,

    /// Ordering column; `None` keeps the store's natural order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    #[serde(default = "default_ascending")]
    pub ascending: bool,

    /// Requested row limit, capped by the executor's `max_rows`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

fn default_select() -> String {
    "*".to_string()
}

fn default_ascending() -> bool {
    true
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            select: default_select(),
            filter: Filter::All,
            order_by: None,
            ascending: true,
            limit: None,
            primary_key: default_primary_key(),
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = select.into();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(column.into());
        self.ascending = ascending;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        if self.select.trim().is_empty() {
            return Err(LinkError::validation("select must not be empty"));
        }
        if let Some(column) = &self.order_by {
            if !is_identifier(column) {
                return Err(LinkError::validation(format!(
                    "Invalid order_by column '{}'",
                    column
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(LinkError::validation("limit must be greater than zero"));
        }
        if !is_identifier(&self.primary_key) {
            return Err(LinkError::validation(format!(
                "Invalid primary key column '{}'",
                self.primary_key
            )));
        }
        Ok(())
    }

    /// Ordering used when merging change events into a view: the declared
    /// column and direction first, ties broken by primary key ascending.
    pub fn compare_records(&self, a: &Record, b: &Record) -> Ordering {
        if let Some(column) = &self.order_by {
            let by_column = compare_values(a.get(column), b.get(column));
            let by_column = if self.ascending {
                by_column
            } else {
                match (a.get(column), b.get(column)) {
                    // Missing values stay last in both directions.
                    (Some(x), Some(y)) if !x.is_null() && !y.is_null() => by_column.reverse(),
                    _ => by_column,
                }
            };
            if by_column != Ordering::Equal {
                return by_column;
            }
        }
        compare_values(a.get(&self.primary_key), b.get(&self.primary_key))
    }

    /// Stable serialized form of everything that shapes the result set.
    pub fn fingerprint(&self) -> String {
        let order = match &self.order_by {
            Some(column) => format!("{}.{}", column, if self.ascending { "asc" } else { "desc" }),
            None => String::new(),
        };
        let limit = self.limit.map(|l| l.to_string()).unwrap_or_default();
        format!(
            "select={}&filter={}&order={}&limit={}&pk={}",
            self.select.trim(),
            self.filter.to_expr(),
            order,
            limit,
            self.primary_key
        )
    }
}

/// A table name together with its query options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQuery {
    pub table: String,
    #[serde(default)]
    pub options: QueryOptions,
}

impl TableQuery {
    pub fn new(table: impl Into<String>, options: QueryOptions) -> Self {
        Self {
            table: table.into(),
            options,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.table)?;
        self.options.validate()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            table: self.table.clone(),
            fingerprint: self.options.fingerprint(),
        }
    }
}

/// Identifier partitioning cached snapshots: table plus the serialized query
/// shape (filter, projection, ordering, limit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    table: String,
    fingerprint: String,
}

impl CacheKey {
    pub fn new(table: impl Into<String>, options: &QueryOptions) -> Self {
        Self {
            table: table.into(),
            fingerprint: options.fingerprint(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.table, self.fingerprint)
    }
}

pub(crate) fn validate_table_name(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        return Err(LinkError::validation("table name must not be empty"));
    }
    if !is_identifier(table) {
        return Err(LinkError::validation(format!("Invalid table name '{}'", table)));
    }
    Ok(())
}
