use crate::pipeline::enrich::EnrichedRow;
use crate::pipeline::schema::{CanonicalColumns, CanonicalRole};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_TOP_N: usize = 10;

/// Which rows the summary views are computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateScope {
    /// Only the page being displayed.
    #[default]
    CurrentPage,
    FullTable,
}

impl FromStr for AggregateScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "page" | "current_page" => Ok(AggregateScope::CurrentPage),
            "full" | "full_table" | "table" => Ok(AggregateScope::FullTable),
            other => anyhow::bail!("unknown aggregate scope {other:?} (expected page or full)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

/// Highest `n` rows by `value`, descending. Rows without a value sort last and
/// equal values keep their input order.
pub fn top_n_by<T, F>(rows: &[T], n: usize, value: F) -> Vec<&T>
where
    F: Fn(&T) -> Option<f64>,
{
    let mut keyed: Vec<(Option<f64>, &T)> = rows.iter().map(|r| (value(r), r)).collect();
    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    keyed.into_iter().take(n).map(|(_, r)| r).collect()
}

/// Counts rows per exact category string. Ordered by count descending, ties in
/// order of first appearance. Rows without a category are not counted.
pub fn categorical_distribution<'a, T, F>(rows: &'a [T], category: F) -> Vec<CategoryCount>
where
    F: Fn(&'a T) -> Option<&'a str>,
{
    let mut out: Vec<CategoryCount> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let Some(key) = category(row) else {
            continue;
        };
        match positions.get(key) {
            Some(&pos) => out[pos].count += 1,
            None => {
                positions.insert(key, out.len());
                out.push(CategoryCount {
                    category: key.to_string(),
                    count: 1,
                });
            }
        }
    }
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

pub fn top_by_traded_value(rows: &[EnrichedRow], n: usize) -> Vec<EnrichedRow> {
    top_n_by(rows, n, |r| r.traded_value)
        .into_iter()
        .cloned()
        .collect()
}

pub fn sector_distribution(rows: &[EnrichedRow]) -> Vec<CategoryCount> {
    categorical_distribution(rows, |r| r.sector.as_deref())
}

/// Summary views; a view is `None` when its source column was not resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub top_by_value: Option<Vec<EnrichedRow>>,
    pub sector_distribution: Option<Vec<CategoryCount>>,
}

pub fn compute_aggregates(
    columns: &CanonicalColumns,
    rows: &[EnrichedRow],
    top_n: usize,
) -> Aggregates {
    Aggregates {
        top_by_value: columns
            .has(CanonicalRole::TradedValue)
            .then(|| top_by_traded_value(rows, top_n)),
        sector_distribution: columns
            .has(CanonicalRole::Sector)
            .then(|| sector_distribution(rows)),
    }
}
