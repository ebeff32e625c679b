use crate::ingest::{RawRecord, RawSnapshot, RawValue};
use crate::pipeline::schema::{CanonicalColumns, CanonicalRole, ResolvedColumn};
use serde::Serialize;
use std::fmt;

pub const PRICE_CATEGORY_COLUMN: &str = "PRICE_CATEGORY";
pub const PCT_CHANGE_COLUMN: &str = "PCT_CHANGE";
pub const TREND_COLUMN: &str = "TREND";

const MID_PRICE_FLOOR: f64 = 100.0;
const HIGH_PRICE_FLOOR: f64 = 500.0;
const STRONG_GAIN_PCT: f64 = 2.0;
const FLAT_FLOOR_PCT: f64 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PriceCategory {
    Low,
    Mid,
    High,
}

impl PriceCategory {
    pub fn label(self) -> &'static str {
        match self {
            PriceCategory::Low => "Low",
            PriceCategory::Mid => "Mid",
            PriceCategory::High => "High",
        }
    }
}

impl fmt::Display for PriceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Trend {
    #[serde(rename = "Strong Gainer")]
    StrongGainer,
    #[serde(rename = "Mild Gainer")]
    MildGainer,
    Flat,
    Loser,
}

impl Trend {
    pub fn label(self) -> &'static str {
        match self {
            Trend::StrongGainer => "Strong Gainer",
            Trend::MildGainer => "Mild Gainer",
            Trend::Flat => "Flat",
            Trend::Loser => "Loser",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Low below 100, Mid in [100, 500), High from 500 up.
pub fn price_category(price: f64) -> PriceCategory {
    if price < MID_PRICE_FLOOR {
        PriceCategory::Low
    } else if price < HIGH_PRICE_FLOOR {
        PriceCategory::Mid
    } else {
        PriceCategory::High
    }
}

/// Upper bounds are inclusive: exactly +2 is a mild gain, 0 is flat, and exactly -2
/// is a loser.
pub fn trend_label(pct_change: f64) -> Trend {
    if pct_change > STRONG_GAIN_PCT {
        Trend::StrongGainer
    } else if pct_change > 0.0 {
        Trend::MildGainer
    } else if pct_change > FLAT_FLOOR_PCT {
        Trend::Flat
    } else {
        Trend::Loser
    }
}

/// Open-to-close change in percent; `None` when either side is missing or open is zero.
pub fn percent_change(open: Option<f64>, close: Option<f64>) -> Option<f64> {
    let (open, close) = (open?, close?);
    if open == 0.0 {
        return None;
    }
    Some((close - open) / open * 100.0).filter(|p| p.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRow {
    pub symbol: Option<String>,
    pub open_price: Option<f64>,
    pub close_price: Option<f64>,
    pub traded_value: Option<f64>,
    pub sector: Option<String>,
    pub price_category: Option<PriceCategory>,
    pub pct_change: Option<f64>,
    pub trend: Option<Trend>,
}

impl EnrichedRow {
    /// Derives the analytic fields from already-coerced canonical values.
    pub fn from_canonical(
        symbol: Option<String>,
        open_price: Option<f64>,
        close_price: Option<f64>,
        traded_value: Option<f64>,
        sector: Option<String>,
    ) -> Self {
        let pct_change = percent_change(open_price, close_price);
        Self {
            symbol,
            open_price,
            close_price,
            traded_value,
            sector,
            price_category: close_price.map(price_category),
            pct_change,
            trend: pct_change.map(trend_label),
        }
    }

    /// Display cells for the resolved roles followed by the derived columns, in the
    /// same order as [`EnrichedTable::header`]. `None` renders as an empty cell.
    pub fn cells(&self, columns: &CanonicalColumns) -> Vec<Option<String>> {
        let mut out: Vec<Option<String>> = columns
            .resolved()
            .map(|(role, _)| match role {
                CanonicalRole::Symbol => self.symbol.clone(),
                CanonicalRole::OpenPrice => self.open_price.map(|v| v.to_string()),
                CanonicalRole::ClosePrice => self.close_price.map(|v| v.to_string()),
                CanonicalRole::TradedValue => self.traded_value.map(|v| v.to_string()),
                CanonicalRole::Sector => self.sector.clone(),
            })
            .collect();
        out.push(self.price_category.map(|c| c.label().to_string()));
        out.push(self.pct_change.map(|v| v.to_string()));
        out.push(self.trend.map(|t| t.label().to_string()));
        out
    }
}

fn cell<'a>(record: &RawRecord<'a>, column: Option<&ResolvedColumn>) -> Option<&'a RawValue> {
    column.and_then(|c| record.cell(c.index))
}

pub fn enrich_row(record: &RawRecord<'_>, columns: &CanonicalColumns) -> EnrichedRow {
    EnrichedRow::from_canonical(
        cell(record, columns.symbol.as_ref()).and_then(RawValue::as_text),
        cell(record, columns.open_price.as_ref()).and_then(RawValue::as_f64),
        cell(record, columns.close_price.as_ref()).and_then(RawValue::as_f64),
        cell(record, columns.traded_value.as_ref()).and_then(RawValue::as_f64),
        cell(record, columns.sector.as_ref()).and_then(RawValue::as_text),
    )
}

/// Enriched rows in source order, with the mapping they were built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTable {
    pub columns: CanonicalColumns,
    pub rows: Vec<EnrichedRow>,
}

impl EnrichedTable {
    pub fn header(&self) -> Vec<String> {
        header_for(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn header_for(columns: &CanonicalColumns) -> Vec<String> {
    let mut out: Vec<String> = columns.resolved().map(|(_, c)| c.name.clone()).collect();
    out.extend(
        [PRICE_CATEGORY_COLUMN, PCT_CHANGE_COLUMN, TREND_COLUMN]
            .iter()
            .map(|s| s.to_string()),
    );
    out
}

/// Every raw row yields exactly one enriched row; bad cells only null their fields.
pub fn enrich_snapshot(snapshot: &RawSnapshot, columns: &CanonicalColumns) -> EnrichedTable {
    let rows: Vec<EnrichedRow> = snapshot
        .records()
        .map(|rec| enrich_row(&rec, columns))
        .collect();

    let uncategorized = rows.iter().filter(|r| r.trend.is_none()).count();
    if uncategorized > 0 {
        tracing::debug!(
            rows = rows.len(),
            uncategorized,
            "rows without a computable percent change"
        );
    }

    EnrichedTable {
        columns: columns.clone(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::{resolve_columns, AliasTable};

    #[test]
    fn price_category_boundaries() {
        assert_eq!(price_category(-5.0), PriceCategory::Low);
        assert_eq!(price_category(99.99), PriceCategory::Low);
        assert_eq!(price_category(100.0), PriceCategory::Mid);
        assert_eq!(price_category(499.99), PriceCategory::Mid);
        assert_eq!(price_category(500.0), PriceCategory::High);
        assert_eq!(price_category(1e9), PriceCategory::High);
    }

    #[test]
    fn trend_boundaries() {
        assert_eq!(trend_label(2.0001), Trend::StrongGainer);
        assert_eq!(trend_label(2.0), Trend::MildGainer);
        assert_eq!(trend_label(0.0001), Trend::MildGainer);
        assert_eq!(trend_label(0.0), Trend::Flat);
        assert_eq!(trend_label(-2.0), Trend::Loser);
        assert_eq!(trend_label(-1.9999), Trend::Flat);
        assert_eq!(trend_label(-50.0), Trend::Loser);
    }

    #[test]
    fn percent_change_is_none_for_zero_or_missing_open() {
        assert_eq!(percent_change(Some(0.0), Some(10.0)), None);
        assert_eq!(percent_change(None, Some(10.0)), None);
        assert_eq!(percent_change(Some(10.0), None), None);
        assert_eq!(percent_change(Some(100.0), Some(103.0)), Some(3.0));
    }

    #[test]
    fn zero_open_leaves_derived_fields_empty_but_keeps_category() {
        let row = EnrichedRow::from_canonical(Some("X".into()), Some(0.0), Some(10.0), None, None);
        assert_eq!(row.pct_change, None);
        assert_eq!(row.trend, None);
        assert_eq!(row.price_category, Some(PriceCategory::Low));
    }

    #[test]
    fn strong_gainer_scenario() {
        let row = EnrichedRow::from_canonical(None, Some(100.0), Some(103.0), None, None);
        assert_eq!(row.pct_change, Some(3.0));
        assert_eq!(row.trend, Some(Trend::StrongGainer));
        assert_eq!(row.price_category, Some(PriceCategory::Mid));
    }

    #[test]
    fn recomputing_is_idempotent() {
        let a = EnrichedRow::from_canonical(None, Some(412.5), Some(405.0), None, None);
        let b = EnrichedRow::from_canonical(
            a.symbol.clone(),
            a.open_price,
            a.close_price,
            a.traded_value,
            a.sector.clone(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn non_numeric_cells_do_not_drop_rows() {
        let csv = "SYMBOL,OPEN_PRICE,CLOSE_PRICE,IndNm\n\
                   TCS,3990,4015.5,IT\n\
                   BAD,n/a,12,Misc\n\
                   HALF,55,-,Misc\n";
        let snap = RawSnapshot::from_csv_reader(csv.as_bytes()).unwrap();
        let cols = resolve_columns(snap.columns(), &AliasTable::default());
        let table = enrich_snapshot(&snap, &cols);

        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[1].open_price, None);
        assert_eq!(table.rows[1].trend, None);
        assert_eq!(table.rows[1].price_category, Some(PriceCategory::Low));
        assert_eq!(table.rows[2].close_price, None);
        assert_eq!(table.rows[2].price_category, None);
    }

    #[test]
    fn header_and_cells_follow_resolved_role_order() {
        let csv = "IndNm,CLOSE_PRICE,SYMBOL\nIT,600,TCS\n";
        let snap = RawSnapshot::from_csv_reader(csv.as_bytes()).unwrap();
        let cols = resolve_columns(snap.columns(), &AliasTable::default());
        let table = enrich_snapshot(&snap, &cols);

        assert_eq!(
            table.header(),
            vec!["SYMBOL", "CLOSE_PRICE", "IndNm", "PRICE_CATEGORY", "PCT_CHANGE", "TREND"]
        );
        assert_eq!(
            table.rows[0].cells(&table.columns),
            vec![
                Some("TCS".to_string()),
                Some("600".to_string()),
                Some("IT".to_string()),
                Some("High".to_string()),
                None,
                None,
            ]
        );
    }
}
