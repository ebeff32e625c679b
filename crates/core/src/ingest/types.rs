use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;

/// A single cell of a raw snapshot. Sources disagree on types, so nothing is
/// coerced at ingest time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => RawValue::Null,
            Value::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Null),
            Value::String(s) => RawValue::Text(s.clone()),
            Value::Bool(b) => RawValue::Text(b.to_string()),
            other => RawValue::Text(other.to_string()),
        }
    }

    pub fn from_csv_field(field: &str) -> Self {
        if field.is_empty() {
            RawValue::Null
        } else {
            RawValue::Text(field.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Numeric coercion. Anything that does not parse to a finite number is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Null => None,
            RawValue::Number(n) => Some(*n).filter(|n| n.is_finite()),
            RawValue::Text(s) => parse_num(s),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Null => None,
            RawValue::Number(n) => Some(n.to_string()),
            RawValue::Text(s) => Some(s.clone()),
        }
    }
}

fn parse_num(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let cleaned: String = t.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Column-ordered raw table as delivered by a snapshot source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawSnapshot {
    columns: Vec<String>,
    rows: Vec<Vec<RawValue>>,
}

impl RawSnapshot {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row; short rows are padded with nulls and extra cells are dropped.
    pub fn push_row(&mut self, mut cells: Vec<RawValue>) {
        cells.resize(self.columns.len(), RawValue::Null);
        self.rows.push(cells);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn records(&self) -> impl Iterator<Item = RawRecord<'_>> {
        self.rows.iter().map(move |cells| RawRecord {
            columns: &self.columns,
            cells,
        })
    }

    /// Builds a snapshot from a list of JSON objects. Columns are ordered by first
    /// appearance across the records.
    pub fn from_json_records(records: &[Value]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for (idx, rec) in records.iter().enumerate() {
            let obj = rec
                .as_object()
                .with_context(|| format!("snapshot record {idx} is not a JSON object"))?;
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut out = Self::new(columns);
        for rec in records {
            let Some(obj) = rec.as_object() else {
                continue;
            };
            let cells = out
                .columns
                .iter()
                .map(|c| obj.get(c).map(RawValue::from_json).unwrap_or(RawValue::Null))
                .collect();
            out.push_row(cells);
        }
        Ok(out)
    }

    /// Parses a headered CSV. Fields are trimmed and empty fields become nulls.
    /// Input with no header at all (a zero-byte file) is an empty snapshot.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = rdr
            .headers()
            .context("failed to read CSV header")?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        if columns.iter().all(String::is_empty) {
            return Ok(Self::default());
        }

        let mut out = Self::new(columns);
        for (idx, rec) in rdr.records().enumerate() {
            let rec = rec.with_context(|| format!("CSV parse error at record {}", idx + 1))?;
            // Trailing blank lines show up as a single empty field.
            if rec.len() == 1 && rec.get(0).is_some_and(str::is_empty) {
                continue;
            }
            out.push_row(rec.iter().map(RawValue::from_csv_field).collect());
        }
        Ok(out)
    }
}

/// Borrowed view of one snapshot row.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    columns: &'a [String],
    cells: &'a [RawValue],
}

impl<'a> RawRecord<'a> {
    pub fn get(&self, column: &str) -> Option<&'a RawValue> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.cells.get(idx)
    }

    pub fn cell(&self, index: usize) -> Option<&'a RawValue> {
        self.cells.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numbers_from_text_and_rejects_garbage() {
        assert_eq!(RawValue::Text(" 1,234.50 ".into()).as_f64(), Some(1234.5));
        assert_eq!(RawValue::Number(7.0).as_f64(), Some(7.0));
        assert_eq!(RawValue::Text("-".into()).as_f64(), None);
        assert_eq!(RawValue::Text("NaN".into()).as_f64(), None);
        assert_eq!(RawValue::Number(f64::INFINITY).as_f64(), None);
        assert_eq!(RawValue::Null.as_f64(), None);
    }

    #[test]
    fn json_records_keep_first_seen_column_order_and_pad_missing() {
        let records = vec![
            json!({"SYMBOL": "TCS", "OPEN_PRICE": 3500.0}),
            json!({"SYMBOL": "INFY", "IndNm": "IT"}),
        ];
        let snap = RawSnapshot::from_json_records(&records).unwrap();
        assert_eq!(snap.len(), 2);
        assert!(snap.columns().contains(&"IndNm".to_string()));

        let second = snap.records().nth(1).unwrap();
        assert_eq!(second.get("OPEN_PRICE"), Some(&RawValue::Null));
        assert_eq!(second.get("IndNm"), Some(&RawValue::Text("IT".into())));
    }

    #[test]
    fn rejects_non_object_json_records() {
        let res = RawSnapshot::from_json_records(&[json!([1, 2, 3])]);
        assert!(res.is_err());
    }

    #[test]
    fn zero_byte_csv_is_an_empty_snapshot() {
        let snap = RawSnapshot::from_csv_reader("".as_bytes()).unwrap();
        assert!(snap.is_empty());
        assert!(snap.columns().is_empty());

        let blank = RawSnapshot::from_csv_reader("\n\n".as_bytes()).unwrap();
        assert!(blank.is_empty());
    }

    #[test]
    fn parses_csv_with_bom_blank_fields_and_short_rows() {
        let csv = "\u{feff}SYMBOL,OPEN_PRICE,CLOSE_PRICE\nTCS, 3500 ,3520\nINFY,,\nWIPRO\n";
        let snap = RawSnapshot::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(snap.columns()[0], "SYMBOL");
        assert_eq!(snap.len(), 3);

        let rows: Vec<_> = snap.records().collect();
        assert_eq!(rows[0].get("OPEN_PRICE").and_then(RawValue::as_f64), Some(3500.0));
        assert!(rows[1].get("OPEN_PRICE").unwrap().is_null());
        assert!(rows[2].get("CLOSE_PRICE").unwrap().is_null());
    }
}
