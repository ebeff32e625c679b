use crate::pipeline::enrich::EnrichedRow;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupResult {
    pub query: String,
    pub status: LookupStatus,
    pub message: String,
    pub matches: Vec<EnrichedRow>,
}

impl LookupResult {
    pub fn is_found(&self) -> bool {
        self.status == LookupStatus::Found
    }
}

pub fn normalize_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Case-insensitive exact match on the symbol column. A symbol may appear more
/// than once (one row per series), so every match is returned in table order.
/// Returns `None` for a blank query.
pub fn lookup_symbol(rows: &[EnrichedRow], query: &str) -> Option<LookupResult> {
    let query = normalize_symbol(query);
    if query.is_empty() {
        return None;
    }

    let matches: Vec<EnrichedRow> = rows
        .iter()
        .filter(|r| {
            r.symbol
                .as_deref()
                .is_some_and(|s| s.to_uppercase() == query)
        })
        .cloned()
        .collect();

    let (status, message) = if matches.is_empty() {
        (LookupStatus::NotFound, "Stock not found.".to_string())
    } else {
        (
            LookupStatus::Found,
            format!("Found {} row(s) for {query}", matches.len()),
        )
    };

    Some(LookupResult {
        query,
        status,
        message,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<EnrichedRow> {
        ["TCS", "INFY", "tcs", "WIPRO"]
            .iter()
            .map(|s| EnrichedRow::from_canonical(Some(s.to_string()), None, None, None, None))
            .chain(std::iter::once(EnrichedRow::from_canonical(
                None, None, None, None, None,
            )))
            .collect()
    }

    #[test]
    fn match_is_case_insensitive_on_both_sides() {
        let table = rows();
        let a = lookup_symbol(&table, "tcs").unwrap();
        let b = lookup_symbol(&table, "TCS").unwrap();
        let c = lookup_symbol(&table, " Tcs ").unwrap();

        assert_eq!(a.matches, b.matches);
        assert_eq!(b.matches, c.matches);
        assert_eq!(a.matches.len(), 2);
        assert_eq!(a.message, "Found 2 row(s) for TCS");
        assert!(a.is_found());
    }

    #[test]
    fn exact_match_only() {
        let r = lookup_symbol(&rows(), "TC").unwrap();
        assert_eq!(r.status, LookupStatus::NotFound);
        assert_eq!(r.message, "Stock not found.");
        assert!(r.matches.is_empty());
    }

    #[test]
    fn blank_query_skips_lookup() {
        assert!(lookup_symbol(&rows(), "   ").is_none());
    }
}
