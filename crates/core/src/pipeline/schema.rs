use crate::ingest::RawSnapshot;
use crate::pipeline::error::PipelineError;
use serde::Serialize;
use std::collections::BTreeMap;

/// The logical columns the pipeline understands, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CanonicalRole {
    Symbol,
    OpenPrice,
    ClosePrice,
    TradedValue,
    Sector,
}

impl CanonicalRole {
    pub const ALL: [CanonicalRole; 5] = [
        CanonicalRole::Symbol,
        CanonicalRole::OpenPrice,
        CanonicalRole::ClosePrice,
        CanonicalRole::TradedValue,
        CanonicalRole::Sector,
    ];

    fn env_key(self) -> &'static str {
        match self {
            CanonicalRole::Symbol => "SCHEMA_ALIASES_SYMBOL",
            CanonicalRole::OpenPrice => "SCHEMA_ALIASES_OPEN_PRICE",
            CanonicalRole::ClosePrice => "SCHEMA_ALIASES_CLOSE_PRICE",
            CanonicalRole::TradedValue => "SCHEMA_ALIASES_TRADED_VALUE",
            CanonicalRole::Sector => "SCHEMA_ALIASES_SECTOR",
        }
    }

    fn default_aliases(self) -> &'static [&'static str] {
        match self {
            CanonicalRole::Symbol => &["SYMBOL", "SctySym", "TckrSymb", "FinInstrmNm"],
            CanonicalRole::OpenPrice => &["OPEN_PRICE", "OpnPric"],
            CanonicalRole::ClosePrice => &["CLOSE_PRICE", "ClsPric"],
            CanonicalRole::TradedValue => {
                &["TTL_TRD_VAL", "TradVal", "TotalTradedValue", "TtlTrfVal"]
            }
            CanonicalRole::Sector => &["IndNm", "Sector"],
        }
    }
}

/// Ordered list of accepted source column names per role. Earlier names win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<CanonicalRole, Vec<String>>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let aliases = CanonicalRole::ALL
            .iter()
            .map(|role| {
                let names = role.default_aliases().iter().map(|s| s.to_string()).collect();
                (*role, names)
            })
            .collect();
        Self { aliases }
    }
}

impl AliasTable {
    /// Defaults, with any role overridden by a comma-separated `SCHEMA_ALIASES_<ROLE>`.
    pub fn from_env() -> Self {
        let mut out = Self::default();
        for role in CanonicalRole::ALL {
            if let Ok(s) = std::env::var(role.env_key()) {
                let names: Vec<String> = s
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                if !names.is_empty() {
                    out.aliases.insert(role, names);
                }
            }
        }
        out
    }

    pub fn with_aliases(mut self, role: CanonicalRole, names: Vec<String>) -> Self {
        self.aliases.insert(role, names);
        self
    }

    pub fn aliases(&self, role: CanonicalRole) -> &[String] {
        self.aliases.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A source column bound to a role, with its position in the raw rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedColumn {
    pub name: String,
    #[serde(skip)]
    pub index: usize,
}

/// Role to source column mapping, resolved once per snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalColumns {
    pub symbol: Option<ResolvedColumn>,
    pub open_price: Option<ResolvedColumn>,
    pub close_price: Option<ResolvedColumn>,
    pub traded_value: Option<ResolvedColumn>,
    pub sector: Option<ResolvedColumn>,
}

impl CanonicalColumns {
    pub fn get(&self, role: CanonicalRole) -> Option<&ResolvedColumn> {
        match role {
            CanonicalRole::Symbol => self.symbol.as_ref(),
            CanonicalRole::OpenPrice => self.open_price.as_ref(),
            CanonicalRole::ClosePrice => self.close_price.as_ref(),
            CanonicalRole::TradedValue => self.traded_value.as_ref(),
            CanonicalRole::Sector => self.sector.as_ref(),
        }
    }

    fn slot(&mut self, role: CanonicalRole) -> &mut Option<ResolvedColumn> {
        match role {
            CanonicalRole::Symbol => &mut self.symbol,
            CanonicalRole::OpenPrice => &mut self.open_price,
            CanonicalRole::ClosePrice => &mut self.close_price,
            CanonicalRole::TradedValue => &mut self.traded_value,
            CanonicalRole::Sector => &mut self.sector,
        }
    }

    pub fn has(&self, role: CanonicalRole) -> bool {
        self.get(role).is_some()
    }

    /// Resolved roles in display order.
    pub fn resolved(&self) -> impl Iterator<Item = (CanonicalRole, &ResolvedColumn)> {
        CanonicalRole::ALL
            .into_iter()
            .filter_map(move |role| self.get(role).map(|c| (role, c)))
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved().count()
    }
}

/// For each role, picks the first alias present in `columns`.
pub fn resolve_columns(columns: &[String], aliases: &AliasTable) -> CanonicalColumns {
    let mut out = CanonicalColumns::default();
    for role in CanonicalRole::ALL {
        let hit = aliases.aliases(role).iter().find_map(|alias| {
            columns
                .iter()
                .position(|c| c == alias)
                .map(|index| ResolvedColumn {
                    name: alias.clone(),
                    index,
                })
        });
        *out.slot(role) = hit;
    }
    out
}

/// Resolves a whole snapshot, rejecting inputs with nothing to enrich.
pub fn resolve_snapshot(
    snapshot: &RawSnapshot,
    aliases: &AliasTable,
) -> Result<CanonicalColumns, PipelineError> {
    if snapshot.is_empty() {
        return Err(PipelineError::EmptySnapshot);
    }

    let resolved = resolve_columns(snapshot.columns(), aliases);
    if resolved.resolved_count() == 0 {
        return Err(PipelineError::NoRecognizedColumns {
            columns: snapshot.columns().to_vec(),
        });
    }

    let missing: Vec<CanonicalRole> = CanonicalRole::ALL
        .into_iter()
        .filter(|r| !resolved.has(*r))
        .collect();
    if !missing.is_empty() {
        tracing::debug!(?missing, "some canonical roles are absent; dependent views are skipped");
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawValue;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_legacy_bhavcopy_headers() {
        let columns = cols(&[
            "SYMBOL", "SERIES", "OPEN_PRICE", "CLOSE_PRICE", "TTL_TRD_VAL",
        ]);
        let r = resolve_columns(&columns, &AliasTable::default());
        assert_eq!(r.symbol.as_ref().unwrap().name, "SYMBOL");
        assert_eq!(r.close_price.as_ref().unwrap().index, 3);
        assert_eq!(r.traded_value.as_ref().unwrap().name, "TTL_TRD_VAL");
        assert!(r.sector.is_none());
        assert_eq!(r.resolved_count(), 4);
    }

    #[test]
    fn earlier_alias_wins_regardless_of_column_position() {
        let columns = cols(&["FinInstrmNm", "OpnPric", "ClsPric", "TckrSymb"]);
        let r = resolve_columns(&columns, &AliasTable::default());
        assert_eq!(r.symbol.as_ref().unwrap().name, "TckrSymb");
        assert_eq!(r.symbol.as_ref().unwrap().index, 3);
    }

    #[test]
    fn alias_override_replaces_defaults() {
        let aliases =
            AliasTable::default().with_aliases(CanonicalRole::Sector, vec!["Industry".into()]);
        let r = resolve_columns(&cols(&["SYMBOL", "IndNm", "Industry"]), &aliases);
        assert_eq!(r.sector.as_ref().unwrap().name, "Industry");
    }

    #[test]
    fn empty_snapshot_is_fatal() {
        let snap = RawSnapshot::new(cols(&["SYMBOL", "CLOSE_PRICE"]));
        assert_eq!(
            resolve_snapshot(&snap, &AliasTable::default()),
            Err(PipelineError::EmptySnapshot)
        );
    }

    #[test]
    fn unrecognized_columns_are_fatal() {
        let mut snap = RawSnapshot::new(cols(&["foo", "bar"]));
        snap.push_row(vec![RawValue::Number(1.0), RawValue::Number(2.0)]);
        let err = resolve_snapshot(&snap, &AliasTable::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NoRecognizedColumns { .. }));
        assert!(err.to_string().contains("foo, bar"));
    }

    #[test]
    fn single_resolved_role_is_enough() {
        let mut snap = RawSnapshot::new(cols(&["Sector"]));
        snap.push_row(vec![RawValue::Text("IT".into())]);
        let r = resolve_snapshot(&snap, &AliasTable::default()).unwrap();
        assert_eq!(r.resolved_count(), 1);
        assert!(r.has(CanonicalRole::Sector));
    }
}
