use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

// NSE closes at 15:30 IST but the bhavcopy is usually archived by early evening.
// Before this time the previous session is the latest one with a snapshot.
const BHAVCOPY_CUTOFF_HOUR_IST: u32 = 18;
const BHAVCOPY_CUTOFF_MINUTE_IST: u32 = 30;

/// Trade date format accepted by the snapshot providers.
pub const TRADE_DATE_FORMAT: &str = "%d-%m-%Y";

/// Latest NSE session whose bhavcopy should be available at `now_utc`, or the
/// explicit argument if one was given.
pub fn resolve_trade_date(
    trade_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = trade_date_arg {
        return crate::ingest::nse::parse_trade_date(s);
    }

    let ist = chrono::FixedOffset::east_opt(IST_OFFSET_SECS).context("invalid IST offset")?;
    let now_ist = now_utc.with_timezone(&ist);

    let cutoff_reached =
        (now_ist.hour(), now_ist.minute()) >= (BHAVCOPY_CUTOFF_HOUR_IST, BHAVCOPY_CUTOFF_MINUTE_IST);
    let mut date = now_ist.date_naive();
    if !cutoff_reached {
        date -= Duration::days(1);
    }

    let holidays = configured_holidays();
    while is_weekend(date) || holidays.contains(&date) {
        date -= Duration::days(1);
    }

    Ok(date)
}

pub fn format_trade_date(date: NaiveDate) -> String {
    date.format(TRADE_DATE_FORMAT).to_string()
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Fixed-date national holidays only. Extend via NSE_MARKET_HOLIDAYS="YYYY-MM-DD,...".
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 26), (8, 15), (10, 2)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("NSE_MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(d) = NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                out.insert(d);
            }
        }
    }

    out
}
