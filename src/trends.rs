//! Time-bucketed series and trend classification
//!
//! Records are bucketed by delivery date (day, ISO week or month). Trend
//! direction compares the earliest and latest bucket values with a ±5 %
//! deadband.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AnalyticsError, Result};
use crate::models::FactRecord;
use crate::stats::{self, rate, round2, safe_div};

/// Percent change that must be exceeded before a trend is called
pub const TREND_DEADBAND_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    #[default]
    Week,
    Month,
}

impl Granularity {
    pub const VALID: [&'static str; 3] = ["day", "week", "month"];

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            _ => Err(AnalyticsError::invalid_argument("granularity", s, &Self::VALID)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Sortable bucket label for a record, `None` for malformed date keys
    pub fn bucket_label(self, record: &FactRecord) -> Option<String> {
        let date = record.delivery_date_key.to_date()?;
        Some(match self {
            Granularity::Day => date.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => date.format("%Y-%m").to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

/// Which way is good for the series being classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

fn raw_change(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let first = values[0];
    let last = values[values.len() - 1];
    Some(rate(last - first, first))
}

/// Percent change from the first to the last value, rounded to 2 decimals.
/// `None` with fewer than two values; 0 when the first value is 0.
pub fn percent_change(values: &[f64]) -> Option<f64> {
    raw_change(values).map(round2)
}

/// Classifies the unrounded change against the deadband.
pub fn trend_direction(values: &[f64], polarity: Polarity) -> TrendDirection {
    let Some(change) = raw_change(values) else {
        return TrendDirection::InsufficientData;
    };

    let signed = match polarity {
        Polarity::HigherIsBetter => change,
        Polarity::LowerIsBetter => -change,
    };

    if signed > TREND_DEADBAND_PERCENT {
        TrendDirection::Improving
    } else if signed < -TREND_DEADBAND_PERCENT {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub period: String,
    pub shipment_count: usize,
    pub on_time_rate: f64,
    pub avg_transit_hours: f64,
    pub transit_stddev: f64,
    pub total_revenue: f64,
    pub total_cost: f64,
    pub cost_per_mile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub granularity: Granularity,
    pub buckets: Vec<TrendBucket>,
    /// Direction of the on-time rate across the buckets
    pub trend_direction: TrendDirection,
    /// Percent change of the on-time rate from first to last bucket
    pub change_percent: Option<f64>,
    /// Linear projection of the next bucket's on-time rate
    pub forecast_next: Option<f64>,
}

/// Buckets `records` chronologically and aggregates each bucket.
pub fn bucket_records(records: &[FactRecord], granularity: Granularity) -> Vec<TrendBucket> {
    let mut buckets: BTreeMap<String, Vec<&FactRecord>> = BTreeMap::new();
    for record in records {
        if let Some(label) = granularity.bucket_label(record) {
            buckets.entry(label).or_default().push(record);
        }
    }

    buckets
        .into_iter()
        .map(|(period, members)| {
            let transit: Vec<f64> = members.iter().map(|r| r.transit_hours).collect();
            let on_time = members.iter().filter(|r| r.on_time).count();
            let revenue: f64 = members.iter().map(|r| r.revenue).sum();
            let cost: f64 = members.iter().map(|r| r.total_cost()).sum();
            let miles: f64 = members.iter().map(|r| r.distance_miles).sum();

            TrendBucket {
                period,
                shipment_count: members.len(),
                on_time_rate: round2(rate(on_time as f64, members.len() as f64)),
                avg_transit_hours: round2(stats::mean(&transit)),
                transit_stddev: round2(stats::stddev(&transit)),
                total_revenue: round2(revenue),
                total_cost: round2(cost),
                cost_per_mile: round2(safe_div(cost, miles)),
            }
        })
        .collect()
}

/// On-time trend over `records`
pub fn on_time_trend(records: &[FactRecord], granularity: Granularity) -> TrendSeries {
    let buckets = bucket_records(records, granularity);
    let series: Vec<f64> = buckets.iter().map(|b| b.on_time_rate).collect();

    TrendSeries {
        granularity,
        trend_direction: trend_direction(&series, Polarity::HigherIsBetter),
        change_percent: percent_change(&series),
        forecast_next: if series.len() < 2 {
            None
        } else {
            stats::forecast_next(&series).map(|v| round2(v.clamp(0.0, 100.0)))
        },
        buckets,
    }
}
