//! Per-group KPI blocks shared by drill-down and the report services

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::FactRecord;
use crate::scoring::{self, composite_score, Components, ScoreResult, UtilizationStatus};
use crate::stats::{self, rate, round2, safe_div};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub total_shipments: usize,
    pub on_time_count: usize,
    pub on_time_rate: f64,
    pub exception_count: usize,
    pub exception_rate: f64,
    pub total_weight_kg: f64,
    pub total_volume_m3: f64,
    pub total_distance_miles: f64,
    pub total_stops: u64,
    pub avg_transit_hours: f64,
    pub total_revenue: f64,
    pub total_cost: f64,
    pub total_profit: f64,
    pub profit_margin: f64,
    pub cost_per_mile: f64,
}

impl SummaryMetrics {
    /// `None` for an empty slice
    pub fn from_records(records: &[FactRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }

        let total = records.len() as f64;
        let on_time_count = records.iter().filter(|r| r.on_time).count();
        let exception_count = records.iter().filter(|r| r.has_exception).count();
        let transit: Vec<f64> = records.iter().map(|r| r.transit_hours).collect();
        let revenue: f64 = records.iter().map(|r| r.revenue).sum();
        let cost: f64 = records.iter().map(|r| r.total_cost()).sum();
        let miles: f64 = records.iter().map(|r| r.distance_miles).sum();

        Some(SummaryMetrics {
            total_shipments: records.len(),
            on_time_count,
            on_time_rate: round2(rate(on_time_count as f64, total)),
            exception_count,
            exception_rate: round2(rate(exception_count as f64, total)),
            total_weight_kg: round2(records.iter().map(|r| r.weight_kg).sum()),
            total_volume_m3: round2(records.iter().map(|r| r.volume_m3).sum()),
            total_distance_miles: round2(miles),
            total_stops: records.iter().map(|r| r.stop_count as u64).sum(),
            avg_transit_hours: round2(stats::mean(&transit)),
            total_revenue: round2(revenue),
            total_cost: round2(cost),
            total_profit: round2(revenue - cost),
            profit_margin: round2(rate(revenue - cost, revenue)),
            cost_per_mile: round2(safe_div(cost, miles)),
        })
    }
}

/// Route efficiency: punctuality against 100 %, transit time against the
/// route benchmark, cost per mile against the target.
pub fn route_efficiency(
    summary: &SummaryMetrics,
    benchmark_hours: f64,
    target_cost_per_mile: f64,
) -> Result<ScoreResult> {
    let components = Components::new()
        .with("on_time", summary.on_time_rate, 0.4)
        .with(
            "transit_time",
            scoring::lower_is_better(summary.avg_transit_hours, benchmark_hours),
            0.35,
        )
        .with(
            "cost_efficiency",
            scoring::lower_is_better(summary.cost_per_mile, target_cost_per_mile),
            0.25,
        );
    composite_score(&components)
}

/// Driver performance: punctuality, exception-free deliveries and the
/// planning system's efficiency score (transit against benchmark when the
/// records carry none).
pub fn driver_performance(records: &[FactRecord], benchmark_hours: f64) -> Result<ScoreResult> {
    let total = records.len() as f64;
    let on_time = records.iter().filter(|r| r.on_time).count() as f64;
    let clean = records.iter().filter(|r| !r.has_exception).count() as f64;

    let efficiencies: Vec<f64> = records.iter().filter_map(|r| r.efficiency_score).collect();
    let efficiency = if efficiencies.is_empty() {
        let transit: Vec<f64> = records.iter().map(|r| r.transit_hours).collect();
        scoring::lower_is_better(stats::mean(&transit), benchmark_hours)
    } else {
        stats::mean(&efficiencies).clamp(0.0, 100.0)
    };

    let components = Components::new()
        .with("on_time", rate(on_time, total), 0.5)
        .with("exception_free", rate(clean, total), 0.3)
        .with("efficiency", efficiency, 0.2);
    composite_score(&components)
}

/// Average load factor against `capacity_kg` per shipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub capacity_kg: f64,
    pub avg_load_kg: f64,
    pub utilization_percent: f64,
    pub status: UtilizationStatus,
}

impl Utilization {
    pub fn from_records(records: &[FactRecord], capacity_kg: f64) -> Self {
        let loads: Vec<f64> = records.iter().map(|r| r.weight_kg).collect();
        let avg_load = stats::mean(&loads);
        let percent = round2(rate(avg_load, capacity_kg));
        Utilization {
            capacity_kg,
            avg_load_kg: round2(avg_load),
            utilization_percent: percent,
            status: UtilizationStatus::from_percent(percent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::shipment;
    use crate::scoring::Grade;

    #[test]
    fn test_summary_metrics() {
        let mut records: Vec<FactRecord> = (0..4).map(|i| shipment(&format!("S{}", i))).collect();
        records[0].on_time = false;
        records[1].has_exception = true;

        let summary = SummaryMetrics::from_records(&records).unwrap();
        assert_eq!(summary.total_shipments, 4);
        assert_eq!(summary.on_time_rate, 75.0);
        assert_eq!(summary.exception_rate, 25.0);
        assert_eq!(summary.total_revenue, 2000.0);
        assert_eq!(summary.total_cost, 1200.0);
        assert_eq!(summary.profit_margin, 40.0);
        assert_eq!(summary.cost_per_mile, 3.0);
        assert_eq!(summary.total_stops, 16);
        assert!(SummaryMetrics::from_records(&[]).is_none());
    }

    #[test]
    fn test_route_efficiency() {
        let summary = SummaryMetrics::from_records(&[shipment("S1")]).unwrap();
        // on_time 100, transit 48 vs 48 -> 100, cost 3.0 vs 2.5 -> 83.33
        let score = route_efficiency(&summary, 48.0, 2.5).unwrap();
        assert_eq!(score.score, 95.83);
        assert_eq!(score.grade, Grade::APlus);
        assert_eq!(score.components["cost_efficiency"], 83.33);
    }

    #[test]
    fn test_driver_performance_falls_back_to_transit() {
        let mut record = shipment("S1");
        record.efficiency_score = None;
        record.transit_hours = 96.0;
        // 100 * 0.5 + 100 * 0.3 + 50 * 0.2
        let score = driver_performance(&[record], 48.0).unwrap();
        assert_eq!(score.score, 90.0);
        assert_eq!(score.components["efficiency"], 50.0);
    }

    #[test]
    fn test_utilization() {
        let util = Utilization::from_records(&[shipment("S1")], 1250.0);
        assert_eq!(util.utilization_percent, 80.0);
        assert_eq!(util.status, UtilizationStatus::Efficient);
        assert_eq!(Utilization::from_records(&[], 1000.0).utilization_percent, 0.0);
    }
}
