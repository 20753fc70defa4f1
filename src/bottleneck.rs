//! Rule-based bottleneck detection over record groups
//!
//! A group is every record sharing one dimension key (all shipments of a
//! route, of a driver, ...). Each rule in a [`RuleSet`] is checked
//! independently against the group's [`GroupMetrics`]; matching rules add
//! their weight to the severity and their tag to the report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{FactRecord, GroupingDimension};
use crate::stats::{self, rate, round2};

pub const MAX_SEVERITY: u32 = 10;

/// Per-group aggregates the rules are evaluated against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub key: String,
    pub shipment_count: usize,
    pub avg_duration_hours: f64,
    pub duration_variance: f64,
    pub delayed_count: usize,
    /// Mean of the upstream efficiency score over records that carry one
    pub avg_efficiency_score: Option<f64>,
}

impl GroupMetrics {
    pub fn from_records<'a, I>(key: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = &'a FactRecord>,
    {
        let mut durations = Vec::new();
        let mut efficiencies = Vec::new();
        let mut delayed_count = 0;

        for record in records {
            durations.push(record.transit_hours);
            if let Some(score) = record.efficiency_score {
                efficiencies.push(score);
            }
            if !record.on_time {
                delayed_count += 1;
            }
        }

        GroupMetrics {
            key: key.into(),
            shipment_count: durations.len(),
            avg_duration_hours: stats::mean(&durations),
            duration_variance: stats::variance(&durations),
            delayed_count,
            avg_efficiency_score: if efficiencies.is_empty() {
                None
            } else {
                Some(stats::mean(&efficiencies))
            },
        }
    }

    /// Share of delayed shipments, 0-100
    pub fn delay_rate(&self) -> f64 {
        rate(self.delayed_count as f64, self.shipment_count as f64)
    }
}

/// Groups `records` by `dimension`, ordered by key
pub fn group_metrics(records: &[FactRecord], dimension: GroupingDimension) -> Vec<GroupMetrics> {
    let entity = dimension.entity_type();
    let mut groups: BTreeMap<&str, Vec<&FactRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(entity.key_of(record)).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(key, members)| GroupMetrics::from_records(key, members))
        .collect()
}

/// Fixed issue vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueTag {
    ExcessiveTransitTime,
    HighVariance,
    HighDelayRate,
    LowEfficiency,
}

impl IssueTag {
    pub fn recommendations(self) -> &'static [&'static str] {
        match self {
            IssueTag::ExcessiveTransitTime => &[
                "Review stop sequencing and route geometry",
                "Re-baseline the transit benchmark against current traffic patterns",
            ],
            IssueTag::HighVariance => &[
                "Investigate inconsistent dwell times at stops",
                "Standardize loading and hand-off procedures",
            ],
            IssueTag::HighDelayRate => &[
                "Add schedule buffer to customer delivery promises",
                "Review driver and carrier assignment for this group",
            ],
            IssueTag::LowEfficiency => &[
                "Re-optimize the route plan",
                "Consolidate low-density stops",
            ],
        }
    }
}

/// Predicate over [`GroupMetrics`]; all comparisons are strict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    AvgDurationAbove { hours: f64 },
    DurationVarianceAbove { variance: f64 },
    DelayRateAbove { percent: f64 },
    /// Groups without any efficiency score never match
    EfficiencyBelow { score: f64 },
}

impl Condition {
    pub fn matches(&self, metrics: &GroupMetrics) -> bool {
        match *self {
            Condition::AvgDurationAbove { hours } => metrics.avg_duration_hours > hours,
            Condition::DurationVarianceAbove { variance } => metrics.duration_variance > variance,
            Condition::DelayRateAbove { percent } => metrics.delay_rate() > percent,
            Condition::EfficiencyBelow { score } => {
                metrics.avg_efficiency_score.map_or(false, |s| s < score)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub tag: IssueTag,
    pub condition: Condition,
    pub weight: u32,
}

/// Extra severity once the delay rate is strictly above `delay_rate_above`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EscalationBand {
    pub delay_rate_above: f64,
    pub bonus: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub escalation: Vec<EscalationBand>,
    /// Groups smaller than this are not evaluated
    pub min_shipments: usize,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard(48.0)
    }
}

impl RuleSet {
    /// The stock rule set with `benchmark_hours` as the transit benchmark
    pub fn standard(benchmark_hours: f64) -> Self {
        RuleSet {
            rules: vec![
                Rule {
                    tag: IssueTag::ExcessiveTransitTime,
                    condition: Condition::AvgDurationAbove { hours: benchmark_hours },
                    weight: 3,
                },
                Rule {
                    tag: IssueTag::HighVariance,
                    condition: Condition::DurationVarianceAbove { variance: 100.0 },
                    weight: 2,
                },
                Rule {
                    tag: IssueTag::HighDelayRate,
                    condition: Condition::DelayRateAbove { percent: 20.0 },
                    weight: 3,
                },
                Rule {
                    tag: IssueTag::LowEfficiency,
                    condition: Condition::EfficiencyBelow { score: 70.0 },
                    weight: 2,
                },
            ],
            escalation: vec![
                EscalationBand { delay_rate_above: 30.0, bonus: 1 },
                EscalationBand { delay_rate_above: 50.0, bonus: 2 },
            ],
            min_shipments: 1,
        }
    }

    /// Same rules with every duration threshold replaced by `hours`
    pub fn with_duration_benchmark(&self, hours: f64) -> Self {
        let mut rules = self.clone();
        for rule in &mut rules.rules {
            if let Condition::AvgDurationAbove { hours: h } = &mut rule.condition {
                *h = hours;
            }
        }
        rules
    }

    fn escalation_bonus(&self, delay_rate: f64) -> u32 {
        self.escalation
            .iter()
            .filter(|band| delay_rate > band.delay_rate_above)
            .map(|band| band.bonus)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub entity_key: String,
    /// 0..=10
    pub severity: u32,
    pub issues: Vec<IssueTag>,
    pub delay_rate: f64,
    pub metrics: GroupMetrics,
    pub recommendations: Vec<String>,
}

/// Evaluates every rule; `None` means the group is healthy.
pub fn detect(metrics: &GroupMetrics, rules: &RuleSet) -> Option<BottleneckReport> {
    if metrics.shipment_count == 0 || metrics.shipment_count < rules.min_shipments {
        return None;
    }

    let matched: Vec<&Rule> = rules
        .rules
        .iter()
        .filter(|rule| rule.condition.matches(metrics))
        .collect();
    if matched.is_empty() {
        return None;
    }

    let delay_rate = metrics.delay_rate();
    let weight_sum = matched.iter().fold(0u32, |sum, rule| sum.saturating_add(rule.weight));
    let severity = weight_sum
        .saturating_add(rules.escalation_bonus(delay_rate))
        .min(MAX_SEVERITY);

    let mut issues: Vec<IssueTag> = matched.iter().map(|rule| rule.tag).collect();
    issues.sort();
    issues.dedup();

    let recommendations = issues
        .iter()
        .flat_map(|tag| tag.recommendations().iter().map(|s| s.to_string()))
        .collect();

    Some(BottleneckReport {
        entity_key: metrics.key.clone(),
        severity,
        issues,
        delay_rate: round2(delay_rate),
        metrics: metrics.clone(),
        recommendations,
    })
}

/// Reports for every unhealthy group, most severe first
pub fn identify_bottlenecks(groups: &[GroupMetrics], rules: &RuleSet) -> Vec<BottleneckReport> {
    let mut reports: Vec<BottleneckReport> =
        groups.iter().filter_map(|group| detect(group, rules)).collect();
    sort_reports(&mut reports);
    reports
}

pub fn sort_reports(reports: &mut [BottleneckReport]) {
    reports.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.entity_key.cmp(&b.entity_key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::shipment;
    use pretty_assertions::assert_eq;

    fn route_group(total: usize, late: usize, avg_hours: f64) -> GroupMetrics {
        GroupMetrics {
            key: "R1".to_string(),
            shipment_count: total,
            avg_duration_hours: avg_hours,
            duration_variance: 4.0,
            delayed_count: late,
            avg_efficiency_score: Some(85.0),
        }
    }

    #[test]
    fn test_slow_route_at_thirty_percent_gets_no_bonus() {
        let report = detect(&route_group(10, 3, 50.0), &RuleSet::standard(48.0)).unwrap();
        assert_eq!(
            report.issues,
            vec![IssueTag::ExcessiveTransitTime, IssueTag::HighDelayRate]
        );
        assert_eq!(report.delay_rate, 30.0);
        assert_eq!(report.severity, 6);
    }

    #[test]
    fn test_escalation_bands() {
        let rules = RuleSet::standard(48.0);
        assert_eq!(detect(&route_group(10, 4, 50.0), &rules).unwrap().severity, 7);
        assert_eq!(detect(&route_group(10, 5, 50.0), &rules).unwrap().severity, 7);
        assert_eq!(detect(&route_group(10, 6, 50.0), &rules).unwrap().severity, 8);
    }

    #[test]
    fn test_severity_is_capped() {
        let mut group = route_group(10, 9, 80.0);
        group.duration_variance = 500.0;
        group.avg_efficiency_score = Some(40.0);
        let report = detect(&group, &RuleSet::standard(48.0)).unwrap();
        assert_eq!(report.issues.len(), 4);
        assert_eq!(report.severity, MAX_SEVERITY);
    }

    #[test]
    fn test_oversized_weights_saturate() {
        let mut rules = RuleSet::standard(48.0);
        for rule in &mut rules.rules {
            rule.weight = u32::MAX;
        }
        let report = detect(&route_group(10, 6, 50.0), &rules).unwrap();
        assert_eq!(report.severity, MAX_SEVERITY);
    }

    #[test]
    fn test_healthy_group_has_no_report() {
        assert!(detect(&route_group(10, 1, 40.0), &RuleSet::standard(48.0)).is_none());
        assert!(detect(&route_group(0, 0, 0.0), &RuleSet::standard(48.0)).is_none());
    }

    #[test]
    fn test_min_shipments() {
        let mut rules = RuleSet::standard(48.0);
        rules.min_shipments = 20;
        assert!(detect(&route_group(10, 5, 60.0), &rules).is_none());
    }

    #[test]
    fn test_severity_monotonic_in_tags() {
        let rules = RuleSet::standard(48.0);
        let base = detect(&route_group(10, 3, 50.0), &rules).unwrap().severity;
        let mut worse = route_group(10, 3, 50.0);
        worse.duration_variance = 200.0;
        assert!(detect(&worse, &rules).unwrap().severity >= base);
    }

    #[test]
    fn test_efficiency_rule_skips_missing_scores() {
        let mut group = route_group(10, 0, 10.0);
        group.avg_efficiency_score = None;
        assert!(detect(&group, &RuleSet::standard(48.0)).is_none());
        group.avg_efficiency_score = Some(50.0);
        assert_eq!(detect(&group, &RuleSet::standard(48.0)).unwrap().issues, vec![IssueTag::LowEfficiency]);
    }

    #[test]
    fn test_group_metrics_from_records() {
        let mut records: Vec<FactRecord> = (0..10).map(|i| shipment(&format!("S{}", i))).collect();
        for record in records.iter_mut().take(3) {
            record.on_time = false;
        }
        for record in records.iter_mut() {
            record.transit_hours = 50.0;
        }
        records[9].route_key = "R2".to_string();

        let groups = group_metrics(&records, GroupingDimension::Route);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "R1");
        assert_eq!(groups[0].shipment_count, 9);
        assert_eq!(groups[0].delayed_count, 3);
        assert_eq!(groups[0].avg_duration_hours, 50.0);
        assert_eq!(groups[0].duration_variance, 0.0);
        assert_eq!(groups[0].avg_efficiency_score, Some(90.0));
    }

    #[test]
    fn test_identify_bottlenecks_orders_by_severity() {
        let mut mild = route_group(10, 3, 40.0);
        mild.key = "A".to_string();
        let mut severe = route_group(10, 6, 60.0);
        severe.key = "B".to_string();
        let healthy = GroupMetrics { key: "C".to_string(), ..route_group(10, 0, 10.0) };

        let reports = identify_bottlenecks(&[mild, severe, healthy], &RuleSet::standard(48.0));
        let keys: Vec<&str> = reports.iter().map(|r| r.entity_key.as_str()).collect();
        assert_eq!(keys, vec!["B", "A"]);
    }

    #[test]
    fn test_with_duration_benchmark() {
        let rules = RuleSet::standard(48.0).with_duration_benchmark(55.0);
        assert!(detect(&route_group(10, 0, 50.0), &rules).is_none());
    }

    #[test]
    fn test_rule_set_deserializes_from_config() {
        let json = r#"{
            "rules": [
                {"tag": "high_delay_rate", "condition": {"kind": "delay_rate_above", "percent": 10.0}, "weight": 4}
            ]
        }"#;
        let rules: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.escalation.len(), 2);
        assert_eq!(detect(&route_group(10, 2, 10.0), &rules).unwrap().severity, 4);
    }
}
