//! Weighted composite scoring and threshold classification
//!
//! Three label vocabularies live here and are kept as separate types:
//! [`Grade`] for composite scores, [`UtilizationStatus`] for capacity
//! percentages and [`PerformanceLevel`] for on-time rates. Each maps a number
//! to a label through a descending first-match table with inclusive lower
//! bounds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AnalyticsError, Result};
use crate::stats::round2;

const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "D")]
    D,
}

const GRADE_TABLE: &[(f64, Grade)] = &[
    (90.0, Grade::APlus),
    (85.0, Grade::A),
    (80.0, Grade::BPlus),
    (75.0, Grade::B),
    (70.0, Grade::CPlus),
    (65.0, Grade::C),
];

impl Grade {
    pub fn from_score(score: f64) -> Self {
        GRADE_TABLE
            .iter()
            .find(|(min, _)| score >= *min)
            .map(|(_, grade)| *grade)
            .unwrap_or(Grade::D)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::D => "D",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationStatus {
    Optimal,
    Efficient,
    Adequate,
    Underutilized,
    SeverelyUnderutilized,
}

const UTILIZATION_TABLE: &[(f64, UtilizationStatus)] = &[
    (90.0, UtilizationStatus::Optimal),
    (75.0, UtilizationStatus::Efficient),
    (60.0, UtilizationStatus::Adequate),
    (40.0, UtilizationStatus::Underutilized),
];

impl UtilizationStatus {
    /// `percent` is on the 0-100 scale
    pub fn from_percent(percent: f64) -> Self {
        UTILIZATION_TABLE
            .iter()
            .find(|(min, _)| percent >= *min)
            .map(|(_, status)| *status)
            .unwrap_or(UtilizationStatus::SeverelyUnderutilized)
    }
}

/// On-time performance bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    NeedsImprovement,
    Critical,
}

const PERFORMANCE_TABLE: &[(f64, PerformanceLevel)] = &[
    (95.0, PerformanceLevel::Excellent),
    (85.0, PerformanceLevel::Good),
    (70.0, PerformanceLevel::NeedsImprovement),
];

impl PerformanceLevel {
    pub fn from_rate(on_time_rate: f64) -> Self {
        PERFORMANCE_TABLE
            .iter()
            .find(|(min, _)| on_time_rate >= *min)
            .map(|(_, level)| *level)
            .unwrap_or(PerformanceLevel::Critical)
    }
}

/// A normalized sub-metric and its share of the composite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub grade: Grade,
    /// Sub-component values that produced the score, by name
    pub components: BTreeMap<String, f64>,
}

/// Named components for [`composite_score`]
#[derive(Debug, Clone, Default)]
pub struct Components(BTreeMap<String, ScoreComponent>);

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64, weight: f64) -> Self {
        self.0.insert(name.to_string(), ScoreComponent { value, weight });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ScoreComponent)> {
        self.0.iter()
    }
}

/// Weighted sum of `components`, graded before rounding to 2 decimals.
///
/// Weights must sum to 1.0; anything else is a wiring defect in the caller
/// and fails with [`AnalyticsError::Configuration`].
pub fn composite_score(components: &Components) -> Result<ScoreResult> {
    if components.0.is_empty() {
        return Err(AnalyticsError::Configuration(
            "composite score requires at least one component".to_string(),
        ));
    }

    let total_weight: f64 = components.iter().map(|(_, c)| c.weight).sum();
    if (total_weight - 1.0).abs() > WEIGHT_EPSILON {
        let names: Vec<String> = components
            .iter()
            .map(|(name, c)| format!("{}={}", name, c.weight))
            .collect();
        return Err(AnalyticsError::Configuration(format!(
            "score weights must sum to 1.0, got {} ({})",
            total_weight,
            names.join(", ")
        )));
    }

    let score: f64 = components.iter().map(|(_, c)| c.value * c.weight).sum();

    Ok(ScoreResult {
        score: round2(score),
        grade: Grade::from_score(score),
        components: components
            .iter()
            .map(|(name, c)| (name.clone(), round2(c.value)))
            .collect(),
    })
}

/// Maps a higher-is-better metric onto 0-100 against its target.
pub fn higher_is_better(actual: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (actual / target * 100.0).clamp(0.0, 100.0)
}

/// Maps a lower-is-better metric (cost, duration) onto 0-100 against its
/// target. Meeting or beating the target scores 100.
pub fn lower_is_better(actual: f64, target: f64) -> f64 {
    if actual <= 0.0 {
        return if target > 0.0 { 100.0 } else { 0.0 };
    }
    (target / actual * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_composite_score() {
        let components = Components::new()
            .with("on_time", 90.0, 0.5)
            .with("cost_efficiency", 80.0, 0.3)
            .with("utilization", 70.0, 0.2);
        let result = composite_score(&components).unwrap();
        assert_eq!(result.score, 83.0);
        assert_eq!(result.grade, Grade::BPlus);
        assert_eq!(result.components["on_time"], 90.0);
    }

    #[test]
    fn test_grade_uses_unrounded_score() {
        let result = composite_score(&Components::new().with("on_time", 89.996, 1.0)).unwrap();
        assert_eq!(result.score, 90.0);
        assert_eq!(result.grade, Grade::A);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let components = Components::new().with("a", 50.0, 0.5).with("b", 50.0, 0.4);
        let err = composite_score(&components).unwrap_err();
        assert!(matches!(err, AnalyticsError::Configuration(_)));

        assert!(composite_score(&Components::new()).is_err());
    }

    #[test]
    fn test_grade_table() {
        assert_eq!(Grade::from_score(90.0), Grade::APlus);
        assert_eq!(Grade::from_score(89.99), Grade::A);
        assert_eq!(Grade::from_score(85.0), Grade::A);
        assert_eq!(Grade::from_score(65.0), Grade::C);
        assert_eq!(Grade::from_score(64.99), Grade::D);
        assert_eq!(Grade::APlus.to_string(), "A+");
        assert_eq!(serde_json::to_value(Grade::BPlus).unwrap(), "B+");
    }

    #[test]
    fn test_utilization_boundaries() {
        assert_eq!(UtilizationStatus::from_percent(90.0), UtilizationStatus::Optimal);
        assert_eq!(UtilizationStatus::from_percent(89.99), UtilizationStatus::Efficient);
        assert_eq!(UtilizationStatus::from_percent(75.0), UtilizationStatus::Efficient);
        assert_eq!(UtilizationStatus::from_percent(74.99), UtilizationStatus::Adequate);
        assert_eq!(UtilizationStatus::from_percent(60.0), UtilizationStatus::Adequate);
        assert_eq!(UtilizationStatus::from_percent(59.99), UtilizationStatus::Underutilized);
        assert_eq!(UtilizationStatus::from_percent(40.0), UtilizationStatus::Underutilized);
        assert_eq!(
            UtilizationStatus::from_percent(39.99),
            UtilizationStatus::SeverelyUnderutilized
        );
        assert_eq!(
            serde_json::to_value(UtilizationStatus::SeverelyUnderutilized).unwrap(),
            "severely_underutilized"
        );
    }

    #[test]
    fn test_performance_levels() {
        assert_eq!(PerformanceLevel::from_rate(95.0), PerformanceLevel::Excellent);
        assert_eq!(PerformanceLevel::from_rate(84.99), PerformanceLevel::NeedsImprovement);
        assert_eq!(PerformanceLevel::from_rate(10.0), PerformanceLevel::Critical);
    }

    #[test]
    fn test_normalizers() {
        assert_eq!(higher_is_better(45.0, 90.0), 50.0);
        assert_eq!(higher_is_better(120.0, 90.0), 100.0);
        assert_eq!(higher_is_better(10.0, 0.0), 0.0);
        assert_eq!(lower_is_better(2.0, 1.0), 50.0);
        assert_eq!(lower_is_better(0.5, 1.0), 100.0);
        assert_eq!(lower_is_better(0.0, 1.0), 100.0);
    }

    proptest! {
        #[test]
        fn prop_composite_bounded_by_components(
            values in prop::collection::vec(0.0f64..100.0, 1..6),
            raw_weights in prop::collection::vec(0.01f64..1.0, 6),
        ) {
            let weights = &raw_weights[..values.len()];
            let total: f64 = weights.iter().sum();
            let mut components = Components::new();
            for (i, (v, w)) in values.iter().zip(weights).enumerate() {
                components = components.with(&format!("c{}", i), *v, w / total);
            }

            let result = composite_score(&components).unwrap();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            // the score is rounded to 2 decimals
            prop_assert!(result.score >= min - 0.005 - 1e-9);
            prop_assert!(result.score <= max + 0.005 + 1e-9);
        }
    }
}
