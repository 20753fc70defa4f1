//! Report services over a fact source
//!
//! Every report is memoized through [`CachedComputation`] under a key derived
//! from its namespace, the caller's filters and its own parameters. Argument
//! validation happens before the cache is consulted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::bottleneck::{self, BottleneckReport, GroupMetrics};
use crate::cache::{CacheKey, CacheStore, CachedComputation, TtlClass};
use crate::config::EngineConfig;
use crate::drilldown::{CostBreakdown, DrillDown, DrillDownAggregator, DrillDownRequest, NO_DATA_MESSAGE};
use crate::error::Result;
use crate::kpi::{self, SummaryMetrics, Utilization};
use crate::models::{DateRange, EntityType, FactRecord, GroupingDimension, QueryFilters};
use crate::scoring::{PerformanceLevel, ScoreResult};
use crate::source::{FactQuery, FactSource};
use crate::stats::{self, round2};
use crate::trends::{self, Granularity, TrendSeries};

// ============================================================================
// Report Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalKpis {
    pub period: Option<DateRange>,
    pub summary: Option<SummaryMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub performance_level: Option<PerformanceLevel>,
    pub active_routes: usize,
    pub active_drivers: usize,
    pub active_clients: usize,
    pub cost_breakdown: CostBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEfficiency {
    pub rank: usize,
    pub route_key: String,
    pub benchmark_hours: f64,
    pub summary: SummaryMetrics,
    pub efficiency: ScoreResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRanking {
    pub rank: usize,
    pub driver_key: String,
    pub shipment_count: usize,
    pub on_time_rate: f64,
    pub estimated_hours_worked: f64,
    pub performance: ScoreResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnTimePerformance {
    pub period: Option<DateRange>,
    pub total_shipments: usize,
    pub late_shipments: usize,
    pub on_time_rate: Option<f64>,
    pub performance_level: Option<PerformanceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub trends: TrendSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupUtilization {
    pub key: String,
    pub shipment_count: usize,
    pub utilization: Utilization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitVariance {
    pub key: String,
    pub shipment_count: usize,
    pub mean_hours: f64,
    pub median_hours: f64,
    pub mode_hours: Option<f64>,
    pub stddev_hours: f64,
    pub coefficient_of_variation: f64,
    pub interquartile_range: f64,
    pub p90_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckAnalysis {
    pub dimension: GroupingDimension,
    pub groups_evaluated: usize,
    pub bottlenecks: Vec<BottleneckReport>,
}

// ============================================================================
// Analytics Service
// ============================================================================

pub struct AnalyticsService {
    source: Arc<dyn FactSource>,
    cache: CachedComputation,
    config: EngineConfig,
}

impl AnalyticsService {
    pub fn new(source: Arc<dyn FactSource>, cache: Arc<dyn CacheStore>, config: EngineConfig) -> Self {
        Self {
            source,
            cache: CachedComputation::new(cache),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn key(namespace: &str, filters: &QueryFilters, extra: Vec<(&str, Value)>) -> CacheKey {
        let mut params = filters.params();
        params.extend(extra.into_iter().map(|(k, v)| (k.to_string(), v)));
        CacheKey::derive(namespace, params)
    }

    async fn records(&self, filters: &QueryFilters) -> Result<Vec<FactRecord>> {
        Ok(self.source.query(&FactQuery::new(filters.clone())).await?)
    }

    async fn benchmark_for(&self, route_key: &str) -> Result<f64> {
        let profile = self.source.find_entity(EntityType::Route, route_key).await?;
        Ok(profile
            .and_then(|p| p.benchmark_hours)
            .unwrap_or(self.config.default_benchmark_hours))
    }

    async fn capacity_for(&self, entity_type: EntityType, key: &str) -> Result<f64> {
        let profile = self.source.find_entity(entity_type, key).await?;
        Ok(profile
            .and_then(|p| p.capacity_kg)
            .unwrap_or(self.config.default_capacity_kg))
    }

    pub async fn operational_kpis(&self, filters: &QueryFilters) -> Result<OperationalKpis> {
        let key = Self::key("operational_kpis", filters, vec![]);
        let ttl = self.config.cache.ttl(TtlClass::Dashboard);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let summary = SummaryMetrics::from_records(&records);
                let distinct = |entity: EntityType| {
                    let mut keys: Vec<&str> = records.iter().map(|r| entity.key_of(r)).collect();
                    keys.sort_unstable();
                    keys.dedup();
                    keys.len()
                };

                Ok(OperationalKpis {
                    period: filters.date_range,
                    performance_level: summary
                        .as_ref()
                        .map(|s| PerformanceLevel::from_rate(s.on_time_rate)),
                    message: summary.is_none().then(|| NO_DATA_MESSAGE.to_string()),
                    active_routes: distinct(EntityType::Route),
                    active_drivers: distinct(EntityType::Driver),
                    active_clients: distinct(EntityType::Client),
                    cost_breakdown: CostBreakdown::from_records(&records),
                    summary,
                })
            })
            .await
    }

    /// Routes ranked by composite efficiency, best first
    pub async fn route_efficiency(&self, filters: &QueryFilters) -> Result<Vec<RouteEfficiency>> {
        let key = Self::key("route_efficiency", filters, vec![]);
        let ttl = self.config.cache.ttl(TtlClass::Report);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let mut routes = Vec::new();
                for (route_key, members) in group_by(&records, EntityType::Route) {
                    let Some(summary) = SummaryMetrics::from_records(&members) else {
                        continue;
                    };
                    let benchmark = self.benchmark_for(&route_key).await?;
                    let efficiency =
                        kpi::route_efficiency(&summary, benchmark, self.config.target_cost_per_mile)?;
                    routes.push(RouteEfficiency {
                        rank: 0,
                        route_key,
                        benchmark_hours: benchmark,
                        summary,
                        efficiency,
                    });
                }

                routes.sort_by(|a, b| {
                    b.efficiency
                        .score
                        .total_cmp(&a.efficiency.score)
                        .then_with(|| a.route_key.cmp(&b.route_key))
                });
                for (i, route) in routes.iter_mut().enumerate() {
                    route.rank = i + 1;
                }
                Ok(routes)
            })
            .await
    }

    /// Top `limit` drivers by performance score
    pub async fn driver_rankings(&self, filters: &QueryFilters, limit: usize) -> Result<Vec<DriverRanking>> {
        let key = Self::key("driver_rankings", filters, vec![("limit", Value::from(limit))]);
        let ttl = self.config.cache.ttl(TtlClass::Report);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let mut drivers = Vec::new();
                for (driver_key, members) in group_by(&records, EntityType::Driver) {
                    let on_time = members.iter().filter(|r| r.on_time).count();
                    let transit: f64 = members.iter().map(|r| r.transit_hours).sum();
                    drivers.push(DriverRanking {
                        rank: 0,
                        shipment_count: members.len(),
                        on_time_rate: round2(stats::rate(on_time as f64, members.len() as f64)),
                        estimated_hours_worked: round2(transit * self.config.hours_worked_factor),
                        performance: kpi::driver_performance(&members, self.config.default_benchmark_hours)?,
                        driver_key,
                    });
                }

                drivers.sort_by(|a, b| {
                    b.performance
                        .score
                        .total_cmp(&a.performance.score)
                        .then_with(|| a.driver_key.cmp(&b.driver_key))
                });
                drivers.truncate(limit);
                for (i, driver) in drivers.iter_mut().enumerate() {
                    driver.rank = i + 1;
                }
                Ok(drivers)
            })
            .await
    }

    pub async fn on_time_performance(
        &self,
        filters: &QueryFilters,
        granularity: Granularity,
    ) -> Result<OnTimePerformance> {
        let key = Self::key(
            "on_time_performance",
            filters,
            vec![("granularity", Value::from(granularity.as_str()))],
        );
        let ttl = self.config.cache.ttl(TtlClass::Report);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let on_time = records.iter().filter(|r| r.on_time).count();
                let on_time_rate =
                    (!records.is_empty()).then(|| round2(stats::rate(on_time as f64, records.len() as f64)));

                Ok(OnTimePerformance {
                    period: filters.date_range,
                    total_shipments: records.len(),
                    late_shipments: records.len() - on_time,
                    on_time_rate,
                    performance_level: on_time_rate.map(PerformanceLevel::from_rate),
                    message: records.is_empty().then(|| NO_DATA_MESSAGE.to_string()),
                    trends: trends::on_time_trend(&records, granularity),
                })
            })
            .await
    }

    /// Load utilization per group, lowest first
    pub async fn utilization(&self, filters: &QueryFilters, dimension: &str) -> Result<Vec<GroupUtilization>> {
        let dimension = GroupingDimension::parse(dimension)?;
        let key = Self::key(
            "utilization",
            filters,
            vec![("dimension", Value::from(dimension.as_str()))],
        );
        let ttl = self.config.cache.ttl(TtlClass::Report);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let entity_type = dimension.entity_type();
                let mut groups = Vec::new();
                for (key, members) in group_by(&records, entity_type) {
                    let capacity = self.capacity_for(entity_type, &key).await?;
                    groups.push(GroupUtilization {
                        shipment_count: members.len(),
                        utilization: Utilization::from_records(&members, capacity),
                        key,
                    });
                }
                groups.sort_by(|a, b| {
                    a.utilization
                        .utilization_percent
                        .total_cmp(&b.utilization.utilization_percent)
                        .then_with(|| a.key.cmp(&b.key))
                });
                Ok(groups)
            })
            .await
    }

    /// Transit-time dispersion per group, most variable first
    pub async fn transit_variance(&self, filters: &QueryFilters, dimension: &str) -> Result<Vec<TransitVariance>> {
        let dimension = GroupingDimension::parse(dimension)?;
        let key = Self::key(
            "transit_variance",
            filters,
            vec![("dimension", Value::from(dimension.as_str()))],
        );
        let ttl = self.config.cache.ttl(TtlClass::Report);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let mut groups: Vec<TransitVariance> = group_by(&records, dimension.entity_type())
                    .into_iter()
                    .map(|(key, members)| {
                        let hours: Vec<f64> = members.iter().map(|r| r.transit_hours).collect();
                        TransitVariance {
                            key,
                            shipment_count: hours.len(),
                            mean_hours: round2(stats::mean(&hours)),
                            median_hours: round2(stats::median(&hours)),
                            mode_hours: stats::mode(&hours),
                            stddev_hours: round2(stats::stddev(&hours)),
                            coefficient_of_variation: round2(stats::coefficient_of_variation(&hours)),
                            interquartile_range: round2(stats::interquartile_range(&hours)),
                            p90_hours: round2(stats::percentile(&hours, 90.0)),
                        }
                    })
                    .collect();
                groups.sort_by(|a, b| {
                    b.coefficient_of_variation
                        .total_cmp(&a.coefficient_of_variation)
                        .then_with(|| a.key.cmp(&b.key))
                });
                Ok(groups)
            })
            .await
    }

    /// Bottlenecks along `dimension`; routes are judged against their own
    /// transit benchmark when their profile has one.
    pub async fn bottlenecks(&self, filters: &QueryFilters, dimension: &str) -> Result<BottleneckAnalysis> {
        let dimension = GroupingDimension::parse(dimension)?;
        let key = Self::key(
            "bottlenecks",
            filters,
            vec![("dimension", Value::from(dimension.as_str()))],
        );
        let ttl = self.config.cache.ttl(TtlClass::Report);

        self.cache
            .get_or_compute(&key, ttl, || async {
                let records = self.records(filters).await?;
                let groups = bottleneck::group_metrics(&records, dimension);
                let rules = &self.config.bottleneck_rules;

                let reports = match dimension {
                    GroupingDimension::Route => {
                        let mut reports = Vec::new();
                        for group in &groups {
                            let benchmark = self.benchmark_for(&group.key).await?;
                            if let Some(report) =
                                bottleneck::detect(group, &rules.with_duration_benchmark(benchmark))
                            {
                                reports.push(report);
                            }
                        }
                        bottleneck::sort_reports(&mut reports);
                        reports
                    }
                    _ => bottleneck::identify_bottlenecks(&groups, rules),
                };

                info!(
                    dimension = dimension.as_str(),
                    groups = groups.len(),
                    bottlenecks = reports.len(),
                    "bottleneck analysis"
                );
                Ok(BottleneckAnalysis {
                    dimension,
                    groups_evaluated: groups.iter().filter(|g| is_evaluated(g, rules.min_shipments)).count(),
                    bottlenecks: reports,
                })
            })
            .await
    }

    pub async fn drill_down(&self, request: &DrillDownRequest) -> Result<DrillDown> {
        let entity_type = EntityType::parse(&request.entity_type)
            .map(EntityType::as_str)
            .unwrap_or(request.entity_type.as_str());
        let extra = vec![
            ("entity_type", Value::from(entity_type)),
            ("entity_key", Value::from(request.entity_key.as_str())),
            ("detail_level", Value::from(request.detail_level.as_str())),
            ("granularity", Value::from(request.granularity.as_str())),
        ];
        let key = Self::key("drill_down", &request.filters, extra);
        let ttl = self.config.cache.ttl(TtlClass::DrillDown);

        self.cache
            .get_or_compute(&key, ttl, || async {
                DrillDownAggregator::new(self.source.as_ref(), &self.config)
                    .drill_down(request)
                    .await
            })
            .await
    }
}

fn is_evaluated(group: &GroupMetrics, min_shipments: usize) -> bool {
    group.shipment_count > 0 && group.shipment_count >= min_shipments
}

/// Owned record groups keyed by the entity key, ordered by key
fn group_by(records: &[FactRecord], entity_type: EntityType) -> BTreeMap<String, Vec<FactRecord>> {
    let mut groups: BTreeMap<String, Vec<FactRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(entity_type.key_of(record).to_string())
            .or_default()
            .push(record.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bottleneck::IssueTag;
    use crate::cache::InMemoryCacheStore;
    use crate::error::AnalyticsError;
    use crate::models::fixtures::shipment;
    use crate::models::{DateKey, DetailLevel, EntityProfile};
    use crate::source::InMemoryFactSource;
    use crate::trends::TrendDirection;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts fact queries so tests can observe cache hits
    struct CountingSource {
        inner: InMemoryFactSource,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl FactSource for CountingSource {
        async fn query(&self, query: &FactQuery) -> anyhow::Result<Vec<FactRecord>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query(query).await
        }

        async fn find_entity(
            &self,
            entity_type: EntityType,
            key: &str,
        ) -> anyhow::Result<Option<EntityProfile>> {
            self.inner.find_entity(entity_type, key).await
        }
    }

    fn records() -> Vec<FactRecord> {
        let mut records = Vec::new();
        // R1: 10 shipments, 3 late, 50h each
        for i in 0..10 {
            let mut r = shipment(&format!("A{}", i));
            r.delivery_date_key = DateKey(20240301 + i);
            r.transit_hours = 50.0;
            r.on_time = i >= 3;
            records.push(r);
        }
        // R2: 4 fast, punctual shipments by D2
        for i in 0..4 {
            let mut r = shipment(&format!("B{}", i));
            r.route_key = "R2".to_string();
            r.driver_key = "D2".to_string();
            r.delivery_date_key = DateKey(20240311 + i);
            r.transit_hours = 20.0 + i as f64 * 4.0;
            records.push(r);
        }
        records
    }

    fn service() -> (AnalyticsService, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            inner: InMemoryFactSource::new(records())
                .with_profile(EntityProfile::new(EntityType::Route, "R2", "Crosstown").with_benchmark_hours(24.0)),
            queries: AtomicUsize::new(0),
        });
        let service = AnalyticsService::new(
            source.clone(),
            Arc::new(InMemoryCacheStore::new()),
            EngineConfig::default(),
        );
        (service, source)
    }

    #[tokio::test]
    async fn test_reports_are_cached() {
        let (service, source) = service();
        let filters = QueryFilters::for_range(20240301, 20240331);

        let first = service.operational_kpis(&filters).await.unwrap();
        let second = service.operational_kpis(&filters).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);

        // different parameters are a different key
        service.operational_kpis(&QueryFilters::default()).await.unwrap();
        assert_eq!(source.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_operational_kpis() {
        let (service, _) = service();
        let kpis = service.operational_kpis(&QueryFilters::default()).await.unwrap();
        let summary = kpis.summary.unwrap();
        assert_eq!(summary.total_shipments, 14);
        assert_eq!(summary.on_time_count, 11);
        assert_eq!(kpis.active_routes, 2);
        assert_eq!(kpis.active_drivers, 2);
        assert_eq!(kpis.active_clients, 1);
        assert_eq!(kpis.performance_level, Some(PerformanceLevel::NeedsImprovement));

        let empty = service
            .operational_kpis(&QueryFilters::for_range(20230101, 20230131))
            .await
            .unwrap();
        assert_eq!(empty.summary, None);
        assert_eq!(empty.message.as_deref(), Some(NO_DATA_MESSAGE));
    }

    #[tokio::test]
    async fn test_route_efficiency_ranking() {
        let (service, _) = service();
        let routes = service.route_efficiency(&QueryFilters::default()).await.unwrap();
        let order: Vec<(usize, &str)> = routes.iter().map(|r| (r.rank, r.route_key.as_str())).collect();
        assert_eq!(order, vec![(1, "R2"), (2, "R1")]);
        assert_eq!(routes[0].benchmark_hours, 24.0);
        assert_eq!(routes[1].benchmark_hours, 48.0);
    }

    #[tokio::test]
    async fn test_driver_rankings_limit() {
        let (service, _) = service();
        let drivers = service.driver_rankings(&QueryFilters::default(), 1).await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].driver_key, "D2");
        assert_eq!(drivers[0].on_time_rate, 100.0);
        // (20 + 24 + 28 + 32) * 1.2
        assert_eq!(drivers[0].estimated_hours_worked, 124.8);
    }

    #[tokio::test]
    async fn test_on_time_performance() {
        let (service, _) = service();
        let report = service
            .on_time_performance(&QueryFilters::default(), Granularity::Month)
            .await
            .unwrap();
        assert_eq!(report.total_shipments, 14);
        assert_eq!(report.late_shipments, 3);
        assert_eq!(report.on_time_rate, Some(78.57));
        assert_eq!(report.message, None);
        assert_eq!(report.trends.buckets.len(), 1);
        assert_eq!(report.trends.trend_direction, TrendDirection::InsufficientData);
    }

    #[tokio::test]
    async fn test_on_time_performance_without_shipments() {
        let (service, _) = service();
        let report = service
            .on_time_performance(&QueryFilters::for_range(20230101, 20230131), Granularity::Week)
            .await
            .unwrap();
        assert_eq!(report.total_shipments, 0);
        assert_eq!(report.on_time_rate, None);
        assert_eq!(report.performance_level, None);
        assert_eq!(report.message.as_deref(), Some(NO_DATA_MESSAGE));
        assert!(report.trends.buckets.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dimension_is_rejected() {
        let (service, source) = service();
        let err = service
            .bottlenecks(&QueryFilters::default(), "warehouse")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidArgument { argument: "dimension", .. }));
        assert!(err.to_string().contains("route, driver, client, branch, carrier"));
        assert_eq!(source.queries.load(Ordering::SeqCst), 0);

        assert!(service.utilization(&QueryFilters::default(), "fleet").await.is_err());
        assert!(service.transit_variance(&QueryFilters::default(), "").await.is_err());
    }

    #[tokio::test]
    async fn test_route_bottlenecks_use_route_benchmark() {
        let (service, _) = service();
        let analysis = service.bottlenecks(&QueryFilters::default(), "route").await.unwrap();
        assert_eq!(analysis.groups_evaluated, 2);
        assert_eq!(analysis.bottlenecks.len(), 2);

        let r1 = &analysis.bottlenecks[0];
        assert_eq!(r1.entity_key, "R1");
        assert_eq!(r1.issues, vec![IssueTag::ExcessiveTransitTime, IssueTag::HighDelayRate]);
        assert_eq!(r1.severity, 6);

        // R2 averages 26h against its 24h benchmark
        let r2 = &analysis.bottlenecks[1];
        assert_eq!(r2.entity_key, "R2");
        assert_eq!(r2.issues, vec![IssueTag::ExcessiveTransitTime]);
        assert_eq!(r2.severity, 3);
    }

    #[tokio::test]
    async fn test_transit_variance_and_utilization() {
        let (service, _) = service();
        let variance = service.transit_variance(&QueryFilters::default(), "route").await.unwrap();
        assert_eq!(variance[0].key, "R2");
        assert_eq!(variance[0].mean_hours, 26.0);
        assert_eq!(variance[0].median_hours, 26.0);
        assert_eq!(variance[1].stddev_hours, 0.0);
        assert_eq!(variance[1].mode_hours, Some(50.0));

        let utilization = service.utilization(&QueryFilters::default(), "driver").await.unwrap();
        assert_eq!(utilization.len(), 2);
        assert!(utilization.iter().all(|g| g.utilization.utilization_percent == 50.0));
    }

    #[tokio::test]
    async fn test_drill_down_through_service() {
        let (service, source) = service();
        let request = DrillDownRequest::new("route", "R2", DetailLevel::Summary);

        let first = service.drill_down(&request).await.unwrap();
        let second = service.drill_down(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);

        let missing = service
            .drill_down(&DrillDownRequest::new("route", "R404", DetailLevel::Summary))
            .await;
        assert!(matches!(missing, Err(AnalyticsError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_drill_down_key_ignores_entity_type_spelling() {
        let (service, source) = service();
        let lower = service
            .drill_down(&DrillDownRequest::new("route", "R1", DetailLevel::Summary))
            .await
            .unwrap();
        let upper = service
            .drill_down(&DrillDownRequest::new(" Route", "R1", DetailLevel::Summary))
            .await
            .unwrap();
        assert_eq!(lower, upper);
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
    }
}
