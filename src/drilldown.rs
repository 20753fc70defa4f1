//! Entity drill-down
//!
//! A drill-down resolves one primary entity, summarizes its shipments and,
//! at `detail` level, expands into recent shipments, trend buckets, a cost
//! breakdown and summaries of directly related entities. Related entities are
//! summarized with [`RelatedSummary`], which has no detail of its own, so an
//! expansion is always exactly one hop deep.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::bottleneck::{self, BottleneckReport, GroupMetrics};
use crate::config::EngineConfig;
use crate::error::{AnalyticsError, Result};
use crate::kpi::{self, SummaryMetrics, Utilization};
use crate::models::{DateRange, DetailLevel, EntityProfile, EntityType, FactRecord, QueryFilters, ShipmentStatus};
use crate::scoring::{PerformanceLevel, ScoreResult};
use crate::source::{FactQuery, FactSource};
use crate::stats::{self, rate, round2};
use crate::trends::{self, Granularity, TrendSeries};

pub const NO_DATA_MESSAGE: &str = "No shipments found for the selected period and filters";

/// Drill-down parameters; also the cache key parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillDownRequest {
    pub entity_type: String,
    pub entity_key: String,
    pub detail_level: DetailLevel,
    #[serde(default)]
    pub filters: QueryFilters,
    #[serde(default)]
    pub granularity: Granularity,
}

impl DrillDownRequest {
    pub fn new(entity_type: &str, entity_key: &str, detail_level: DetailLevel) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_key: entity_key.to_string(),
            detail_level,
            filters: QueryFilters::default(),
            granularity: Granularity::default(),
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrillDown {
    Entity(NestedSummary),
    Unsupported(UnsupportedEntity),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsupportedEntity {
    pub entity_type: String,
    pub entity_key: String,
    pub message: String,
    pub supported_types: Vec<EntityType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSummary {
    pub entity_type: EntityType,
    pub entity: EntityProfile,
    pub period: Option<DateRange>,
    /// `None` when no shipments matched
    pub summary: Option<SummaryMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub insights: Option<EntityInsights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_analysis: Option<DetailedAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityInsights {
    Shipment {
        status: ShipmentStatus,
        on_time: bool,
        delay_hours: Option<f64>,
        exception_type: Option<String>,
        profit: f64,
    },
    Route {
        benchmark_hours: f64,
        efficiency: ScoreResult,
        bottleneck: Option<BottleneckReport>,
    },
    Driver {
        performance: ScoreResult,
        estimated_hours_worked: f64,
        avg_stops_per_shipment: f64,
    },
    Client {
        total_revenue: f64,
        profit_margin: f64,
        avg_revenue_per_shipment: f64,
        routes_used: usize,
    },
    Branch {
        utilization: Utilization,
    },
    Carrier {
        utilization: Utilization,
        performance_level: PerformanceLevel,
        on_time_rate: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedAnalysis {
    pub recent_shipments: Vec<ShipmentBrief>,
    pub trends: TrendSeries,
    pub cost_breakdown: CostBreakdown,
    pub related: Vec<RelatedSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentBrief {
    pub shipment_key: String,
    pub delivery_date_key: u32,
    pub route_key: String,
    pub driver_key: String,
    pub status: ShipmentStatus,
    pub on_time: bool,
    pub transit_hours: f64,
    pub revenue: f64,
}

impl From<&FactRecord> for ShipmentBrief {
    fn from(r: &FactRecord) -> Self {
        ShipmentBrief {
            shipment_key: r.shipment_key.clone(),
            delivery_date_key: r.delivery_date_key.0,
            route_key: r.route_key.clone(),
            driver_key: r.driver_key.clone(),
            status: r.status,
            on_time: r.on_time,
            transit_hours: r.transit_hours,
            revenue: r.revenue,
        }
    }
}

/// Cost totals by category with each category's share of the total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub total: f64,
    pub categories: BTreeMap<String, f64>,
    pub share_percent: BTreeMap<String, f64>,
}

impl CostBreakdown {
    pub fn from_records(records: &[FactRecord]) -> Self {
        let sum = |f: fn(&FactRecord) -> f64| records.iter().map(f).sum::<f64>();
        let raw = [
            ("fuel", sum(|r| r.fuel_cost)),
            ("labor", sum(|r| r.labor_cost)),
            ("toll", sum(|r| r.toll_cost)),
            ("maintenance", sum(|r| r.maintenance_cost)),
            ("penalty", sum(|r| r.penalty_cost)),
        ];
        let total: f64 = raw.iter().map(|(_, v)| v).sum();

        CostBreakdown {
            total: round2(total),
            categories: raw.iter().map(|(k, v)| (k.to_string(), round2(*v))).collect(),
            share_percent: raw
                .iter()
                .map(|(k, v)| (k.to_string(), round2(rate(*v, total))))
                .collect(),
        }
    }
}

/// Summary of a related entity. Carries no detail block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedSummary {
    pub entity_type: EntityType,
    pub key: String,
    pub shipment_count: usize,
    pub on_time_rate: f64,
    pub avg_transit_hours: f64,
    pub total_revenue: f64,
}

impl RelatedSummary {
    fn from_records<'a>(entity_type: EntityType, key: &str, records: impl IntoIterator<Item = &'a FactRecord>) -> Self {
        let records: Vec<&FactRecord> = records.into_iter().collect();
        let on_time = records.iter().filter(|r| r.on_time).count();
        let transit: Vec<f64> = records.iter().map(|r| r.transit_hours).collect();
        RelatedSummary {
            entity_type,
            key: key.to_string(),
            shipment_count: records.len(),
            on_time_rate: round2(rate(on_time as f64, records.len() as f64)),
            avg_transit_hours: round2(stats::mean(&transit)),
            total_revenue: round2(records.iter().map(|r| r.revenue).sum()),
        }
    }
}

/// Which entity type a drill-down expands into
fn related_type(entity_type: EntityType) -> EntityType {
    match entity_type {
        EntityType::Shipment => EntityType::Route,
        EntityType::Route => EntityType::Driver,
        EntityType::Driver => EntityType::Route,
        EntityType::Client => EntityType::Route,
        EntityType::Branch => EntityType::Driver,
        EntityType::Carrier => EntityType::Route,
    }
}

pub struct DrillDownAggregator<'a> {
    source: &'a dyn FactSource,
    config: &'a EngineConfig,
}

impl<'a> DrillDownAggregator<'a> {
    pub fn new(source: &'a dyn FactSource, config: &'a EngineConfig) -> Self {
        Self { source, config }
    }

    /// Resolves the request, falling back to [`DrillDown::Unsupported`] for
    /// entity type names outside the closed set.
    pub async fn drill_down(&self, request: &DrillDownRequest) -> Result<DrillDown> {
        match EntityType::parse(&request.entity_type) {
            Some(entity_type) => Ok(DrillDown::Entity(
                self.drill_down_entity(
                    entity_type,
                    &request.entity_key,
                    request.detail_level,
                    &request.filters,
                    request.granularity,
                )
                .await?,
            )),
            None => Ok(DrillDown::Unsupported(UnsupportedEntity {
                entity_type: request.entity_type.clone(),
                entity_key: request.entity_key.clone(),
                message: format!(
                    "Drill-down is not available for entity type '{}'",
                    request.entity_type
                ),
                supported_types: EntityType::ALL.to_vec(),
            })),
        }
    }

    pub async fn drill_down_entity(
        &self,
        entity_type: EntityType,
        entity_key: &str,
        detail_level: DetailLevel,
        filters: &QueryFilters,
        granularity: Granularity,
    ) -> Result<NestedSummary> {
        let entity = self
            .source
            .find_entity(entity_type, entity_key)
            .await?
            .ok_or_else(|| AnalyticsError::not_found(entity_type, entity_key))?;

        let query = FactQuery::for_entity(filters.clone(), entity_type, entity_key);
        let mut records = self.source.query(&query).await?;
        records.sort_by(|a, b| {
            b.delivery_date_key
                .cmp(&a.delivery_date_key)
                .then_with(|| a.shipment_key.cmp(&b.shipment_key))
        });
        debug!(entity_type = %entity_type, entity_key, records = records.len(), "drill-down");

        let summary = SummaryMetrics::from_records(&records);
        let insights = match &summary {
            Some(summary) => Some(self.insights(entity_type, &entity, &records, summary)?),
            None => None,
        };

        let detailed_analysis = match detail_level {
            DetailLevel::Summary => None,
            DetailLevel::Detail => Some(
                self.detailed_analysis(entity_type, &records, filters, granularity)
                    .await?,
            ),
        };

        Ok(NestedSummary {
            entity_type,
            entity,
            period: filters.date_range,
            message: summary.is_none().then(|| NO_DATA_MESSAGE.to_string()),
            summary,
            insights,
            detailed_analysis,
        })
    }

    fn insights(
        &self,
        entity_type: EntityType,
        entity: &EntityProfile,
        records: &[FactRecord],
        summary: &SummaryMetrics,
    ) -> Result<EntityInsights> {
        let capacity = entity.capacity_kg.unwrap_or(self.config.default_capacity_kg);

        Ok(match entity_type {
            EntityType::Shipment => {
                // a summary exists, so there is exactly one record
                let record = &records[0];
                EntityInsights::Shipment {
                    status: record.status,
                    on_time: record.on_time,
                    delay_hours: record.delay_hours().map(round2),
                    exception_type: record.exception_type.clone(),
                    profit: round2(record.profit()),
                }
            }
            EntityType::Route => {
                let benchmark = entity
                    .benchmark_hours
                    .unwrap_or(self.config.default_benchmark_hours);
                let rules = self.config.bottleneck_rules.with_duration_benchmark(benchmark);
                let metrics = GroupMetrics::from_records(&entity.key, records);
                EntityInsights::Route {
                    benchmark_hours: benchmark,
                    efficiency: kpi::route_efficiency(summary, benchmark, self.config.target_cost_per_mile)?,
                    bottleneck: bottleneck::detect(&metrics, &rules),
                }
            }
            EntityType::Driver => {
                let transit: f64 = records.iter().map(|r| r.transit_hours).sum();
                EntityInsights::Driver {
                    performance: kpi::driver_performance(records, self.config.default_benchmark_hours)?,
                    estimated_hours_worked: round2(transit * self.config.hours_worked_factor),
                    avg_stops_per_shipment: round2(stats::safe_div(
                        summary.total_stops as f64,
                        summary.total_shipments as f64,
                    )),
                }
            }
            EntityType::Client => {
                let mut routes: Vec<&str> = records.iter().map(|r| r.route_key.as_str()).collect();
                routes.sort_unstable();
                routes.dedup();
                EntityInsights::Client {
                    total_revenue: summary.total_revenue,
                    profit_margin: summary.profit_margin,
                    avg_revenue_per_shipment: round2(stats::safe_div(
                        summary.total_revenue,
                        summary.total_shipments as f64,
                    )),
                    routes_used: routes.len(),
                }
            }
            EntityType::Branch => EntityInsights::Branch {
                utilization: Utilization::from_records(records, capacity),
            },
            EntityType::Carrier => EntityInsights::Carrier {
                utilization: Utilization::from_records(records, capacity),
                performance_level: PerformanceLevel::from_rate(summary.on_time_rate),
                on_time_rate: summary.on_time_rate,
            },
        })
    }

    async fn detailed_analysis(
        &self,
        entity_type: EntityType,
        records: &[FactRecord],
        filters: &QueryFilters,
        granularity: Granularity,
    ) -> Result<DetailedAnalysis> {
        let related = match entity_type {
            // a single shipment has nothing to group; summarize its route instead
            EntityType::Shipment => match records.first() {
                Some(record) => {
                    let query = FactQuery::for_entity(filters.clone(), EntityType::Route, &record.route_key);
                    let route_records = self.source.query(&query).await?;
                    vec![RelatedSummary::from_records(
                        EntityType::Route,
                        &record.route_key,
                        &route_records,
                    )]
                }
                None => Vec::new(),
            },
            _ => self.related_summaries(related_type(entity_type), records),
        };

        let mut chronological = records.to_vec();
        chronological.reverse();

        Ok(DetailedAnalysis {
            recent_shipments: records
                .iter()
                .take(self.config.recent_shipments_limit)
                .map(ShipmentBrief::from)
                .collect(),
            trends: trends::on_time_trend(&chronological, granularity),
            cost_breakdown: CostBreakdown::from_records(records),
            related,
        })
    }

    fn related_summaries(&self, related: EntityType, records: &[FactRecord]) -> Vec<RelatedSummary> {
        let mut groups: BTreeMap<&str, Vec<&FactRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(related.key_of(record)).or_default().push(record);
        }

        let mut summaries: Vec<RelatedSummary> = groups
            .into_iter()
            .map(|(key, members)| RelatedSummary::from_records(related, key, members))
            .collect();
        summaries.sort_by(|a, b| {
            b.shipment_count
                .cmp(&a.shipment_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        summaries.truncate(self.config.related_entities_limit);
        summaries
    }
}
