use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{AnalyticsError, Result};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw record from CSV ingestion
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsvRecord {
    pub shipment_key: String,
    pub route_key: String,
    pub driver_key: String,
    pub client_key: String,
    pub branch_key: String,
    pub carrier_key: String,
    pub container_key: Option<String>,
    pub pickup_at: Option<String>,
    pub scheduled_delivery_at: Option<String>,
    pub actual_delivery_at: Option<String>,
    pub delivery_date_key: u32,
    pub weight_kg: f64,
    pub volume_m3: f64,
    pub distance_miles: f64,
    pub stop_count: u32,
    pub transit_hours: f64,
    pub revenue: f64,
    pub fuel_cost: f64,
    pub labor_cost: f64,
    pub toll_cost: f64,
    pub maintenance_cost: f64,
    pub penalty_cost: f64,
    pub on_time: bool,
    pub has_exception: bool,
    pub exception_type: Option<String>,
    pub status: String,
    pub efficiency_score: Option<f64>,
}

/// Shipment lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    Delivered,
    Cancelled,
    Returned,
}

impl From<&str> for ShipmentStatus {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pending" => ShipmentStatus::Pending,
            "in_transit" | "in transit" => ShipmentStatus::InTransit,
            "cancelled" | "canceled" => ShipmentStatus::Cancelled,
            "returned" => ShipmentStatus::Returned,
            _ => ShipmentStatus::Delivered, // default
        }
    }
}

/// Ordinal `YYYYMMDD` date key as stored in the delivery fact table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(pub u32);

impl DateKey {
    pub fn from_date(date: NaiveDate) -> Self {
        DateKey(date.year() as u32 * 10_000 + date.month() * 100 + date.day())
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        let year = (self.0 / 10_000) as i32;
        let month = (self.0 / 100) % 100;
        let day = self.0 % 100;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive date-key range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateKey,
    pub end: DateKey,
}

impl DateRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: DateKey(start),
            end: DateKey(end),
        }
    }

    pub fn contains(&self, key: DateKey) -> bool {
        key >= self.start && key <= self.end
    }
}

/// Immutable shipment event as read from the fact store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactRecord {
    pub shipment_key: String,
    pub route_key: String,
    pub driver_key: String,
    pub client_key: String,
    pub branch_key: String,
    pub carrier_key: String,
    pub container_key: Option<String>,
    pub pickup_at: Option<NaiveDateTime>,
    pub scheduled_delivery_at: Option<NaiveDateTime>,
    pub actual_delivery_at: Option<NaiveDateTime>,
    pub delivery_date_key: DateKey,
    pub weight_kg: f64,
    pub volume_m3: f64,
    pub distance_miles: f64,
    pub stop_count: u32,
    pub transit_hours: f64,
    pub revenue: f64,
    pub fuel_cost: f64,
    pub labor_cost: f64,
    pub toll_cost: f64,
    pub maintenance_cost: f64,
    pub penalty_cost: f64,
    pub on_time: bool,
    pub has_exception: bool,
    pub exception_type: Option<String>,
    pub status: ShipmentStatus,
    /// Route efficiency score (0-100) computed upstream by the planning system
    pub efficiency_score: Option<f64>,
}

impl FactRecord {
    pub fn total_cost(&self) -> f64 {
        self.fuel_cost + self.labor_cost + self.toll_cost + self.maintenance_cost + self.penalty_cost
    }

    pub fn profit(&self) -> f64 {
        self.revenue - self.total_cost()
    }

    /// Hours between scheduled and actual delivery; positive means late
    pub fn delay_hours(&self) -> Option<f64> {
        match (self.scheduled_delivery_at, self.actual_delivery_at) {
            (Some(scheduled), Some(actual)) => {
                Some((actual - scheduled).num_minutes() as f64 / 60.0)
            }
            _ => None,
        }
    }
}

impl CsvRecord {
    pub fn to_fact_record(&self) -> anyhow::Result<FactRecord> {
        let parse = |value: &Option<String>| -> anyhow::Result<Option<NaiveDateTime>> {
            match value.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(s) => Ok(Some(NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)?)),
            }
        };

        let delivery_date_key = DateKey(self.delivery_date_key);
        if delivery_date_key.to_date().is_none() {
            anyhow::bail!("invalid delivery_date_key {}", self.delivery_date_key);
        }

        Ok(FactRecord {
            shipment_key: self.shipment_key.clone(),
            route_key: self.route_key.clone(),
            driver_key: self.driver_key.clone(),
            client_key: self.client_key.clone(),
            branch_key: self.branch_key.clone(),
            carrier_key: self.carrier_key.clone(),
            container_key: self.container_key.clone().filter(|c| !c.is_empty()),
            pickup_at: parse(&self.pickup_at)?,
            scheduled_delivery_at: parse(&self.scheduled_delivery_at)?,
            actual_delivery_at: parse(&self.actual_delivery_at)?,
            delivery_date_key,
            weight_kg: self.weight_kg,
            volume_m3: self.volume_m3,
            distance_miles: self.distance_miles,
            stop_count: self.stop_count,
            transit_hours: self.transit_hours,
            revenue: self.revenue,
            fuel_cost: self.fuel_cost,
            labor_cost: self.labor_cost,
            toll_cost: self.toll_cost,
            maintenance_cost: self.maintenance_cost,
            penalty_cost: self.penalty_cost,
            on_time: self.on_time,
            has_exception: self.has_exception,
            exception_type: self.exception_type.clone().filter(|t| !t.is_empty()),
            status: ShipmentStatus::from(self.status.as_str()),
            efficiency_score: self.efficiency_score,
        })
    }
}

impl From<&FactRecord> for CsvRecord {
    fn from(r: &FactRecord) -> Self {
        let format = |dt: &Option<NaiveDateTime>| dt.map(|d| d.format(DATETIME_FORMAT).to_string());
        let status = serde_json::to_value(r.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        CsvRecord {
            shipment_key: r.shipment_key.clone(),
            route_key: r.route_key.clone(),
            driver_key: r.driver_key.clone(),
            client_key: r.client_key.clone(),
            branch_key: r.branch_key.clone(),
            carrier_key: r.carrier_key.clone(),
            container_key: r.container_key.clone(),
            pickup_at: format(&r.pickup_at),
            scheduled_delivery_at: format(&r.scheduled_delivery_at),
            actual_delivery_at: format(&r.actual_delivery_at),
            delivery_date_key: r.delivery_date_key.0,
            weight_kg: r.weight_kg,
            volume_m3: r.volume_m3,
            distance_miles: r.distance_miles,
            stop_count: r.stop_count,
            transit_hours: r.transit_hours,
            revenue: r.revenue,
            fuel_cost: r.fuel_cost,
            labor_cost: r.labor_cost,
            toll_cost: r.toll_cost,
            maintenance_cost: r.maintenance_cost,
            penalty_cost: r.penalty_cost,
            on_time: r.on_time,
            has_exception: r.has_exception,
            exception_type: r.exception_type.clone(),
            status,
            efficiency_score: r.efficiency_score,
        }
    }
}

/// Entity kinds the engine can drill into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Shipment,
    Route,
    Driver,
    Client,
    Branch,
    Carrier,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Shipment,
        EntityType::Route,
        EntityType::Driver,
        EntityType::Client,
        EntityType::Branch,
        EntityType::Carrier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Shipment => "shipment",
            EntityType::Route => "route",
            EntityType::Driver => "driver",
            EntityType::Client => "client",
            EntityType::Branch => "branch",
            EntityType::Carrier => "carrier",
        }
    }

    /// Returns `None` for names outside the closed set
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Column name of this entity's key in the fact table
    pub fn key_field(self) -> &'static str {
        match self {
            EntityType::Shipment => "shipment_key",
            EntityType::Route => "route_key",
            EntityType::Driver => "driver_key",
            EntityType::Client => "client_key",
            EntityType::Branch => "branch_key",
            EntityType::Carrier => "carrier_key",
        }
    }

    /// The record field holding this entity's key
    pub fn key_of(self, record: &FactRecord) -> &str {
        match self {
            EntityType::Shipment => &record.shipment_key,
            EntityType::Route => &record.route_key,
            EntityType::Driver => &record.driver_key,
            EntityType::Client => &record.client_key,
            EntityType::Branch => &record.branch_key,
            EntityType::Carrier => &record.carrier_key,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary entity as returned by the fact source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityProfile {
    pub entity_type: EntityType,
    pub key: String,
    pub name: String,
    /// Standard transit time for a route
    #[serde(default)]
    pub benchmark_hours: Option<f64>,
    /// Load capacity per shipment used for utilization
    #[serde(default)]
    pub capacity_kg: Option<f64>,
}

impl EntityProfile {
    pub fn new(entity_type: EntityType, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            key: key.into(),
            name: name.into(),
            benchmark_hours: None,
            capacity_kg: None,
        }
    }

    pub fn with_benchmark_hours(mut self, hours: f64) -> Self {
        self.benchmark_hours = Some(hours);
        self
    }

    pub fn with_capacity_kg(mut self, capacity: f64) -> Self {
        self.capacity_kg = Some(capacity);
        self
    }
}

/// Filter vocabulary accepted from callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub date_range: Option<DateRange>,
    pub client_key: Option<String>,
    pub route_key: Option<String>,
    pub driver_key: Option<String>,
    pub carrier_key: Option<String>,
    pub branch_key: Option<String>,
}

impl QueryFilters {
    pub fn for_range(start: u32, end: u32) -> Self {
        Self {
            date_range: Some(DateRange::new(start, end)),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &FactRecord) -> bool {
        let key_matches = |filter: &Option<String>, value: &str| {
            filter.as_deref().map_or(true, |k| k == value)
        };

        self.date_range
            .map_or(true, |range| range.contains(record.delivery_date_key))
            && key_matches(&self.client_key, &record.client_key)
            && key_matches(&self.route_key, &record.route_key)
            && key_matches(&self.driver_key, &record.driver_key)
            && key_matches(&self.carrier_key, &record.carrier_key)
            && key_matches(&self.branch_key, &record.branch_key)
    }

    /// Flattened parameters for cache key derivation; order is irrelevant
    pub fn params(&self) -> Vec<(String, Value)> {
        let mut params = Vec::new();
        if let Some(range) = self.date_range {
            params.push(("date_range.start".to_string(), Value::from(range.start.0)));
            params.push(("date_range.end".to_string(), Value::from(range.end.0)));
        }
        let keys = [
            ("client_key", &self.client_key),
            ("route_key", &self.route_key),
            ("driver_key", &self.driver_key),
            ("carrier_key", &self.carrier_key),
            ("branch_key", &self.branch_key),
        ];
        for (name, value) in keys {
            if let Some(v) = value {
                params.push((name.to_string(), Value::from(v.as_str())));
            }
        }
        params
    }
}

/// Requested drill-down depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Summary,
    Detail,
}

impl DetailLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DetailLevel::Summary => "summary",
            DetailLevel::Detail => "detail",
        }
    }
}

impl From<&str> for DetailLevel {
    fn from(s: &str) -> Self {
        if s == "summary" {
            DetailLevel::Summary
        } else {
            DetailLevel::Detail
        }
    }
}

/// Grouping dimension for ranking and bottleneck reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingDimension {
    Route,
    Driver,
    Client,
    Branch,
    Carrier,
}

impl GroupingDimension {
    pub const VALID: [&'static str; 5] = ["route", "driver", "client", "branch", "carrier"];

    pub fn entity_type(self) -> EntityType {
        match self {
            GroupingDimension::Route => EntityType::Route,
            GroupingDimension::Driver => EntityType::Driver,
            GroupingDimension::Client => EntityType::Client,
            GroupingDimension::Branch => EntityType::Branch,
            GroupingDimension::Carrier => EntityType::Carrier,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "route" => Ok(GroupingDimension::Route),
            "driver" => Ok(GroupingDimension::Driver),
            "client" => Ok(GroupingDimension::Client),
            "branch" => Ok(GroupingDimension::Branch),
            "carrier" => Ok(GroupingDimension::Carrier),
            _ => Err(AnalyticsError::invalid_argument("dimension", s, &Self::VALID)),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.entity_type().as_str()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A delivered, on-time shipment on 2024-03-04 with round numbers
    pub fn shipment(key: &str) -> FactRecord {
        FactRecord {
            shipment_key: key.to_string(),
            route_key: "R1".to_string(),
            driver_key: "D1".to_string(),
            client_key: "C1".to_string(),
            branch_key: "B1".to_string(),
            carrier_key: "K1".to_string(),
            container_key: None,
            pickup_at: None,
            scheduled_delivery_at: None,
            actual_delivery_at: None,
            delivery_date_key: DateKey(20240304),
            weight_kg: 1000.0,
            volume_m3: 10.0,
            distance_miles: 100.0,
            stop_count: 4,
            transit_hours: 48.0,
            revenue: 500.0,
            fuel_cost: 100.0,
            labor_cost: 150.0,
            toll_cost: 20.0,
            maintenance_cost: 30.0,
            penalty_cost: 0.0,
            on_time: true,
            has_exception: false,
            exception_type: None,
            status: ShipmentStatus::Delivered,
            efficiency_score: Some(90.0),
        }
    }
}
