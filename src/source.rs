//! Read-only access to shipment facts
//!
//! The engine never builds storage queries itself; it hands a [`FactQuery`]
//! to a [`FactSource`] and works on the snapshot that comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{EntityProfile, EntityType, FactRecord, QueryFilters};

/// Entity restriction applied on top of the caller's filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactQuery {
    pub filters: QueryFilters,
    pub entity: Option<EntityRef>,
}

impl FactQuery {
    pub fn new(filters: QueryFilters) -> Self {
        Self { filters, entity: None }
    }

    pub fn for_entity(filters: QueryFilters, entity_type: EntityType, key: impl Into<String>) -> Self {
        Self {
            filters,
            entity: Some(EntityRef {
                entity_type,
                key: key.into(),
            }),
        }
    }

    pub fn matches(&self, record: &FactRecord) -> bool {
        self.filters.matches(record)
            && self
                .entity
                .as_ref()
                .map_or(true, |e| e.entity_type.key_of(record) == e.key)
    }
}

/// Source of shipment facts and entity metadata.
///
/// Implementations return a finite, already-filtered snapshot; the engine does
/// no pagination.
#[async_trait]
pub trait FactSource: Send + Sync {
    async fn query(&self, query: &FactQuery) -> anyhow::Result<Vec<FactRecord>>;

    async fn find_entity(&self, entity_type: EntityType, key: &str) -> anyhow::Result<Option<EntityProfile>>;
}

/// Fact source over an in-memory snapshot.
///
/// Entities without an explicit profile are considered to exist when at least
/// one record references them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFactSource {
    records: Vec<FactRecord>,
    profiles: HashMap<(EntityType, String), EntityProfile>,
}

impl InMemoryFactSource {
    pub fn new(records: Vec<FactRecord>) -> Self {
        Self {
            records,
            profiles: HashMap::new(),
        }
    }

    pub fn with_profile(mut self, profile: EntityProfile) -> Self {
        self.add_profile(profile);
        self
    }

    pub fn add_profile(&mut self, profile: EntityProfile) {
        self.profiles
            .insert((profile.entity_type, profile.key.clone()), profile);
    }

    pub fn records(&self) -> &[FactRecord] {
        &self.records
    }
}

#[async_trait]
impl FactSource for InMemoryFactSource {
    async fn query(&self, query: &FactQuery) -> anyhow::Result<Vec<FactRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn find_entity(&self, entity_type: EntityType, key: &str) -> anyhow::Result<Option<EntityProfile>> {
        if let Some(profile) = self.profiles.get(&(entity_type, key.to_string())) {
            return Ok(Some(profile.clone()));
        }
        let referenced = self.records.iter().any(|r| entity_type.key_of(r) == key);
        Ok(referenced.then(|| EntityProfile::new(entity_type, key, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::shipment;

    #[tokio::test]
    async fn test_query_applies_entity_and_filters() {
        let mut other = shipment("S2");
        other.route_key = "R2".to_string();
        let source = InMemoryFactSource::new(vec![shipment("S1"), other]);

        let query = FactQuery::for_entity(QueryFilters::for_range(20240301, 20240331), EntityType::Route, "R2");
        let records = source.query(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].shipment_key, "S2");

        let outside = FactQuery::new(QueryFilters::for_range(20240401, 20240430));
        assert!(source.query(&outside).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_entity() {
        let source = InMemoryFactSource::new(vec![shipment("S1")])
            .with_profile(EntityProfile::new(EntityType::Client, "C9", "Acme").with_capacity_kg(500.0));

        let client = source.find_entity(EntityType::Client, "C9").await.unwrap().unwrap();
        assert_eq!(client.name, "Acme");
        assert!(source.find_entity(EntityType::Driver, "D1").await.unwrap().is_some());
        assert!(source.find_entity(EntityType::Driver, "D404").await.unwrap().is_none());
    }
}
