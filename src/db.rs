use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use tracing::debug;

use crate::models::{EntityProfile, EntityType, FactRecord};
use crate::source::{FactQuery, FactSource};

pub type DbConn = Surreal<Db>;

/// Initialize database connection with RocksDB backend
pub async fn connect(path: &str) -> Result<DbConn> {
    let db = Surreal::new::<RocksDb>(path).await?;
    db.use_ns("lastmile").use_db("kpi").await?;
    Ok(db)
}

/// In-memory database, schema included
pub async fn connect_memory() -> Result<DbConn> {
    let db = Surreal::new::<Mem>(()).await?;
    db.use_ns("lastmile").use_db("kpi").await?;
    init_schema(&db).await?;
    Ok(db)
}

/// Initialize database schema
pub async fn init_schema(db: &DbConn) -> Result<()> {
    db.query(
        r#"
        -- Delivery facts (schemaless, one row per shipment)
        DEFINE TABLE IF NOT EXISTS shipment SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_shipment_key ON shipment FIELDS shipment_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_delivery_date ON shipment FIELDS delivery_date_key;
        DEFINE INDEX IF NOT EXISTS idx_route ON shipment FIELDS route_key;
        DEFINE INDEX IF NOT EXISTS idx_driver ON shipment FIELDS driver_key;
        DEFINE INDEX IF NOT EXISTS idx_client ON shipment FIELDS client_key;
        DEFINE INDEX IF NOT EXISTS idx_carrier ON shipment FIELDS carrier_key;
        DEFINE INDEX IF NOT EXISTS idx_branch ON shipment FIELDS branch_key;

        -- Entity profiles (routes, drivers, clients, branches, carriers)
        DEFINE TABLE IF NOT EXISTS entity SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_entity ON entity FIELDS entity_type, key UNIQUE;
        "#,
    )
    .await?
    .check()?;

    Ok(())
}

pub async fn insert_record(db: &DbConn, record: &FactRecord) -> Result<()> {
    db.query("CREATE shipment CONTENT $record")
        .bind(("record", record.clone()))
        .await?
        .check()?;
    Ok(())
}

/// Creates or replaces the profile for `(entity_type, key)`
pub async fn upsert_profile(db: &DbConn, profile: &EntityProfile) -> Result<()> {
    db.query("DELETE entity WHERE entity_type = $entity_type AND key = $key; CREATE entity CONTENT $profile")
        .bind(("entity_type", profile.entity_type))
        .bind(("key", profile.key.clone()))
        .bind(("profile", profile.clone()))
        .await?
        .check()?;
    Ok(())
}

/// Fact source backed by the `shipment` and `entity` tables
#[derive(Clone)]
pub struct SurrealFactSource {
    db: DbConn,
}

impl SurrealFactSource {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    /// WHERE clause and bindings for the filters present in `query`
    fn conditions(query: &FactQuery) -> (String, Vec<(String, Value)>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        if let Some(range) = query.filters.date_range {
            clauses.push("delivery_date_key >= $start AND delivery_date_key <= $end".to_string());
            binds.push(("start".to_string(), Value::from(range.start.0)));
            binds.push(("end".to_string(), Value::from(range.end.0)));
        }

        let keys = [
            (EntityType::Client, &query.filters.client_key),
            (EntityType::Route, &query.filters.route_key),
            (EntityType::Driver, &query.filters.driver_key),
            (EntityType::Carrier, &query.filters.carrier_key),
            (EntityType::Branch, &query.filters.branch_key),
        ];
        for (entity_type, value) in keys {
            if let Some(v) = value {
                let field = entity_type.key_field();
                clauses.push(format!("{} = ${}", field, field));
                binds.push((field.to_string(), Value::from(v.as_str())));
            }
        }

        if let Some(entity) = &query.entity {
            clauses.push(format!("{} = $entity_key", entity.entity_type.key_field()));
            binds.push(("entity_key".to_string(), Value::from(entity.key.as_str())));
        }

        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (clause, binds)
    }
}

#[async_trait]
impl FactSource for SurrealFactSource {
    async fn query(&self, query: &FactQuery) -> Result<Vec<FactRecord>> {
        let (clause, binds) = Self::conditions(query);
        let sql = format!(
            "SELECT * OMIT id FROM shipment{} ORDER BY delivery_date_key, shipment_key",
            clause
        );
        debug!(%sql, "fact query");

        let mut request = self.db.query(sql);
        for bind in binds {
            request = request.bind(bind);
        }
        let records: Vec<FactRecord> = request.await?.check()?.take(0)?;
        Ok(records)
    }

    async fn find_entity(&self, entity_type: EntityType, key: &str) -> Result<Option<EntityProfile>> {
        let profiles: Vec<EntityProfile> = self
            .db
            .query("SELECT * OMIT id FROM entity WHERE entity_type = $entity_type AND key = $key LIMIT 1")
            .bind(("entity_type", entity_type))
            .bind(("key", key.to_string()))
            .await?
            .check()?
            .take(0)?;
        if let Some(profile) = profiles.into_iter().next() {
            return Ok(Some(profile));
        }

        // No profile: the entity exists if any shipment references it
        let sql = format!(
            "SELECT count() FROM shipment WHERE {} = $key GROUP ALL",
            entity_type.key_field()
        );
        let count: Option<i64> = self
            .db
            .query(sql)
            .bind(("key", key.to_string()))
            .await?
            .check()?
            .take("count")?;

        Ok(count
            .filter(|n| *n > 0)
            .map(|_| EntityProfile::new(entity_type, key, key)))
    }
}
