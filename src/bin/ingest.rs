use anyhow::Result;
use clap::Parser;
use csv::ReaderBuilder;
use lastmile_kpi::db;
use lastmile_kpi::models::{CsvRecord, EntityProfile};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Load delivery facts and entity profiles into SurrealDB")]
struct Args {
    /// Shipment CSV
    #[arg(long, default_value = "data/shipments.csv")]
    input: PathBuf,

    /// Entity profile JSON (route benchmarks, capacities)
    #[arg(long)]
    profiles: Option<PathBuf>,

    #[arg(long, env = "LASTMILE_DB", default_value = "data/lastmile.db")]
    db: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let args = Args::parse();

    info!("Connecting to SurrealDB at {}", args.db);
    let db = db::connect(&args.db).await?;

    info!("Initializing schema...");
    db::init_schema(&db).await?;

    info!("Reading CSV from {:?}", args.input);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(&args.input)?;

    let mut shipment_count = 0;
    let mut error_count = 0;
    let mut seen: HashSet<String> = HashSet::new();

    for (i, row) in reader.deserialize::<CsvRecord>().enumerate() {
        let record = match row.map_err(anyhow::Error::from).and_then(|r| r.to_fact_record()) {
            Ok(record) => record,
            Err(e) => {
                if error_count < 5 {
                    warn!("Failed to parse record {}: {}", i, e);
                }
                error_count += 1;
                continue;
            }
        };

        if !seen.insert(record.shipment_key.clone()) {
            if error_count < 5 {
                warn!("Duplicate shipment {} at record {}", record.shipment_key, i);
            }
            error_count += 1;
            continue;
        }

        match db::insert_record(&db, &record).await {
            Ok(()) => shipment_count += 1,
            Err(e) => {
                if error_count < 5 {
                    warn!("Insert failed for record {}: {}", i, e);
                }
                error_count += 1;
            }
        }

        if (i + 1) % 5000 == 0 {
            info!("Processed {} records...", i + 1);
        }
    }

    info!(
        "Ingestion complete: {} shipments, {} errors",
        shipment_count, error_count
    );

    if let Some(path) = &args.profiles {
        let raw = std::fs::read_to_string(path)?;
        let profiles: Vec<EntityProfile> = serde_json::from_str(&raw)?;
        for profile in &profiles {
            db::upsert_profile(&db, profile).await?;
        }
        info!("Loaded {} entity profiles from {:?}", profiles.len(), path);
    }

    // Verify counts
    let shipment_total: Option<i64> = db
        .query("SELECT count() FROM shipment GROUP ALL")
        .await?
        .take("count")?;
    let entity_total: Option<i64> = db
        .query("SELECT count() FROM entity GROUP ALL")
        .await?
        .take("count")?;

    info!("Database totals:");
    info!("  Shipments: {:?}", shipment_total);
    info!("  Entity profiles: {:?}", entity_total);

    Ok(())
}
