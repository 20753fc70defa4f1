use anyhow::Result;
use clap::{Parser, Subcommand};
use lastmile_kpi::cache::InMemoryCacheStore;
use lastmile_kpi::config::EngineConfig;
use lastmile_kpi::db::{self, SurrealFactSource};
use lastmile_kpi::drilldown::DrillDownRequest;
use lastmile_kpi::models::{DateRange, DetailLevel, QueryFilters};
use lastmile_kpi::service::AnalyticsService;
use lastmile_kpi::trends::Granularity;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lastmile_kpi")]
#[command(about = "Last-mile delivery KPI reports from the command line")]
struct Args {
    #[arg(long, env = "LASTMILE_DB", default_value = "data/lastmile.db")]
    db: String,

    /// Engine configuration JSON (TTLs, benchmarks, bottleneck rules)
    #[arg(long, env = "LASTMILE_CONFIG")]
    config: Option<PathBuf>,

    /// First delivery date key, YYYYMMDD
    #[arg(long, requires = "end")]
    start: Option<u32>,

    /// Last delivery date key, YYYYMMDD (inclusive)
    #[arg(long, requires = "start")]
    end: Option<u32>,

    #[arg(long)]
    client: Option<String>,

    #[arg(long)]
    route: Option<String>,

    #[arg(long)]
    driver: Option<String>,

    #[arg(long)]
    carrier: Option<String>,

    #[arg(long)]
    branch: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Headline operational KPIs
    Kpis,
    /// Routes ranked by efficiency score
    Routes,
    /// Top drivers by performance score
    Drivers {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// On-time rate with trend
    OnTime {
        #[arg(long, default_value = "week")]
        granularity: String,
    },
    /// Load utilization per group
    Utilization {
        #[arg(long, default_value = "carrier")]
        dimension: String,
    },
    /// Transit-time dispersion per group
    Variance {
        #[arg(long, default_value = "route")]
        dimension: String,
    },
    /// Bottleneck detection per group
    Bottlenecks {
        #[arg(long, default_value = "route")]
        dimension: String,
    },
    /// Drill into one entity
    DrillDown {
        entity_type: String,
        key: String,
        #[arg(long, default_value = "summary")]
        detail: String,
        #[arg(long, default_value = "week")]
        granularity: String,
    },
}

impl Args {
    fn filters(&self) -> QueryFilters {
        QueryFilters {
            date_range: self.start.zip(self.end).map(|(s, e)| DateRange::new(s, e)),
            client_key: self.client.clone(),
            route_key: self.route.clone(),
            driver_key: self.driver.clone(),
            carrier_key: self.carrier.clone(),
            branch_key: self.branch.clone(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;

    let db = db::connect(&args.db).await?;
    info!("Connected to SurrealDB at {}", args.db);

    let service = AnalyticsService::new(
        Arc::new(SurrealFactSource::new(db)),
        Arc::new(InMemoryCacheStore::new()),
        config,
    );
    let filters = args.filters();

    match &args.command {
        Command::Kpis => print_json(&service.operational_kpis(&filters).await?)?,
        Command::Routes => print_json(&service.route_efficiency(&filters).await?)?,
        Command::Drivers { limit } => print_json(&service.driver_rankings(&filters, *limit).await?)?,
        Command::OnTime { granularity } => {
            let granularity = Granularity::parse(granularity)?;
            print_json(&service.on_time_performance(&filters, granularity).await?)?
        }
        Command::Utilization { dimension } => print_json(&service.utilization(&filters, dimension).await?)?,
        Command::Variance { dimension } => print_json(&service.transit_variance(&filters, dimension).await?)?,
        Command::Bottlenecks { dimension } => print_json(&service.bottlenecks(&filters, dimension).await?)?,
        Command::DrillDown {
            entity_type,
            key,
            detail,
            granularity,
        } => {
            let request = DrillDownRequest::new(entity_type, key, DetailLevel::from(detail.as_str()))
                .with_filters(filters.clone())
                .with_granularity(Granularity::parse(granularity)?);
            print_json(&service.drill_down(&request).await?)?
        }
    }

    Ok(())
}
