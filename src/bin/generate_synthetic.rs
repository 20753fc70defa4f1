//! Synthetic delivery facts for the KPI engine
//!
//! Generates a fleet (routes, drivers, clients, branches, carriers) and a
//! stream of shipments over a date window, with per-route transit baselines
//! and per-driver punctuality so that rankings and bottlenecks have something
//! to find. Entity profiles (route benchmarks, capacities) are written as JSON
//! next to the CSV.
//!
//! Usage:
//!   cargo run --release --bin generate_synthetic -- [OPTIONS]
//!
//! Options:
//!   --shipments <N>   Number of shipments (default: 5000)
//!   --start <DATE>    First delivery date, YYYY-MM-DD (default: 2024-01-01)
//!   --days <N>        Length of the window in days (default: 90)
//!   --seed <N>        Random seed for reproducibility (optional)
//!   --output <PATH>   Output CSV path (default: data/shipments.csv)
//!   --profiles <PATH> Entity profile JSON (default: data/profiles.json)

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use clap::Parser;
use csv::WriterBuilder;
use lastmile_kpi::models::{CsvRecord, DateKey, EntityProfile, EntityType, FactRecord, ShipmentStatus};
use rand::prelude::*;
use rand::rngs::StdRng;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "generate_synthetic")]
#[command(about = "Generate synthetic last-mile delivery facts")]
struct Args {
    /// Number of shipments to generate
    #[arg(long, default_value = "5000")]
    shipments: usize,

    /// First delivery date (YYYY-MM-DD)
    #[arg(long, default_value = "2024-01-01")]
    start: NaiveDate,

    /// Window length in days
    #[arg(long, default_value = "90")]
    days: i64,

    #[arg(long, default_value = "24")]
    routes: usize,

    #[arg(long, default_value = "40")]
    drivers: usize,

    #[arg(long, default_value = "60")]
    clients: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Output CSV path
    #[arg(long, default_value = "data/shipments.csv")]
    output: PathBuf,

    /// Entity profile JSON path
    #[arg(long, default_value = "data/profiles.json")]
    profiles: PathBuf,
}

const BRANCHES: [&str; 4] = ["BR-BRONX", "BR-BROOKLYN", "BR-QUEENS", "BR-MANHATTAN"];
const CARRIERS: [&str; 5] = ["CR-METRO", "CR-HUDSON", "CR-EMPIRE", "CR-HARBOR", "CR-LIBERTY"];
const EXCEPTIONS: [&str; 4] = ["address_issue", "damaged", "customer_absent", "weather"];

struct Route {
    key: String,
    branch: &'static str,
    benchmark_hours: f64,
    /// Actual mean transit relative to the benchmark
    drift: f64,
    miles: f64,
}

struct Driver {
    key: String,
    on_time_prob: f64,
}

fn fleet(args: &Args, rng: &mut impl Rng) -> (Vec<Route>, Vec<Driver>) {
    let routes = (0..args.routes)
        .map(|i| Route {
            key: format!("RT-{:03}", i + 1),
            branch: BRANCHES[i % BRANCHES.len()],
            benchmark_hours: [24.0, 36.0, 48.0][i % 3],
            // most routes track their benchmark, a few run slow
            drift: if rng.gen_bool(0.2) { rng.gen_range(1.05..1.35) } else { rng.gen_range(0.85..1.02) },
            miles: rng.gen_range(15.0..180.0),
        })
        .collect();

    let drivers = (0..args.drivers)
        .map(|i| Driver {
            key: format!("DRV-{:03}", i + 1),
            on_time_prob: rng.gen_range(0.6..0.98),
        })
        .collect();

    (routes, drivers)
}

fn profiles(routes: &[Route]) -> Vec<EntityProfile> {
    let mut profiles: Vec<EntityProfile> = routes
        .iter()
        .map(|r| {
            EntityProfile::new(EntityType::Route, &r.key, format!("{} via {}", r.key, r.branch))
                .with_benchmark_hours(r.benchmark_hours)
        })
        .collect();
    for (i, branch) in BRANCHES.iter().enumerate() {
        profiles.push(
            EntityProfile::new(EntityType::Branch, *branch, branch.trim_start_matches("BR-"))
                .with_capacity_kg(1500.0 + 250.0 * i as f64),
        );
    }
    for carrier in CARRIERS {
        profiles.push(
            EntityProfile::new(EntityType::Carrier, carrier, carrier.trim_start_matches("CR-"))
                .with_capacity_kg(2000.0),
        );
    }
    profiles
}

fn generate_shipment(
    index: usize,
    args: &Args,
    route: &Route,
    driver: &Driver,
    rng: &mut impl Rng,
) -> FactRecord {
    let date = args.start + Duration::days(rng.gen_range(0..args.days.max(1)));
    let pickup = date.and_hms_opt(rng.gen_range(6..11), 0, 0).unwrap_or_default() - Duration::days(1);

    let transit_hours = (route.benchmark_hours * route.drift * rng.gen_range(0.8..1.2)).max(1.0);
    let on_time = rng.gen_bool(driver.on_time_prob);
    let scheduled = pickup + Duration::minutes((route.benchmark_hours * 60.0) as i64);
    let actual: NaiveDateTime = if on_time {
        scheduled - Duration::minutes(rng.gen_range(0..90))
    } else {
        scheduled + Duration::minutes(rng.gen_range(30..600))
    };

    let has_exception = rng.gen_bool(0.04);
    let miles = route.miles * rng.gen_range(0.9..1.1);
    let weight = rng.gen_range(200.0..1900.0);
    let status = match rng.gen_range(0..100) {
        0..=1 => ShipmentStatus::Returned,
        2 => ShipmentStatus::Cancelled,
        _ => ShipmentStatus::Delivered,
    };

    let round = |v: f64| (v * 100.0).round() / 100.0;

    FactRecord {
        shipment_key: format!("SH-{:07}", index + 1),
        route_key: route.key.clone(),
        driver_key: driver.key.clone(),
        client_key: format!("CL-{:03}", rng.gen_range(1..=args.clients.max(1))),
        branch_key: route.branch.to_string(),
        carrier_key: CARRIERS[rng.gen_range(0..CARRIERS.len())].to_string(),
        container_key: rng.gen_bool(0.3).then(|| format!("CT-{:05}", rng.gen_range(1..5000))),
        pickup_at: Some(pickup),
        scheduled_delivery_at: Some(scheduled),
        actual_delivery_at: Some(actual),
        delivery_date_key: DateKey::from_date(date),
        weight_kg: round(weight),
        volume_m3: round(weight / 160.0),
        distance_miles: round(miles),
        stop_count: rng.gen_range(1..25),
        transit_hours: round(transit_hours),
        revenue: round(miles * rng.gen_range(4.0..7.5) + weight * 0.05),
        fuel_cost: round(miles * 0.45),
        labor_cost: round(transit_hours * 6.5),
        toll_cost: round(rng.gen_range(0.0..25.0)),
        maintenance_cost: round(miles * 0.12),
        penalty_cost: if on_time { 0.0 } else { round(rng.gen_range(10.0..75.0)) },
        on_time,
        has_exception,
        exception_type: has_exception.then(|| EXCEPTIONS[rng.gen_range(0..EXCEPTIONS.len())].to_string()),
        status,
        efficiency_score: rng
            .gen_bool(0.9)
            .then(|| round((100.0 / route.drift - rng.gen_range(0.0..15.0)).clamp(0.0, 100.0))),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let args = Args::parse();
    info!(
        "Generating {} shipments over {} days from {} ({} routes, {} drivers)",
        args.shipments, args.days, args.start, args.routes, args.drivers
    );

    let mut rng: StdRng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    anyhow::ensure!(args.routes > 0 && args.drivers > 0, "need at least one route and one driver");
    let (routes, drivers) = fleet(&args, &mut rng);

    for path in [&args.output, &args.profiles] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(&args.output)?;

    let mut late = 0;
    for i in 0..args.shipments {
        let route = &routes[rng.gen_range(0..routes.len())];
        let driver = &drivers[rng.gen_range(0..drivers.len())];
        let record = generate_shipment(i, &args, route, driver, &mut rng);
        if !record.on_time {
            late += 1;
        }
        writer.serialize(CsvRecord::from(&record))?;

        if (i + 1) % 10000 == 0 {
            info!("Generated {}/{} shipments...", i + 1, args.shipments);
        }
    }
    writer.flush()?;

    let profiles = profiles(&routes);
    std::fs::write(&args.profiles, serde_json::to_string_pretty(&profiles)?)?;

    info!(
        "Wrote {} shipments ({} late) to {}",
        args.shipments,
        late,
        args.output.display()
    );
    info!("Wrote {} entity profiles to {}", profiles.len(), args.profiles.display());

    Ok(())
}
