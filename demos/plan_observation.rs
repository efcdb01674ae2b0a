//! Plan an observation against the live services and print the flag reports.
//!
//! ```text
//! cargo run --example plan_observation -- Ceres "2024-01-01 00:00:00" "2024-01-01 02:00:00" 20 m FORS2_std
//! cargo run --example plan_observation --features progress -- ...
//! ```
use std::env;
use std::error::Error;

use flexi_logger::Logger;
use skypatch::config::{CatalogSpec, PlannerConfig};
use skypatch::coordinates::ObservingSite;
use skypatch::env_state::PlannerEnv;
use skypatch::pipeline::{run_query, HttpServices, QueryRequest};
use skypatch::progress::ProgressObserver;
use skypatch::time::format_utc;

fn arg(args: &[String], i: usize, default: &str) -> String {
    args.get(i).cloned().unwrap_or_else(|| default.to_string())
}

#[cfg(feature = "progress")]
fn observer() -> Box<dyn ProgressObserver> {
    Box::new(skypatch::progress::TerminalProgress::new())
}

#[cfg(not(feature = "progress"))]
fn observer() -> Box<dyn ProgressObserver> {
    Box::new(skypatch::progress::LogProgress)
}

fn main() -> Result<(), Box<dyn Error>> {
    let _logger = Logger::try_with_env_or_str("info")?.start()?;

    let args: Vec<String> = env::args().skip(1).collect();
    let target = arg(&args, 0, "Ceres");
    let start = arg(&args, 1, "2024-01-01 00:00:00");
    let end = arg(&args, 2, "2024-01-01 02:00:00");
    let step = arg(&args, 3, "20");
    let unit = arg(&args, 4, "m");
    let instrument = arg(&args, 5, "FORS2_std");
    let catalog = arg(&args, 6, "SDSS16");

    let request = QueryRequest::from_fields(&target, "", "", &start, &end, &step, &unit, "")?;
    let config = PlannerConfig::builder()
        .catalog(CatalogSpec::by_name(&catalog)?)
        .instrument(&instrument)?
        .build()?;
    let http = HttpServices::new(PlannerEnv::new());

    let progress = observer();
    let output = run_query(&request, &config, &http.services(), progress.as_ref())?;

    println!("{}", output.flags.table());
    print!("{}", output.flags.proximity_notice());
    println!("{}", output.best_seen);

    let (height, width) = output.mosaic.shape();
    println!(
        "mosaic: {width}x{height} px centred on {}, {:.1}% covered",
        output.mosaic.wcs.crval,
        100.0 * output.mosaic.coverage()
    );

    let site = ObservingSite::paranal();
    for patch in output.patches.iter() {
        println!(
            "{}  parallactic angle {:+.1} deg",
            format_utc(patch.timestamp()),
            site.parallactic_angle(&patch.center(), patch.timestamp())
        );
    }
    Ok(())
}
