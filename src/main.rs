//! costpipe - Unified cost reports from an aggregated API and a SQL warehouse

use clap::Parser;
use costpipe::{
    cli::{Cli, Command},
    config::{API_URL_ENV, PipelineConfig, WAREHOUSE_URL_ENV},
    cost_api::HttpCostApi,
    error::{CostPipeError, Result},
    pipeline::{CostPipeline, SeriesOutcome},
    warehouse::HttpWarehouse,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn require(url: &Option<String>, env_name: &str) -> Result<String> {
    url.clone().ok_or_else(|| {
        CostPipeError::Config(format!(
            "no endpoint configured, pass the flag or set {env_name}"
        ))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. The --quiet flag should override RUST_LOG.
    let filter = if cli.quiet {
        tracing_subscriber::EnvFilter::new("warn")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("costpipe=info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_url = require(&cli.api_url, API_URL_ENV)?;
    // The warehouse endpoint is only needed for warehouse-backed reports;
    // everything else runs against the aggregated API alone.
    let warehouse_url = match cli.command {
        Command::Warehouse => require(&cli.warehouse_url, WAREHOUSE_URL_ENV)?,
        _ => cli.warehouse_url.clone().unwrap_or_default(),
    };

    let pipeline = CostPipeline::new(
        Arc::new(HttpCostApi::new(api_url)),
        Arc::new(HttpWarehouse::new(warehouse_url)),
        PipelineConfig::default(),
    );

    let today = chrono::Utc::now().date_naive();
    let filters = cli.build_filters(today)?;

    let output = match cli.command {
        Command::Timeseries => {
            info!("Running timeseries report");
            serde_json::to_value(pipeline.get_timeseries(&filters).await?)?
        }
        Command::ByService => {
            info!("Running per-service breakdown");
            serde_json::to_value(pipeline.get_costs_by_service(&filters).await?)?
        }
        Command::ByTag { ref key } => {
            info!(tag_key = %key, "Running per-tag breakdown");
            serde_json::to_value(pipeline.get_costs_by_tag(&filters, key).await?)?
        }
        Command::Warehouse => {
            info!("Running warehouse report");
            serde_json::to_value(pipeline.get_costs_from_warehouse(&filters).await?)?
        }
        Command::Forecast => {
            info!(metric = %filters.metric, "Running forecast");
            serde_json::to_value(pipeline.get_forecast(&filters.metric).await?)?
        }
        Command::TopServices { count } => {
            info!(count, "Running top-services report");
            serde_json::to_value(pipeline.get_top_services(&filters, count).await?)?
        }
        Command::Trend => {
            info!("Running trend report");
            match pipeline.get_timeseries(&filters).await? {
                SeriesOutcome::Ready { data } => serde_json::to_value(pipeline.get_trend(&data))?,
                unavailable => serde_json::to_value(unavailable)?,
            }
        }
        Command::Warmup => {
            let warmed = pipeline.warmup().await;
            info!(warmed, "Cache warmed");
            serde_json::to_value(pipeline.cache_stats().await)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
