pub mod config;
pub mod enrichment;
pub mod errors;
pub mod features;
pub mod fetch;
pub mod merge;
pub mod metrics_defs;
pub mod payload;
pub mod pipeline;
pub mod service;
pub mod upstreams;

#[cfg(test)]
mod testutils;

use crate::errors::AggregatorError;
use crate::pipeline::Aggregator;
use crate::service::AggregatorService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;

/// Serves the aggregation endpoint and the admin probes until either listener fails.
pub async fn run(config: config::Config, auth_token: Option<String>) -> errors::Result<()> {
    let aggregator = Aggregator::new(&config, auth_token)?;
    let service = AggregatorService::new(aggregator, &config.path);

    tracing::info!(
        path = %config.path,
        response_mode = ?config.response_mode,
        "Starting aggregator"
    );

    let aggregator_task =
        run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, AggregatorError>::new(|| true),
    );

    tokio::try_join!(aggregator_task, admin_task)?;
    Ok(())
}
