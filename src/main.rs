use std::{sync::Arc, time::Duration};

use crate::{
    clock::SystemClock, configuration::Configuration, configuration_handler::ConfigurationHandler,
    database_interface::DatabaseInterface, error::StartupError, http::create_app,
    local_calendar::LocalCalendar,
};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod availability;
mod backend;
mod business_hours;
mod clock;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_calendar;
mod schema;
mod slot_selector;
#[cfg(test)]
mod testutils;
mod types;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!(%err, "Advisor scheduler stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    info!("Starting advisor scheduler");

    let configuration = ConfigurationHandler::parse_arguments()?;

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Accessible at {address}");

    let clock = Arc::new(SystemClock);
    let app = if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection. Retry in 1 sec. Omit the database URL to keep the calendar in memory.");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        create_app(backend, configuration, clock)
    } else {
        warn!("No database configured, calendar data is kept in memory only");
        create_app(LocalCalendar::default(), configuration, clock)
    };

    axum::serve(listener, app).await?;
    Ok(())
}
