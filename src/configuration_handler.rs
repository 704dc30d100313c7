use crate::{
    availability::{SlotPolicy, BOOKING_LEAD_TIME_MINUTES, SLOT_INTERVAL_MINUTES},
    business_hours::BusinessHours,
    configuration::Configuration,
    error::ConfigurationError,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Appointment slot service for real-estate advisors")]
pub struct ConfigurationHandler {
    /// Port the HTTP server listens on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Value expected in the `x-admin-password` header
    #[arg(long, env = "ADMIN_PASSWORD")]
    password: String,

    /// PostgreSQL connection URL. The calendar is kept in memory when omitted
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// JSON file with opening hours per weekday
    #[arg(long, env = "BUSINESS_HOURS")]
    business_hours: Option<PathBuf>,

    #[arg(long, env = "SLOT_INTERVAL_MINUTES", default_value_t = SLOT_INTERVAL_MINUTES,
          value_parser = clap::value_parser!(i64).range(5..=240))]
    slot_interval_minutes: i64,

    #[arg(long, env = "LEAD_TIME_MINUTES", default_value_t = BOOKING_LEAD_TIME_MINUTES,
          value_parser = clap::value_parser!(i64).range(0..=1440))]
    lead_time_minutes: i64,

    #[arg(skip)]
    loaded_business_hours: BusinessHours,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Result<Self, ConfigurationError> {
        if let Err(err) = dotenvy::dotenv() {
            info!(%err, "No .env file loaded");
        }
        Self::parse().load_business_hours()
    }

    fn load_business_hours(mut self) -> Result<Self, ConfigurationError> {
        match &self.business_hours {
            Some(path) => {
                self.loaded_business_hours = BusinessHours::from_file(path)?;
                info!(path = %path.display(), "Business hours loaded");
            }
            None => warn!("No business hours configured, using defaults"),
        }
        Ok(self)
    }
}

impl Configuration for ConfigurationHandler {
    fn password(&self) -> String {
        self.password.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn slot_policy(&self) -> SlotPolicy {
        SlotPolicy {
            business_hours: self.loaded_business_hours.clone(),
            interval_minutes: self.slot_interval_minutes,
            lead_time_minutes: self.lead_time_minutes,
        }
    }
}
