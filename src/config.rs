use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub payments: PaymentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Platform's cut of every charge, percent (0-100)
    pub platform_fee_percent: i64,
    /// ISO 4217 code all courses are priced in
    pub currency: String,
    /// Page the buyer lands on after the provider redirect-back
    pub checkout_return_url: String,
    /// Per-call timeout applied to provider HTTP round trips
    pub provider_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .context("PORT not set")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let payments = PaymentsConfig {
            platform_fee_percent: env::var("PLATFORM_FEE_PERCENT")
                .context("PLATFORM_FEE_PERCENT not set")?
                .parse()
                .context("PLATFORM_FEE_PERCENT must be a valid number")?,
            currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            checkout_return_url: env::var("CHECKOUT_RETURN_URL")
                .context("CHECKOUT_RETURN_URL not set")?,
            provider_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("PROVIDER_TIMEOUT_SECS must be a valid number")?,
        };

        let config = Config {
            server,
            database,
            payments,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if !(0..=100).contains(&self.payments.platform_fee_percent) {
            return Err(anyhow!(
                "PLATFORM_FEE_PERCENT must be between 0 and 100, got {}",
                self.payments.platform_fee_percent
            ));
        }

        if self.payments.currency.len() != 3 {
            return Err(anyhow!(
                "PAYMENT_CURRENCY must be a 3-letter ISO code, got '{}'",
                self.payments.currency
            ));
        }

        if self.payments.checkout_return_url.trim().is_empty() {
            return Err(anyhow!("CHECKOUT_RETURN_URL cannot be empty"));
        }

        if self.payments.provider_timeout_secs == 0 {
            return Err(anyhow!("PROVIDER_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }
}
