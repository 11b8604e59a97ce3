//! Configuration for a power-plant process.
//!
//! A `PlantConfig` value is built in `main` and passed explicitly into the
//! runtime; there is no global configuration singleton.

use crate::error::PlantError;
use std::time::Duration;

/// Complete plant configuration.
#[derive(Debug, Clone)]
pub struct PlantConfig {
    /// Plant identity at startup.
    pub plant_id: u32,

    /// Address other plants use to reach this one.
    pub address: String,

    /// Peer RPC listen port.
    pub port: u16,

    /// Base URL of the administration HTTP service.
    pub admin_base_url: String,

    /// Broker URI, e.g. `tcp://localhost:1883`.
    pub mqtt_broker_url: String,

    /// Topic carrying inbound energy requests.
    pub energy_request_topic: String,

    /// Topic for outbound pollution batches.
    pub pollution_topic: String,

    /// Bid price distribution bounds.
    pub price_min: f64,
    pub price_max: f64,

    /// Deadline applied to every outbound peer RPC.
    pub rpc_timeout: Duration,

    /// Production simulation cost in milliseconds per kWh.
    pub production_ms_per_kwh: u64,

    /// How long a completed election's state is kept to absorb in-flight
    /// duplicates.
    pub election_cleanup_delay: Duration,

    /// Cadence of the simulated CO2 sensor.
    pub sensor_period: Duration,

    /// Cadence at which the aggregator drains the measurement buffer.
    pub aggregation_period: Duration,

    /// Wake-up period of the pollution publisher.
    pub publish_period: Duration,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            plant_id: 1,
            address: "localhost".to_string(),
            port: 7101,
            admin_base_url: "http://localhost:8080".to_string(),
            mqtt_broker_url: "tcp://localhost:1883".to_string(),
            energy_request_topic: "voltring/energy-requests".to_string(),
            pollution_topic: "voltring/pollution".to_string(),
            price_min: 0.1,
            price_max: 0.9,
            rpc_timeout: Duration::from_secs(5),
            production_ms_per_kwh: 1,
            election_cleanup_delay: Duration::from_secs(30),
            sensor_period: Duration::from_millis(100),
            aggregation_period: Duration::from_millis(200),
            publish_period: Duration::from_secs(10),
        }
    }
}

impl PlantConfig {
    /// Set the plant id and peer RPC port.
    pub fn with_identity(mut self, plant_id: u32, port: u16) -> Self {
        self.plant_id = plant_id;
        self.port = port;
        self
    }

    /// Set the bid price bounds.
    pub fn with_price_range(mut self, min: f64, max: f64) -> Self {
        self.price_min = min;
        self.price_max = max;
        self
    }

    /// Set the administration server base URL.
    pub fn with_admin_base_url(mut self, url: impl Into<String>) -> Self {
        self.admin_base_url = url.into();
        self
    }

    /// Set the broker URI.
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.mqtt_broker_url = url.into();
        self
    }

    /// Check value ranges and mandatory fields.
    pub fn validate(&self) -> Result<(), PlantError> {
        if self.plant_id == 0 {
            return Err(PlantError::ConfigurationInvalid(
                "plant.id must be positive".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(PlantError::ConfigurationInvalid(
                "plant.port must be in 1..=65535".to_string(),
            ));
        }
        if self.admin_base_url.trim().is_empty() {
            return Err(PlantError::ConfigurationInvalid(
                "admin.server.base-url must not be empty".to_string(),
            ));
        }
        if self.energy_request_topic.trim().is_empty() || self.pollution_topic.trim().is_empty() {
            return Err(PlantError::ConfigurationInvalid(
                "mqtt topics must not be empty".to_string(),
            ));
        }
        if !(self.price_min >= 0.0 && self.price_min <= self.price_max) {
            return Err(PlantError::ConfigurationInvalid(format!(
                "price bounds must satisfy 0 <= min <= max, got [{}, {}]",
                self.price_min, self.price_max
            )));
        }
        self.broker_host_port()?;
        Ok(())
    }

    /// Split the `tcp://host:port` broker URI into host and port.
    pub fn broker_host_port(&self) -> Result<(String, u16), PlantError> {
        parse_broker_url(&self.mqtt_broker_url)
    }
}

/// Parse a `tcp://host:port` (or bare `host:port`) broker URI.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), PlantError> {
    let rest = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);
    let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
        PlantError::ConfigurationInvalid(format!("broker URI '{url}' has no port"))
    })?;
    if host.is_empty() {
        return Err(PlantError::ConfigurationInvalid(format!(
            "broker URI '{url}' has no host"
        )));
    }
    let port: u16 = port.parse().map_err(|_| {
        PlantError::ConfigurationInvalid(format!("broker URI '{url}' has an invalid port"))
    })?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PlantConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_setters_apply() {
        let config = PlantConfig::default()
            .with_identity(9, 7209)
            .with_price_range(0.3, 0.3)
            .with_admin_base_url("http://admin:8080");
        assert_eq!(config.plant_id, 9);
        assert_eq!(config.port, 7209);
        assert_eq!(config.price_min, 0.3);
        assert_eq!(config.admin_base_url, "http://admin:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_price_range_is_rejected() {
        let config = PlantConfig::default().with_price_range(0.9, 0.1);
        assert!(matches!(
            config.validate(),
            Err(PlantError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn broker_url_parsing() {
        assert_eq!(
            parse_broker_url("tcp://localhost:1883").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("broker.lan:2883").unwrap(),
            ("broker.lan".to_string(), 2883)
        );
        assert!(parse_broker_url("tcp://localhost").is_err());
        assert!(parse_broker_url("tcp://:1883").is_err());
    }
}
