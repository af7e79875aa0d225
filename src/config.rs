use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::filter::ImageFilter;
use crate::runtime::docker::EngineAddress;

/// Environment variable naming an extra TOML config file.
pub const CONFIG_FILE_ENV: &str = "DOCKER_OBSERVER_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Docker engine address (`unix://`, `tcp://` or `http://`).
    pub endpoint: String,
    /// Engine API timeout.  The per-cycle deadline is the smaller of
    /// this and `poll_interval`.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub excluded_images: Vec<String>,
    pub included_images: Vec<String>,
    /// Label key → glob on the label value.
    pub excluded_labels: BTreeMap<String, String>,
    pub use_host_bindings: bool,
    pub ignore_non_host_bindings: bool,
    pub propagate_labels: bool,
    pub watch_events: bool,
    /// Consecutive failed cycles before failures are logged as errors.
    pub failure_escalation_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "unix:///var/run/docker.sock".into(),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            excluded_images: Vec::new(),
            included_images: Vec::new(),
            excluded_labels: BTreeMap::new(),
            use_host_bindings: false,
            ignore_non_host_bindings: false,
            propagate_labels: true,
            watch_events: true,
            failure_escalation_threshold: 3,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("docker-observer.toml"))
            .merge(Json::file("docker-observer.json"));

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(path));
        }

        let config: Config = figment
            .merge(Env::prefixed("DOCKER_OBSERVER_").ignore(&["config"]))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("timeout", self.timeout),
            ("shutdown_timeout", self.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NonPositiveDuration(name));
            }
        }
        EngineAddress::parse(&self.endpoint)?;
        self.image_filter()?;
        Ok(())
    }

    pub fn image_filter(&self) -> Result<ImageFilter, ConfigError> {
        ImageFilter::new(
            &self.excluded_images,
            &self.included_images,
            &self.excluded_labels,
        )
    }

    /// Deadline for the runtime call of one cycle.
    pub fn cycle_deadline(&self) -> Duration {
        self.timeout.min(self.poll_interval)
    }
}
