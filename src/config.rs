use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::domain::Network;
use crate::flows::validation::DEFAULT_EMISSION_FACTOR_CEILING;
use crate::solver::CONSERVATION_TOLERANCE;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub db: DbConfig,
    #[validate(nested)]
    pub network: NetworkConfig,
    #[serde(default)]
    #[validate(nested)]
    pub flows: FlowsConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DbConfig {
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_interval_grid"))]
pub struct NetworkConfig {
    #[validate(length(min = 1))]
    pub code: String,
    #[validate(range(min = -720, max = 840))]
    pub utc_offset_minutes: i32,
    #[validate(range(min = 1, max = 60))]
    pub interval_minutes: u32,
    #[serde(default)]
    pub data_first_seen: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub additional_generation_networks: Vec<String>,
}

fn validate_interval_grid(cfg: &NetworkConfig) -> Result<(), ValidationError> {
    if cfg.interval_minutes == 0 || 60 % cfg.interval_minutes != 0 {
        return Err(ValidationError::new("interval_minutes_must_divide_hour"));
    }
    Ok(())
}

impl NetworkConfig {
    pub fn to_network(&self) -> Result<Network> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .with_context(|| format!("invalid utc offset {} minutes", self.utc_offset_minutes))?;

        let mut network = Network::new(self.code.clone(), offset, self.interval_minutes)
            .with_additional_generation_networks(self.additional_generation_networks.clone());
        if let Some(first_seen) = self.data_first_seen {
            network = network.with_data_first_seen(first_seen);
        }
        Ok(network)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_factor_band"))]
pub struct FlowsConfig {
    pub emission_factor_ceiling: f64,
    #[validate(range(min = 0.0))]
    pub emission_factor_floor: f64,
    #[validate(range(min = 1))]
    pub backfill_block_days: u32,
    /// Enforce record validation on interval and backfill runs
    pub validate: bool,
    /// Relative tolerance when re-checking solver output for emissions conservation
    #[validate(range(exclusive_min = 0.0, max = 0.01))]
    pub solver_tolerance: f64,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            emission_factor_ceiling: DEFAULT_EMISSION_FACTOR_CEILING,
            emission_factor_floor: 0.0,
            backfill_block_days: 7,
            validate: true,
            solver_tolerance: CONSERVATION_TOLERANCE,
        }
    }
}

fn validate_factor_band(cfg: &FlowsConfig) -> Result<(), ValidationError> {
    if cfg.emission_factor_ceiling <= cfg.emission_factor_floor {
        return Err(ValidationError::new("emission_factor_ceiling_below_floor"));
    }
    Ok(())
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("FLOWS__").split("__"));
        Self::load_from(figment)
    }

    pub fn load_from(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("failed to read configuration")?;
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [db]
        url = "postgres://localhost/opennem"

        [network]
        code = "NEM"
        utc_offset_minutes = 600
        interval_minutes = 5
        data_first_seen = "1998-12-07T01:50:00+10:00"
        additional_generation_networks = ["AEMO_ROOFTOP"]
    "#;

    fn load(toml: &str) -> Result<Config> {
        Config::load_from(Figment::from(Toml::string(toml)))
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let cfg = load(BASE).unwrap();
        assert_eq!(cfg.db.max_connections, 10);
        assert_eq!(cfg.flows.backfill_block_days, 7);
        assert_eq!(cfg.flows.emission_factor_ceiling, 1.7);
        assert!(cfg.flows.validate);
    }

    #[test]
    fn test_network_is_built_from_config() {
        let cfg = load(BASE).unwrap();
        let network = cfg.network.to_network().unwrap();

        assert_eq!(network.code, "NEM");
        assert_eq!(network.intervals_per_hour(), 12.0);
        assert_eq!(network.fixed_offset().local_minus_utc(), 36_000);
        assert_eq!(
            network.generation_network_codes(),
            vec!["NEM".to_string(), "AEMO_ROOFTOP".to_string()]
        );
        assert!(network.data_first_seen.is_some());
    }

    #[test]
    fn test_interval_must_divide_an_hour() {
        let toml = BASE.replace("interval_minutes = 5", "interval_minutes = 7");
        assert!(load(&toml).is_err());
    }

    #[test]
    fn test_ceiling_must_exceed_floor() {
        let toml = format!(
            "{BASE}\n[flows]\nemission_factor_ceiling = 0.5\nemission_factor_floor = 1.0\n"
        );
        assert!(load(&toml).is_err());
    }

    #[test]
    fn test_partial_flows_section_keeps_defaults() {
        let toml = format!("{BASE}\n[flows]\nvalidate = false\n");
        let cfg = load(&toml).unwrap();
        assert!(!cfg.flows.validate);
        assert_eq!(cfg.flows.backfill_block_days, 7);
        assert_eq!(cfg.flows.solver_tolerance, 1e-6);
    }

    #[test]
    fn test_solver_tolerance_must_be_positive() {
        let toml = format!("{BASE}\n[flows]\nsolver_tolerance = 0.0\n");
        assert!(load(&toml).is_err());

        let toml = format!("{BASE}\n[flows]\nsolver_tolerance = 1e-4\n");
        assert_eq!(load(&toml).unwrap().flows.solver_tolerance, 1e-4);
    }

    #[test]
    fn test_shipped_defaults_include_rooftop_networks() {
        let cfg = load(include_str!("../config/default.toml")).unwrap();
        assert_eq!(
            cfg.network.to_network().unwrap().generation_network_codes(),
            vec!["NEM", "AEMO_ROOFTOP", "OPENNEM_ROOFTOP_BACKFILL"]
        );
    }
}
