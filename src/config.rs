use crate::consumer::Topics;
use crate::generator::Strategy;
use crate::sink::{Measurement, RetryPolicy};
use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SETUP_CONFIG_ENV: &str = "EQUIPMENT_TELEMETRY_SETUP_CONFIG_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Generate and write straight to the store.
    Inline,
    /// Generate and publish to the queue.
    Publish,
    /// Consume the queue and write to the store.
    Consume,
    /// Publish and consume in one process.
    All,
}

impl Mode {
    pub fn runs_scheduler(self) -> bool {
        !matches!(self, Mode::Consume)
    }

    pub fn runs_consumer(self) -> bool {
        matches!(self, Mode::Consume | Mode::All)
    }

    pub fn publishes(self) -> bool {
        matches!(self, Mode::Publish | Mode::All)
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Mode::Inline),
            "publish" => Ok(Mode::Publish),
            "consume" => Ok(Mode::Consume),
            "all" => Ok(Mode::All),
            other => Err(anyhow!("unknown mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfigOverrides {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    generator: Option<String>,
    #[serde(default)]
    entity_ids: Option<Vec<i64>>,
    #[serde(default)]
    tick_interval_ms: Option<u64>,
    #[serde(default)]
    measurement: Option<String>,
    #[serde(default)]
    influx_url: Option<String>,
    #[serde(default)]
    influx_token: Option<String>,
    #[serde(default)]
    influx_org: Option<String>,
    #[serde(default)]
    influx_bucket: Option<String>,
    #[serde(default)]
    mqtt_host: Option<String>,
    #[serde(default)]
    mqtt_port: Option<u16>,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    samples_topic: Option<String>,
    #[serde(default)]
    delete_topic: Option<String>,
}

fn load_setup_config_overrides() -> Result<Option<SetupConfigOverrides>> {
    match env::var(SETUP_CONFIG_ENV) {
        Ok(raw) => read_setup_config(Path::new(raw.trim())),
        Err(_) => Ok(None),
    }
}

fn read_setup_config(path: &Path) -> Result<Option<SetupConfigOverrides>> {
    if path.as_os_str().is_empty() || !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read(path)
        .with_context(|| format!("failed to read setup config {}", path.display()))?;
    let overrides = parse_setup_config(contents)
        .with_context(|| format!("failed to parse setup config {}", path.display()))?;
    Ok(Some(overrides))
}

fn parse_setup_config(mut bytes: Vec<u8>) -> Result<SetupConfigOverrides, simd_json::Error> {
    simd_json::serde::from_slice(&mut bytes)
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub strategy: Strategy,
    pub seed: Option<u64>,
    pub entity_ids: Vec<i64>,
    pub tick_interval_ms: u64,
    pub measurement: Measurement,
    pub influx_url: String,
    pub influx_token: Option<String>,
    pub influx_org: String,
    pub influx_bucket: String,
    pub influx_timeout_ms: u64,
    pub sink_max_attempts: u32,
    pub sink_retry_backoff_ms: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub samples_topic: String,
    pub delete_topic: String,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Reads `.env`, the environment and the optional setup file. An unreadable setup file
    /// does not stop startup: it is handed back so the caller can log it once tracing is up.
    pub fn from_env() -> Result<(Self, Option<anyhow::Error>)> {
        dotenv().ok();
        let (overrides, setup_error) = match load_setup_config_overrides() {
            Ok(overrides) => (overrides, None),
            Err(err) => (None, Some(err)),
        };
        let config = Self::from_lookup(|key| env::var(key).ok(), overrides.as_ref())?;
        Ok((config, setup_error))
    }

    /// Builds the config from a key lookup. Setup-file overrides only apply to keys the
    /// lookup leaves unset.
    pub fn from_lookup<F>(lookup: F, overrides: Option<&SetupConfigOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let ov = overrides.cloned().unwrap_or_default();

        let mode = parse_or(
            get("EQUIPMENT_TELEMETRY_MODE").or(ov.mode),
            "EQUIPMENT_TELEMETRY_MODE",
            Mode::Inline,
        )?;
        let strategy = parse_or(
            get("EQUIPMENT_TELEMETRY_GENERATOR").or(ov.generator),
            "EQUIPMENT_TELEMETRY_GENERATOR",
            Strategy::RandomWalk,
        )?;
        let seed = get("EQUIPMENT_TELEMETRY_SEED")
            .map(|raw| raw.parse::<u64>().context("invalid EQUIPMENT_TELEMETRY_SEED"))
            .transpose()?;
        let entity_ids = match get("EQUIPMENT_TELEMETRY_ENTITY_IDS") {
            Some(raw) => parse_entity_ids(&raw)?,
            None => ov.entity_ids.unwrap_or_else(|| vec![1]),
        };
        let tick_interval_ms = match get("EQUIPMENT_TELEMETRY_TICK_INTERVAL_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .context("invalid EQUIPMENT_TELEMETRY_TICK_INTERVAL_MS")?,
            None => ov.tick_interval_ms.unwrap_or(60_000),
        };
        if tick_interval_ms == 0 {
            bail!("EQUIPMENT_TELEMETRY_TICK_INTERVAL_MS must be positive");
        }
        let measurement = parse_or(
            get("EQUIPMENT_TELEMETRY_MEASUREMENT").or(ov.measurement),
            "EQUIPMENT_TELEMETRY_MEASUREMENT",
            Measurement::EquipmentData,
        )?;

        let influx_url = get("INFLUX_URL")
            .or(ov.influx_url)
            .unwrap_or_else(|| "http://127.0.0.1:8086".to_string());
        let influx_token = get("INFLUX_TOKEN").or(ov.influx_token);
        let influx_org = get("INFLUX_ORG")
            .or(ov.influx_org)
            .unwrap_or_else(|| "equipment".to_string());
        let influx_bucket = get("INFLUX_BUCKET")
            .or(ov.influx_bucket)
            .unwrap_or_else(|| "equipment".to_string());
        let influx_timeout_ms = parse_or(get("INFLUX_TIMEOUT_MS"), "INFLUX_TIMEOUT_MS", 10_000u64)?;
        let sink_max_attempts = parse_or(
            get("EQUIPMENT_TELEMETRY_SINK_MAX_ATTEMPTS"),
            "EQUIPMENT_TELEMETRY_SINK_MAX_ATTEMPTS",
            1u32,
        )?
        .max(1);
        let sink_retry_backoff_ms = parse_or(
            get("EQUIPMENT_TELEMETRY_SINK_RETRY_BACKOFF_MS"),
            "EQUIPMENT_TELEMETRY_SINK_RETRY_BACKOFF_MS",
            500u64,
        )?;

        let mqtt_host = get("EQUIPMENT_TELEMETRY_MQTT_HOST")
            .or(ov.mqtt_host)
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let mqtt_port = match get("EQUIPMENT_TELEMETRY_MQTT_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .context("invalid EQUIPMENT_TELEMETRY_MQTT_PORT")?,
            None => ov.mqtt_port.filter(|port| *port != 0).unwrap_or(1883),
        };
        let mqtt_username = get("EQUIPMENT_TELEMETRY_MQTT_USERNAME").or(ov.mqtt_username);
        let mqtt_password = get("EQUIPMENT_TELEMETRY_MQTT_PASSWORD").or(ov.mqtt_password);
        let mqtt_client_id = get("EQUIPMENT_TELEMETRY_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("equipment-telemetry-{}", std::process::id()));
        let mqtt_keepalive_secs = parse_or(
            get("EQUIPMENT_TELEMETRY_MQTT_KEEPALIVE_SECS"),
            "EQUIPMENT_TELEMETRY_MQTT_KEEPALIVE_SECS",
            30u64,
        )?;
        let samples_topic = get("EQUIPMENT_TELEMETRY_SAMPLES_TOPIC")
            .or(ov.samples_topic)
            .unwrap_or_else(|| "equipment/telemetry".to_string());
        let delete_topic = get("EQUIPMENT_TELEMETRY_DELETE_TOPIC")
            .or(ov.delete_topic)
            .unwrap_or_else(|| "equipment/deleted".to_string());
        if samples_topic == delete_topic {
            bail!("samples and delete topics must differ (both {samples_topic:?})");
        }
        let otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            mode,
            strategy,
            seed,
            entity_ids,
            tick_interval_ms,
            measurement,
            influx_url,
            influx_token,
            influx_org,
            influx_bucket,
            influx_timeout_ms,
            sink_max_attempts,
            sink_retry_backoff_ms,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keepalive_secs,
            samples_topic,
            delete_topic,
            otlp_endpoint,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn influx_timeout(&self) -> Duration {
        Duration::from_millis(self.influx_timeout_ms)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sink_max_attempts,
            backoff: Duration::from_millis(self.sink_retry_backoff_ms),
        }
    }

    pub fn topics(&self) -> Topics {
        Topics {
            samples: self.samples_topic.clone(),
            deletes: self.delete_topic.clone(),
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| anyhow!("invalid {key}: {err}")),
        None => Ok(default),
    }
}

fn parse_entity_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().with_context(|| {
                format!("invalid equipment id {part:?} in EQUIPMENT_TELEMETRY_ENTITY_IDS")
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(
        pairs: &[(&str, &str)],
        overrides: Option<&SetupConfigOverrides>,
    ) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned(), overrides)
    }

    #[test]
    fn defaults() {
        let config = config_from(&[], None).unwrap();
        assert_eq!(config.mode, Mode::Inline);
        assert_eq!(config.strategy, Strategy::RandomWalk);
        assert_eq!(config.entity_ids, vec![1]);
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.measurement, Measurement::EquipmentData);
        assert_eq!(config.influx_url, "http://127.0.0.1:8086");
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert_eq!(config.samples_topic, "equipment/telemetry");
        assert_eq!(config.delete_topic, "equipment/deleted");
        assert!(config.seed.is_none());
    }

    #[test]
    fn env_values_are_parsed() {
        let config = config_from(
            &[
                ("EQUIPMENT_TELEMETRY_MODE", "all"),
                ("EQUIPMENT_TELEMETRY_GENERATOR", "uniform"),
                ("EQUIPMENT_TELEMETRY_SEED", "99"),
                ("EQUIPMENT_TELEMETRY_ENTITY_IDS", "3, 1,2,"),
                ("EQUIPMENT_TELEMETRY_MEASUREMENT", "equipment_statistics"),
                ("EQUIPMENT_TELEMETRY_SINK_MAX_ATTEMPTS", "0"),
            ],
            None,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::All);
        assert!(config.mode.publishes() && config.mode.runs_consumer());
        assert_eq!(config.strategy, Strategy::Uniform);
        assert_eq!(config.seed, Some(99));
        assert_eq!(config.entity_ids, vec![3, 1, 2]);
        assert_eq!(config.measurement, Measurement::EquipmentStatistics);
        assert_eq!(config.sink_max_attempts, 1);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(config_from(&[("EQUIPMENT_TELEMETRY_MODE", "sideways")], None).is_err());
        assert!(config_from(&[("EQUIPMENT_TELEMETRY_ENTITY_IDS", "1,x")], None).is_err());
        assert!(config_from(&[("EQUIPMENT_TELEMETRY_TICK_INTERVAL_MS", "0")], None).is_err());
        assert!(config_from(
            &[
                ("EQUIPMENT_TELEMETRY_SAMPLES_TOPIC", "same"),
                ("EQUIPMENT_TELEMETRY_DELETE_TOPIC", "same"),
            ],
            None
        )
        .is_err());
    }

    #[test]
    fn setup_file_fills_unset_keys_only() {
        let overrides = parse_setup_config(
            br#"{"influx_bucket":"from-file","influx_org":"file-org","entity_ids":[5,6],"mqtt_port":0}"#
                .to_vec(),
        )
        .unwrap();
        let config = config_from(&[("INFLUX_ORG", "env-org")], Some(&overrides)).unwrap();
        assert_eq!(config.influx_bucket, "from-file");
        assert_eq!(config.influx_org, "env-org");
        assert_eq!(config.entity_ids, vec![5, 6]);
        assert_eq!(config.mqtt_port, 1883);
    }

    #[test]
    fn setup_file_errors_are_reported_with_path() {
        assert!(parse_setup_config(b"{not json".to_vec()).is_err());

        let missing = std::env::temp_dir().join("equipment-telemetry-no-such-setup.json");
        assert!(read_setup_config(&missing).unwrap().is_none());
        assert!(read_setup_config(Path::new("")).unwrap().is_none());

        let broken = std::env::temp_dir().join(format!(
            "equipment-telemetry-setup-{}.json",
            std::process::id()
        ));
        std::fs::write(&broken, b"{not json").unwrap();
        let err = read_setup_config(&broken).unwrap_err();
        std::fs::remove_file(&broken).unwrap();
        assert!(format!("{err:#}").contains("failed to parse setup config"));
        assert!(err.to_string().contains(&*broken.to_string_lossy()));
    }
}
