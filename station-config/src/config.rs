//! Global configuration (spec.md §3 "Global configuration", §6 env vars and
//! `station.conf`). Precedence for every directory/identity field is
//! CLI flag > environment variable > config file > built-in default, and
//! each resolved value remembers which tier it came from for `--params`
//! output and diagnostics.

use std::{collections::HashMap, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{cli::Cli, eui::Eui};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Cli,
    Env,
    File,
    Builtin,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cli => "cli",
            Self::Env => "env",
            Self::File => "file",
            Self::Builtin => "builtin",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pps {
    None,
    Gps,
    Fuzzy,
    Testpin,
}

impl std::str::FromStr for Pps {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps" => Ok(Self::Gps),
            "fuzzy" => Ok(Self::Fuzzy),
            "testpin" => Ok(Self::Testpin),
            other => Err(ConfigError::InvalidField {
                field: "pps",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parsing {path} as JSON: {source}")]
    Json { path: PathBuf, source: serde_json::Error },
    #[error("station.conf is missing the root \"station_conf\" key")]
    MissingRoot,
    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid EUI: {0}")]
    Eui(#[from] crate::eui::ParseEuiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: Provenance,
}

impl<T> Sourced<T> {
    fn new(value: T, source: Provenance) -> Self {
        Self { value, source }
    }
}

/// Raw `station.conf` shape. Root object key is `station_conf`; unrecognized
/// fields fall through into `extra` rather than erroring, matching the
/// original's generic key/value setter for forward compatibility.
#[derive(Debug, Deserialize, Default)]
struct ConfFile {
    station_conf: ConfBody,
}

#[derive(Debug, Deserialize, Default)]
struct ConfBody {
    routerid: Option<String>,
    euiprefix: Option<String>,
    log_file: Option<String>,
    log_size: Option<u64>,
    log_rotate: Option<u32>,
    log_level: Option<u8>,
    gps: Option<String>,
    pps: Option<String>,
    radio_init: Option<String>,
    device: Option<String>,
    web_port: Option<u16>,
    web_dir: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

const PRODUCTION_REJECTED_FIELDS: &[&str] = &["nocca", "nodc", "nodwell", "device_mode"];

#[derive(Debug, Clone)]
pub struct Config {
    pub home_dir: Sourced<PathBuf>,
    pub temp_dir: Sourced<PathBuf>,
    pub web_dir: Sourced<PathBuf>,

    pub router_eui: Sourced<Option<Eui>>,
    pub eui_prefix: Sourced<Option<u16>>,

    pub slave_idx: i32,

    pub log_file: Option<PathBuf>,
    pub log_size: Option<u64>,
    pub log_rotate: Option<u32>,
    pub log_level: u8,

    pub gps_device: Option<PathBuf>,
    pub pps: Pps,
    pub radio_init: Option<String>,
    pub web_port: Option<u16>,

    pub no_tc: bool,
    pub no_cups: bool,
    pub device_mode: bool,

    pub station_version: String,
    pub model: String,
    pub package_version: String,
}

impl Config {
    /// Resolve configuration from CLI args, environment variables, and an
    /// optional `station.conf`, in that precedence order.
    pub fn load(cli: &Cli, conf_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = match conf_path {
            Some(path) if path.exists() => Some(read_conf_file(path)?),
            _ => None,
        };
        let body = file.as_ref().map(|f| &f.station_conf);

        let home_dir = resolve_path(cli.home.clone(), "STATION_HOME", None, PathBuf::from("."));
        let temp_dir = resolve_path(cli.temp.clone(), "STATION_TEMPDIR", None, PathBuf::from("/tmp"));
        let web_dir = match body.and_then(|b| b.web_dir.clone()) {
            Some(v) => Sourced::new(PathBuf::from(v), Provenance::File),
            None => Sourced::new(PathBuf::from("web"), Provenance::Builtin),
        };

        let eui_prefix_str = resolve_opt_string(
            cli.eui_prefix.clone(),
            "STATION_EUIPREFIX",
            body.and_then(|b| b.euiprefix.clone()),
        );
        let eui_prefix = match &eui_prefix_str.value {
            Some(s) => Sourced::new(Some(parse_eui_prefix(s)?), eui_prefix_str.source),
            None => Sourced::new(None, Provenance::Builtin),
        };

        // `routerid` has no CLI flag or env var in the external-interfaces
        // surface; it only ever comes from `station.conf` or platform EUI
        // discovery (outside this crate's scope).
        let router_eui = match body.and_then(|b| b.routerid.clone()) {
            Some(s) => Sourced::new(Some(s.parse::<Eui>()?), Provenance::File),
            None => Sourced::new(None, Provenance::Builtin),
        };

        let log_level = resolve_opt_string(cli.log_level.clone(), "STATION_LOGLEVEL", body.and_then(|b| b.log_level.map(|n| n.to_string())))
            .value
            .map(|s| s.parse::<u8>().unwrap_or(2))
            .unwrap_or(2);

        let log_file = resolve_opt_string(cli.log_file.clone(), "STATION_LOGFILE", body.and_then(|b| b.log_file.clone()))
            .value
            .map(PathBuf::from);

        let radio_init = resolve_opt_string(cli.radio_init.clone(), "STATION_RADIOINIT", body.and_then(|b| b.radio_init.clone())).value;

        let pps = match body.and_then(|b| b.pps.clone()) {
            Some(s) => s.parse()?,
            None => Pps::None,
        };

        let device_mode = body
            .map(|b| b.extra.contains_key("device_mode"))
            .unwrap_or(false);
        if device_mode && !cfg!(debug_assertions) {
            tracing::warn!("station.conf sets \"device_mode\" which is rejected in production builds");
        }
        for field in PRODUCTION_REJECTED_FIELDS {
            if body.map(|b| b.extra.contains_key(*field)).unwrap_or(false) && !cfg!(debug_assertions) {
                tracing::warn!(field, "station.conf field is rejected in production builds");
            }
        }

        Ok(Self {
            home_dir,
            temp_dir,
            web_dir,
            router_eui,
            eui_prefix,
            slave_idx: cli.slave.unwrap_or(-1),
            log_file,
            log_size: body.and_then(|b| b.log_size),
            log_rotate: body.and_then(|b| b.log_rotate),
            log_level,
            gps_device: body.and_then(|b| b.gps.clone()).map(PathBuf::from),
            pps,
            radio_init,
            web_port: body.and_then(|b| b.web_port),
            no_tc: cli.no_tc,
            no_cups: cli.no_cups,
            device_mode: cfg!(debug_assertions) && device_mode,
            station_version: env!("CARGO_PKG_VERSION").to_string(),
            model: body.and_then(|b| b.device.clone()).unwrap_or_else(|| "generic".to_string()),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

fn resolve_path(cli: Option<PathBuf>, env_var: &str, file: Option<PathBuf>, builtin: PathBuf) -> Sourced<PathBuf> {
    if let Some(v) = cli {
        return Sourced::new(v, Provenance::Cli);
    }
    if let Ok(v) = std::env::var(env_var) {
        return Sourced::new(PathBuf::from(v), Provenance::Env);
    }
    if let Some(v) = file {
        return Sourced::new(v, Provenance::File);
    }
    Sourced::new(builtin, Provenance::Builtin)
}

fn resolve_opt_string(cli: Option<String>, env_var: &str, file: Option<String>) -> Sourced<Option<String>> {
    if let Some(v) = cli {
        return Sourced::new(Some(v), Provenance::Cli);
    }
    if let Ok(v) = std::env::var(env_var) {
        return Sourced::new(Some(v), Provenance::Env);
    }
    if let Some(v) = file {
        return Sourced::new(Some(v), Provenance::File);
    }
    Sourced::new(None, Provenance::Builtin)
}

fn parse_eui_prefix(s: &str) -> Result<u16, ConfigError> {
    let cleaned: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
    u16::from_str_radix(&cleaned, 16).map_err(|_| ConfigError::InvalidField {
        field: "eui-prefix",
        value: s.to_string(),
    })
}

fn read_conf_file(path: &std::path::Path) -> Result<ConfFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_takes_precedence_over_env_and_file() {
        std::env::remove_var("STATION_HOME");
        let cli = Cli::parse_from(["station", "--home", "/from/cli"]);
        let cfg = Config::load(&cli, None).unwrap();
        assert_eq!(cfg.home_dir.value, PathBuf::from("/from/cli"));
        assert_eq!(cfg.home_dir.source, Provenance::Cli);
    }

    #[test]
    fn defaults_to_builtin_when_nothing_set() {
        std::env::remove_var("STATION_TEMPDIR");
        let cli = Cli::parse_from(["station"]);
        let cfg = Config::load(&cli, None).unwrap();
        assert_eq!(cfg.temp_dir.source, Provenance::Builtin);
    }

    #[test]
    fn parses_pps_values() {
        assert_eq!("gps".parse::<Pps>().unwrap(), Pps::Gps);
        assert!("bogus".parse::<Pps>().is_err());
    }

    #[test]
    fn loads_station_conf_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.conf");
        std::fs::write(
            &path,
            r#"{"station_conf": {"routerid": "AA:BB:CC:DD:EE:FF:00:11", "log_level": 4, "pps": "gps"}}"#,
        )
        .unwrap();
        let cli = Cli::parse_from(["station"]);
        let cfg = Config::load(&cli, Some(&path)).unwrap();
        assert_eq!(cfg.router_eui.value.unwrap().as_u64(), 0xAABBCCDDEEFF0011);
        assert_eq!(cfg.log_level, 4);
        assert_eq!(cfg.pps, Pps::Gps);
    }
}
