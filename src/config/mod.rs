//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashSet,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::{FullNameResolution, ObjectType, TypeDescriptor};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "infocache";
const DEFAULT_NODE_NAME: &str = "node-1";
const DEFAULT_FILES_ROOT: &str = "files";
const DEFAULT_CONSUME_BATCH_LIMIT: u64 = 100;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 1_000;
const DEFAULT_DEDUPE_WINDOW: u64 = 1_024;

/// Command-line arguments for the infocache binary.
#[derive(Debug, Parser)]
#[command(name = "infocache", version, about = "Cached object providers and web-farm replay")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "INFOCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: NodeOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply web-farm tasks from a JSON-lines file to a fresh node.
    Replay(ReplayArgs),
    /// Print the resolved type descriptors.
    Types,
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    /// File with one serialized task per line.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Print the replay plan without applying it.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct NodeOverrides {
    /// Override the node name used as task origin.
    #[arg(long = "node-name", value_name = "NAME", global = true)]
    pub node_name: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Toggle provider caching globally.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Toggle web-farm task creation.
    #[arg(
        long = "farm-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub farm_enabled: Option<bool>,

    /// Toggle file replication tasks.
    #[arg(
        long = "farm-file-sync",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub file_sync_enabled: Option<bool>,

    /// Override the root directory of replicated files.
    #[arg(long = "farm-files-root", value_name = "PATH", global = true)]
    pub files_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub node: NodeSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub farm: FarmSettings,
    pub types: Vec<Arc<TypeDescriptor>>,
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct FarmSettings {
    pub enabled: bool,
    pub file_sync_enabled: bool,
    pub files_root: PathBuf,
    pub consume_batch_limit: NonZeroUsize,
    pub auto_consume_interval: Duration,
    pub dedupe_window: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("INFOCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    node: RawNodeSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    farm: RawFarmSettings,
    types: Vec<RawTypeSettings>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &NodeOverrides) {
        if let Some(name) = overrides.node_name.as_ref() {
            self.node.name = Some(name.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(enabled) = overrides.farm_enabled {
            self.farm.enabled = Some(enabled);
        }
        if let Some(enabled) = overrides.file_sync_enabled {
            self.farm.file_sync_enabled = Some(enabled);
        }
        if let Some(root) = overrides.files_root.as_ref() {
            self.farm.files_root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            node,
            logging,
            cache,
            farm,
            types,
        } = raw;

        let node = build_node_settings(node)?;
        let logging = build_logging_settings(logging)?;
        let cache = CacheSettings {
            enabled: cache.enabled.unwrap_or(true),
        };
        let farm = build_farm_settings(farm)?;
        let types = build_type_settings(types)?;

        Ok(Self {
            node,
            logging,
            cache,
            farm,
            types,
        })
    }
}

fn build_node_settings(node: RawNodeSettings) -> Result<NodeSettings, LoadError> {
    let name = node
        .name
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string());
    if name.is_empty() {
        return Err(LoadError::invalid("node.name", "must not be empty"));
    }
    Ok(NodeSettings { name })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_farm_settings(farm: RawFarmSettings) -> Result<FarmSettings, LoadError> {
    let files_root = farm
        .files_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FILES_ROOT));
    if files_root.as_os_str().is_empty() {
        return Err(LoadError::invalid("farm.files_root", "must not be empty"));
    }

    let consume_batch_limit = non_zero_usize(
        farm.consume_batch_limit
            .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT),
        "farm.consume_batch_limit",
    )?;
    let dedupe_window = non_zero_usize(
        farm.dedupe_window.unwrap_or(DEFAULT_DEDUPE_WINDOW),
        "farm.dedupe_window",
    )?;
    let interval_ms = NonZeroU64::new(
        farm.auto_consume_interval_ms
            .unwrap_or(DEFAULT_AUTO_CONSUME_INTERVAL_MS),
    )
    .ok_or_else(|| {
        LoadError::invalid("farm.auto_consume_interval_ms", "must be greater than zero")
    })?;

    Ok(FarmSettings {
        enabled: farm.enabled.unwrap_or(true),
        file_sync_enabled: farm.file_sync_enabled.unwrap_or(false),
        files_root,
        consume_batch_limit,
        auto_consume_interval: Duration::from_millis(interval_ms.get()),
        dedupe_window,
    })
}

fn build_type_settings(types: Vec<RawTypeSettings>) -> Result<Vec<Arc<TypeDescriptor>>, LoadError> {
    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(types.len());
    for raw in types {
        let object_type = ObjectType::new(&raw.object_type)
            .map_err(|err| LoadError::invalid("types.object_type", err.to_string()))?;
        if !seen.insert(object_type.clone()) {
            return Err(LoadError::invalid(
                "types.object_type",
                format!("`{object_type}` is declared more than once"),
            ));
        }
        descriptors.push(raw.into_descriptor(object_type)?);
    }
    Ok(descriptors)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNodeSettings {
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFarmSettings {
    enabled: Option<bool>,
    file_sync_enabled: Option<bool>,
    files_root: Option<PathBuf>,
    consume_batch_limit: Option<u64>,
    auto_consume_interval_ms: Option<u64>,
    dedupe_window: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTypeSettings {
    object_type: String,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    id_column: Option<String>,
    #[serde(default)]
    name_column: Option<String>,
    #[serde(default)]
    full_name_column: Option<String>,
    #[serde(default)]
    full_name_resolution: Option<FullNameResolution>,
    #[serde(default)]
    guid_column: Option<String>,
    #[serde(default)]
    last_modified_column: Option<String>,
    #[serde(default)]
    site_id_column: Option<String>,
    #[serde(default)]
    supports_caching: Option<bool>,
    #[serde(default)]
    log_events: Option<bool>,
    #[serde(default)]
    touch_cache_dependencies: Option<bool>,
}

impl RawTypeSettings {
    fn into_descriptor(self, object_type: ObjectType) -> Result<Arc<TypeDescriptor>, LoadError> {
        let mut builder = TypeDescriptor::builder(object_type)
            .supports_caching(self.supports_caching.unwrap_or(true))
            .log_events(self.log_events.unwrap_or(false))
            .touch_cache_dependencies(self.touch_cache_dependencies.unwrap_or(false));
        if let Some(module) = self.module {
            builder = builder.module(module);
        }
        if let Some(column) = self.id_column {
            builder = builder.id_column(column);
        }
        if let Some(column) = self.name_column {
            builder = builder.name_column(column);
        }
        if let Some(column) = self.full_name_column {
            builder = builder.full_name_column(column);
        }
        if let Some(resolution) = self.full_name_resolution {
            builder = builder.full_name_resolution(resolution);
        }
        if let Some(column) = self.guid_column {
            builder = builder.guid_column(column);
        }
        if let Some(column) = self.last_modified_column {
            builder = builder.last_modified_column(column);
        }
        if let Some(column) = self.site_id_column {
            builder = builder.site_id_column(column);
        }
        builder
            .build()
            .map_err(|err| LoadError::invalid("types", err.to_string()))
    }
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_type(object_type: &str) -> RawTypeSettings {
        RawTypeSettings {
            object_type: object_type.to_string(),
            module: None,
            id_column: Some("ID".to_string()),
            name_column: None,
            full_name_column: None,
            full_name_resolution: None,
            guid_column: None,
            last_modified_column: None,
            site_id_column: None,
            supports_caching: None,
            log_events: None,
            touch_cache_dependencies: None,
        }
    }

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.node.name, DEFAULT_NODE_NAME);
        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
        assert!(settings.cache.enabled);
        assert!(settings.farm.enabled);
        assert!(!settings.farm.file_sync_enabled);
        assert_eq!(settings.farm.files_root, PathBuf::from(DEFAULT_FILES_ROOT));
        assert_eq!(settings.farm.consume_batch_limit.get(), 100);
        assert_eq!(settings.farm.dedupe_window.get(), 1_024);
        assert_eq!(settings.farm.auto_consume_interval, Duration::from_secs(1));
        assert!(settings.types.is_empty());
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.node.name = Some("from-file".to_string());
        raw.logging.level = Some("info".to_string());

        let overrides = NodeOverrides {
            node_name: Some("node-b".to_string()),
            log_level: Some("debug".to_string()),
            log_json: Some(true),
            cache_enabled: Some(false),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.node.name, "node-b");
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(matches!(settings.logging.format, LogFormat::Json));
        assert!(!settings.cache.enabled);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut raw = RawSettings::default();
        raw.farm.consume_batch_limit = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero batch");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "farm.consume_batch_limit",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.farm.auto_consume_interval_ms = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn blank_node_name_is_rejected() {
        let mut raw = RawSettings::default();
        raw.node.name = Some("   ".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn types_become_descriptors() {
        let mut page = raw_type("cms.page");
        page.name_column = Some("CodeName".to_string());
        page.full_name_column = Some("AliasPath".to_string());
        page.full_name_resolution = Some(FullNameResolution::PersistedFirst);

        let mut raw = RawSettings::default();
        raw.types = vec![page, raw_type("cms.user")];
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.types.len(), 2);
        let page = &settings.types[0];
        assert_eq!(page.object_type().as_str(), "cms.page");
        assert_eq!(page.full_name_column(), Some("AliasPath"));
        assert_eq!(
            page.full_name_resolution(),
            Some(FullNameResolution::PersistedFirst)
        );
        assert!(page.supports_caching());
    }

    #[test]
    fn full_name_column_requires_resolution() {
        let mut page = raw_type("cms.page");
        page.full_name_column = Some("AliasPath".to_string());
        let mut raw = RawSettings::default();
        raw.types = vec![page];

        let err = Settings::from_raw(raw).expect_err("resolution required");
        assert!(matches!(err, LoadError::Invalid { key: "types", .. }));
    }

    #[test]
    fn duplicate_types_are_rejected_case_insensitively() {
        let mut raw = RawSettings::default();
        raw.types = vec![raw_type("cms.user"), raw_type("CMS.User")];

        let err = Settings::from_raw(raw).expect_err("duplicate");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "types.object_type",
                ..
            }
        ));
    }

    #[test]
    fn types_deserialize_from_toml() {
        let raw: RawSettings = Config::builder()
            .add_source(config::File::from_str(
                r#"
                [[types]]
                object_type = "cms.page"
                id_column = "ID"
                full_name_column = "AliasPath"
                full_name_resolution = "derived_first"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize");

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.types[0].full_name_resolution(),
            Some(FullNameResolution::DerivedFirst)
        );
    }

    #[test]
    fn default_to_no_command() {
        let args = CliArgs::parse_from(["infocache"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn parse_replay_arguments() {
        let args = CliArgs::parse_from([
            "infocache",
            "replay",
            "tasks.jsonl",
            "--dry-run",
            "--node-name",
            "node-b",
        ]);

        match args.command.expect("replay command") {
            Command::Replay(replay) => {
                assert_eq!(replay.file, PathBuf::from("tasks.jsonl"));
                assert!(replay.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(args.overrides.node_name.as_deref(), Some("node-b"));
    }

    #[test]
    fn parse_types_command_with_overrides() {
        let args = CliArgs::parse_from(["infocache", "--log-json", "true", "types"]);
        assert!(matches!(args.command, Some(Command::Types)));
        assert_eq!(args.overrides.log_json, Some(true));
    }
}
