//! kuang's TOML configuration file.

use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// `[Global]` — currently empty, reserved for settings shared by every unit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalConfig {}

/// `[Generator]` — controls host discovery via random IPv4 walks and
/// reverse DNS.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Whether Nexus starts this facility at daemon startup.
    #[serde(default = "GeneratorConfig::default_active", rename = "Active")]
    pub active: bool,
    /// Resolvers to query, overriding the system resolver configuration.
    #[serde(default, rename = "Resolver")]
    pub resolver: Vec<String>,
    /// Number of generator workers to run in parallel.
    #[serde(default = "GeneratorConfig::default_parallel", rename = "Parallel")]
    pub parallel: u32,
}

impl GeneratorConfig {
    fn default_active() -> bool {
        true
    }

    fn default_parallel() -> u32 {
        16
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            active: Self::default_active(),
            resolver: vec!["10.10.0.1".to_string()],
            parallel: Self::default_parallel(),
        }
    }
}

/// `[XFR]` — controls zone-transfer expansion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct XfrConfig {
    #[serde(default = "XfrConfig::default_active", rename = "Active")]
    pub active: bool,
    #[serde(default = "XfrConfig::default_parallel", rename = "Parallel")]
    pub parallel: u32,
}

impl XfrConfig {
    fn default_active() -> bool {
        true
    }

    fn default_parallel() -> u32 {
        2
    }
}

impl Default for XfrConfig {
    fn default() -> Self {
        Self {
            active: Self::default_active(),
            parallel: Self::default_parallel(),
        }
    }
}

/// `[Scanner]` — controls curated TCP port banner scanning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "ScannerConfig::default_active", rename = "Active")]
    pub active: bool,
    #[serde(default = "ScannerConfig::default_parallel", rename = "Parallel")]
    pub parallel: u32,
    /// Seconds the feeder sleeps when it finds no host ready to scan.
    #[serde(default = "ScannerConfig::default_interval", rename = "Interval")]
    pub interval: f64,
}

impl ScannerConfig {
    fn default_active() -> bool {
        true
    }

    fn default_parallel() -> u32 {
        16
    }

    fn default_interval() -> f64 {
        2.0
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            active: Self::default_active(),
            parallel: Self::default_parallel(),
            interval: Self::default_interval(),
        }
    }
}

/// `[Web]` — the optional read-only inspector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default, rename = "Active")]
    pub active: bool,
    #[serde(default = "WebConfig::default_addr", rename = "Addr")]
    pub addr: String,
    #[serde(default = "WebConfig::default_port", rename = "Port")]
    pub port: u16,
}

impl WebConfig {
    fn default_addr() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        8765
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            active: false,
            addr: Self::default_addr(),
            port: Self::default_port(),
        }
    }
}

/// Log severities, ordered from least to most severe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        })
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

/// Where log output goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    File,
    Stdout,
    Stderr,
}

impl Default for LogTarget {
    fn default() -> Self {
        LogTarget::File
    }
}

/// `[Logging]`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, rename = "Level")]
    pub level: LogLevel,
    #[serde(default, rename = "Target")]
    pub target: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            target: LogTarget::default(),
        }
    }
}

/// kuang's full configuration, as loaded from (or written to) `kuang.toml`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "Global")]
    pub global: GlobalConfig,
    #[serde(default, rename = "Generator")]
    pub generator: GeneratorConfig,
    #[serde(default, rename = "XFR")]
    pub xfr: XfrConfig,
    #[serde(default, rename = "Scanner")]
    pub scanner: ScannerConfig,
    #[serde(default, rename = "Web")]
    pub web: WebConfig,
    #[serde(default, rename = "Logging")]
    pub logging: LoggingConfig,

    /// The base directory this configuration was loaded from, filled in
    /// after parsing rather than read from the file itself.
    #[serde(skip)]
    pub base_dir: Utf8PathBuf,
}

impl Config {
    /// The base directory kuang uses unless `-b`/`--basedir` overrides it.
    pub fn default_base_dir() -> Utf8PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Utf8PathBuf::from(home).join(".kuang.d")
    }

    pub fn db_path(&self) -> Utf8PathBuf {
        self.base_dir.join("kuang.db")
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.base_dir.join("kuang.log")
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.base_dir.join("kuang.toml")
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.base_dir.join("cache")
    }

    /// Load the configuration from `base_dir`, writing (and then returning)
    /// the default configuration if no file exists yet.
    pub fn load(base_dir: &Utf8Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_dir)?;
        std::fs::create_dir_all(base_dir.join("cache"))?;

        let path = base_dir.join("kuang.toml");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<Config>(&raw)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Config::default();
                config.write_to(base_dir)?;
                config
            }
            Err(err) => return Err(err.into()),
        };
        config.base_dir = base_dir.to_path_buf();
        Ok(config)
    }

    /// Atomically (over)write this configuration to `<base_dir>/kuang.toml`.
    pub fn write_to(&self, base_dir: &Utf8Path) -> Result<(), ConfigError> {
        let path = base_dir.join("kuang.toml");
        let text = toml::to_string_pretty(self)?;

        std::fs::create_dir_all(base_dir)?;
        let mut tmp = tempfile::Builder::new().tempfile_in(base_dir)?;
        use std::io::Write as _;
        tmp.as_file_mut().write_all(text.as_bytes())?;
        tmp.persist(&path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Re-read and validate the configuration file without starting kuang,
    /// for `--check-config`.
    pub fn check(base_dir: &Utf8Path) -> Result<(), ConfigError> {
        Config::load(base_dir).map(|_| ())
    }
}

/// Errors encountered while loading or saving a [`Config`].
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    InvalidLogLevel(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "I/O error: {err}"),
            ConfigError::Parse(err) => write!(f, "invalid configuration file: {err}"),
            ConfigError::Serialize(err) => write!(f, "could not serialize configuration: {err}"),
            ConfigError::InvalidLogLevel(level) => write!(f, "invalid log level: '{level}'"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::Serialize(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap();

        let config = Config::load(base).unwrap();
        assert_eq!(config.generator.parallel, 16);
        assert_eq!(config.xfr.parallel, 2);

        let reloaded = Config::load(base).unwrap();
        assert_eq!(reloaded.generator.resolver, config.generator.resolver);
    }

    #[test]
    fn check_accepts_a_freshly_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap();
        Config::load(base).unwrap();
        assert!(Config::check(base).is_ok());
    }
}
