//! Command-line arguments.

use camino::Utf8PathBuf;
use clap::Parser;

use crate::config::Config;

/// An autonomous Internet reconnaissance daemon.
#[derive(Debug, Parser)]
#[command(name = "kuangd", version = env!("KUANG_BUILD_VERSION"), next_line_help = true)]
pub struct Args {
    /// Number of Generator workers to run in parallel.
    #[arg(short = 'g', long = "generator", default_value_t = 4)]
    pub generator: u32,

    /// Number of XFR workers to run in parallel.
    #[arg(short = 'x', long = "xfr", default_value_t = 2)]
    pub xfr: u32,

    /// Number of Scanner workers to run in parallel.
    #[arg(short = 's', long = "scanner", default_value_t = 4)]
    pub scanner: u32,

    /// Directory to store application data in.
    #[arg(short = 'b', long = "basedir")]
    pub basedir: Option<Utf8PathBuf>,

    /// Path to a configuration file, overriding `<basedir>/kuang.toml`.
    #[arg(long = "config")]
    pub config: Option<Utf8PathBuf>,

    /// Override the configured log level.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Validate the configuration file and exit.
    #[arg(long = "check-config", action = clap::ArgAction::SetTrue)]
    pub check_config: bool,
}

impl Args {
    /// The base directory to use: `-b`/`--basedir` if given, otherwise
    /// [`Config::default_base_dir`].
    pub fn base_dir(&self) -> Utf8PathBuf {
        self.basedir
            .clone()
            .unwrap_or_else(Config::default_base_dir)
    }
}
