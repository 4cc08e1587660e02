//! Logging for kuang.
//!
//! Targets are a size-rotated file, stdout, or stderr (4 MiB per file, 10
//! files kept): kuang runs as a single long-lived local process, not a
//! system daemon, so there is no syslog target.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kuang_cfg::{LogLevel, LogTarget, LoggingConfig};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// 4 MiB per file before rotating.
const MAX_LOG_SIZE: u64 = 4 * 1024 * 1024;
/// Keep this many rotated files in addition to the active one.
const MAX_LOG_COUNT: usize = 10;

//----------- Logger -----------------------------------------------------------

/// The state of kuang's logger, allowing the filter to be reloaded at
/// runtime (e.g. in response to `SIGHUP` or a config reload, once wired up).
pub struct Logger {
    filter: Handle<EnvFilter, Registry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    /// Launch kuang's logger.
    ///
    /// # Panics
    ///
    /// Panics if a global [`tracing`] subscriber has already been set.
    pub fn launch(config: &LoggingConfig, log_path: &Path) -> Result<&'static Logger, String> {
        let filter = make_env_filter(config)?;
        let (filter, filter_handle) = reload::Layer::new(filter);

        match &config.target {
            LogTarget::File => {
                let writer = RotatingWriter::open(log_path).map_err(|e| e.to_string())?;
                let layer = FmtLayer::new().with_ansi(false).with_writer(writer);
                tracing_subscriber::registry().with(filter).with(layer).init()
            }
            LogTarget::Stdout => {
                let layer = FmtLayer::new()
                    .with_ansi(supports_color::on(supports_color::Stream::Stdout).is_some())
                    .with_writer(std::io::stdout);
                tracing_subscriber::registry().with(filter).with(layer).init()
            }
            LogTarget::Stderr => {
                let layer = FmtLayer::new()
                    .with_ansi(supports_color::on(supports_color::Stream::Stderr).is_some())
                    .with_writer(std::io::stderr);
                tracing_subscriber::registry().with(filter).with(layer).init()
            }
        };

        Ok(Box::leak(Box::new(Self {
            filter: filter_handle,
        })))
    }

    /// Reload the active filter in response to a changed configuration.
    pub fn apply(&self, config: &LoggingConfig) -> Result<(), String> {
        self.filter
            .reload(make_env_filter(config)?)
            .map_err(|_| "could not reload filter".to_string())
    }
}

fn make_env_filter(config: &LoggingConfig) -> Result<EnvFilter, String> {
    let mut filter = EnvFilter::default();
    filter = filter.add_directive(LevelFilter::from(config.level).into());
    Ok(filter)
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

//----------- RotatingWriter -----------------------------------------------------

struct RotatingState {
    path: PathBuf,
    file: File,
    size: u64,
}

/// A size-based rotating file writer: once the active file would exceed
/// [`MAX_LOG_SIZE`], it is renamed `<path>.1` (shifting any existing
/// `<path>.1..MAX_LOG_COUNT` up by one, dropping the oldest), and a fresh
/// file is opened at `path`.
///
/// `tracing-appender`'s rolling appender only rotates on a time schedule, so
/// size-based rotation is hand-rolled here instead.
#[derive(Clone)]
pub struct RotatingWriter {
    inner: Arc<Mutex<RotatingState>>,
}

impl RotatingWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingState {
                path: path.to_path_buf(),
                file,
                size,
            })),
        })
    }

    fn rotate(state: &mut RotatingState) -> io::Result<()> {
        let oldest = state.path.with_extension(format!("log.{MAX_LOG_COUNT}"));
        let _ = fs::remove_file(&oldest);

        for n in (1..MAX_LOG_COUNT).rev() {
            let src = rotated_path(&state.path, n);
            let dst = rotated_path(&state.path, n + 1);
            if src.exists() {
                let _ = fs::rename(&src, &dst);
            }
        }
        let _ = fs::rename(&state.path, rotated_path(&state.path, 1));

        state.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&state.path)?;
        state.size = 0;
        Ok(())
    }
}

fn rotated_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock().unwrap();
        if state.size + buf.len() as u64 > MAX_LOG_SIZE {
            Self::rotate(&mut state)?;
        }
        let n = state.file.write(buf)?;
        state.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
