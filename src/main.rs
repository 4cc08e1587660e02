use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kuang_cfg::{Args, Config, LogLevel};
use kuangd::{center::Center, comms::ApplicationCommand, log::Logger, manager, web};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// How long `Nexus::stop()` is given to drain every pool before the
/// remaining tasks are abandoned, per §7's "bounded grace period".
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let args = Args::parse();
    let base_dir = args.base_dir();

    if args.check_config {
        return match Config::check(&base_dir) {
            Ok(()) => {
                println!("Configuration at {base_dir} is valid");
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("kuang couldn't be configured: {error}");
                ExitCode::FAILURE
            }
        };
    }

    let mut config = match load_config(&args, &base_dir) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("kuang couldn't be configured: {error}");
            return ExitCode::FAILURE;
        }
    };

    // The CLI always wins for worker counts.
    config.generator.parallel = args.generator;
    config.xfr.parallel = args.xfr;
    config.scanner.parallel = args.scanner;

    if let Some(level) = &args.log_level {
        match level.parse::<LogLevel>() {
            Ok(level) => config.logging.level = level,
            Err(error) => {
                eprintln!("kuang couldn't be configured: {error}");
                return ExitCode::FAILURE;
            }
        }
    }

    let _logger = match Logger::launch(&config.logging, config.log_path().as_std_path()) {
        Ok(logger) => logger,
        Err(error) => {
            eprintln!("kuang couldn't start logging: {error}");
            return ExitCode::FAILURE;
        }
    };

    let web_config = config.web.clone();

    let center = match Center::new(config) {
        Ok(center) => Arc::new(center),
        Err(error) => {
            tracing::error!("kuang couldn't open its store: {error}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Couldn't start Tokio: {error}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let nexus = manager::spawn(center.clone()).await;

        if web_config.active {
            let web_center = center.clone();
            let web_nexus = nexus.clone();
            let addr = match format!("{}:{}", web_config.addr, web_config.port)
                .parse::<std::net::SocketAddr>()
            {
                Ok(addr) => addr,
                Err(error) => {
                    tracing::error!("Invalid Web.Addr/Web.Port: {error}");
                    return ExitCode::FAILURE;
                }
            };
            tokio::spawn(async move {
                if let Err(error) = web::run(web_center, web_nexus, addr).await {
                    tracing::error!("Web inspector failed: {error}");
                }
            });
        }

        let (_app_cmd_tx, mut app_cmd_rx) = mpsc::unbounded_channel::<ApplicationCommand>();

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!("Couldn't install SIGTERM handler: {error}");
                return ExitCode::FAILURE;
            }
        };

        tracing::info!("kuang is up and running");

        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(error) = res {
                        tracing::error!("Listening for CTRL-C (SIGINT) failed: {error}");
                    }
                    break;
                }
                _ = sigterm.recv() => break,
                _ = manager::forward_app_cmds(&mut app_cmd_rx, &nexus) => {}
            }
        }

        tracing::info!("Shutting down, draining every facility");
        match tokio::time::timeout(SHUTDOWN_GRACE, nexus.stop()).await {
            Ok(()) => tracing::info!("All facilities stopped cleanly"),
            Err(_) => tracing::warn!(
                "Shutdown grace period ({SHUTDOWN_GRACE:?}) elapsed; abandoning remaining tasks"
            ),
        }

        ExitCode::SUCCESS
    })
}

/// Load the configuration from `--config` if given, otherwise from
/// `<base_dir>/kuang.toml`, creating the base directory and a default file
/// on first run.
fn load_config(args: &Args, base_dir: &camino::Utf8Path) -> Result<Config, kuang_cfg::ConfigError> {
    if let Some(path) = &args.config {
        std::fs::create_dir_all(base_dir)?;
        std::fs::create_dir_all(base_dir.join("cache"))?;
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.base_dir = base_dir.to_path_buf();
        Ok(config)
    } else {
        Config::load(base_dir)
    }
}
