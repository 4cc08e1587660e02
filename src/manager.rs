//! Wiring the daemon entry point to the [`Nexus`].
//!
//! Every start/stop decision is routed through a single
//! [`ApplicationCommand`] channel, using the same tagged-command shape as
//! the per-pool queues (see [`crate::comms`]).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::center::Center;
use crate::comms::ApplicationCommand;
use crate::nexus::Nexus;

/// Build the [`Nexus`] for `center` and bring up every facility whose
/// configuration marks it `Active`, in the Nexus's start order (XFR, then
/// Generator, then Scanner).
pub async fn spawn(center: Arc<Center>) -> Arc<Nexus> {
    let nexus = Arc::new(Nexus::new(
        center.clone(),
        center.config.generator.parallel,
        center.config.xfr.parallel,
        center.config.scanner.parallel,
        std::time::Duration::from_secs_f64(center.config.scanner.interval),
    ));

    info!("Starting facilities");
    nexus
        .start_active(
            center.config.generator.active,
            center.config.xfr.active,
            center.config.scanner.active,
        )
        .await;

    nexus
}

/// Drain `rx` and apply each [`ApplicationCommand`] to `nexus`, returning
/// once the channel is closed or [`ApplicationCommand::Terminate`] is
/// received.
///
/// This is driven from one arm of the daemon's `select!` loop, alongside
/// `ctrl_c()`/`SIGTERM`. It never completes during normal operation, since
/// nothing in v1 sends on this channel yet (there is no mutating CLI
/// subcommand or web endpoint) — the plumbing is here so a future control
/// surface has somewhere to send commands without touching `main`.
pub async fn forward_app_cmds(rx: &mut mpsc::UnboundedReceiver<ApplicationCommand>, nexus: &Nexus) {
    while let Some(cmd) = rx.recv().await {
        debug!("Applying application command: {cmd:?}");
        match cmd {
            ApplicationCommand::Start(facility) => nexus.start_facility(facility).await,
            ApplicationCommand::Stop(facility) => nexus.stop_facility(facility).await,
            ApplicationCommand::StartOne(facility) => nexus.start_one(facility).await,
            ApplicationCommand::StopOne(facility) => nexus.stop_one(facility).await,
            ApplicationCommand::Terminate => return,
        }
    }
}
