//! Top-level supervisor composing the three worker pools, and routing
//! `Start`/`Stop`/`StartOne`/`StopOne` control messages to the facility they
//! target.

use std::sync::Arc;
use std::time::Duration;

use crate::center::Center;
use crate::comms::Facility;
use crate::units::generator::ParallelGenerator;
use crate::units::scanner::Scanner;
use crate::units::xfr::XFRProcessor;
use crate::units::PoolStatus;

/// A snapshot of every facility's pool state, as returned by [`Nexus::status`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NexusStatus {
    pub generator: PoolStatus,
    pub xfr: PoolStatus,
    pub scanner: PoolStatus,
}

/// Owns the generator, XFR, and scanner pools, and sequences their
/// start/stop order.
///
/// `start()` brings XFR up first, then the generator, then the scanner, so
/// that hosts inserted while the generator is still starting already have
/// somewhere to be picked up; `stop()` reverses the order. Both are
/// idempotent: a pool that is already in the requested state ignores the
/// call, matching the per-pool `PoolState` idempotence (see
/// [`crate::units::PoolState`]).
///
/// `stop()` always leaves every pool's active flag cleared, so a subsequent
/// `start()` sees a clean slate regardless of how shutdown was triggered.
pub struct Nexus {
    generator: ParallelGenerator,
    xfr: XFRProcessor,
    scanner: Scanner,
}

impl Nexus {
    pub fn new(center: Arc<Center>, gcnt: u32, xcnt: u32, scnt: u32, scan_interval: Duration) -> Self {
        Self {
            generator: ParallelGenerator::new(center.clone(), gcnt),
            xfr: XFRProcessor::new(center.clone(), xcnt),
            scanner: Scanner::new(center, scnt, scan_interval),
        }
    }

    pub async fn start(&self) {
        self.start_active(true, true, true).await;
    }

    /// Start only the facilities whose configuration marks them `Active`,
    /// preserving the XFR, Generator, Scanner order.
    pub async fn start_active(&self, gen_active: bool, xfr_active: bool, scan_active: bool) {
        if xfr_active {
            self.xfr.start().await;
        }
        if gen_active {
            self.generator.start().await;
        }
        if scan_active {
            self.scanner.start().await;
        }
    }

    pub async fn stop(&self) {
        self.scanner.stop().await;
        self.generator.stop().await;
        self.xfr.stop().await;
    }

    /// Start every worker of a single facility (its configured `wcnt`),
    /// leaving the other two untouched.
    pub async fn start_facility(&self, facility: Facility) {
        match facility {
            Facility::Generator => self.generator.start().await,
            Facility::Xfr => self.xfr.start().await,
            Facility::Scanner => self.scanner.start().await,
        }
    }

    /// Stop every worker of a single facility, leaving the other two
    /// untouched.
    pub async fn stop_facility(&self, facility: Facility) {
        match facility {
            Facility::Generator => self.generator.stop().await,
            Facility::Xfr => self.xfr.stop().await,
            Facility::Scanner => self.scanner.stop().await,
        }
    }

    pub async fn start_one(&self, facility: Facility) {
        match facility {
            Facility::Generator => self.generator.start_one().await,
            Facility::Xfr => self.xfr.start_one().await,
            Facility::Scanner => self.scanner.start_one().await,
        }
    }

    pub async fn stop_one(&self, facility: Facility) {
        match facility {
            Facility::Generator => self.generator.stop_one().await,
            Facility::Xfr => self.xfr.stop_one().await,
            Facility::Scanner => self.scanner.stop_one().await,
        }
    }

    /// A read-only snapshot of every facility's active flag and worker count.
    pub fn status(&self) -> NexusStatus {
        NexusStatus {
            generator: self.generator.status(),
            xfr: self.xfr.status(),
            scanner: self.scanner.status(),
        }
    }
}
