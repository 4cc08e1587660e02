//! Wire DTOs for kuang's read-only web inspector.

use serde::{Deserialize, Serialize};

/// The summary shown on the inspector's front page: how many hosts,
/// services, and zone transfers kuang has recorded so far.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    pub host_count: i64,
    pub service_count: i64,
    pub xfr_count: i64,
    pub facilities: FacilitiesStatus,
}

/// The active flag and worker count of a single pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityStatus {
    pub active: bool,
    pub worker_count: u32,
}

/// The running state of all three facilities, mirroring `Nexus::status`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitiesStatus {
    pub generator: FacilityStatus,
    pub xfr: FacilityStatus,
    pub scanner: FacilityStatus,
}

/// A single discovered service, as shown on a host's detail page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub port: u16,
    pub added: i64,
    pub response: Option<String>,
}

/// The detail view for a single host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostDetail {
    pub id: i64,
    pub name: String,
    pub addr: String,
    pub added: i64,
    pub last_contact: Option<i64>,
    pub services: Vec<ServiceInfo>,
}

/// The liveness beacon returned by `GET /healthz`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Beacon {
    pub status: String,
    pub message: String,
    pub timestamp: i64,
    pub hostname: String,
}
