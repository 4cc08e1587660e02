//! The optional read-only web inspector, exposed when `Web.Active` is set.
//!
//! Reports host/service/xfr counters and per-host detail as a small JSON API
//! over `axum`, for dashboards and scripts rather than interactive browsing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use kuang_api::{Beacon, FacilitiesStatus, FacilityStatus, HostDetail, ServiceInfo, Summary};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::center::Center;
use crate::nexus::Nexus;
use crate::util::hostname;

/// Shared state handed to every route: the store/cache/blacklists and the
/// supervisor whose facility statuses the inspector reports.
#[derive(Clone)]
struct AppState {
    center: Arc<Center>,
    nexus: Arc<Nexus>,
}

/// Serve the inspector on `addr` until the listener is dropped or fails.
pub async fn run(center: Arc<Center>, nexus: Arc<Nexus>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Web inspector listening on {addr}");

    let app = Router::new()
        .route("/", get(summary))
        .route("/healthz", get(healthz))
        .route("/hosts/{id}", get(host_detail))
        .with_state(AppState { center, nexus });

    axum::serve(listener, app).await.map_err(|err| {
        error!("Web inspector stopped: {err}");
        err
    })
}

async fn summary(State(state): State<AppState>) -> Result<Json<Summary>, StatusCode> {
    let center = state.center.clone();
    let (host_count, service_count, xfr_count) = tokio::task::spawn_blocking(move || {
        (
            center.store.host_count(),
            center.store.service_count(),
            center.store.xfr_count(),
        )
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let host_count = host_count.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let service_count = service_count.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let xfr_count = xfr_count.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let status = state.nexus.status();
    let facilities = FacilitiesStatus {
        generator: FacilityStatus {
            active: status.generator.active,
            worker_count: status.generator.worker_count,
        },
        xfr: FacilityStatus {
            active: status.xfr.active,
            worker_count: status.xfr.worker_count,
        },
        scanner: FacilityStatus {
            active: status.scanner.active,
            worker_count: status.scanner.worker_count,
        },
    };

    Ok(Json(Summary {
        host_count,
        service_count,
        xfr_count,
        facilities,
    }))
}

async fn healthz() -> Json<Beacon> {
    Json(Beacon {
        status: "ok".to_string(),
        message: "kuang is running".to_string(),
        timestamp: now_unix(),
        hostname: hostname(),
    })
}

async fn host_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<HostDetail>, StatusCode> {
    let center = state.center.clone();
    let (host, services) = tokio::task::spawn_blocking(move || {
        (center.store.host_get_by_id(id), center.store.service_get_by_host(id))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let host = host
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let services = services
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(|s| ServiceInfo {
            port: s.port,
            added: s.added,
            response: s.response,
        })
        .collect();

    Ok(Json(HostDetail {
        id: host.id,
        name: host.name,
        addr: host.addr.to_string(),
        added: host.added,
        last_contact: host.last_contact,
        services,
    }))
}

/// The store records timestamps as seconds-since-epoch via SQLite's
/// `unixepoch()`; reuse the same clock so the beacon is comparable.
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
