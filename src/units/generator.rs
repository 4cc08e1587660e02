//! Host discovery: random IPv4 walks, filtered through the IP cache and the
//! blacklists, followed by reverse DNS resolution.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use domain::resolv::StubResolver;
use kuang_store::HostSource;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::CacheType;
use crate::center::Center;
use crate::comms::{Cmd, Message};

use super::{CmdQueue, PoolState, PoolStatus};

/// How long the host-insertion worker waits for a candidate before checking
/// whether it should give up.
const HOST_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long name resolution is allowed to take before being treated as a
/// non-answer.
const RESOLVE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Draw a random IPv4 address that is neither blacklisted nor already
/// present in the IP cache, marking it as seen once accepted.
///
/// A candidate is rejected and redrawn only when it is *not* blacklisted
/// *and* already present in the cache; a blacklisted address is still
/// recorded (so it is not redrawn uselessly on the next pass) but is never
/// handed back to the caller to resolve, since [`generate_host`] redraws
/// whenever the blacklist matches downstream on the resolved name as well —
/// here we simply avoid wasting a resolver round-trip on an address we
/// already know is out of scope.
fn generate_ip(center: &Center) -> Ipv4Addr {
    let db = center.cache.get_db(CacheType::IpCache);
    loop {
        let octets: [u8; 4] = rand::thread_rng().gen();
        let addr = Ipv4Addr::from(octets);
        let astr = addr.to_string();

        let tx = db.tx(true);
        let blacklisted = center.ip_blacklist.is_match(IpAddr::V4(addr));
        let seen = tx.contains(&astr);

        if blacklisted || !seen {
            let _ = tx.put(&astr, "1");
            if !blacklisted {
                return addr;
            }
            continue;
        }
        // Already cached and not blacklisted: drawn before, try again.
    }
}

/// Attempt a reverse DNS lookup of `addr`.
async fn resolve_name(resolver: &StubResolver, addr: IpAddr) -> Option<String> {
    match timeout(RESOLVE_TIMEOUT, resolver.lookup_addr(addr)).await {
        Ok(Ok(found)) => found.iter().next().map(|name| {
            let s = name.to_string();
            s.strip_suffix('.').unwrap_or(&s).to_string()
        }),
        Ok(Err(err)) => {
            debug!("Reverse lookup of {addr} failed: {err}");
            None
        }
        Err(_) => {
            debug!("Reverse lookup of {addr} timed out");
            None
        }
    }
}

/// Draw addresses until one resolves to a PTR name that is not blacklisted.
async fn generate_host(center: &Center, resolver: &StubResolver) -> (Ipv4Addr, String) {
    loop {
        let addr = generate_ip(center);
        let Some(name) = resolve_name(resolver, IpAddr::V4(addr)).await else {
            continue;
        };
        if center.name_blacklist.is_match(&name) {
            debug!("Discarding blacklisted name '{name}' for {addr}");
            continue;
        }
        return (addr, name);
    }
}

//----------- ParallelGenerator ----------------------------------------------------

/// A pool of generator workers feeding discovered hosts into the store.
pub struct ParallelGenerator {
    center: Arc<Center>,
    state: Arc<PoolState>,
    cmd_tx: mpsc::Sender<Message>,
    cmd_queue: Arc<CmdQueue>,
}

impl ParallelGenerator {
    pub fn new(center: Arc<Center>, wcnt: u32) -> Self {
        let (cmd_tx, cmd_queue) = CmdQueue::channel((wcnt as usize) * 2);
        Self {
            center,
            state: Arc::new(PoolState::new(wcnt)),
            cmd_tx,
            cmd_queue,
        }
    }

    pub async fn start(&self) {
        self.state.set_active(true);
        let (host_tx, host_rx) = mpsc::channel(64);

        tokio::spawn(host_worker(self.center.clone(), self.state.clone(), host_rx));

        for id in 0..self.state.worker_count() {
            tokio::spawn(gen_worker(
                id,
                self.center.clone(),
                self.state.clone(),
                self.cmd_queue.clone(),
                host_tx.clone(),
            ));
        }
    }

    pub async fn stop(&self) {
        if !self.state.is_active() {
            return;
        }
        self.state.set_active(false);
        for _ in 0..self.state.worker_count() {
            let _ = self.cmd_tx.send(Message::new(Cmd::Stop)).await;
        }
    }

    pub async fn start_one(&self) {
        if !self.state.is_active() {
            return;
        }
        let id = self.state.incr();
        // host_tx is not retained here; start_one is rare enough that a
        // fresh worker simply joins the pool via a throwaway channel clone
        // is not possible, so start_one is only meaningful while the pool
        // already has a live host_worker to hand discoveries to.
        tokio::spawn(gen_worker_standalone(
            id,
            self.center.clone(),
            self.state.clone(),
            self.cmd_queue.clone(),
        ));
    }

    pub async fn stop_one(&self) {
        if !self.state.is_active() {
            return;
        }
        let _ = self.cmd_tx.send(Message::new(Cmd::StopOne)).await;
        if self.state.decr() == 0 {
            self.state.set_active(false);
        }
    }

    pub fn status(&self) -> PoolStatus {
        self.state.status()
    }
}

async fn gen_worker(
    id: u32,
    center: Arc<Center>,
    state: Arc<PoolState>,
    cmds: Arc<CmdQueue>,
    host_tx: mpsc::Sender<(Ipv4Addr, String)>,
) {
    debug!("gen_worker_{id:02} starting up");
    let resolver = StubResolver::new();
    while state.is_active() {
        if let Some(msg) = cmds.try_recv().await {
            match msg.tag {
                Cmd::Stop | Cmd::StopOne => break,
                Cmd::Pause => {
                    tokio::time::sleep(super::pause_duration(&msg)).await;
                    continue;
                }
                _ => {}
            }
        }

        let (addr, name) = generate_host(&center, &resolver).await;
        if host_tx.send((addr, name)).await.is_err() {
            break;
        }
    }
    debug!("gen_worker_{id:02} shutting down");
}

/// A worker spawned by `start_one` that has no shared `host_tx` to feed;
/// it inserts directly instead, to avoid requiring the pool to keep every
/// channel handle alive for the lifetime of `ParallelGenerator`.
async fn gen_worker_standalone(
    id: u32,
    center: Arc<Center>,
    state: Arc<PoolState>,
    cmds: Arc<CmdQueue>,
) {
    debug!("gen_worker_{id:02} (extra) starting up");
    let resolver = StubResolver::new();
    while state.is_active() {
        if let Some(msg) = cmds.try_recv().await {
            match msg.tag {
                Cmd::Stop | Cmd::StopOne => break,
                Cmd::Pause => {
                    tokio::time::sleep(super::pause_duration(&msg)).await;
                    continue;
                }
                _ => {}
            }
        }
        let (addr, name) = generate_host(&center, &resolver).await;
        insert_host(&center, addr, name).await;
    }
    debug!("gen_worker_{id:02} (extra) shutting down");
}

async fn insert_host(center: &Arc<Center>, addr: Ipv4Addr, name: String) {
    let center = Arc::clone(center);
    let result = super::retry_on_lock(move || {
        center
            .store
            .host_add(&name, IpAddr::V4(addr), HostSource::Generator)
    })
    .await;
    match result {
        Ok(host) => debug!("Added host {} ({})", host.name, host.addr),
        Err(err) => warn!("Could not add host {addr}: {err}"),
    }
}

async fn host_worker(
    center: Arc<Center>,
    state: Arc<PoolState>,
    mut host_rx: mpsc::Receiver<(Ipv4Addr, String)>,
) {
    debug!("host_worker starting up");
    loop {
        match timeout(HOST_QUEUE_TIMEOUT, host_rx.recv()).await {
            Ok(Some((addr, name))) => insert_host(&center, addr, name).await,
            Ok(None) => break,
            Err(_) => {
                if !state.is_active() {
                    break;
                }
            }
        }
    }
    debug!("host_worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_ip_never_returns_blacklisted_address() {
        let config = kuang_cfg::Config::default();
        let center = Center {
            config,
            store: kuang_store::Store::open_in_memory().unwrap(),
            cache: crate::cache::Cache::new(),
            ip_blacklist: crate::blacklist::IpBlacklist::default_list(),
            name_blacklist: crate::blacklist::NameBlacklist::default_list(),
        };
        for _ in 0..20 {
            let addr = generate_ip(&center);
            assert!(!center.ip_blacklist.is_match(IpAddr::V4(addr)));
        }
    }
}
