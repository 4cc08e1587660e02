//! Zone expansion: given a zone name, find its authoritative name servers
//! and attempt a full zone transfer (AXFR), harvesting A/AAAA records as new
//! Hosts.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use domain::base::iana::{Class, Rtype};
use domain::base::{Message, MessageBuilder, Name, ParsedName};
use domain::net::client::request::{RequestMessage, RequestMessageMulti, SendRequestMulti};
use domain::net::client::stream;
use domain::rdata::{AllRecordData, Ns};
use domain::resolv::StubResolver;
use kuang_store::HostSource;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::center::Center;
use crate::comms::{Cmd, Message as CtlMessage};

use super::{CmdQueue, PoolState, PoolStatus};

/// Bound on both name-server and AXFR-connect round-trips.
const XFR_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the feeder checks the store for hosts whose zone hasn't been
/// offered to the XFR pipeline yet.
const FEED_INTERVAL: Duration = Duration::from_secs(5);

/// One zone queued up for a transfer attempt.
struct XfrRequest {
    xfr_id: i64,
    zone: String,
}

/// Everything that can go wrong while pulling an AXFR: the connection
/// itself, the request/response plumbing, or simply running out of time.
#[derive(Debug)]
enum AxfrError {
    Io(std::io::Error),
    Timeout,
    Request(String),
}

impl std::fmt::Display for AxfrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxfrError::Io(err) => write!(f, "connection error: {err}"),
            AxfrError::Timeout => write!(f, "timed out"),
            AxfrError::Request(msg) => write!(f, "request error: {msg}"),
        }
    }
}

impl std::error::Error for AxfrError {}

impl From<std::io::Error> for AxfrError {
    fn from(err: std::io::Error) -> Self {
        AxfrError::Io(err)
    }
}

//----------- XFRClient -------------------------------------------------------------

/// Performs AXFR zone transfers and turns the harvested records into Hosts.
pub struct XFRClient {
    resolver: StubResolver,
}

impl Default for XFRClient {
    fn default() -> Self {
        Self::new()
    }
}

impl XFRClient {
    pub fn new() -> Self {
        Self {
            resolver: StubResolver::new(),
        }
    }

    /// Resolve the name servers for `zone` and attempt AXFR against each in
    /// turn until one succeeds. Returns whether any transfer succeeded.
    pub async fn perform_xfr(&self, center: &Arc<Center>, zone: &str) -> bool {
        let Ok(zone_name) = Name::<Vec<u8>>::from_str(zone) else {
            warn!("Zone name '{zone}' does not parse as a DNS name");
            return false;
        };

        let ns_names = match self.resolve_ns(&zone_name).await {
            Some(names) if !names.is_empty() => names,
            _ => {
                debug!("No name servers found for zone '{zone}'");
                return false;
            }
        };

        for ns_name in ns_names {
            let Some(ns_addr) = self.resolve_addr(&ns_name).await else {
                continue;
            };
            match self.try_axfr(center, &zone_name, zone, ns_addr).await {
                Ok(count) => {
                    debug!("AXFR of '{zone}' against {ns_addr} harvested {count} records");
                    return true;
                }
                Err(err) => {
                    debug!("AXFR of '{zone}' against {ns_addr} failed: {err}");
                }
            }
        }
        false
    }

    async fn resolve_ns(&self, zone: &Name<Vec<u8>>) -> Option<Vec<Name<Vec<u8>>>> {
        let answer = timeout(XFR_TIMEOUT, self.resolver.query((zone, Rtype::NS)))
            .await
            .ok()?
            .ok()?;
        let records = answer.answer().ok()?;
        let names = records
            .limit_to::<Ns<ParsedName<_>>>()
            .filter_map(|r| r.ok())
            .map(|r| r.data().nsdname().to_name())
            .collect::<Vec<_>>();
        Some(names)
    }

    async fn resolve_addr(&self, name: &Name<Vec<u8>>) -> Option<IpAddr> {
        match timeout(XFR_TIMEOUT, self.resolver.lookup_host(name)).await {
            Ok(Ok(found)) => found.iter().next(),
            _ => None,
        }
    }

    /// Attempt a single AXFR against `ns_addr`, inserting every A/AAAA
    /// record found as a new Host. Returns the number of records processed.
    async fn try_axfr(
        &self,
        center: &Arc<Center>,
        zone_name: &Name<Vec<u8>>,
        zone: &str,
        ns_addr: IpAddr,
    ) -> Result<usize, AxfrError> {
        let sock = SocketAddr::new(ns_addr, 53);
        let tcp = timeout(XFR_TIMEOUT, TcpStream::connect(sock))
            .await
            .map_err(|_| AxfrError::Timeout)??;

        let (client, transport) = stream::Connection::<RequestMessage<Bytes>, RequestMessageMulti<Bytes>>::new(tcp);
        tokio::spawn(transport.run());

        let mut builder = MessageBuilder::new_vec();
        builder.header_mut().set_rd(false);
        let mut question = builder.question();
        question
            .push((zone_name, Rtype::AXFR, Class::IN))
            .expect("a single question fits in a fresh message");
        let message = Message::from_octets(Bytes::from(question.into_message().into_octets()))
            .expect("a freshly built message is always well-formed");

        let request = RequestMessageMulti::new(message).expect("AXFR request is well-formed");
        let mut response = client.send_request(request);

        let mut count = 0usize;
        // The transport keeps handing back response messages until the
        // transfer is exhausted, at which point it reports completion by
        // returning `None`.
        while let Some(reply) = timeout(XFR_TIMEOUT, response.get_response())
            .await
            .map_err(|_| AxfrError::Timeout)?
            .map_err(|e| AxfrError::Request(e.to_string()))?
        {
            let Ok(answer) = reply.answer() else {
                break;
            };
            for record in answer.limit_to::<AllRecordData<_, _>>().filter_map(|r| r.ok()) {
                count += 1;
                let owner = record.owner().to_string();
                let owner = owner.strip_suffix('.').unwrap_or(&owner).to_string();
                match record.data() {
                    AllRecordData::A(a) => {
                        self.harvest(center, zone, &owner, IpAddr::V4(a.addr())).await;
                    }
                    AllRecordData::Aaaa(aaaa) => {
                        self.harvest(center, zone, &owner, IpAddr::V6(aaaa.addr())).await;
                    }
                    AllRecordData::Mx(_) | AllRecordData::Ns(_) => {
                        debug!(
                            "AXFR of '{zone}' found an MX/NS record at '{owner}'; \
                             don't know how to handle yet"
                        );
                    }
                    _ => {}
                }
            }
        }
        Ok(count)
    }

    async fn harvest(&self, center: &Arc<Center>, zone: &str, name: &str, addr: IpAddr) {
        if center.ip_blacklist.is_match(addr) {
            return;
        }
        if center.name_blacklist.is_match(name) {
            return;
        }
        let _ = zone;
        let center = Arc::clone(center);
        let name_owned = name.to_string();
        let result = super::retry_on_lock(move || {
            center.store.host_add(&name_owned, addr, HostSource::Xfr)
        })
        .await;
        match result {
            Ok(host) => debug!("AXFR added host {} ({})", host.name, host.addr),
            Err(kuang_store::DbError::Integrity(_)) => {
                // Duplicate hosts are routine; XFR re-discovers addresses
                // the generator or a prior transfer already recorded.
            }
            Err(err) => warn!("Could not add AXFR host {name} ({addr}): {err}"),
        }
    }
}

//----------- XFRProcessor -----------------------------------------------------------

/// A pool of workers that pull zones needing a transfer out of the store
/// and dispatch them to [`XFRClient::perform_xfr`].
pub struct XFRProcessor {
    center: Arc<Center>,
    state: Arc<PoolState>,
    cmd_tx: mpsc::Sender<CtlMessage>,
    cmd_queue: Arc<CmdQueue>,
}

impl XFRProcessor {
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
        let (req_tx, req_rx) = mpsc::channel(self.state.worker_count().max(1) as usize);
        let req_rx = Arc::new(tokio::sync::Mutex::new(req_rx));

        tokio::spawn(feeder(self.center.clone(), self.state.clone(), req_tx));

        for id in 0..self.state.worker_count() {
            tokio::spawn(xfr_worker(
                id,
                self.center.clone(),
                self.state.clone(),
                self.cmd_queue.clone(),
                req_rx.clone(),
            ));
        }
    }

    pub async fn stop(&self) {
        if !self.state.is_active() {
            return;
        }
        self.state.set_active(false);
        for _ in 0..self.state.worker_count() {
            let _ = self.cmd_tx.send(CtlMessage::new(Cmd::Stop)).await;
        }
    }

    pub async fn start_one(&self) {
        if !self.state.is_active() {
            return;
        }
        self.state.incr();
        // A new worker joins the pool for command purposes; it will find
        // work the next time the feeder has queued a zone.
    }

    pub async fn stop_one(&self) {
        if !self.state.is_active() {
            return;
        }
        super::send_stop_one(&self.cmd_tx).await;
        if self.state.decr() == 0 {
            self.state.set_active(false);
        }
    }

    pub fn status(&self) -> PoolStatus {
        self.state.status()
    }
}

async fn feeder(
    center: Arc<Center>,
    state: Arc<PoolState>,
    req_tx: mpsc::Sender<XfrRequest>,
) {
    debug!("xfr feeder starting up");
    while state.is_active() {
        let wcnt = state.worker_count().max(1);
        let hosts = {
            let center = center.clone();
            tokio::task::spawn_blocking(move || center.store.host_get_no_xfr(wcnt))
                .await
                .unwrap()
        };
        match hosts {
            Ok(hosts) => {
                for host in hosts {
                    let Some(zone) = host.zone().map(str::to_string) else {
                        // No dot in the name: there is no zone to transfer.
                        // Mark it done so the feeder doesn't keep retrying.
                        let center = center.clone();
                        let host_id = host.id;
                        let _ = tokio::task::spawn_blocking(move || {
                            center.store.host_set_xfr(host_id, true)
                        })
                        .await;
                        continue;
                    };

                    let center = center.clone();
                    let zone_for_lookup = zone.clone();
                    let existing = tokio::task::spawn_blocking(move || {
                        center.store.xfr_get_by_name(&zone_for_lookup)
                    })
                    .await
                    .unwrap();

                    let host_id = host.id;
                    if matches!(existing, Ok(Some(_))) {
                        let center = center.clone();
                        let _ = tokio::task::spawn_blocking(move || {
                            center.store.host_set_xfr(host_id, true)
                        })
                        .await;
                        continue;
                    }

                    let center2 = center.clone();
                    let zone2 = zone.clone();
                    let added = super::retry_on_lock(move || center2.store.xfr_add(&zone2)).await;
                    match added {
                        Ok(xfr) => {
                            let center3 = center.clone();
                            let _ = tokio::task::spawn_blocking(move || {
                                center3.store.host_set_xfr(host_id, true)
                            })
                            .await;
                            if req_tx
                                .send(XfrRequest {
                                    xfr_id: xfr.id,
                                    zone,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(kuang_store::DbError::Integrity(_)) => {
                            // Another feeder pass (or a concurrent
                            // processor) beat us to it.
                            let center3 = center.clone();
                            let _ = tokio::task::spawn_blocking(move || {
                                center3.store.host_set_xfr(host_id, true)
                            })
                            .await;
                        }
                        Err(err) => warn!("Could not register zone '{zone}' for transfer: {err}"),
                    }
                }
            }
            Err(err) => warn!("Could not fetch hosts pending XFR: {err}"),
        }
        tokio::time::sleep(FEED_INTERVAL).await;
    }
    debug!("xfr feeder shutting down");
}

async fn xfr_worker(
    id: u32,
    center: Arc<Center>,
    state: Arc<PoolState>,
    cmds: Arc<CmdQueue>,
    req_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<XfrRequest>>>,
) {
    debug!("xfr_worker_{id:02} starting up");
    let client = XFRClient::new();
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

        let req = {
            let mut rx = req_rx.lock().await;
            timeout(Duration::from_secs(1), rx.recv()).await
        };
        let Ok(Some(req)) = req else {
            continue;
        };

        let center = center.clone();
        let xfr_id = req.xfr_id;
        let _ = tokio::task::spawn_blocking(move || center.store.xfr_start(xfr_id)).await;

        let success = client.perform_xfr(&center, &req.zone).await;

        let center = center.clone();
        let _ =
            tokio::task::spawn_blocking(move || center.store.xfr_finish(xfr_id, success)).await;
    }
    debug!("xfr_worker_{id:02} shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_without_dot_has_no_zone() {
        let host = kuang_store::Host {
            id: 1,
            name: "localhost".to_string(),
            addr: "127.0.0.1".parse().unwrap(),
            src: HostSource::Generator,
            added: 0,
            last_contact: None,
            sysname: String::new(),
            location: String::new(),
            xfr: false,
        };
        assert_eq!(host.zone(), None);
    }
}
