//! Curated port scanning: for each host a worker picks one not-yet-tried
//! port from a short list, runs a protocol-specific probe against it, and
//! records the result as a [`Service`](kuang_store::Service).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use domain::base::iana::{Class, Rtype};
use domain::base::Name;
use domain::resolv::StubResolver;
use kuang_store::HostSource;
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::center::Center;
use crate::comms::{Cmd, Message};

use super::{CmdQueue, PoolState, PoolStatus};

/// Global connect/probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_millis(2500);
/// Upper bound on a single banner read.
const BANNER_LEN: usize = 256;

/// The curated set of ports a generic host is probed on, tried in a random
/// order on each attempt so repeated scans don't always favor the same
/// service.
const CURATED_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 79, 80, 110, 143, 161, 220, 389, 443, 1433, 3270, 3306, 5432, 6379, 5900,
    8080, 9023,
];

/// Ports an MX-sourced host is tried on, in priority order.
const MX_PORTS: &[u16] = &[25, 110, 143, 587];

/// Choose the next port to probe on `host`, given the ports it already has
/// a [`Service`](kuang_store::Service) row for. Returns `None` once every
/// candidate port for this host's kind has been tried.
fn select_port(host: &kuang_store::Host, seen: &HashSet<u16>) -> Option<u16> {
    match host.src {
        HostSource::Mx => MX_PORTS.iter().find(|p| !seen.contains(p)).copied(),
        HostSource::Ns if !seen.contains(&53) => Some(53),
        _ => {
            let mut candidates: Vec<u16> = CURATED_PORTS.to_vec();
            candidates.shuffle(&mut rand::thread_rng());
            candidates.into_iter().find(|p| !seen.contains(p))
        }
    }
}

/// A single probe dispatched to a worker: a host and the port chosen for it.
struct ScanRequest {
    host: kuang_store::Host,
    port: u16,
}

/// The outcome of a probe, handed to the gatherer for insertion.
struct ScanResult {
    host_id: i64,
    port: u16,
    response: Option<String>,
}

/// Read up to `BANNER_LEN` bytes from `stream`, lossily converting to UTF-8
/// and trimming trailing control characters.
async fn read_banner(stream: &mut TcpStream) -> Option<String> {
    let mut buf = [0u8; BANNER_LEN];
    let n = timeout(PROBE_TIMEOUT, stream.read(&mut buf)).await.ok()??;
    if n == 0 {
        return None;
    }
    let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn scan_tcp_generic(addr: SocketAddr) -> Option<String> {
    let mut stream = timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await.ok()?.ok()?;
    read_banner(&mut stream).await
}

async fn scan_finger(addr: SocketAddr) -> Option<String> {
    let mut stream = timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await.ok()?.ok()?;
    timeout(PROBE_TIMEOUT, stream.write_all(b"root\r\n")).await.ok()?.ok()?;
    read_banner(&mut stream).await
}

async fn scan_telnet(addr: SocketAddr) -> Option<String> {
    // No real negotiation: just see what the server offers before it would
    // otherwise wait for option negotiation we aren't doing.
    scan_tcp_generic(addr).await
}

/// Accepts any certificate chain. A scan probe isn't a trust decision: we
/// only want the `Server` header a host offers, not an opinion on whether
/// its certificate is signed by anyone in particular.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn tls_connector() -> &'static TlsConnector {
    static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();
    CONNECTOR.get_or_init(|| {
        let provider = Arc::new(ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("the ring provider supports rustls' default protocol versions")
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    })
}

/// Extract the `Server` header from a raw HTTP response buffer.
fn extract_server_header(buf: &[u8]) -> Option<String> {
    String::from_utf8_lossy(buf)
        .lines()
        .find_map(|line| line.strip_prefix("Server: ").or_else(|| line.strip_prefix("server: ")))
        .map(str::to_string)
}

/// HTTP(S) HEAD `/`, reading only enough of the response to pull out the
/// `Server` header. Does not follow redirects.
async fn scan_http(addr: SocketAddr, name: &str, https: bool) -> Option<String> {
    let request = format!(
        "HEAD / HTTP/1.1\r\nHost: {name}\r\nConnection: close\r\nUser-Agent: kuang\r\n\r\n"
    );
    let tcp = timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await.ok()?.ok()?;

    let mut buf = [0u8; BANNER_LEN];
    let n = if https {
        let domain = ServerName::try_from(name.to_string()).ok()?;
        let mut stream = timeout(PROBE_TIMEOUT, tls_connector().connect(domain, tcp))
            .await
            .ok()?
            .ok()?;
        timeout(PROBE_TIMEOUT, stream.write_all(request.as_bytes()))
            .await
            .ok()?
            .ok()?;
        timeout(PROBE_TIMEOUT, stream.read(&mut buf)).await.ok()??
    } else {
        let mut stream = tcp;
        timeout(PROBE_TIMEOUT, stream.write_all(request.as_bytes()))
            .await
            .ok()?
            .ok()?;
        timeout(PROBE_TIMEOUT, stream.read(&mut buf)).await.ok()??
    };
    extract_server_header(&buf[..n])
}

async fn scan_dns(resolver: &StubResolver, addr: SocketAddr) -> Option<String> {
    let _ = addr;
    let name = Name::<Vec<u8>>::from_str("version.bind").ok()?;
    let answer = timeout(
        PROBE_TIMEOUT,
        resolver.query((&name, Rtype::TXT, Class::CH)),
    )
    .await
    .ok()?
    .ok()?;
    let records = answer.answer().ok()?;
    let txt = records
        .limit_to::<domain::rdata::Txt<_>>()
        .filter_map(|r| r.ok())
        .next()?;
    Some(txt.data().to_string())
}

/// Run the probe appropriate for `port` against `host`.
async fn probe(resolver: &StubResolver, host: &kuang_store::Host, port: u16) -> Option<String> {
    let addr = SocketAddr::new(host.addr, port);
    match port {
        21 | 22 | 25 | 110 | 143 | 220 => scan_tcp_generic(addr).await,
        80 | 8080 => scan_http(addr, &host.name, false).await,
        443 => scan_http(addr, &host.name, true).await,
        79 => scan_finger(addr).await,
        23 | 3270 | 9023 => scan_telnet(addr).await,
        53 => scan_dns(resolver, addr).await,
        _ => None,
    }
}

//----------- Scanner ----------------------------------------------------------------

/// A pool of scan workers, a feeder seeding them with random hosts, and a
/// gatherer persisting their results.
pub struct Scanner {
    center: Arc<Center>,
    state: Arc<PoolState>,
    interval: Duration,
    cmd_tx: mpsc::Sender<Message>,
    cmd_queue: Arc<CmdQueue>,
}

impl Scanner {
    pub fn new(center: Arc<Center>, wcnt: u32, interval: Duration) -> Self {
        let (cmd_tx, cmd_queue) = CmdQueue::channel((wcnt as usize) * 2);
        Self {
            center,
            state: Arc::new(PoolState::new(wcnt)),
            interval,
            cmd_tx,
            cmd_queue,
        }
    }

    pub async fn start(&self) {
        self.state.set_active(true);
        let wcnt = self.state.worker_count().max(1) as usize;
        let (scan_tx, scan_rx) = mpsc::channel(wcnt);
        let (res_tx, res_rx) = mpsc::channel(wcnt * 2);
        let scan_rx = Arc::new(tokio::sync::Mutex::new(scan_rx));

        tokio::spawn(feeder(
            self.center.clone(),
            self.state.clone(),
            self.interval,
            scan_tx,
        ));
        tokio::spawn(gatherer(self.center.clone(), res_rx));

        for id in 0..self.state.worker_count() {
            tokio::spawn(scan_worker(
                id,
                self.state.clone(),
                self.cmd_queue.clone(),
                scan_rx.clone(),
                res_tx.clone(),
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
        self.state.incr();
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

/// Every `interval`, fetch `wcnt` random hosts and, for each, pick a port
/// not yet tried and hand it to a worker. A host with no candidate port
/// left (`select_port` returns `None`) is skipped this cycle.
async fn feeder(
    center: Arc<Center>,
    state: Arc<PoolState>,
    interval: Duration,
    scan_tx: mpsc::Sender<ScanRequest>,
) {
    debug!("scanner feeder starting up");
    while state.is_active() {
        let wcnt = state.worker_count();
        if wcnt == 0 {
            tokio::time::sleep(interval).await;
            continue;
        }

        let center2 = center.clone();
        let hosts = tokio::task::spawn_blocking(move || center2.store.host_get_random(wcnt))
            .await
            .unwrap();

        match hosts {
            Ok(hosts) => {
                for host in hosts {
                    let host_id = host.id;
                    let center3 = center.clone();
                    let seen = tokio::task::spawn_blocking(move || {
                        center3.store.service_get_by_host(host_id)
                    })
                    .await
                    .unwrap();
                    let seen: HashSet<u16> = match seen {
                        Ok(services) => services.into_iter().map(|s| s.port).collect(),
                        Err(err) => {
                            warn!("Could not fetch existing services for host {host_id}: {err}");
                            continue;
                        }
                    };

                    let Some(port) = select_port(&host, &seen) else {
                        continue;
                    };

                    if scan_tx.send(ScanRequest { host, port }).await.is_err() {
                        break;
                    }
                }
            }
            Err(err) => warn!("Could not fetch hosts to scan: {err}"),
        }
        tokio::time::sleep(interval).await;
    }
    debug!("scanner feeder shutting down");
}

async fn scan_worker(
    id: u32,
    state: Arc<PoolState>,
    cmds: Arc<CmdQueue>,
    scan_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ScanRequest>>>,
    res_tx: mpsc::Sender<ScanResult>,
) {
    debug!("scan_worker_{id:02} starting up");
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

        let req = {
            let mut rx = scan_rx.lock().await;
            timeout(Duration::from_secs(1), rx.recv()).await
        };
        let Ok(Some(req)) = req else {
            continue;
        };

        let response = probe(&resolver, &req.host, req.port).await;
        if res_tx
            .send(ScanResult {
                host_id: req.host.id,
                port: req.port,
                response,
            })
            .await
            .is_err()
        {
            break;
        }
    }
    debug!("scan_worker_{id:02} shutting down");
}

async fn gatherer(center: Arc<Center>, mut res_rx: mpsc::Receiver<ScanResult>) {
    debug!("scanner gatherer starting up");
    while let Some(result) = res_rx.recv().await {
        let Some(response) = result.response else {
            continue;
        };
        let center = center.clone();
        let res = super::retry_on_lock(move || {
            center
                .store
                .service_add(result.host_id, result.port, Some(&response))
        })
        .await;
        if let Err(err) = res {
            warn!(
                "Could not record service {}:{} : {err}",
                result.host_id, result.port
            );
        }
    }
    debug!("scanner gatherer shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn host(src: HostSource) -> kuang_store::Host {
        kuang_store::Host {
            id: 1,
            name: "example.net".to_string(),
            addr: "198.51.100.7".parse::<IpAddr>().unwrap(),
            src,
            added: 0,
            last_contact: None,
            sysname: String::new(),
            location: String::new(),
            xfr: false,
        }
    }

    #[test]
    fn mx_host_prefers_mail_ports() {
        let h = host(HostSource::Mx);
        let port = select_port(&h, &HashSet::new()).unwrap();
        assert_eq!(port, 25);
    }

    #[test]
    fn mx_host_exhausts_its_port_list() {
        let h = host(HostSource::Mx);
        let seen: HashSet<u16> = [25, 110, 143, 587].into_iter().collect();
        assert_eq!(select_port(&h, &seen), None);
    }

    #[test]
    fn ns_host_prefers_port_53() {
        let h = host(HostSource::Ns);
        assert_eq!(select_port(&h, &HashSet::new()), Some(53));
    }

    #[test]
    fn ns_host_falls_back_to_curated_list_once_53_is_seen() {
        let h = host(HostSource::Ns);
        let seen: HashSet<u16> = [53].into_iter().collect();
        let port = select_port(&h, &seen).unwrap();
        assert!(CURATED_PORTS.contains(&port));
        assert_ne!(port, 53);
    }

    #[test]
    fn generic_host_exhausts_curated_list() {
        let h = host(HostSource::Generator);
        let seen: HashSet<u16> = CURATED_PORTS.iter().copied().collect();
        assert_eq!(select_port(&h, &seen), None);
    }
}
