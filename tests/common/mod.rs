//! Shared test infrastructure for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, SOA};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

use agent_checks::bind::sync::{DnsLookup, SoaAnswer};
use agent_checks::{BindInstance, ResolutionError};

// --- Fixtures ---

/// Read a file from `tests/fixtures`.
pub fn fixture(name: &str) -> String {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name]
        .iter()
        .collect();
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read fixture {}: {}", path.display(), e))
}

/// Zones listed in the default view of both fixtures, with or without serial.
pub const FIXTURE_ZONES: [&str; 7] = [
    "corp.example.com/IN",
    "dc.example.com/IN",
    "lab.example.com/IN",
    "ns.example.com/IN",
    "old.example.com/IN",
    "new.example.com/IN",
    "0.in-addr.arpa/IN",
];

/// Statistics document with the given default-view zones and serials.
pub fn zones_xml(zones: &[(&str, &str)]) -> String {
    let mut xml = String::from("<statistics version=\"3.8\"><views><view name=\"_default\"><zones>");
    for (name, serial) in zones {
        xml.push_str(&format!(
            "<zone name=\"{}\" rdataclass=\"IN\"><serial>{}</serial></zone>",
            name, serial
        ));
    }
    xml.push_str("</zones></view></views></statistics>");
    xml
}

// --- Canned HTTP statistics channel ---

/// What the statistics channel answers with.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// HTTP server on loopback answering every request with the current [`Reply`].
pub struct StatsServer {
    addr: SocketAddr,
    reply: Arc<Mutex<Reply>>,
    handle: JoinHandle<()>,
}

impl StatsServer {
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reply = Arc::new(Mutex::new(reply));

        let shared = reply.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let reply = shared.lock().clone();
                tokio::spawn(serve(stream, reply));
            }
        });

        Self {
            addr,
            reply,
            handle,
        }
    }

    /// Change what subsequent requests receive.
    pub fn set(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.addr.port())
    }

    /// Instance config pointing at this server.
    pub fn instance(&self) -> BindInstance {
        BindInstance {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            timeout_ms: 1000,
            tags: vec!["env:test".to_string()],
            ..BindInstance::default()
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, reply: Reply) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let reason = match reply.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reason,
        reply.body.len(),
        reply.body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

// --- Scripted DNS lookups ---

fn key(name: &Name) -> String {
    name.to_lowercase().to_ascii().trim_end_matches('.').to_string()
}

/// [`DnsLookup`] answering from tables keyed by (name, server).
#[derive(Debug, Default)]
pub struct ScriptedLookup {
    soa: HashMap<(String, IpAddr), SoaAnswer>,
    a: HashMap<(String, IpAddr), Ipv4Addr>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// `zone` served with `serial` by `server`, with `mname` as primary.
    pub fn soa(mut self, zone: &str, server: IpAddr, mname: &str, serial: u32) -> Self {
        let zone = Name::from_ascii(zone).unwrap();
        self.soa.insert(
            (key(&zone), server),
            SoaAnswer {
                mname: Name::from_ascii(mname).unwrap(),
                serial,
            },
        );
        self
    }

    pub fn a(mut self, host: &str, server: IpAddr, addr: Ipv4Addr) -> Self {
        self.a
            .insert((key(&Name::from_ascii(host).unwrap()), server), addr);
        self
    }

    /// `zone` at `local` and at its master with the given serials.
    pub fn zone(
        self,
        zone: &str,
        local: IpAddr,
        master: Ipv4Addr,
        local_serial: u32,
        master_serial: u32,
    ) -> Self {
        let mname = format!("ns1.{}.", zone.trim_end_matches('.'));
        self.soa(zone, local, &mname, local_serial)
            .a(&mname, local, master)
            .soa(zone, IpAddr::V4(master), &mname, master_serial)
    }
}

#[async_trait]
impl DnsLookup for ScriptedLookup {
    async fn soa(&self, zone: &Name, server: IpAddr) -> Result<SoaAnswer, ResolutionError> {
        self.soa
            .get(&(key(zone), server))
            .cloned()
            .ok_or_else(|| ResolutionError::ResponseCode {
                name: zone.to_string(),
                record_type: RecordType::SOA,
                code: ResponseCode::NXDomain,
            })
    }

    async fn a(&self, host: &Name, server: IpAddr) -> Result<Ipv4Addr, ResolutionError> {
        self.a
            .get(&(key(host), server))
            .copied()
            .ok_or_else(|| ResolutionError::NoAnswer {
                name: host.to_string(),
                record_type: RecordType::A,
            })
    }
}

pub const RESOLVER: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const MASTER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

/// Lookup where every fixture zone is in sync with its master.
pub fn in_sync_lookup() -> ScriptedLookup {
    FIXTURE_ZONES.iter().fold(ScriptedLookup::new(), |lookup, zone| {
        let name = zone.split('/').next().unwrap();
        lookup.zone(name, RESOLVER, MASTER, 1, 1)
    })
}

// --- Fake DNS server ---

/// Authoritative-looking server on loopback, UDP and TCP on the same port.
/// Unknown names get NXDOMAIN.
pub struct FakeDnsServer {
    port: u16,
    tcp_queries: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

#[derive(Debug, Default, Clone)]
pub struct FakeRecords {
    records: HashMap<(String, RecordType), Vec<Record>>,
}

impl FakeRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn soa(mut self, zone: &str, mname: &str, serial: u32) -> Self {
        let name = Name::from_ascii(zone).unwrap();
        let soa = SOA::new(
            Name::from_ascii(mname).unwrap(),
            Name::from_ascii("hostmaster.example.com.").unwrap(),
            serial,
            3600,
            600,
            86400,
            60,
        );
        self.records
            .entry((key(&name), RecordType::SOA))
            .or_default()
            .push(Record::from_rdata(name, 60, RData::SOA(soa)));
        self
    }

    pub fn a(mut self, host: &str, addr: Ipv4Addr) -> Self {
        let name = Name::from_ascii(host).unwrap();
        self.records
            .entry((key(&name), RecordType::A))
            .or_default()
            .push(Record::from_rdata(name, 60, RData::A(A::from(addr))));
        self
    }
}

async fn bind_udp_and_tcp() -> (UdpSocket, TcpListener) {
    loop {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = udp.local_addr().unwrap().port();
        if let Ok(tcp) = TcpListener::bind(("127.0.0.1", port)).await {
            return (udp, tcp);
        }
    }
}

impl FakeDnsServer {
    pub async fn start(records: FakeRecords) -> Self {
        Self::spawn(records, false).await
    }

    /// Server whose UDP answers are empty with the TC bit set, so clients
    /// must retry over TCP.
    pub async fn truncating(records: FakeRecords) -> Self {
        Self::spawn(records, true).await
    }

    async fn spawn(records: FakeRecords, truncate_udp: bool) -> Self {
        let (socket, listener) = bind_udp_and_tcp().await;
        let port = socket.local_addr().unwrap().port();
        let records = Arc::new(records);
        let tcp_queries = Arc::new(AtomicUsize::new(0));

        let udp_records = records.clone();
        let udp = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Ok(request) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                let mut response = answer(&udp_records, &request);
                if truncate_udp {
                    response.take_answers();
                    response.set_truncated(true);
                }
                if let Ok(bytes) = response.to_vec() {
                    let _ = socket.send_to(&bytes, src).await;
                }
            }
        });

        let counter = tcp_queries.clone();
        let tcp = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_dns_tcp(stream, records.clone(), counter.clone()));
            }
        });

        Self {
            port,
            tcp_queries,
            handles: vec![udp, tcp],
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of queries answered over TCP so far.
    pub fn tcp_queries(&self) -> usize {
        self.tcp_queries.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDnsServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn serve_dns_tcp(mut stream: TcpStream, records: Arc<FakeRecords>, counter: Arc<AtomicUsize>) {
    loop {
        let Ok(len) = stream.read_u16().await else {
            return;
        };
        let mut buf = vec![0u8; len as usize];
        if stream.read_exact(&mut buf).await.is_err() {
            return;
        }
        let Ok(request) = Message::from_vec(&buf) else {
            return;
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let Ok(bytes) = answer(&records, &request).to_vec() else {
            return;
        };
        let mut framed = (bytes.len() as u16).to_be_bytes().to_vec();
        framed.extend_from_slice(&bytes);
        if stream.write_all(&framed).await.is_err() {
            return;
        }
    }
}

fn answer(records: &FakeRecords, request: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_recursion_desired(request.recursion_desired());
    response.set_authoritative(true);

    let Some(query) = request.queries().first() else {
        response.set_response_code(ResponseCode::FormErr);
        return response;
    };
    response.add_query(query.clone());

    match records.records.get(&(key(query.name()), query.query_type())) {
        Some(found) => {
            for record in found {
                response.add_answer(record.clone());
            }
        }
        None => {
            response.set_response_code(ResponseCode::NXDomain);
        }
    }
    response
}

/// UDP socket on loopback that never answers.
pub async fn silent_dns_server() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}
