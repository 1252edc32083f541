//! Zone synchronization against the zone's master.
//!
//! For each zone the local resolver is asked for the SOA, the SOA's MNAME is
//! resolved to an address, and the master itself is asked for the SOA. The
//! zone is in sync when both serials match.

use async_trait::async_trait;
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, trace};

use crate::bind::stats::dns_name;
use crate::error::ResolutionError;

/// The parts of an SOA answer the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoaAnswer {
    /// Primary master name server.
    pub mname: Name,
    /// Zone serial.
    pub serial: u32,
}

/// DNS lookups against an explicit server.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// SOA of `zone` as answered by `server`.
    async fn soa(&self, zone: &Name, server: IpAddr) -> Result<SoaAnswer, ResolutionError>;

    /// First IPv4 address of `host` as answered by `server`.
    async fn a(&self, host: &Name, server: IpAddr) -> Result<Ipv4Addr, ResolutionError>;
}

/// Lookups sent straight to the chosen server, UDP first with a TCP retry
/// when the answer is truncated.
///
/// One uncached resolver is kept per server address.
pub struct ServerLookup {
    port: u16,
    timeout: Duration,
    resolvers: Mutex<HashMap<IpAddr, TokioResolver>>,
}

impl ServerLookup {
    /// Query servers on `port`, giving up on each query after `timeout`.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            resolvers: Mutex::new(HashMap::new()),
        }
    }

    fn resolver(&self, server: IpAddr) -> TokioResolver {
        self.resolvers
            .lock()
            .entry(server)
            .or_insert_with(|| {
                let servers = NameServerConfigGroup::from_ips_clear(&[server], self.port, true);
                let config = ResolverConfig::from_parts(None, vec![], servers);

                let mut opts = ResolverOpts::default();
                opts.timeout = self.timeout;
                opts.attempts = 1;
                opts.cache_size = 0;
                opts.recursion_desired = true;

                Resolver::builder_with_config(config, TokioConnectionProvider::default())
                    .with_options(opts)
                    .build()
            })
            .clone()
    }

    async fn query(
        &self,
        name: &Name,
        record_type: RecordType,
        server: IpAddr,
    ) -> Result<Vec<RData>, ResolutionError> {
        trace!(%name, ?record_type, %server, port = self.port, "sending DNS query");

        let lookup = self.resolver(server).lookup(name.clone(), record_type).await?;
        Ok(lookup.iter().cloned().collect())
    }
}

impl std::fmt::Debug for ServerLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLookup")
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DnsLookup for ServerLookup {
    async fn soa(&self, zone: &Name, server: IpAddr) -> Result<SoaAnswer, ResolutionError> {
        self.query(zone, RecordType::SOA, server)
            .await?
            .into_iter()
            .find_map(|rdata| match rdata {
                RData::SOA(soa) => Some(SoaAnswer {
                    mname: soa.mname().clone(),
                    serial: soa.serial(),
                }),
                _ => None,
            })
            .ok_or_else(|| ResolutionError::NoAnswer {
                name: zone.to_string(),
                record_type: RecordType::SOA,
            })
    }

    async fn a(&self, host: &Name, server: IpAddr) -> Result<Ipv4Addr, ResolutionError> {
        self.query(host, RecordType::A, server)
            .await?
            .into_iter()
            .find_map(|rdata| match rdata {
                RData::A(a) => Some(Ipv4Addr::from(a)),
                _ => None,
            })
            .ok_or_else(|| ResolutionError::NoAnswer {
                name: host.to_string(),
                record_type: RecordType::A,
            })
    }
}

/// Outcome of a successful three-step walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneSync {
    /// Local and master serials agree.
    InSync {
        /// The shared serial.
        serial: u32,
    },
    /// The local resolver lags or leads the master.
    Drifted {
        /// Serial seen through the local resolver.
        local: u32,
        /// Serial served by the master.
        master: u32,
        /// Address the master was reached at.
        master_addr: Ipv4Addr,
    },
}

impl ZoneSync {
    /// True when the serials agree.
    pub fn is_in_sync(&self) -> bool {
        matches!(self, ZoneSync::InSync { .. })
    }
}

/// Compares each zone's local serial with its master's.
#[derive(Debug, Clone)]
pub struct MasterSyncVerifier<L> {
    lookup: L,
    resolver: IpAddr,
}

impl<L: DnsLookup> MasterSyncVerifier<L> {
    /// Verify zones through `resolver` using `lookup` for every query.
    pub fn new(lookup: L, resolver: IpAddr) -> Self {
        Self { lookup, resolver }
    }

    /// Walk SOA → MNAME → A → SOA at master for one zone.
    ///
    /// `zone` may carry BIND's `/CLASS` suffix.
    pub async fn verify(&self, zone: &str) -> Result<ZoneSync, ResolutionError> {
        let mut name = Name::from_ascii(dns_name(zone))?;
        name.set_fqdn(true);

        let local = self.lookup.soa(&name, self.resolver).await?;
        debug!(zone, mname = %local.mname, serial = local.serial, "local SOA");

        let master_addr = self.lookup.a(&local.mname, self.resolver).await?;
        debug!(zone, mname = %local.mname, %master_addr, "resolved master");

        let master = self.lookup.soa(&name, IpAddr::V4(master_addr)).await?;
        debug!(zone, serial = master.serial, "master SOA");

        if local.serial == master.serial {
            Ok(ZoneSync::InSync {
                serial: local.serial,
            })
        } else {
            Ok(ZoneSync::Drifted {
                local: local.serial,
                master: master.serial,
                master_addr,
            })
        }
    }
}
