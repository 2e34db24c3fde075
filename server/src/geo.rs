//! IP geolocation used to attribute sessions to a country
//!
//! Resolution never fails: anything the table does not cover resolves to
//! `CountryCode::Unknown`.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use shared::CountryCode;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("failed to read geo table: {0}")]
    Io(#[from] std::io::Error),

    #[error("geo table line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

pub trait GeoResolver: Send + Sync {
    fn resolve(&self, addr: IpAddr) -> CountryCode;
}

/// Longest-prefix lookup over a table of `CIDR,COUNTRY` rows
///
/// Networks are bucketed by prefix length, so a lookup costs one hash probe
/// per distinct prefix length in the table.
#[derive(Debug, Default)]
pub struct CidrTableResolver {
    networks: HashMap<IpNet, CountryCode>,
    v4_prefixes: Vec<u8>,
    v6_prefixes: Vec<u8>,
}

impl CidrTableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (IpNet, &'a str)>) -> Self {
        let mut resolver = Self::new();
        for (net, country) in entries {
            resolver.insert(net, CountryCode::new(country));
        }
        resolver
    }

    /// Parses rows of the form `203.0.113.0/24,AU`
    ///
    /// Blank lines and lines starting with `#` are skipped. A bare address
    /// is treated as a single-host network.
    pub fn parse(table: &str) -> Result<Self, GeoError> {
        let mut resolver = Self::new();

        for (index, raw) in table.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parse_error = |reason: String| GeoError::Parse {
                line: index + 1,
                reason,
            };

            let (network, country) = line
                .split_once(',')
                .ok_or_else(|| parse_error("expected `network,country`".to_string()))?;

            let network = network.trim();
            let net = match network.parse::<IpNet>() {
                Ok(net) => net,
                Err(_) => {
                    let addr = network
                        .parse::<IpAddr>()
                        .map_err(|e| parse_error(format!("invalid network {:?}: {}", network, e)))?;
                    host_network(addr)
                }
            };

            let country = CountryCode::new(country);
            if country.is_unknown() {
                return Err(parse_error(format!("missing country for {}", net)));
            }

            resolver.insert(net, country);
        }

        Ok(resolver)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GeoError> {
        let table = std::fs::read_to_string(path)?;
        Self::parse(&table)
    }

    pub fn insert(&mut self, net: IpNet, country: CountryCode) {
        let prefixes = match net {
            IpNet::V4(_) => &mut self.v4_prefixes,
            IpNet::V6(_) => &mut self.v6_prefixes,
        };
        let prefix = net.prefix_len();
        if let Err(position) = prefixes.binary_search_by(|probe| prefix.cmp(probe)) {
            prefixes.insert(position, prefix);
        }

        self.networks.insert(net.trunc(), country);
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

fn host_network(addr: IpAddr) -> IpNet {
    match addr {
        IpAddr::V4(v4) => IpNet::V4(Ipv4Net::new_assert(v4, 32)),
        IpAddr::V6(v6) => IpNet::V6(Ipv6Net::new_assert(v6, 128)),
    }
}

impl GeoResolver for CidrTableResolver {
    fn resolve(&self, addr: IpAddr) -> CountryCode {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            IpAddr::V4(_) => addr,
        };

        let prefixes = match addr {
            IpAddr::V4(_) => &self.v4_prefixes,
            IpAddr::V6(_) => &self.v6_prefixes,
        };

        for &prefix in prefixes {
            let Ok(net) = IpNet::new(addr, prefix) else {
                continue;
            };
            if let Some(country) = self.networks.get(&net.trunc()) {
                return country.clone();
            }
        }

        CountryCode::Unknown
    }
}
