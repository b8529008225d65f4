use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use trust_dns_proto::error::ProtoError;
use trust_dns_proto::rr::Name;

use crate::error::ConfigError;

pub const DEFAULT_DNS_PORT: u16 = 53;

/// Settings of one flattening handler: answer address queries for
/// `original` with the address records of `target`, looked up at `upstream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenConfig {
    /// Name the clients ask for, fully qualified
    pub original: Name,
    /// Name whose records are served instead, fully qualified
    pub target: Name,
    /// Nameserver used to resolve `target`
    pub upstream: SocketAddr,
}

impl FlattenConfig {
    /// Creates a config from its three arguments.
    ///
    /// Both names are normalized to their fully qualified form, so
    /// `app.example.com` and `app.example.com.` are the same thing.
    /// The upstream may omit its port, in which case 53 is used.
    pub fn new(original: &str, target: &str, upstream: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            original: parse_fqdn(original)?,
            target: parse_fqdn(target)?,
            upstream: parse_upstream(upstream)?,
        })
    }

    /// Creates a config from positional arguments, exactly three are required.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        match args {
            [original, target, upstream] => {
                Self::new(original.as_ref(), target.as_ref(), upstream.as_ref())
            }
            _ => Err(ConfigError::ArgCount(args.len())),
        }
    }
}

/// Parses a whitespace separated directive, eg.
/// `app.example.com cdn.example.net 203.0.113.53:53`
impl FromStr for FlattenConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let args: Vec<&str> = s.split_whitespace().collect();
        Self::from_args(&args)
    }
}

impl fmt::Display for FlattenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.original, self.target, self.upstream)
    }
}

fn parse_fqdn(s: &str) -> Result<Name, ConfigError> {
    let invalid = |source: ProtoError| ConfigError::InvalidName {
        name: s.to_string(),
        source,
    };

    let mut name = Name::from_utf8(s).map_err(invalid)?;
    if name.is_root() {
        return Err(invalid(ProtoError::from("the root name cannot be flattened")));
    }
    name.set_fqdn(true);

    Ok(name)
}

fn parse_upstream(s: &str) -> Result<SocketAddr, ConfigError> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| ConfigError::InvalidUpstream(s.to_string()))
}
