use std::net::SocketAddr;

use thiserror::Error;
use trust_dns_client::error::ClientError;
use trust_dns_proto::error::ProtoError;
use trust_dns_proto::rr::{Name, RecordType};

/// Errors raised while answering a single query.
#[derive(Debug, Error)]
pub enum Error {
    /// The upstream exchange failed at transport or protocol level
    /// (timeout, connection refused, malformed reply).
    #[error("upstream {upstream} failed to answer {name} {query_type}: {source}")]
    Upstream {
        upstream: SocketAddr,
        name: Name,
        query_type: RecordType,
        #[source]
        source: ClientError,
    },
    /// Every handler in the chain passed the query on.
    #[error("no handler answered {name} {query_type}")]
    NoHandler { name: Name, query_type: RecordType },
}

/// Errors raised while building a handler from its startup arguments.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected 3 arguments (original, target, upstream), got {0}")]
    ArgCount(usize),
    #[error("invalid domain name '{name}': {source}")]
    InvalidName {
        name: String,
        #[source]
        source: ProtoError,
    },
    #[error("invalid upstream '{0}', expected ip:port or ip")]
    InvalidUpstream(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
