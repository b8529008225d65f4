use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;
use trust_dns_client::client::{AsyncClient, ClientHandle};
use trust_dns_client::error::ClientError;
use trust_dns_client::tcp::TcpClientStream;
use trust_dns_client::udp::UdpClientStream;
use trust_dns_proto::iocompat::AsyncIoTokioAsStd;
use trust_dns_proto::op::ResponseCode;
use trust_dns_proto::rr::{DNSClass, Name, Record, RecordType};
use trust_dns_proto::xfer::DnsResponse;

use crate::error::{Error, Result};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Answer section of one upstream exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAnswer {
    pub response_code: ResponseCode,
    pub answers: Vec<Record>,
}

impl From<DnsResponse> for UpstreamAnswer {
    fn from(response: DnsResponse) -> Self {
        Self {
            response_code: response.response_code(),
            answers: response.answers().to_vec(),
        }
    }
}

/// A nameserver that answers single questions.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Address of the nameserver, for logging
    fn addr(&self) -> SocketAddr;

    /// Asks the nameserver for `name` of type `query_type`, class IN.
    ///
    /// Only transport and protocol failures are errors, an NXDOMAIN or an
    /// empty answer is returned as is.
    async fn exchange(&self, name: &Name, query_type: RecordType) -> Result<UpstreamAnswer>;
}

/// DNSUpstream sends every question to a single nameserver, over UDP
/// first and over TCP again when the UDP reply comes back truncated.
///
/// Each exchange uses a fresh connection, nothing is pooled or cached.
#[derive(Debug, Clone)]
pub struct DNSUpstream {
    addr: SocketAddr,
    timeout: Duration,
}

impl DNSUpstream {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    async fn query_udp(
        &self,
        name: &Name,
        query_type: RecordType,
    ) -> Result<DnsResponse, ClientError> {
        let stream = UdpClientStream::<UdpSocket>::with_timeout(self.addr, self.timeout);
        let (mut client, background) = AsyncClient::connect(stream).await?;
        // drives the exchange, finishes once the client is dropped
        tokio::spawn(background);

        client.query(name.clone(), DNSClass::IN, query_type).await
    }

    async fn query_tcp(
        &self,
        name: &Name,
        query_type: RecordType,
    ) -> Result<DnsResponse, ClientError> {
        let (stream, sender) =
            TcpClientStream::<AsyncIoTokioAsStd<TcpStream>>::with_timeout(self.addr, self.timeout);
        let (mut client, background) =
            AsyncClient::with_timeout(stream, sender, self.timeout, None).await?;
        tokio::spawn(background);

        client.query(name.clone(), DNSClass::IN, query_type).await
    }
}

#[async_trait::async_trait]
impl Upstream for DNSUpstream {
    fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn exchange(&self, name: &Name, query_type: RecordType) -> Result<UpstreamAnswer> {
        let upstream_error = |source: ClientError| Error::Upstream {
            upstream: self.addr,
            name: name.clone(),
            query_type,
            source,
        };

        let mut response = self
            .query_udp(name, query_type)
            .await
            .map_err(upstream_error)?;

        if response.truncated() {
            debug!(
                upstream = %self.addr,
                name = %name,
                qtype = %query_type,
                "truncated reply, retry over tcp"
            );
            response = self
                .query_tcp(name, query_type)
                .await
                .map_err(upstream_error)?;
        }

        Ok(UpstreamAnswer::from(response))
    }
}
