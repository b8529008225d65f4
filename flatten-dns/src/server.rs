use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, warn};
use trust_dns_proto::op::Edns;
use trust_dns_proto::op::Header;
use trust_dns_proto::op::MessageType;
use trust_dns_proto::op::ResponseCode;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::server::Request;
use trust_dns_server::server::RequestHandler;
use trust_dns_server::server::ResponseHandler;
use trust_dns_server::server::ResponseInfo;
use trust_dns_server::ServerFuture;

use crate::handler::{Chain, Query, Response};

/// Idle timeout of tcp connections
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Smallest udp payload a client advertising EDNS can take
const MIN_EDNS_PAYLOAD: u16 = 512;

struct InnerDNSServer {
    chain: Chain,
}

impl InnerDNSServer {
    pub fn new(chain: Chain) -> Self {
        InnerDNSServer { chain }
    }

    async fn construct_response(&self, request: &Request) -> Response {
        let query = Query::new(
            request.query().original().name().clone(),
            request.query().query_type(),
            request.src(),
        );

        match self.chain.serve(&query).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    client = %query.src,
                    name = %query.name,
                    qtype = %query.query_type,
                    cause = %err,
                    "answer with SERVFAIL"
                );
                Response::server_failure()
            }
        }
    }

    fn construct_response_header(&self, request: &Request, response: &Response) -> Header {
        let mut header = request.header().clone();
        // change message type from query to response
        header.set_message_type(MessageType::Response);
        header.set_response_code(response.response_code);
        header.set_authoritative(response.authoritative);
        header.set_recursion_available(response.recursion_available);
        header.set_authentic_data(false);

        header
    }

    /// OPT record of the reply, present only when the query carried one
    fn construct_response_edns(&self, request: &Request) -> Option<Edns> {
        let req_edns = request.edns()?;

        let mut edns = Edns::new();
        edns.set_version(0);
        edns.set_dnssec_ok(false);
        edns.set_max_payload(req_edns.max_payload().max(MIN_EDNS_PAYLOAD));
        Some(edns)
    }
}

// https://docs.rs/trust-dns-server/latest/trust_dns_server/server/trait.RequestHandler.html
#[async_trait::async_trait]
impl RequestHandler for InnerDNSServer {
    // -----------------------------------------------------------------
    // FLATTENED DNS MESSAGE
    // ; <<>> DiG 9.18.13 <<>> @127.0.0.1 app.example.com
    // ;; ->>HEADER<<- opcode: QUERY, status: NOERROR, id: 20266
    // ;; flags: qr aa rd; QUERY: 1, ANSWER: 2, AUTHORITY: 0, ADDITIONAL: 0
    //
    // ;; QUESTION SECTION:
    // ;app.example.com.		IN	A
    //
    // ;; ANSWER SECTION:
    // app.example.com.	300	IN	A	198.51.100.7
    // app.example.com.	300	IN	AAAA	2001:db8::7
    // -----------------------------------------------------------------
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let response = self.construct_response(request).await;
        let header = self.construct_response_header(request, &response);

        let mut response_builder = MessageResponseBuilder::from_message_request(request);
        if let Some(edns) = self.construct_response_edns(request) {
            response_builder.edns(edns);
        }
        let message = response_builder.build(
            header,
            response.answers.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        match response_handle.send_response(message).await {
            Ok(info) => info,
            Err(err) => {
                error!(client = %request.src(), cause = %err, "failed to send response");
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// DNSServer answers queries with a chain of handlers
pub struct DNSServer {
    inner: InnerDNSServer,
    listen_at: SocketAddr,
}

impl DNSServer {
    /// Creates a new DNSServer
    ///
    /// # Arguments
    ///
    /// * `listen_at` - DNS Server listening address, udp and tcp
    /// * `chain` - handlers asked in turn to answer every query
    pub fn new(listen_at: SocketAddr, chain: Chain) -> Self {
        let inner = InnerDNSServer::new(chain);
        DNSServer { inner, listen_at }
    }

    pub fn listen_at(&self) -> SocketAddr {
        self.listen_at
    }

    pub async fn serve(self) -> Result<()> {
        let udp_socket = UdpSocket::bind(self.listen_at).await?;
        let tcp_listener = TcpListener::bind(self.listen_at).await?;
        self.serve_sockets(udp_socket, tcp_listener).await
    }

    /// Serves on sockets bound by the caller, `listen_at` is ignored.
    pub async fn serve_sockets(self, udp_socket: UdpSocket, tcp_listener: TcpListener) -> Result<()> {
        let mut server_fut = ServerFuture::new(self.inner);

        server_fut.register_socket(udp_socket);
        server_fut.register_listener(tcp_listener, TCP_TIMEOUT);
        server_fut.block_until_done().await?;
        Ok(())
    }
}
