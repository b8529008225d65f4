use std::net::SocketAddr;
use std::sync::Arc;

use tracing::trace;
use trust_dns_proto::op::ResponseCode;
use trust_dns_proto::rr::{Name, Record, RecordType};

use crate::error::{Error, Result};

/// A question as seen by the handlers, built by the server for every
/// incoming request and dropped once it is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: Name,
    pub query_type: RecordType,
    /// Client address
    pub src: SocketAddr,
}

impl Query {
    pub fn new(name: Name, query_type: RecordType, src: SocketAddr) -> Self {
        Self {
            name,
            query_type,
            src,
        }
    }
}

/// The answer a handler wants written back to the client.
///
/// Message id and question section are copied from the request by the
/// server, only flags and records are decided here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub response_code: ResponseCode,
    pub authoritative: bool,
    pub recursion_available: bool,
    pub answers: Vec<Record>,
}

impl Response {
    /// An authoritative NOERROR response without records
    pub fn authoritative() -> Self {
        Self {
            response_code: ResponseCode::NoError,
            authoritative: true,
            recursion_available: false,
            answers: Vec::new(),
        }
    }

    /// A SERVFAIL response without records
    pub fn server_failure() -> Self {
        Self {
            response_code: ResponseCode::ServFail,
            authoritative: false,
            recursion_available: false,
            answers: Vec::new(),
        }
    }
}

/// What a handler did with a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The handler took ownership of the query.
    Answered(Response),
    /// The handler declined, the next one should look at the query.
    PassThrough,
}

/// One stage of the handler chain.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, query: &Query) -> Result<Outcome>;
}

/// Ordered list of handlers, each one either answers a query or passes it
/// to the next.
#[derive(Clone, Default)]
pub struct Chain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler, it sees only the queries every earlier handler
    /// passed on.
    pub fn push<H: Handler>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Runs the query through the chain.
    ///
    /// A handler error stops the chain. Running off the end of the chain is
    /// an error as well, there is nobody left to answer.
    pub async fn serve(&self, query: &Query) -> Result<Response> {
        for handler in self.handlers.iter() {
            match handler.handle(query).await? {
                Outcome::Answered(response) => return Ok(response),
                Outcome::PassThrough => {
                    trace!(
                        handler = handler.name(),
                        name = %query.name,
                        qtype = %query.query_type,
                        "pass through"
                    );
                }
            }
        }

        Err(Error::NoHandler {
            name: query.name.clone(),
            query_type: query.query_type,
        })
    }
}
