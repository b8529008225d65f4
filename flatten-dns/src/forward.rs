use tracing::debug;

use crate::error::Result;
use crate::handler::{Handler, Outcome, Query, Response};
use crate::upstream::Upstream;

/// Forward relays every query it sees to its upstream and hands the answer
/// back as is. Meant to sit at the end of a chain.
pub struct Forward<U: Upstream> {
    upstream: U,
}

impl<U: Upstream> Forward<U> {
    pub fn new(upstream: U) -> Self {
        Self { upstream }
    }
}

#[async_trait::async_trait]
impl<U: Upstream> Handler for Forward<U> {
    fn name(&self) -> &'static str {
        "forward"
    }

    async fn handle(&self, query: &Query) -> Result<Outcome> {
        debug!(
            name = %query.name,
            qtype = %query.query_type,
            upstream = %self.upstream.addr(),
            "forward to upstream"
        );
        let answer = self
            .upstream
            .exchange(&query.name, query.query_type)
            .await?;

        Ok(Outcome::Answered(Response {
            response_code: answer.response_code,
            authoritative: false,
            recursion_available: true,
            answers: answer.answers,
        }))
    }
}
