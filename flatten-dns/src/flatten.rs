use tracing::{info, info_span, warn, Instrument, Span};
use trust_dns_proto::rr::{Record, RecordType};

use crate::config::FlattenConfig;
use crate::error::Result;
use crate::handler::{Handler, Outcome, Query, Response};
use crate::upstream::Upstream;

/// Flatten answers A and AAAA queries for the original name with the
/// address records of the target name, as if they were its own.
///
/// Other queries are passed on to the next handler untouched.
pub struct Flatten<U: Upstream> {
    config: FlattenConfig,
    upstream: U,
    span: Span,
}

impl<U: Upstream> Flatten<U> {
    /// Creates a new Flatten handler
    ///
    /// # Arguments
    ///
    /// * `config` - original name, target name and upstream address
    /// * `upstream` - nameserver client used to resolve the target name
    pub fn new(config: FlattenConfig, upstream: U) -> Self {
        let span = info_span!("flatten", original = %config.original);
        Self::with_span(config, upstream, span)
    }

    /// Same as `new`, but every event is recorded under the given span.
    pub fn with_span(config: FlattenConfig, upstream: U, span: Span) -> Self {
        Self {
            config,
            upstream,
            span,
        }
    }

    /// Whether this handler owns the query.
    pub fn intercepts(&self, query: &Query) -> bool {
        query.name == self.config.original
            && matches!(query.query_type, RecordType::A | RecordType::AAAA)
    }

    /// Resolves the target name and builds the flattened response.
    ///
    /// Both address families are always looked up, whatever the query type.
    /// If either lookup fails the whole query fails, a response holding only
    /// one family is never produced.
    pub async fn resolve(&self, query: &Query) -> Result<Response> {
        let target = &self.config.target;
        let (a, aaaa) = tokio::join!(
            self.upstream.exchange(target, RecordType::A),
            self.upstream.exchange(target, RecordType::AAAA),
        );
        let (a, aaaa) = (a?, aaaa?);

        let mut response = Response::authoritative();
        response.answers.extend(a.answers);
        response.answers.extend(aaaa.answers);
        self.rewrite_owner(&mut response.answers);

        info!(
            client = %query.src.ip(),
            port = query.src.port(),
            name = %query.name,
            target = %self.config.target,
            upstream = %self.config.upstream,
            "flattened"
        );

        Ok(response)
    }

    fn rewrite_owner(&self, records: &mut [Record]) {
        for record in records.iter_mut() {
            record.set_name(self.config.original.clone());
        }
    }
}

#[async_trait::async_trait]
impl<U: Upstream> Handler for Flatten<U> {
    fn name(&self) -> &'static str {
        "flatten"
    }

    async fn handle(&self, query: &Query) -> Result<Outcome> {
        if !self.intercepts(query) {
            return Ok(Outcome::PassThrough);
        }

        match self.resolve(query).instrument(self.span.clone()).await {
            Ok(response) => Ok(Outcome::Answered(response)),
            Err(err) => {
                self.span.in_scope(|| {
                    warn!(
                        client = %query.src.ip(),
                        name = %query.name,
                        target = %self.config.target,
                        cause = %err,
                        "failed to flatten"
                    )
                });
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::fmt;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;
    use tracing_subscriber::Layer;

    use trust_dns_client::error::ClientError;
    use trust_dns_proto::error::{ProtoError, ProtoErrorKind};
    use trust_dns_proto::op::ResponseCode;
    use trust_dns_proto::rr::{DNSClass, Name, RData};

    use super::*;
    use crate::error::Error;
    use crate::handler::Chain;
    use crate::upstream::UpstreamAnswer;

    /// Serves canned answers per record type, a missing type times out.
    struct MockUpstream {
        addr: SocketAddr,
        answers: HashMap<RecordType, Vec<Record>>,
        exchanges: Arc<AtomicUsize>,
    }

    impl MockUpstream {
        fn new() -> Self {
            Self {
                addr: SocketAddr::from_str("203.0.113.53:53").unwrap(),
                answers: HashMap::new(),
                exchanges: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn answer(mut self, query_type: RecordType, records: Vec<Record>) -> Self {
            self.answers.insert(query_type, records);
            self
        }
    }

    #[async_trait::async_trait]
    impl Upstream for MockUpstream {
        fn addr(&self) -> SocketAddr {
            self.addr
        }

        async fn exchange(&self, name: &Name, query_type: RecordType) -> Result<UpstreamAnswer> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            match self.answers.get(&query_type) {
                Some(answers) => Ok(UpstreamAnswer {
                    response_code: ResponseCode::NoError,
                    answers: answers.clone(),
                }),
                None => Err(Error::Upstream {
                    upstream: self.addr,
                    name: name.clone(),
                    query_type,
                    source: ClientError::from(ProtoError::from(ProtoErrorKind::Timeout)),
                }),
            }
        }
    }

    /// Answers everything it sees, stands in for the rest of the chain.
    struct Next(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Handler for Next {
        fn name(&self) -> &'static str {
            "next"
        }

        async fn handle(&self, _query: &Query) -> Result<Outcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Answered(Response {
                response_code: ResponseCode::NXDomain,
                authoritative: false,
                recursion_available: true,
                answers: vec![],
            }))
        }
    }

    /// Fields of one event, plus the name of its span under `span`
    type Fields = BTreeMap<String, String>;

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<Fields>>>);

    impl EventLog {
        fn events(&self) -> Vec<Fields> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FieldVisitor<'a>(&'a mut Fields);

    impl<'a> Visit for FieldVisitor<'a> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{:?}", value));
        }
    }

    impl<S> Layer<S> for EventLog
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
            let mut fields = Fields::new();
            event.record(&mut FieldVisitor(&mut fields));
            if let Some(span) = ctx.event_span(event) {
                fields.insert("span".to_string(), span.name().to_string());
            }
            self.0.lock().unwrap().push(fields);
        }
    }

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    fn config() -> FlattenConfig {
        FlattenConfig::new("app.example.com", "cdn.example.net", "203.0.113.53:53").unwrap()
    }

    fn target_a() -> Record {
        Record::from_rdata(
            name("cdn.example.net."),
            300,
            RData::A(Ipv4Addr::new(198, 51, 100, 7)),
        )
    }

    fn target_aaaa() -> Record {
        Record::from_rdata(
            name("cdn.example.net."),
            300,
            RData::AAAA(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 7)),
        )
    }

    fn query(qname: &str, query_type: RecordType) -> Query {
        Query::new(
            name(qname),
            query_type,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)), 53000),
        )
    }

    fn healthy_upstream() -> MockUpstream {
        MockUpstream::new()
            .answer(RecordType::A, vec![target_a()])
            .answer(RecordType::AAAA, vec![target_aaaa()])
    }

    #[test]
    fn test_intercepts() {
        let flatten = Flatten::new(config(), MockUpstream::new());

        assert!(flatten.intercepts(&query("app.example.com.", RecordType::A)));
        assert!(flatten.intercepts(&query("app.example.com.", RecordType::AAAA)));
        assert!(flatten.intercepts(&query("APP.Example.com.", RecordType::A)));

        assert!(!flatten.intercepts(&query("app.example.com.", RecordType::MX)));
        assert!(!flatten.intercepts(&query("app.example.com.", RecordType::TXT)));
        assert!(!flatten.intercepts(&query("app.example.com.", RecordType::CNAME)));
        assert!(!flatten.intercepts(&query("www.app.example.com.", RecordType::A)));
        assert!(!flatten.intercepts(&query("cdn.example.net.", RecordType::A)));
    }

    #[tokio::test]
    async fn test_other_name_passes_without_upstream_io() {
        let upstream = healthy_upstream();
        let exchanges = upstream.exchanges.clone();
        let flatten = Flatten::new(config(), upstream);

        let outcome = flatten
            .handle(&query("www.example.com.", RecordType::A))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::PassThrough);
        assert_eq!(exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_type_is_delegated() {
        let upstream = healthy_upstream();
        let exchanges = upstream.exchanges.clone();
        let served = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new()
            .push(Flatten::new(config(), upstream))
            .push(Next(served.clone()));

        let response = chain
            .serve(&query("app.example.com.", RecordType::MX))
            .await
            .unwrap();

        assert_eq!(response.response_code, ResponseCode::NXDomain);
        assert_eq!(served.load(Ordering::SeqCst), 1);
        assert_eq!(exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flatten_a_query() {
        let upstream = healthy_upstream();
        let exchanges = upstream.exchanges.clone();
        let flatten = Flatten::new(config(), upstream);

        let outcome = flatten
            .handle(&query("app.example.com.", RecordType::A))
            .await
            .unwrap();

        let response = match outcome {
            Outcome::Answered(response) => response,
            Outcome::PassThrough => panic!("query was not intercepted"),
        };

        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
        assert_eq!(response.response_code, ResponseCode::NoError);
        assert!(response.authoritative);
        assert_eq!(response.answers.len(), 2);

        let a = &response.answers[0];
        assert_eq!(a.name(), &name("app.example.com."));
        assert_eq!(a.record_type(), RecordType::A);
        assert_eq!(a.dns_class(), DNSClass::IN);
        assert_eq!(a.ttl(), 300);
        assert_eq!(a.data(), Some(&RData::A(Ipv4Addr::new(198, 51, 100, 7))));

        let aaaa = &response.answers[1];
        assert_eq!(aaaa.name(), &name("app.example.com."));
        assert_eq!(aaaa.record_type(), RecordType::AAAA);
        assert_eq!(aaaa.ttl(), 300);
        assert_eq!(
            aaaa.data(),
            Some(&RData::AAAA(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 7)))
        );
    }

    #[tokio::test]
    async fn test_aaaa_query_gets_both_families() {
        let flatten = Flatten::new(config(), healthy_upstream());

        let response = flatten
            .resolve(&query("app.example.com.", RecordType::AAAA))
            .await
            .unwrap();

        let types: Vec<RecordType> = response.answers.iter().map(|r| r.record_type()).collect();
        assert_eq!(types, vec![RecordType::A, RecordType::AAAA]);
    }

    #[tokio::test]
    async fn test_a_failure_is_fatal() {
        let upstream = MockUpstream::new().answer(RecordType::AAAA, vec![target_aaaa()]);
        let exchanges = upstream.exchanges.clone();
        let chain = Chain::new().push(Flatten::new(config(), upstream));

        let err = chain
            .serve(&query("app.example.com.", RecordType::A))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Upstream {
                query_type: RecordType::A,
                ..
            }
        ));
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_aaaa_failure_is_fatal() {
        let upstream = MockUpstream::new().answer(RecordType::A, vec![target_a()]);
        let flatten = Flatten::new(config(), upstream);

        let err = flatten
            .handle(&query("app.example.com.", RecordType::A))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Upstream {
                query_type: RecordType::AAAA,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_merge_keeps_everything_in_order() {
        let cname = Record::from_rdata(
            name("cdn.example.net."),
            60,
            RData::CNAME(name("edge.cdn.example.net.")),
        );
        let second_a = Record::from_rdata(
            name("edge.cdn.example.net."),
            30,
            RData::A(Ipv4Addr::new(198, 51, 100, 8)),
        );
        let upstream = MockUpstream::new()
            .answer(
                RecordType::A,
                vec![cname.clone(), target_a(), second_a.clone(), target_a()],
            )
            .answer(RecordType::AAAA, vec![]);
        let flatten = Flatten::new(config(), upstream);

        let response = flatten
            .resolve(&query("app.example.com.", RecordType::A))
            .await
            .unwrap();

        assert_eq!(response.answers.len(), 4);
        assert!(response
            .answers
            .iter()
            .all(|r| r.name() == &name("app.example.com.")));
        assert_eq!(response.answers[0].record_type(), RecordType::CNAME);
        assert_eq!(response.answers[0].data(), cname.data());
        assert_eq!(response.answers[2].ttl(), 30);
        assert_eq!(response.answers[2].data(), second_a.data());
        assert_eq!(response.answers[1], response.answers[3]);
    }

    #[tokio::test]
    async fn test_empty_upstream_answer() {
        let upstream = MockUpstream::new()
            .answer(RecordType::A, vec![])
            .answer(RecordType::AAAA, vec![]);
        let flatten = Flatten::new(config(), upstream);

        let response = flatten
            .resolve(&query("app.example.com.", RecordType::A))
            .await
            .unwrap();

        assert_eq!(response.response_code, ResponseCode::NoError);
        assert!(response.authoritative);
        assert!(response.answers.is_empty());
    }

    #[tokio::test]
    async fn test_idempotent() {
        let flatten = Flatten::new(config(), healthy_upstream());
        let q = query("app.example.com.", RecordType::A);

        let first = flatten.resolve(&q).await.unwrap();
        let second = flatten.resolve(&q).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_flatten_logs_one_event_in_given_span() {
        let log = EventLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let span = tracing::info_span!("app_flatten");
        let flatten = Flatten::with_span(config(), healthy_upstream(), span);
        flatten
            .handle(&query("app.example.com.", RecordType::A))
            .await
            .unwrap();

        let events = log.events();
        let flattened: Vec<&Fields> = events
            .iter()
            .filter(|fields| fields.get("message").map(String::as_str) == Some("flattened"))
            .collect();
        assert_eq!(flattened.len(), 1);

        let fields = flattened[0];
        assert_eq!(fields["span"], "app_flatten");
        assert_eq!(fields["client"], "192.0.2.10");
        assert_eq!(fields["port"], "53000");
        assert_eq!(fields["name"], "app.example.com.");
        assert_eq!(fields["target"], "cdn.example.net.");
        assert_eq!(fields["upstream"], "203.0.113.53:53");
    }

    #[test]
    fn test_send() {
        fn test<C: Send>() {}
        test::<Flatten<MockUpstream>>();
    }

    #[test]
    fn test_sync() {
        fn test<C: Sync>() {}
        test::<Flatten<MockUpstream>>();
    }
}
