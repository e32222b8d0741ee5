//! Per-delivery orchestration
//!
//! A delivery moves through these stages:
//!
//! ```text
//! Received -> Authenticated -> PingAck
//!                           -> Delayed -> Dispatched -> Completed
//! ```
//!
//! and may end in an error at any point after it is received. Every error is
//! caught here and turned into a failure response; nothing escapes to the
//! HTTP layer.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use keeper_github::{ApiClient, ClientFactory, GitHubError};
use keeper_webhook::{authenticate, Delivery, EventRouter, RouterError, WebhookError, WebhookVerifier};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Auth(#[from] WebhookError),

    #[error(transparent)]
    Api(#[from] GitHubError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("Delivery handling timed out after {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        // GitHub only distinguishes success from failure, so every error is a 500.
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// How a delivery that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    PingAck,
    Completed,
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        StatusCode::OK.into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Authenticated,
    Delayed,
    Dispatched,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Authenticated => "authenticated",
            Stage::Delayed => "delayed",
            Stage::Dispatched => "dispatched",
        };
        f.write_str(name)
    }
}

/// Authenticates deliveries and hands them to the router with a fresh
/// installation client.
pub struct Dispatcher<F: ClientFactory> {
    verifier: Option<WebhookVerifier>,
    factory: F,
    router: Arc<dyn EventRouter<F::Client>>,
    consistency_delay: Duration,
    dispatch_timeout: Duration,
}

impl<F: ClientFactory> Dispatcher<F> {
    pub fn new(
        verifier: Option<WebhookVerifier>,
        factory: F,
        router: Arc<dyn EventRouter<F::Client>>,
    ) -> Self {
        Self {
            verifier,
            factory,
            router,
            consistency_delay: Duration::from_secs(1),
            dispatch_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_consistency_delay(mut self, delay: Duration) -> Self {
        self.consistency_delay = delay;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Handle one webhook call, logging any failure with its stage
    pub async fn handle(&self, headers: &HeaderMap, body: Bytes) -> Result<Outcome, DispatchError> {
        let mut stage = Stage::Received;
        let result = self.run(headers, body, &mut stage).await;

        if let Err(err) = &result {
            // Debug output keeps the whole source chain.
            error!(stage = %stage, error = %err, detail = ?err, "Delivery failed");
        }
        result
    }

    async fn run(
        &self,
        headers: &HeaderMap,
        body: Bytes,
        stage: &mut Stage,
    ) -> Result<Outcome, DispatchError> {
        let delivery = authenticate(headers, body, self.verifier.as_ref())?;
        *stage = Stage::Authenticated;

        if delivery.is_ping() {
            info!(delivery_id = %delivery.delivery_id(), "Received ping");
            return Ok(Outcome::PingAck);
        }

        info!(
            event = %delivery.kind_action(),
            delivery_id = %delivery.delivery_id(),
            "Received delivery"
        );

        let installation_id = delivery.require_installation_id()?;
        // The client owns the request-scoped session; both are dropped on
        // every path out of this function.
        let client = self.factory.build_client(installation_id)?;

        self.await_consistency().await;
        *stage = Stage::Delayed;

        let routed = self.route(&delivery, &client).await;
        *stage = Stage::Dispatched;

        log_rate_limit(&client);
        routed?;

        Ok(Outcome::Completed)
    }

    /// Give GitHub time to make the triggering write visible to reads.
    async fn await_consistency(&self) {
        if !self.consistency_delay.is_zero() {
            tokio::time::sleep(self.consistency_delay).await;
        }
    }

    #[instrument(skip_all, fields(event = %delivery.kind_action(), delivery_id = %delivery.delivery_id()))]
    async fn route(&self, delivery: &Delivery, client: &F::Client) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.dispatch_timeout, self.router.dispatch(delivery, client)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DispatchError::Timeout(self.dispatch_timeout)),
        }
    }
}

fn log_rate_limit<C: ApiClient>(client: &C) {
    let Some(rate_limit) = client.rate_limit() else {
        debug!(installation_id = client.installation_id(), "No API calls made");
        return;
    };

    let until_reset = rate_limit
        .time_until_reset(SystemTime::now().into())
        .to_std()
        .unwrap_or_default();

    info!(
        installation_id = client.installation_id(),
        ratelimit = %rate_limit,
        time_remaining = ?until_reset,
        "Rate limit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use keeper_github::RateLimit;
    use keeper_webhook::{BoxError, DELIVERY_HEADER, EVENT_HEADER};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tracing_subscriber::fmt::MakeWriter;

    struct StubClient {
        installation_id: u64,
    }

    impl ApiClient for StubClient {
        fn installation_id(&self) -> u64 {
            self.installation_id
        }

        fn rate_limit(&self) -> Option<RateLimit> {
            None
        }
    }

    #[derive(Clone, Default)]
    struct StubFactory {
        built: Arc<AtomicUsize>,
    }

    impl ClientFactory for StubFactory {
        type Client = StubClient;

        fn build_client(&self, installation_id: u64) -> keeper_github::Result<StubClient> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(StubClient { installation_id })
        }
    }

    #[derive(Default)]
    struct RecordingRouter {
        calls: Mutex<Vec<(String, u64, Instant)>>,
        fail: bool,
    }

    #[async_trait]
    impl EventRouter<StubClient> for RecordingRouter {
        async fn dispatch(&self, delivery: &Delivery, client: &StubClient) -> Result<(), RouterError> {
            self.calls
                .lock()
                .unwrap()
                .push((delivery.kind_action(), client.installation_id, Instant::now()));
            if self.fail {
                let source: BoxError = "boom".into();
                return Err(RouterError::Handler {
                    event: delivery.kind_action(),
                    source,
                });
            }
            Ok(())
        }
    }

    #[derive(Debug, Error)]
    #[error("label request failed")]
    struct LabelError(#[source] std::io::Error);

    struct UnreachableApiRouter;

    #[async_trait]
    impl EventRouter<StubClient> for UnreachableApiRouter {
        async fn dispatch(&self, delivery: &Delivery, _: &StubClient) -> Result<(), RouterError> {
            let refused =
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "tcp connect refused");
            Err(RouterError::Handler {
                event: delivery.kind_action(),
                source: Box::new(LabelError(refused)),
            })
        }
    }

    /// Log sink shared with the test body
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    struct SlowRouter;

    #[async_trait]
    impl EventRouter<StubClient> for SlowRouter {
        async fn dispatch(&self, _: &Delivery, _: &StubClient) -> Result<(), RouterError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn headers(event: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        headers.insert(DELIVERY_HEADER, HeaderValue::from_static("d-1"));
        headers
    }

    fn dispatcher(router: Arc<RecordingRouter>, factory: StubFactory) -> Dispatcher<StubFactory> {
        Dispatcher::new(None, factory, router).with_consistency_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_ping_skips_factory_and_router() {
        let router = Arc::new(RecordingRouter::default());
        let factory = StubFactory::default();
        let dispatcher = dispatcher(router.clone(), factory.clone());

        let outcome = dispatcher
            .handle(&headers("ping"), Bytes::from_static(br#"{"zen":"Keep it logically awesome."}"#))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::PingAck);
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
        assert!(router.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_routes_with_installation_client() {
        let router = Arc::new(RecordingRouter::default());
        let factory = StubFactory::default();
        let dispatcher = dispatcher(router.clone(), factory.clone());

        let outcome = dispatcher
            .handle(
                &headers("project"),
                Bytes::from_static(br#"{"action":"created","installation":{"id":4242}}"#),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
        let calls = router.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "project:created");
        assert_eq!(calls[0].1, 4242);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_elapses_before_routing() {
        let router = Arc::new(RecordingRouter::default());
        let dispatcher = Dispatcher::new(None, StubFactory::default(), router.clone())
            .with_consistency_delay(Duration::from_secs(1));

        let started = Instant::now();
        dispatcher
            .handle(
                &headers("issues"),
                Bytes::from_static(br#"{"action":"opened","installation":{"id":1}}"#),
            )
            .await
            .unwrap();

        let routed_at = router.calls.lock().unwrap()[0].2;
        assert!(routed_at.duration_since(started) >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_router_failure_becomes_500() {
        let router = Arc::new(RecordingRouter {
            fail: true,
            ..Default::default()
        });
        let dispatcher = dispatcher(router, StubFactory::default());

        let err = dispatcher
            .handle(
                &headers("issues"),
                Bytes::from_static(br#"{"action":"opened","installation":{"id":1}}"#),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Router(_)));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_missing_installation_fails() {
        let router = Arc::new(RecordingRouter::default());
        let factory = StubFactory::default();
        let dispatcher = dispatcher(router.clone(), factory.clone());

        let err = dispatcher
            .handle(&headers("issues"), Bytes::from_static(br#"{"action":"opened"}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Auth(WebhookError::MissingField(_))));
        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_timeout() {
        let dispatcher = Dispatcher::new(None, StubFactory::default(), Arc::new(SlowRouter))
            .with_consistency_delay(Duration::ZERO)
            .with_dispatch_timeout(Duration::from_secs(5));

        let err = dispatcher
            .handle(
                &headers("issues"),
                Bytes::from_static(br#"{"action":"opened","installation":{"id":1}}"#),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(err.to_string(), "Delivery handling timed out after 5s");
    }

    #[tokio::test]
    async fn test_failure_log_keeps_source_chain() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dispatcher =
            Dispatcher::new(None, StubFactory::default(), Arc::new(UnreachableApiRouter))
                .with_consistency_delay(Duration::ZERO);

        let err = dispatcher
            .handle(
                &headers("issues"),
                Bytes::from_static(br#"{"action":"opened","installation":{"id":1}}"#),
            )
            .await
            .unwrap_err();

        // The response only carries the top-level description.
        assert!(!err.to_string().contains("tcp connect refused"));

        let logged = logs.contents();
        assert!(logged.contains("Delivery failed"));
        assert!(logged.contains("stage=dispatched"));
        assert!(logged.contains("tcp connect refused"));
    }
}
