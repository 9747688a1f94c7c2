use crate::ratelimit::{RateLimitHeaders, RateLimitedBody, RateLimiter};
use crate::request::ApiErrorBody;
use crate::{
    DispatcherOptions, PreparedRequest, RawResponse, Request, Response, RestError, Result,
    ReqwestTransport, Transport, TransportError,
};
use common::Backoff;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, warn};
use url::form_urlencoded;

const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Used when a 429 carries neither a header nor a body telling us how long to wait.
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Sends requests on behalf of one credential while respecting its
/// ratelimits.
pub struct RequestDispatcher {
    options: DispatcherOptions,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    in_flight: Semaphore,
    closed: AtomicBool,
}

enum Outcome {
    Done(Response),
    /// Back off, then go back to the ratelimiter for a new permit.
    Retry,
}

impl RequestDispatcher {
    pub fn new(options: DispatcherOptions) -> Result<Self> {
        let client = ReqwestTransport::build_http_client(options.request_timeout).map_err(|e| {
            RestError::Transport {
                route: "client".to_owned(),
                attempts: 0,
                source: e,
            }
        })?;

        Ok(Self::with_transport(
            options,
            Arc::new(ReqwestTransport::new(client)),
        ))
    }

    pub fn with_transport(options: DispatcherOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            limiter: RateLimiter::new(options.bucket_capacity),
            in_flight: Semaphore::new(options.max_in_flight.max(1)),
            transport,
            closed: AtomicBool::new(false),
            options,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let mut request = Request::new(method, path);
        if let Some(body) = body {
            request = request.json(body)?;
        }

        self.request(request).await
    }

    #[tracing::instrument(skip(self, request), fields(route = %request.route))]
    pub async fn request(&self, request: Request) -> Result<Response> {
        if self.is_closed() {
            return RestError::Closed.into();
        }

        let prepared = self.prepare(&request)?;
        let route = request.route();
        let deadline = Instant::now() + self.options.deadline;

        let mut backoff = Backoff::new(self.options.backoff);
        let mut attempts = 0;

        loop {
            // released on drop if we are cancelled before a response is applied
            let _permit = match timeout_at(deadline, self.limiter.acquire(route)).await {
                Ok(permit) => permit,
                Err(_) => {
                    return RestError::DeadlineExceeded {
                        route: route.to_string(),
                    }
                    .into()
                }
            };

            attempts += 1;
            match self.attempt(&request, &prepared, attempts, deadline).await? {
                Outcome::Done(res) => return Ok(res),
                Outcome::Retry => {
                    let delay = backoff.next_delay();
                    debug!(attempts, delay_ms = delay.as_millis() as u64, "Retrying request");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Rejects new requests. Requests already admitted run to completion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends a request for which a permit is already held. 429s are resent
    /// from here without taking another permit.
    async fn attempt(
        &self,
        request: &Request,
        prepared: &PreparedRequest,
        attempts: u32,
        deadline: Instant,
    ) -> Result<Outcome> {
        let route = request.route();
        let mut ratelimit_retries = 0;

        loop {
            let res = self.execute(prepared).await?;

            let res = match res {
                Ok(res) => res,
                Err(e) => {
                    self.limiter.update(route, None);

                    if attempts >= self.options.max_attempts {
                        return RestError::Transport {
                            route: route.to_string(),
                            attempts,
                            source: e,
                        }
                        .into();
                    }

                    warn!(error = %e, attempts, "Transport error");
                    return Ok(Outcome::Retry);
                }
            };

            let headers = RateLimitHeaders::from_headers(&res.headers);

            if res.status == StatusCode::TOO_MANY_REQUESTS {
                ratelimit_retries += 1;

                let (retry_after, global) = retry_after(headers.as_ref(), &res);
                self.limiter.ratelimited(route, retry_after, global);

                if ratelimit_retries > self.options.max_ratelimit_retries {
                    return RestError::RateLimitRetriesExhausted {
                        route: route.to_string(),
                        retries: ratelimit_retries,
                    }
                    .into();
                }

                if Instant::now() + retry_after > deadline {
                    return RestError::DeadlineExceeded {
                        route: route.to_string(),
                    }
                    .into();
                }

                sleep(retry_after).await;
                continue;
            }

            self.limiter.update(route, headers.as_ref());

            if res.status.is_success() {
                return Ok(Outcome::Done(Response::new(res)));
            }

            if res.status.is_server_error() {
                if attempts >= self.options.max_attempts {
                    return RestError::Server {
                        route: route.to_string(),
                        status: res.status,
                        attempts,
                    }
                    .into();
                }

                warn!(status = %res.status, attempts, "Server error");
                return Ok(Outcome::Retry);
            }

            let (code, message) = ApiErrorBody::parse(res.status, &res.body);
            return RestError::Http {
                route: route.to_string(),
                status: res.status,
                code,
                message,
            }
            .into();
        }
    }

    async fn execute(
        &self,
        prepared: &PreparedRequest,
    ) -> Result<std::result::Result<RawResponse, TransportError>> {
        let _guard = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| RestError::Closed)?;

        Ok(
            timeout(self.options.request_timeout, self.transport.execute(prepared))
                .await
                .unwrap_or(Err(TransportError::Timeout)),
        )
    }

    fn prepare(&self, request: &Request) -> Result<PreparedRequest> {
        let mut headers = HeaderMap::new();

        let mut authorization = HeaderValue::from_str(&format!("Bot {}", self.options.token))?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.options.user_agent)?,
        );

        if request.body.is_some() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        if let Some(reason) = &request.reason {
            // form encoding escapes a literal '+', so any left are spaces
            let encoded = form_urlencoded::byte_serialize(reason.as_bytes())
                .collect::<String>()
                .replace('+', "%20");
            headers.insert(AUDIT_LOG_REASON, HeaderValue::from_str(&encoded)?);
        }

        Ok(PreparedRequest {
            method: request.route().method().clone(),
            url: format!(
                "{}{}",
                self.options.api_url.trim_end_matches('/'),
                request.route().path()
            ),
            headers,
            body: request.body.clone(),
        })
    }
}

fn retry_after(headers: Option<&RateLimitHeaders>, res: &RawResponse) -> (Duration, bool) {
    let body = serde_json::from_slice::<RateLimitedBody>(&res.body).ok();

    let retry_after = headers
        .and_then(|h| h.retry_after)
        .or_else(|| body.as_ref().map(RateLimitedBody::retry_after))
        .or_else(|| headers.and_then(RateLimitHeaders::reset_in))
        .unwrap_or(FALLBACK_RETRY_AFTER);

    let global = headers.map_or(false, |h| h.global) || body.map_or(false, |b| b.global);

    (retry_after, global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    type Scripted = std::result::Result<RawResponse, TransportError>;

    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<(Instant, PreparedRequest)>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<(Instant, PreparedRequest)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: &PreparedRequest) -> Scripted {
            self.calls.lock().push((Instant::now(), request.clone()));

            if let Some(delay) = self.delay {
                sleep(delay).await;
            }

            let next = self.responses.lock().pop_front();
            next.unwrap_or_else(|| Ok(RawResponse::new(StatusCode::OK)))
        }
    }

    fn response(status: u16, headers: &[(&'static str, &'static str)], body: &str) -> Scripted {
        let mut res = RawResponse::new(StatusCode::from_u16(status).unwrap());
        for (k, v) in headers {
            res.headers.insert(*k, HeaderValue::from_static(v));
        }
        res.body = body.as_bytes().to_vec();
        Ok(res)
    }

    fn dispatcher(transport: Arc<ScriptedTransport>) -> RequestDispatcher {
        RequestDispatcher::with_transport(
            DispatcherOptions {
                api_url: "http://discord.test/api/v10".to_owned(),
                token: "token".to_owned(),
                max_attempts: 3,
                ..Default::default()
            },
            transport,
        )
    }

    fn prime(dispatcher: &RequestDispatcher, path: &str, limit: u32, remaining: u32, reset: Duration) {
        let route = crate::Route::new(Method::GET, path);
        let _ = dispatcher.limiter().try_acquire(&route);
        dispatcher.limiter().update(
            &route,
            Some(&RateLimitHeaders {
                limit: Some(limit),
                remaining: Some(remaining),
                reset_after: Some(reset),
                ..Default::default()
            }),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_beyond_remaining_wait_for_reset() {
        let transport = ScriptedTransport::new(Vec::new());
        let dispatcher = Arc::new(dispatcher(Arc::clone(&transport)));
        prime(&dispatcher, "/channels/1/messages", 2, 2, Duration::from_secs(1));

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.send(Method::GET, "/channels/1/messages", None).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let calls = transport.calls();
        assert_eq!(calls.len(), 5);

        let immediate = calls
            .iter()
            .filter(|(at, _)| *at < start + Duration::from_secs(1))
            .count();
        assert_eq!(immediate, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_is_retried_once_after_retry_after() {
        let transport = ScriptedTransport::new(vec![
            response(
                429,
                &[("retry-after", "2"), ("x-ratelimit-scope", "user")],
                r#"{"message":"You are being rate limited.","retry_after":2.0,"global":false}"#,
            ),
            response(
                200,
                &[
                    ("x-ratelimit-limit", "5"),
                    ("x-ratelimit-remaining", "4"),
                    ("x-ratelimit-reset-after", "1"),
                ],
                r#"{"id":"1"}"#,
            ),
        ]);
        let dispatcher = dispatcher(Arc::clone(&transport));
        prime(&dispatcher, "/guilds/1", 5, 5, Duration::from_secs(1));

        let res = dispatcher.send(Method::GET, "/guilds/1", None).await.unwrap();
        let body: serde_json::Value = res.json().unwrap();
        assert_eq!(body["id"], "1");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].0 - calls[0].0 >= Duration::from_secs(2));
        assert_eq!(calls[0].1.url, calls[1].1.url);
        assert_eq!(calls[0].1.headers, calls[1].1.headers);
        assert_eq!(calls[0].1.body, calls[1].1.body);

        // the retry reused the original permit
        let route = crate::Route::new(Method::GET, "/guilds/1");
        assert_eq!(dispatcher.limiter().bucket(&route).unwrap().remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![response(
            404,
            &[],
            r#"{"code":10003,"message":"Unknown Channel"}"#,
        )]);
        let dispatcher = dispatcher(Arc::clone(&transport));

        let err = dispatcher
            .send(Method::GET, "/channels/1", None)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        match err {
            RestError::Http { code, message, .. } => {
                assert_eq!(code, Some(10003));
                assert_eq!(message, "Unknown Channel");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_attempts() {
        let transport = ScriptedTransport::new(vec![
            response(502, &[], ""),
            response(503, &[], ""),
            response(500, &[], ""),
        ]);
        let dispatcher = dispatcher(Arc::clone(&transport));

        let err = dispatcher
            .send(Method::GET, "/users/@me", None)
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::Server { attempts: 3, .. }));
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            response(200, &[], "{}"),
        ]);
        let dispatcher = dispatcher(Arc::clone(&transport));

        dispatcher
            .send(Method::GET, "/users/@me", None)
            .await
            .unwrap();
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let dispatcher = RequestDispatcher::with_transport(
            DispatcherOptions {
                max_attempts: 2,
                request_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            transport.clone(),
        );

        let err = dispatcher
            .send(Method::GET, "/users/@me", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RestError::Transport {
                attempts: 2,
                source: TransportError::Timeout,
                ..
            }
        ));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_while_waiting_for_bucket() {
        let transport = ScriptedTransport::new(Vec::new());
        let dispatcher = RequestDispatcher::with_transport(
            DispatcherOptions {
                deadline: Duration::from_secs(1),
                ..Default::default()
            },
            transport.clone(),
        );
        prime(&dispatcher, "/guilds/1", 1, 0, Duration::from_secs(5));

        let err = dispatcher
            .send(Method::GET, "/guilds/1", None)
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::DeadlineExceeded { .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_dispatcher_rejects_requests() {
        let transport = ScriptedTransport::new(Vec::new());
        let dispatcher = dispatcher(Arc::clone(&transport));
        dispatcher.close();

        let err = dispatcher
            .send(Method::GET, "/users/@me", None)
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::Closed));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_headers() {
        let transport = ScriptedTransport::new(Vec::new());
        let dispatcher = dispatcher(Arc::clone(&transport));

        let request = Request::new(Method::DELETE, "/channels/1/messages/2")
            .json(&serde_json::json!({}))
            .unwrap()
            .reason("spam cleanup");
        dispatcher.request(request).await.unwrap();

        let calls = transport.calls();
        let sent = &calls[0].1;
        assert_eq!(sent.url, "http://discord.test/api/v10/channels/1/messages/2");
        assert_eq!(sent.headers[header::AUTHORIZATION], "Bot token");
        assert_eq!(sent.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(sent.headers[AUDIT_LOG_REASON], "spam%20cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_discovery_request_does_not_block_route() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_secs(10)),
            ..Default::default()
        });
        let dispatcher = dispatcher(Arc::clone(&transport));

        let first = timeout(
            Duration::from_secs(1),
            dispatcher.send(Method::GET, "/users/@me", None),
        )
        .await;
        assert!(first.is_err());

        let start = Instant::now();
        dispatcher
            .send(Method::GET, "/users/@me", None)
            .await
            .unwrap();

        assert_eq!(transport.calls().len(), 2);
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lets_admitted_requests_finish() {
        let transport = ScriptedTransport::new(vec![
            response(
                429,
                &[("retry-after", "2")],
                r#"{"message":"You are being rate limited.","retry_after":2.0,"global":false}"#,
            ),
            response(200, &[], r#"{"id":"1"}"#),
        ]);
        let dispatcher = Arc::new(dispatcher(Arc::clone(&transport)));

        let in_flight = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.send(Method::GET, "/guilds/1", None).await })
        };

        sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.calls().len(), 1);
        dispatcher.close();

        let rejected = dispatcher
            .send(Method::GET, "/guilds/1", None)
            .await
            .unwrap_err();
        assert!(matches!(rejected, RestError::Closed));

        let res = in_flight.await.unwrap().unwrap();
        let body: serde_json::Value = res.json().unwrap();
        assert_eq!(body["id"], "1");
        assert_eq!(transport.calls().len(), 2);
    }
}
