//! Request metrics middleware.
//!
//! [`MetricsLayer`] wraps any HTTP service and, for every request, records one
//! increment of the request counter, one latency observation and, when the
//! final status is 400 or above, one increment of the error counter. The
//! wrapped service's response is handed back untouched.
//!
//! The status is taken from the response the inner service produced. Two
//! cases never yield a response and are recorded with a synthetic status:
//!
//! - the inner service returned an error: `500`;
//! - the response future was dropped before completing, usually because the
//!   client disconnected: `499`.

use crate::metrics::HttpMetrics;
use axum::http::{Request, Response, StatusCode};
use core::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use pin_project_lite::pin_project;
use std::time::Instant;
use tower::{Layer, Service};

/// Non-standard status recorded for requests abandoned mid-flight.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// [`Layer`] that instruments requests with [`HttpMetrics`].
#[derive(Clone)]
pub struct MetricsLayer {
    metrics: HttpMetrics,
}

impl MetricsLayer {
    pub const fn new(metrics: HttpMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// Service produced by [`MetricsLayer`].
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: HttpMetrics,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let observation = Observation {
            metrics: self.metrics.clone(),
            method: req.method().as_str().to_owned(),
            route: req.uri().path().to_owned(),
            start: Instant::now(),
        };

        ResponseFuture {
            inner: self.inner.call(req),
            observation: Some(observation),
        }
    }
}

pin_project! {
    /// Response future for [`MetricsService`].
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        observation: Option<Observation>,
    }

    impl<F> PinnedDrop for ResponseFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            if let Some(observation) = this.project().observation.take() {
                observation.finish(StatusCapture::with_status(CLIENT_CLOSED_REQUEST));
            }
        }
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        let mut status = StatusCapture::default();
        match &result {
            Ok(response) => status.write_status(response.status()),
            Err(_) => status.write_status(StatusCode::INTERNAL_SERVER_ERROR),
        }

        if let Some(observation) = this.observation.take() {
            observation.finish(status);
        }
        Poll::Ready(result)
    }
}

/// In-flight request state captured when the request arrives.
struct Observation {
    metrics: HttpMetrics,
    method: String,
    route: String,
    start: Instant,
}

impl Observation {
    fn finish(self, status: StatusCapture) {
        self.metrics.record(
            &self.method,
            &self.route,
            status.status(),
            self.start.elapsed(),
        );
    }
}

/// Status written for a request. Reads `200` until a status is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StatusCapture(u16);

impl Default for StatusCapture {
    fn default() -> Self {
        Self(StatusCode::OK.as_u16())
    }
}

impl StatusCapture {
    const fn with_status(status: u16) -> Self {
        Self(status)
    }

    fn write_status(&mut self, status: StatusCode) {
        self.0 = status.as_u16();
    }

    const fn status(self) -> u16 {
        self.0
    }
}
