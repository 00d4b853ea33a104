//! Tower layer applying [`Instrumentation`] to a single route.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{extract::Request, response::Response};
use tower::{Layer, Service};

use super::{Instrumentation, Outcome};
use crate::telemetry::propagation;

/// Response extension marking a failure that has no client-facing status;
/// the request is recorded as [`Outcome::Failed`] whatever status the body
/// was rendered with.
#[derive(Debug, Clone, Copy)]
pub struct UnclassifiedFailure;

impl Outcome {
    pub fn from_response(response: &Response) -> Self {
        if response.extensions().get::<UnclassifiedFailure>().is_some() {
            return Outcome::Failed;
        }
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            Outcome::Rejected(status.as_u16())
        } else {
            Outcome::Completed(status.as_u16())
        }
    }
}

#[derive(Clone)]
pub struct InstrumentLayer {
    instrumentation: Instrumentation,
    endpoint: &'static str,
}

impl InstrumentLayer {
    pub fn new(instrumentation: Instrumentation, endpoint: &'static str) -> Self {
        Self {
            instrumentation,
            endpoint,
        }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            instrumentation: self.instrumentation.clone(),
            endpoint: self.endpoint,
        }
    }
}

/// Opens the pipeline before the inner service runs, exposes the
/// [`CorrelationContext`](crate::telemetry::CorrelationContext) as a request
/// extension and writes `traceparent` on the response.
#[derive(Clone)]
pub struct InstrumentService<S> {
    inner: S,
    instrumentation: Instrumentation,
    endpoint: &'static str,
}

impl<S> Service<Request> for InstrumentService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        // The clone may not be ready; keep the instance poll_ready was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let parent = propagation::extract_parent(request.headers());
        let in_flight =
            self.instrumentation
                .begin(self.endpoint, request.method().as_str(), parent);
        let correlation = in_flight.correlation();
        request.extensions_mut().insert(correlation);

        Box::pin(async move {
            let mut response = inner.call(request).await?;
            in_flight.complete(Outcome::from_response(&response));
            propagation::inject(&correlation, response.headers_mut());
            Ok(response)
        })
    }
}
