//! Ordered middleware stages run around every transport send.
//!
//! Each stage receives its input by value and returns an explicit outcome:
//! continue with a (possibly modified) value, or short-circuit. Request
//! stages run before the send; response and error stages run after it,
//! in the same order, and may turn a response into a failure or recover a
//! failure into a response.

use std::sync::Arc;

use async_trait::async_trait;

use crate::request::RequestDescriptor;
use crate::transport::{RawResponse, TransportFailure};

/// Outcome of a request stage.
#[derive(Debug)]
pub enum RequestFlow {
    /// Pass the request to the next stage.
    Continue(RequestDescriptor),
    /// Skip the transport and answer with this response.
    Resolve(RawResponse),
    /// Skip the transport and fail with this failure.
    Reject(TransportFailure),
}

/// Outcome of a response stage.
#[derive(Debug)]
pub enum ResponseFlow {
    Continue(RawResponse),
    Reject(TransportFailure),
}

/// Outcome of an error stage.
#[derive(Debug)]
pub enum ErrorFlow {
    Continue(TransportFailure),
    Resolve(RawResponse),
}

/// A pipeline stage. All hooks default to pass-through.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_request(&self, request: RequestDescriptor) -> RequestFlow {
        RequestFlow::Continue(request)
    }

    async fn on_response(&self, _request: &RequestDescriptor, response: RawResponse) -> ResponseFlow {
        ResponseFlow::Continue(response)
    }

    async fn on_error(&self, _request: &RequestDescriptor, failure: TransportFailure) -> ErrorFlow {
        ErrorFlow::Continue(failure)
    }
}

/// Ordered list of stages.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Arc<dyn Interceptor>) {
        self.stages.push(stage);
    }

    pub(crate) fn len(&self) -> usize {
        self.stages.len()
    }

    /// Runs request stages in order until one short-circuits.
    pub async fn run_request(&self, mut request: RequestDescriptor) -> RequestFlow {
        for stage in &self.stages {
            match stage.on_request(request).await {
                RequestFlow::Continue(next) => request = next,
                other => return other,
            }
        }
        RequestFlow::Continue(request)
    }

    /// Runs response or error stages over the result of one send.
    pub async fn run_outcome(
        &self,
        request: &RequestDescriptor,
        mut outcome: Result<RawResponse, TransportFailure>,
    ) -> Result<RawResponse, TransportFailure> {
        for stage in &self.stages {
            outcome = match outcome {
                Ok(response) => match stage.on_response(request, response).await {
                    ResponseFlow::Continue(response) => Ok(response),
                    ResponseFlow::Reject(failure) => Err(failure),
                },
                Err(failure) => match stage.on_error(request, failure).await {
                    ErrorFlow::Continue(failure) => Err(failure),
                    ErrorFlow::Resolve(response) => Ok(response),
                },
            };
        }
        outcome
    }
}
