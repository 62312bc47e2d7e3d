//! The boundary with asynchronous producers such as a network client.
//!
//! Nothing here performs I/O. A [`Transport`] does the actual work and settles
//! the [`Deferred`] it is given; [`SessionClient`] wires a transport to the
//! promise machinery so callers see a plain `Promise<NetworkResponse>`.
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cancel::Cancellable;
use crate::deferred::Deferred;
use crate::executor::Executor;
use crate::promise::Promise;

/// Anything that turns an input into an eventual output.
pub trait Producer<I> {
    type Output;

    fn produce(&self, input: I) -> Promise<Self::Output>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl NetworkRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        NetworkRequest {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(self, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..self
        }
    }
}

/// Response metadata as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// The metadata and raw body of a response; neither is interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    response: ResponseHead,
    data: Vec<u8>,
}

impl NetworkResponse {
    pub fn new(response: ResponseHead, data: Vec<u8>) -> Self {
        NetworkResponse { response, data }
    }

    pub fn response(&self) -> &ResponseHead {
        &self.response
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_parts(self) -> (ResponseHead, Vec<u8>) {
        (self.response, self.data)
    }
}

pub trait NetworkClient: Send + Sync {
    fn send_request(&self, request: NetworkRequest) -> Promise<NetworkResponse>;
}

impl<C: NetworkClient + ?Sized> Producer<NetworkRequest> for C {
    type Output = NetworkResponse;

    fn produce(&self, request: NetworkRequest) -> Promise<NetworkResponse> {
        self.send_request(request)
    }
}

/// The black box that carries requests.
///
/// `start` begins `request` and returns without waiting. The transport must
/// eventually resolve or reject `deferred`, or drop it, which rejects the
/// promise with [`Error::ProducerDropped`](crate::Error::ProducerDropped).
/// The returned task is cancelled if the caller cancels the response promise;
/// a transport that honours it should stop the request and leave `deferred`
/// alone.
pub trait Transport: Send + Sync {
    fn start(
        &self,
        request: NetworkRequest,
        deferred: Deferred<NetworkResponse>,
    ) -> Box<dyn Cancellable>;
}

impl<S: Transport + ?Sized> Transport for Arc<S> {
    fn start(
        &self,
        request: NetworkRequest,
        deferred: Deferred<NetworkResponse>,
    ) -> Box<dyn Cancellable> {
        (**self).start(request, deferred)
    }
}

/// A [`NetworkClient`] over a [`Transport`].
pub struct SessionClient<S> {
    session: S,
    executor: Option<Arc<dyn Executor>>,
}

impl<S: Transport> SessionClient<S> {
    pub fn new(session: S) -> Self {
        SessionClient {
            session,
            executor: None,
        }
    }

    /// Delivers every response on `executor` instead of the transport's
    /// completion thread.
    pub fn with_executor(self, executor: impl Executor + 'static) -> Self {
        Self {
            executor: Some(Arc::new(executor)),
            ..self
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

impl<S: Transport> NetworkClient for SessionClient<S> {
    fn send_request(&self, request: NetworkRequest) -> Promise<NetworkResponse> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let deferred = Deferred::named(format!("{} {}", request.method, request.url));
        let promise = deferred.promise();
        let task = self.session.start(request, deferred);
        promise.add_cancellable(task);
        match &self.executor {
            Some(executor) => promise.via(executor.clone()),
            None => promise,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for SessionClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("session", &self.session)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{NetworkRequest, NetworkResponse, ResponseHead};

    #[test]
    fn test_request_builder() {
        let request = NetworkRequest::new("POST", "http://example.test/items")
            .header("content-type", "application/json")
            .body("{}");
        assert_eq!(request.method, "POST");
        assert_eq!(
            request.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        assert_eq!(request.body, b"{}".to_vec());
    }

    #[test]
    fn test_response_parts() {
        let head = ResponseHead {
            url: "http://example.test".into(),
            status: 204,
            headers: Vec::new(),
        };
        let response = NetworkResponse::new(head.clone(), Vec::new());
        assert_eq!(response.response().status, 204);
        assert!(response.data().is_empty());
        assert_eq!(response.into_parts(), (head, Vec::new()));
    }
}
