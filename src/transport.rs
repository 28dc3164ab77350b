//! A thin asynchronous HTTP capability.
//!
//! The pipeline never talks to `reqwest` directly: everything goes through the [`Transport`]
//! trait so the transmission side can be replaced in tests. The default implementation,
//! [`HttpTransport`], holds a `reqwest::Client` (which keeps a connection pool internally, so
//! we're reusing the client between requests).
use std::future::Future;
use std::pin::Pin;

use crate::{Error, Result};

/// A completed HTTP exchange: status code plus raw body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Future returned by [`Transport`] methods.
///
/// Completion fires exactly once per issued request; there is no cancellation support.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send>>;

/// Capability for issuing asynchronous GET/POST requests with custom headers.
///
/// Implementations must not block the caller: work happens inside the returned future. Timeouts
/// are whatever the underlying client defaults to; this layer imposes none of its own.
pub trait Transport: Send + Sync {
    /// Issue a GET request with the given headers.
    fn get(&self, url: &str, headers: Vec<(String, String)>) -> ResponseFuture;

    /// Issue a POST request with a JSON body (`Content-Type: application/json`).
    fn post_json(&self, url: &str, body: Vec<u8>) -> ResponseFuture;
}

/// [`Transport`] implementation backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> HttpTransport {
        HttpTransport {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> HttpTransport {
        HttpTransport::new()
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: Vec<(String, String)>) -> ResponseFuture {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        Box::pin(async move {
            let response = request.send().await.map_err(Error::from)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(Error::from)?.to_vec();
            Ok(HttpResponse { status, body })
        })
    }

    fn post_json(&self, url: &str, body: Vec<u8>) -> ResponseFuture {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        Box::pin(async move {
            let response = request.send().await.map_err(Error::from)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(Error::from)?.to_vec();
            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted transport double used by tests across the crate.
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// One request observed by [`MockTransport`].
    #[derive(Debug, Clone)]
    pub(crate) struct RecordedRequest {
        pub method: &'static str,
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl RecordedRequest {
        pub fn body_json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).expect("recorded body should be JSON")
        }
    }

    /// Records every request and replays scripted responses in order. When the script runs out,
    /// answers `200 {}`.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        requests: Mutex<Vec<RecordedRequest>>,
        script: Mutex<VecDeque<Result<HttpResponse>>>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport::default()
        }

        pub fn enqueue(&self, response: Result<HttpResponse>) {
            self.script.lock().unwrap().push_back(response);
        }

        pub fn enqueue_ok(&self, status: u16, body: &[u8]) {
            self.enqueue(Ok(HttpResponse {
                status,
                body: body.to_vec(),
            }));
        }

        /// Scripts a connection-level failure (stands in for a refused/timed-out request).
        pub fn enqueue_error(&self) {
            self.enqueue(Err(Error::Io(std::sync::Arc::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))));
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn record_and_answer(&self, request: RecordedRequest) -> ResponseFuture {
            self.requests.lock().unwrap().push(request);
            let response = self.script.lock().unwrap().pop_front().unwrap_or(Ok(
                HttpResponse {
                    status: 200,
                    body: b"{}".to_vec(),
                },
            ));
            Box::pin(async move { response })
        }
    }

    impl Transport for MockTransport {
        fn get(&self, url: &str, headers: Vec<(String, String)>) -> ResponseFuture {
            self.record_and_answer(RecordedRequest {
                method: "GET",
                url: url.to_owned(),
                headers,
                body: Vec::new(),
            })
        }

        fn post_json(&self, url: &str, body: Vec<u8>) -> ResponseFuture {
            self.record_and_answer(RecordedRequest {
                method: "POST",
                url: url.to_owned(),
                headers: vec![(
                    "Content-Type".to_owned(),
                    "application/json".to_owned(),
                )],
                body,
            })
        }
    }
}
