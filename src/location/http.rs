//! HTTP transport used by the provider chains.
//!
//! Providers only describe requests and parse JSON; the actual fetch goes
//! through [`HttpClient`] so chains can be driven by scripted clients in tests.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;

/// A single GET request issued by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Accept".into(), "application/json".into())],
            timeout,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Host part of the URL, used in log lines.
    pub fn host(&self) -> &str {
        let rest = self.url.split_once("://").map(|(_, r)| r).unwrap_or(&self.url);
        rest.split(['/', '?']).next().unwrap_or(rest)
    }
}

/// Transport-level failures. Chains treat every variant as a soft failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    Status(u16),
    Transport(String),
    Decode(String),
    Timeout,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP status {}", code),
            Self::Transport(msg) => write!(f, "Network error: {}", msg),
            Self::Decode(msg) => write!(f, "Invalid API response: {}", msg),
            Self::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for FetchError {}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch `request.url` and decode the body as JSON. Implementations must
    /// give up once `request.timeout` has elapsed.
    async fn get_json(&self, request: &HttpRequest) -> Result<serde_json::Value, FetchError>;
}

/// Production client backed by a shared `ureq` agent.
///
/// `ureq` is blocking, so each call runs on tokio's blocking pool. The
/// per-request timeout is applied to the agent call itself, which closes the
/// socket at the deadline even if the awaiting future was already dropped.
#[derive(Clone)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new(user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new().user_agent(user_agent).build();
        Self { agent }
    }
}

#[async_trait]
impl HttpClient for UreqClient {
    async fn get_json(&self, request: &HttpRequest) -> Result<serde_json::Value, FetchError> {
        let agent = self.agent.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || fetch_blocking(&agent, &request))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
    }
}

fn fetch_blocking(agent: &ureq::Agent, request: &HttpRequest) -> Result<serde_json::Value, FetchError> {
    let mut call = agent.get(&request.url).timeout(request.timeout);
    for (name, value) in &request.headers {
        call = call.set(name, value);
    }

    let response = call.call().map_err(|e| match e {
        ureq::Error::Status(code, _) => FetchError::Status(code),
        ureq::Error::Transport(t) if caused_by_timeout(&t) => FetchError::Timeout,
        ureq::Error::Transport(t) => FetchError::Transport(t.to_string()),
    })?;

    response
        .into_json()
        .map_err(|e| FetchError::Decode(e.to_string()))
}

/// True when some error in the `source()` chain is an I/O timeout.
fn caused_by_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Percent-encode a query value.
pub(crate) fn urlencod(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            _ if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '~' => c.to_string(),
            _ => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect()
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted client shared by the chain tests.

    use super::*;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub enum Reply {
        Json(serde_json::Value),
        Fail(FetchError),
        /// Sleep, then answer. Used to trip the chain's own timeout.
        Delay(Duration, serde_json::Value),
    }

    /// Answers by first matching URL fragment and records every URL requested.
    #[derive(Default)]
    pub struct ScriptedClient {
        routes: Vec<(String, Reply)>,
        calls: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(mut self, fragment: &str, reply: Reply) -> Self {
            self.routes.push((fragment.to_string(), reply));
            self
        }

        pub fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, fragment: &str) -> usize {
            self.calls().iter().filter(|r| r.url.contains(fragment)).count()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn get_json(&self, request: &HttpRequest) -> Result<serde_json::Value, FetchError> {
            self.calls.lock().unwrap().push(request.clone());
            let reply = self
                .routes
                .iter()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, r)| r.clone());
            match reply {
                Some(Reply::Json(v)) => Ok(v),
                Some(Reply::Fail(e)) => Err(e),
                Some(Reply::Delay(d, v)) => {
                    tokio::time::sleep(d).await;
                    Ok(v)
                }
                None => Err(FetchError::Status(404)),
            }
        }
    }
}
