//! One blocking GET per shot, followed by a fixed cooldown.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::io::Read as _;
use std::time::{Duration, Instant};

use crate::platform::process::{CommandSpec, StdinSource, StdoutSink, Supervisor};

/// Why a shot got no HTTP status. Recorded on the outcome, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShotError {
    /// Connection refused, timeout, malformed response.
    #[error("{0}")]
    Request(String),

    #[error("reading response body: {0}")]
    Body(String),

    #[error("curl: {0}")]
    Curl(String),
}

/// Issues a single request and reports the HTTP status code.
pub trait Transport {
    fn fire(&mut self, url: &str) -> Result<u16, ShotError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn fire(&mut self, url: &str) -> Result<u16, ShotError> {
        (**self).fire(url)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn fire(&mut self, url: &str) -> Result<u16, ShotError> {
        (**self).fire(url)
    }
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Transport for UreqTransport {
    fn fire(&mut self, url: &str) -> Result<u16, ShotError> {
        match self.agent.get(url).call() {
            Ok(resp) => {
                let status = resp.status();
                discard_body(resp)?;
                Ok(status)
            }
            // 4xx/5xx still count as answered requests.
            Err(ureq::Error::Status(status, resp)) => {
                discard_body(resp)?;
                Ok(status)
            }
            Err(ureq::Error::Transport(err)) => Err(ShotError::Request(err.to_string())),
        }
    }
}

fn discard_body(resp: ureq::Response) -> Result<(), ShotError> {
    std::io::copy(&mut resp.into_reader(), &mut std::io::sink())
        .map(|_| ())
        .map_err(|e| ShotError::Body(e.to_string()))
}

/// Spawns one `curl` per shot and reads the status code it prints.
pub struct CurlTransport {
    supervisor: Supervisor,
    program: String,
    timeout: Duration,
}

impl CurlTransport {
    pub fn new(supervisor: Supervisor, timeout: Duration) -> Self {
        Self {
            supervisor,
            program: "curl".to_string(),
            timeout,
        }
    }

    fn command(&self, url: &str) -> CommandSpec {
        CommandSpec::new("curl", self.program.clone()).args([
            "-s".to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "-w".to_string(),
            "%{http_code}".to_string(),
            "--max-time".to_string(),
            format!("{:.3}", self.timeout.as_secs_f64()),
            url.to_string(),
        ])
    }
}

impl Transport for CurlTransport {
    fn fire(&mut self, url: &str) -> Result<u16, ShotError> {
        let mut hit = self
            .supervisor
            .spawn(&self.command(url), StdinSource::Null, StdoutSink::Pipe)
            .map_err(|e| ShotError::Curl(e.to_string()))?;
        let mut code = String::new();
        if let Some(mut out) = hit.take_stdout() {
            out.read_to_string(&mut code)
                .map_err(|e| ShotError::Curl(format!("reading output: {e}")))?;
        }
        let status = hit.wait().map_err(|e| ShotError::Curl(e.to_string()))?;
        if !status.success() {
            return Err(ShotError::Curl(format!("exited with {status}")));
        }
        match code.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(ShotError::Curl(format!(
                "no status reported ({:?})",
                code.trim()
            ))),
            Ok(status) => Ok(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotOutcome {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ShotOutcome {
    /// Answered with a non-error status.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_some_and(|s| s < 400)
    }
}

pub struct Shooter<T> {
    transport: T,
    cooldown: Duration,
}

impl<T: Transport> Shooter<T> {
    pub fn new(transport: T, cooldown: Duration) -> Self {
        Self {
            transport,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Fires at `url`, then sleeps for the cooldown whatever the outcome.
    pub fn shoot(&mut self, url: &str) -> ShotOutcome {
        let started = Instant::now();
        let result = self.transport.fire(url);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(status) => {
                tracing::debug!("GET {url} -> {status} in {elapsed_ms}ms");
                ShotOutcome {
                    url: url.to_string(),
                    status: Some(status),
                    error: None,
                    elapsed_ms,
                }
            }
            Err(err) => {
                tracing::debug!("GET {url} failed after {elapsed_ms}ms: {err}");
                ShotOutcome {
                    url: url.to_string(),
                    status: None,
                    error: Some(err.to_string()),
                    elapsed_ms,
                }
            }
        };
        std::thread::sleep(self.cooldown);
        outcome
    }
}
