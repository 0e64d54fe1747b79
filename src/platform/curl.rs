//! Blocking HTTPS transport built on the `curl` binary.
//!
//! The compute API and the metadata server are plain JSON-over-HTTP(S), and
//! every call sits on the single control thread, so a child process per
//! request is all the transport needs. Headers are fed on stdin (`-H @-`) so
//! bearer tokens never show up in the process table.

#![allow(missing_docs)]

use std::io::Write;
use std::process::{Command, Stdio};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Transport-level failure, mapped by callers onto their own error variants.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("could not run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport failure: {details}")]
    Transport { details: String },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable response: {details}")]
    Decode { details: String },
}

impl HttpError {
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Raw response: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Curl invocation settings shared by every request from one client.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    binary: String,
    connect_timeout_secs: u64,
    max_time_secs: u64,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            binary: "curl".to_string(),
            connect_timeout_secs: 10,
            max_time_secs: 60,
        }
    }
}

impl CurlTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Issue one request and return whatever status the server produced.
    pub fn send(
        &self,
        method: &str,
        url: &str,
        headers: &[String],
        body: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--silent", "--show-error", "--request", method])
            .args(["--write-out", "\n%{http_code}"])
            .arg("--connect-timeout")
            .arg(self.connect_timeout_secs.to_string())
            .arg("--max-time")
            .arg(self.max_time_secs.to_string());
        if !headers.is_empty() {
            cmd.args(["--header", "@-"]);
        }
        if let Some(body) = body {
            cmd.args(["--data-binary", body]);
        }
        cmd.arg(url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| HttpError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            for header in headers {
                writeln!(stdin, "{header}").map_err(|source| HttpError::Spawn {
                    binary: self.binary.clone(),
                    source,
                })?;
            }
        }
        let output = child
            .wait_with_output()
            .map_err(|source| HttpError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HttpError::Transport {
                details: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        split_status_trailer(&String::from_utf8_lossy(&output.stdout))
    }

    /// GET `url` and decode a 2xx JSON body.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[String],
    ) -> Result<T, HttpError> {
        let response = self.send("GET", url, headers, None)?;
        decode_json(response)
    }

    /// POST a JSON body to `url` and decode a 2xx JSON reply.
    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[String],
        body: &B,
    ) -> Result<T, HttpError> {
        let payload = serde_json::to_string(body).map_err(|error| HttpError::Decode {
            details: format!("request body: {error}"),
        })?;
        let mut all_headers = headers.to_vec();
        all_headers.push("Content-Type: application/json".to_string());
        let response = self.send("POST", url, &all_headers, Some(&payload))?;
        decode_json(response)
    }
}

/// Bearer authorization header line.
#[must_use]
pub fn bearer_header(token: &str) -> String {
    format!("Authorization: Bearer {token}")
}

fn decode_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, HttpError> {
    if !response.is_success() {
        return Err(HttpError::Status {
            status: response.status,
            body: truncate(&response.body, 512),
        });
    }
    serde_json::from_str(&response.body).map_err(|error| HttpError::Decode {
        details: error.to_string(),
    })
}

/// `--write-out "\n%{http_code}"` appends the status on its own final line.
fn split_status_trailer(stdout: &str) -> Result<HttpResponse, HttpError> {
    let (body, code) = stdout.rsplit_once('\n').unwrap_or(("", stdout));
    let status = code
        .trim()
        .parse::<u16>()
        .map_err(|_| HttpError::Transport {
            details: format!("missing status trailer in curl output: {code:?}"),
        })?;
    if status == 0 {
        return Err(HttpError::Transport {
            details: "no response received".to_string(),
        });
    }
    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

fn truncate(raw: &str, max_chars: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_trailer_is_split_from_body() {
        let response = split_status_trailer("{\"sizeGb\":\"10\"}\n200").expect("trailer parses");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{\"sizeGb\":\"10\"}");
        assert!(response.is_success());
    }

    #[test]
    fn body_with_newlines_keeps_everything_but_trailer() {
        let response = split_status_trailer("line one\nline two\n404").unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, "line one\nline two");
    }

    #[test]
    fn empty_body_is_allowed() {
        let response = split_status_trailer("\n204").unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
    }

    #[test]
    fn zero_status_means_no_response() {
        let err = split_status_trailer("\n000").expect_err("000 is a transport failure");
        assert!(matches!(err, HttpError::Transport { .. }));
    }

    #[test]
    fn non_success_status_is_surfaced_with_body() {
        let err = decode_json::<serde_json::Value>(HttpResponse {
            status: 403,
            body: "{\"error\":\"forbidden\"}".to_string(),
        })
        .expect_err("403 must fail");
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let long = "x".repeat(2_000);
        let out = truncate(&long, 16);
        assert_eq!(out.chars().count(), 17);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let transport = CurlTransport::new().with_binary("/nonexistent/vrelief-curl");
        let err = transport
            .send("GET", "https://example.invalid/", &[], None)
            .expect_err("binary does not exist");
        assert!(matches!(err, HttpError::Spawn { .. }), "{err}");
    }
}
