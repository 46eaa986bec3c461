//! Lightweight HTTP fetcher.
//!
//! Redirects are followed manually so every hop passes the SSRF guard and
//! the authority-scope check; a chain that leaves the start authority is a
//! `failed_request` and the redirected body is never saved. Bodies are
//! streamed against the size cap, decoded with charset sniffing, hashed and
//! written via atomic rename.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use tracing::{debug, warn};
use url::Url;

use crate::canon;

use super::{
    content_hash, decode::decode_body, ensure_within_root, guard, heuristics, links,
    FetchOutcome, FetchRequest, FetchStatus,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    allow_loopback: bool,
    js_shell_max_body_len: usize,
    js_shell_max_text_nodes: usize,
}

impl HttpFetcher {
    pub fn new(
        user_agent: impl Into<String>,
        allow_loopback: bool,
        js_shell_max_body_len: usize,
        js_shell_max_text_nodes: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
            allow_loopback,
            js_shell_max_body_len,
            js_shell_max_text_nodes,
        })
    }

    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    /// Fetch one URL. Never returns `Err`; every failure mode folds into the
    /// outcome's status so the engine can emit exactly one index row.
    pub async fn fetch(&self, req: &FetchRequest) -> FetchOutcome {
        match tokio::time::timeout(req.timeout, self.fetch_inner(req)).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::failure(
                FetchStatus::FailedRequest,
                None,
                format!("request timed out after {:?}", req.timeout),
            ),
        }
    }

    async fn fetch_inner(&self, req: &FetchRequest) -> FetchOutcome {
        let mut current = req.url.clone();

        for _hop in 0..=req.max_redirects {
            // Scope before guard: a chain that leaves the start authority is
            // a failed request, not an SSRF finding about a foreign host.
            if canon::authority(&current) != req.start_authority {
                return FetchOutcome::failure(
                    FetchStatus::FailedRequest,
                    None,
                    format!("redirect left authority: {current}"),
                );
            }
            if let Err(err) = guard::check_url(&current, self.allow_loopback).await {
                return FetchOutcome::failure(FetchStatus::FailedSsrf, None, err.to_string());
            }

            let response = match self
                .client
                .get(current.clone())
                .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
                .send()
                .await
            {
                Ok(r) => r,
                Err(err) => {
                    return FetchOutcome::failure(
                        FetchStatus::FailedRequest,
                        None,
                        format!("request failed: {err}"),
                    );
                }
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if location.is_empty() {
                    return FetchOutcome::failure(
                        FetchStatus::FailedRequest,
                        Some(status.as_u16()),
                        "redirect without Location header",
                    );
                }
                match canon::canonicalize_relative(&current, location) {
                    Ok(next) => {
                        debug!(from = %current, to = %next, "following redirect");
                        current = next;
                        continue;
                    }
                    Err(err) => {
                        return FetchOutcome::failure(
                            FetchStatus::FailedRequest,
                            Some(status.as_u16()),
                            format!("unresolvable redirect: {err}"),
                        );
                    }
                }
            }

            if !status.is_success() {
                return FetchOutcome::failure(
                    FetchStatus::FailedRequest,
                    Some(status.as_u16()),
                    format!("HTTP {}", status.as_u16()),
                );
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = match read_capped(response, req.max_body_size).await {
                Ok(bytes) => bytes,
                Err(err) => return err,
            };

            return self
                .finalize(req, &current, status.as_u16(), content_type.as_deref(), body)
                .await;
        }

        FetchOutcome::failure(
            FetchStatus::FailedRequest,
            None,
            format!("redirect limit ({}) exceeded", req.max_redirects),
        )
    }

    async fn finalize(
        &self,
        req: &FetchRequest,
        final_url: &Url,
        http_status: u16,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> FetchOutcome {
        let is_html = matches!(canon::extension_for(content_type), "html");

        let mut body_text = None;
        let mut detected_links = Vec::new();
        if is_html {
            let decoded = decode_body(&bytes, content_type);
            if heuristics::is_paywalled(&decoded) {
                return FetchOutcome::failure(
                    FetchStatus::FailedPaywall,
                    Some(http_status),
                    "paywall or login wall detected",
                );
            }
            // Relative links resolve against the *final* URL of the chain.
            detected_links = links::extract_links(&decoded, final_url);
            body_text = Some(decoded);
        }

        let target = req.mapper.map(&req.url, content_type);
        if let Err(err) = ensure_within_root(&target, req.mapper.content_root()) {
            return FetchOutcome::failure(FetchStatus::FailedOther, Some(http_status), err.to_string());
        }

        let hash = content_hash(&bytes);
        if let Err(err) = super::save_atomic(&target, bytes).await {
            warn!(url = %req.url, %err, "failed to save body");
            return FetchOutcome::failure(FetchStatus::FailedOther, Some(http_status), err.to_string());
        }

        FetchOutcome {
            status: FetchStatus::Success,
            http_status: Some(http_status),
            content_hash: Some(hash),
            local_path: Some(target),
            body: body_text,
            detected_links,
            error_message: None,
        }
    }

    /// Whether a successful outcome looks like a client-side rendering shell.
    pub fn looks_like_js_shell(&self, outcome: &FetchOutcome) -> bool {
        outcome
            .body
            .as_deref()
            .map(|body| {
                heuristics::is_js_shell(
                    body,
                    self.js_shell_max_body_len,
                    self.js_shell_max_text_nodes,
                )
            })
            .unwrap_or(false)
    }
}

/// Stream a response body, failing as `failed_toobig` the moment the cap is
/// crossed rather than after buffering the whole payload.
async fn read_capped(response: reqwest::Response, cap: usize) -> Result<Vec<u8>, FetchOutcome> {
    let http_status = response.status().as_u16();

    if let Some(len) = response.content_length() {
        if len > cap as u64 {
            return Err(FetchOutcome::failure(
                FetchStatus::FailedToobig,
                Some(http_status),
                format!("declared body size {len} exceeds cap {cap}"),
            ));
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(err) => {
                return Err(FetchOutcome::failure(
                    FetchStatus::FailedRequest,
                    Some(http_status),
                    format!("body stream error: {err}"),
                ));
            }
        };
        if body.len() + chunk.len() > cap {
            return Err(FetchOutcome::failure(
                FetchStatus::FailedToobig,
                Some(http_status),
                format!("body exceeds cap of {cap} bytes"),
            ));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
