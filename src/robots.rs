//! robots.txt fetching, parsing and per-authority caching.
//!
//! One `RobotsPolicy` lives inside each job; nothing here is process-global.
//! Outcome table: a parsed 2xx response yields cached rules; 4xx other than
//! 429 means allow-all; 429, 5xx and network errors mean allow-all with a
//! back-off stamp so the file is refetched at most once per minute.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::canon;

/// Minimum gap between refetch attempts after a failed robots.txt fetch.
const FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound on a robots.txt body; anything larger is truncated.
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

#[derive(Debug)]
enum CacheState {
    /// Never fetched for this authority.
    Empty,
    /// Parsed rules, valid for the rest of the job.
    Rules(RobotsRules),
    /// Fetch failed or the server said allow-all; `retry_at` is `None` for
    /// the permanent (4xx) case.
    AllowAll { retry_at: Option<Instant> },
}

/// Per-job robots.txt policy with one lock per authority.
#[derive(Debug)]
pub struct RobotsPolicy {
    user_agent: String,
    client: reqwest::Client,
    entries: DashMap<String, std::sync::Arc<Mutex<CacheState>>>,
}

impl RobotsPolicy {
    pub fn new(user_agent: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            user_agent: user_agent.into(),
            client,
            entries: DashMap::new(),
        }
    }

    /// Decide whether `url` may be fetched under this job's user-agent.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let authority = canon::authority(url);
        let entry = {
            let guard = self
                .entries
                .entry(authority.clone())
                .or_insert_with(|| std::sync::Arc::new(Mutex::new(CacheState::Empty)));
            std::sync::Arc::clone(&guard)
        };

        let mut state = entry.lock().await;
        match &*state {
            CacheState::Rules(rules) => return rules.is_allowed(url.path(), &self.user_agent),
            CacheState::AllowAll { retry_at: None } => return true,
            CacheState::AllowAll {
                retry_at: Some(at),
            } if Instant::now() < *at => return true,
            _ => {}
        }

        *state = self.fetch_state(url, &authority).await;
        match &*state {
            CacheState::Rules(rules) => rules.is_allowed(url.path(), &self.user_agent),
            _ => true,
        }
    }

    async fn fetch_state(&self, url: &Url, authority: &str) -> CacheState {
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), authority);
        debug!(%robots_url, "fetching robots.txt");

        let response = self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                warn!(%robots_url, %err, "robots.txt fetch failed, allowing with back-off");
                return CacheState::AllowAll {
                    retry_at: Some(Instant::now() + FAILURE_BACKOFF),
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(mut body) => {
                    body.truncate(floor_char_boundary(&body, MAX_ROBOTS_BYTES));
                    CacheState::Rules(RobotsRules::parse(&body))
                }
                Err(err) => {
                    warn!(%robots_url, %err, "robots.txt body read failed");
                    CacheState::AllowAll {
                        retry_at: Some(Instant::now() + FAILURE_BACKOFF),
                    }
                }
            }
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            CacheState::AllowAll {
                retry_at: Some(Instant::now() + FAILURE_BACKOFF),
            }
        } else {
            // Other 4xx: no robots file, permanently allow-all for this job.
            CacheState::AllowAll { retry_at: None }
        }
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Parsed robots.txt rules: user-agent groups with allow/disallow patterns.
#[derive(Debug, Default, Clone)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

#[derive(Debug, Default, Clone)]
struct Group {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl RobotsRules {
    /// Permissive line-level parse: unknown directives ignored, inline
    /// comments stripped, a BOM tolerated.
    pub fn parse(content: &str) -> Self {
        let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);

        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if in_rules {
                        groups.push(std::mem::take(&mut current));
                        in_rules = false;
                    }
                    current.agents.push(value.to_ascii_lowercase());
                }
                "allow" => {
                    in_rules = true;
                    current.allow.push(value.to_string());
                }
                "disallow" => {
                    in_rules = true;
                    current.disallow.push(value.to_string());
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    /// Evaluate a path for a user-agent. The most specific matching group
    /// wins (`*` only as fallback); within a group the longest matching rule
    /// wins and Allow beats Disallow on ties.
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(group) = self.find_group(user_agent) else {
            return true;
        };

        let best_disallow = best_match(&group.disallow, path);
        let Some(disallow_len) = best_disallow else {
            return true;
        };
        match best_match(&group.allow, path) {
            Some(allow_len) => allow_len >= disallow_len,
            None => false,
        }
    }

    fn find_group(&self, user_agent: &str) -> Option<&Group> {
        let ua = user_agent.to_ascii_lowercase();

        let mut best: Option<(&Group, usize)> = None;
        for group in &self.groups {
            for agent in &group.agents {
                if agent == "*" {
                    continue;
                }
                if ua.contains(agent.as_str()) {
                    let better = best.map_or(true, |(_, len)| agent.len() > len);
                    if better {
                        best = Some((group, agent.len()));
                    }
                }
            }
        }
        if let Some((group, _)) = best {
            return Some(group);
        }

        self.groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a == "*"))
    }
}

/// Length of the longest rule matching `path`, if any. Empty rules match
/// nothing (an empty Disallow means allow-all).
fn best_match(rules: &[String], path: &str) -> Option<usize> {
    rules
        .iter()
        .filter(|rule| !rule.is_empty())
        .filter(|rule| rule_matches(path, rule))
        .map(|rule| rule.chars().filter(|&c| c != '*' && c != '$').count())
        .max()
}

/// Prefix match with `*` wildcards and a `$` end anchor.
fn rule_matches(path: &str, rule: &str) -> bool {
    let (rule, anchored) = match rule.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (rule, false),
    };

    if !rule.contains('*') {
        return if anchored {
            path == rule
        } else {
            path.starts_with(rule)
        };
    }

    let parts: Vec<&str> = rule.split('*').collect();
    let mut pos = 0usize;

    if !parts[0].is_empty() {
        if !path.starts_with(parts[0]) {
            return false;
        }
        pos = parts[0].len();
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match path[pos..].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    if last.is_empty() {
        return true;
    }
    if anchored {
        path.ends_with(last) && path.len() - last.len() >= pos
    } else {
        path[pos..].contains(last)
    }
}
