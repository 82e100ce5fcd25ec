//! Remote code-host search with heuristic queries and additive scoring.
//!
//! Several query formulations run against the search endpoint (topic tag,
//! keyword in name, description text); candidates are deduplicated by full
//! repository name, probed for a `skill.json` manifest, scored, and the top
//! `limit` returned.

use crate::market::{MarketError, RepoCandidate, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Topic that marks a repository as a packaged skill.
pub const SKILL_TOPIC: &str = "openevo-skill";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = concat!("openevo/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[allow(dead_code)]
    total_count: u64,
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    name: String,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    html_url: String,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default = "default_branch")]
    default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

pub struct CodeHostClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl CodeHostClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        CodeHostClient {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn github() -> Self {
        CodeHostClient::new("https://api.github.com", std::env::var("GITHUB_TOKEN").ok())
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Search for skill repositories matching a capability query.
    pub async fn search_skills(&self, query: &str, limit: usize) -> Result<Vec<RepoCandidate>> {
        let formulations = [
            format!("topic:{} {}", SKILL_TOPIC, query),
            format!("{} skill in:name,description", query),
            format!("{} in:description,readme", query),
        ];

        let mut seen: HashSet<String> = HashSet::new();
        let mut items: Vec<SearchItem> = Vec::new();

        for q in &formulations {
            match self.run_search(q).await {
                Ok(response) => {
                    for item in response.items {
                        if seen.insert(item.full_name.clone()) {
                            items.push(item);
                        }
                    }
                }
                Err(e) => warn!("Search formulation '{}' failed: {}", q, e),
            }
        }

        let keywords = keywords_of(query);
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            let has_manifest = self
                .probe_manifest(&item.full_name, &item.default_branch)
                .await;
            let score = score_candidate(&item, has_manifest, &keywords);
            candidates.push(RepoCandidate {
                name: item.name,
                full_name: item.full_name,
                description: item.description,
                html_url: item.html_url,
                stars: item.stargazers_count,
                topics: item.topics,
                default_branch: item.default_branch,
                has_manifest,
                score,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn run_search(&self, query: &str) -> Result<SearchResponse> {
        let url = format!("{}/search/repositories", self.base_url);
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("q", query), ("per_page", "10")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketError::Remote {
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// HEAD probe for `skill.json` at the repository root.
    pub async fn probe_manifest(&self, full_name: &str, branch: &str) -> bool {
        let url = format!(
            "{}/repos/{}/contents/skill.json?ref={}",
            self.base_url, full_name, branch
        );
        match self.request(reqwest::Method::HEAD, url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Manifest probe for {} failed: {}", full_name, e);
                false
            }
        }
    }

    /// Download the gzipped tarball for a repository.
    pub async fn download_tarball(
        &self,
        full_name: &str,
        git_ref: Option<&str>,
    ) -> Result<Vec<u8>> {
        let url = match git_ref {
            Some(r) => format!("{}/repos/{}/tarball/{}", self.base_url, full_name, r),
            None => format!("{}/repos/{}/tarball", self.base_url, full_name),
        };
        let response = self.request(reqwest::Method::GET, url).send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(MarketError::NotFound(full_name.to_string()));
        }
        if !status.is_success() {
            return Err(MarketError::Remote {
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn keywords_of(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(String::from)
        .collect()
}

/// Additive relevance score, rounded to 0.01 and capped at 1.0.
///
/// manifest +0.4, log-scale stars capped +0.2, topic match +0.2,
/// +0.1 per keyword hit capped at +0.3.
pub(crate) fn score_candidate(item: &SearchItem, has_manifest: bool, keywords: &[String]) -> f64 {
    let mut score = 0.0;

    if has_manifest {
        score += 0.4;
    }

    score += ((item.stargazers_count as f64 + 1.0).log10() * 0.05).min(0.2);

    let topic_hit = item.topics.iter().any(|t| {
        t == SKILL_TOPIC || keywords.iter().any(|k| t.to_lowercase().contains(k))
    });
    if topic_hit {
        score += 0.2;
    }

    let haystack = format!(
        "{} {}",
        item.name.to_lowercase(),
        item.description.as_deref().unwrap_or("").to_lowercase()
    );
    let keyword_bonus: f64 = keywords
        .iter()
        .filter(|k| haystack.contains(k.as_str()))
        .count() as f64
        * 0.1;
    score += keyword_bonus.min(0.3);

    ((score * 100.0).round() / 100.0).min(1.0)
}
