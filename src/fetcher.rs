//! HTTP repository client (spec §4.2, §4.5, §6 wire protocol).

use crate::catalog::{Arch, Catalog};
use crate::error::AgentError;
use crate::manifest::{expand, ExpandedManifest, ManifestFile, ManifestSource};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Backoff delays tried between attempts. Spec §4.2: "one retry with
/// exponential backoff (2 s, 4 s, 8 s, max 3 attempts)" — read as: at most
/// 3 total attempts, with the listed delays consumed in order between them
/// (so a 3-attempt run uses the 2 s and 4 s delays; the 8 s entry documents
/// what the next backoff step *would* be had a 4th attempt been allowed).
const BACKOFF: [Duration; 3] = [Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)];
const MAX_ATTEMPTS: usize = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_STALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Fetcher {
    client: reqwest::Client,
    repo_url: String,
    basic_auth: Option<(String, String)>,
}

impl Fetcher {
    pub fn new(repo_url: impl Into<String>, basic_auth: Option<(String, String)>) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AgentError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Fetcher {
            client,
            repo_url: repo_url.into().trim_end_matches('/').to_string(),
            basic_auth,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some((user, pass)) = &self.basic_auth {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    async fn get_text_with_retry(&self, url: &str) -> Result<String, AgentError> {
        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF[attempt - 1]).await;
            }
            match self.request(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .text()
                        .await
                        .map_err(|e| AgentError::FetchError(format!("{url}: {e}")));
                }
                Ok(resp) => {
                    last_err = format!("{url}: HTTP {}", resp.status());
                }
                Err(e) => {
                    last_err = format!("{url}: {e}");
                }
            }
        }
        Err(AgentError::FetchError(last_err))
    }

    pub async fn get_manifest_raw(&self, name: &str) -> Result<String, AgentError> {
        let url = format!("{}/manifests/{}.yaml", self.repo_url, name);
        self.get_text_with_retry(&url).await
    }

    pub async fn get_catalog_raw(&self, name: &str) -> Result<String, AgentError> {
        let url = format!("{}/catalogs/{}.yaml", self.repo_url, name);
        self.get_text_with_retry(&url).await
    }

    /// Resolves the whole manifest DAG reachable from `root_key`: fetches
    /// every reachable manifest at most once (BFS, visited-set keyed by
    /// name), then hands the collected graph to [`manifest::expand`] for
    /// the authoritative ordering/cycle/depth logic.
    pub async fn resolve_manifest_tree(&self, root_key: &str) -> Result<ExpandedManifest, AgentError> {
        let mut results: HashMap<String, Result<ManifestFile, String>> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::from([root_key.to_string()]);
        let mut queued: HashSet<String> = HashSet::from([root_key.to_string()]);

        while let Some(key) = queue.pop_front() {
            let outcome = match self.get_manifest_raw(&key).await {
                Ok(raw) => ManifestFile::parse(&key, &raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Ok(file) = &outcome {
                for include in &file.included_manifests {
                    if queued.insert(include.clone()) {
                        queue.push_back(include.clone());
                    }
                }
            }
            results.insert(key, outcome);
        }

        let source = FetchedManifests(results);
        let root_ok = matches!(source.0.get(root_key), Some(Ok(_)));
        if !root_ok {
            let reason = match source.0.get(root_key) {
                Some(Err(e)) => e.clone(),
                _ => "unknown error".to_string(),
            };
            return Err(AgentError::FetchError(format!(
                "root manifest '{root_key}' unreachable: {reason}"
            )));
        }
        expand(root_key, &source)
    }

    /// Fetches and parses every catalog in `names`. A catalog that fails to
    /// fetch or parse is skipped with a warning (spec §7 FetchError/ParseError
    /// policy); it never aborts the run.
    pub async fn resolve_catalogs(
        &self,
        names: &[String],
        current_arch: Option<Arch>,
    ) -> (HashMap<String, Catalog>, Vec<String>) {
        let mut catalogs = HashMap::new();
        let mut warnings = Vec::new();
        for name in names {
            match self.get_catalog_raw(name).await {
                Ok(raw) => match Catalog::parse(name, &raw, current_arch) {
                    Ok(catalog) => {
                        catalogs.insert(name.clone(), catalog);
                    }
                    Err(e) => warnings.push(format!("catalog '{name}' failed to parse: {e}")),
                },
                Err(e) => warnings.push(format!("catalog '{name}' failed to fetch: {e}")),
            }
        }
        (catalogs, warnings)
    }

    /// Resolves `installer.location` to a full URL and streams it to
    /// `dest`, aborting if no bytes arrive for `DOWNLOAD_STALL_TIMEOUT`
    /// (spec §5).
    pub async fn download(
        &self,
        location: &str,
        dest: &Path,
        mut on_progress: impl FnMut(u64, Option<u64>) + Send,
    ) -> Result<(), AgentError> {
        let normalized = location.trim_start_matches('/');
        let url = format!("{}/pkgs/{}", self.repo_url, urlencoding::encode(normalized).replace("%2F", "/"));
        let resp = self
            .request(&url)
            .send()
            .await
            .map_err(|e| AgentError::FetchError(format!("{url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AgentError::FetchError(format!("{url}: HTTP {}", resp.status())));
        }
        let total = resp.content_length();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;

        use futures::StreamExt;
        loop {
            let next = tokio::time::timeout(DOWNLOAD_STALL_TIMEOUT, stream.next()).await;
            match next {
                Ok(Some(Ok(chunk))) => {
                    file.write_all(&chunk).await?;
                    downloaded += chunk.len() as u64;
                    on_progress(downloaded, total);
                }
                Ok(Some(Err(e))) => {
                    return Err(AgentError::FetchError(format!("{url}: {e}")));
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(AgentError::FetchError(format!(
                        "{url}: download stalled (no bytes for {}s)",
                        DOWNLOAD_STALL_TIMEOUT.as_secs()
                    )));
                }
            }
        }
        file.flush().await?;
        Ok(())
    }
}

struct FetchedManifests(HashMap<String, Result<ManifestFile, String>>);

impl ManifestSource for FetchedManifests {
    fn fetch(&self, key: &str) -> Result<ManifestFile, AgentError> {
        match self.0.get(key) {
            Some(Ok(file)) => Ok(file.clone()),
            Some(Err(e)) => Err(AgentError::FetchError(e.clone())),
            None => Err(AgentError::FetchError(format!("manifest '{key}' was never fetched"))),
        }
    }
}
