//! GitHub repository document source.
//!
//! Lists documentation files through the contents API, recursing into
//! subdirectories under the configured `path`, and downloads each file's
//! raw text from the same endpoint. A listed document's locator is its
//! repository path. The git blob SHA from the listing is the document
//! marker, so unchanged files are skipped without a download.
//!
//! `GITHUB_TOKEN`, when set, is sent as a bearer token (higher rate
//! limits, private repositories). With `mirror_dir` set, every fetched
//! document is also written locally as `path/with/slashes` →
//! `path_with_slashes`.

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docs_index_core::models::{Document, DocumentRef};
use docs_index_core::pipeline::DocumentSource;
use docs_index_core::{IndexError, Result};

use crate::config::GithubSourceConfig;

/// Split `https://github.com/{owner}/{repo}[.git][/]` into owner and repo.
pub fn parse_repo_url(repo_url: &str) -> anyhow::Result<(String, String)> {
    let rest = repo_url
        .split_once("github.com/")
        .map(|(_, rest)| rest)
        .ok_or_else(|| anyhow::anyhow!("Invalid GitHub URL: {}", repo_url))?;

    let mut parts = rest.trim_end_matches('/').split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => bail!("Invalid GitHub URL (expected github.com/owner/repo): {}", repo_url),
    }
}

/// One entry of a contents API directory listing.
#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    sha: String,
}

pub struct GithubSource {
    config: GithubSourceConfig,
    owner: String,
    repo: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl GithubSource {
    pub fn new(config: GithubSourceConfig) -> anyhow::Result<Self> {
        let (owner, repo) = parse_repo_url(&config.repo_url)?;
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        let client = reqwest::Client::builder()
            .user_agent(concat!("docs-index/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            config,
            owner,
            repo,
            token,
            client,
        })
    }

    /// Check the repository is reachable, for `docidx sources`.
    pub async fn check(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/repos/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        );
        let response = self
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("HTTP {}", response.status());
        }
        Ok(())
    }

    fn contents_url(&self, path: &str) -> Result<reqwest::Url> {
        let base = format!(
            "{}/repos/{}/{}/contents",
            self.config.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        );
        let mut url = reqwest::Url::parse(&base).map_err(|e| IndexError::fetch(&base, e))?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        if let Some(branch) = &self.config.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }
        Ok(url)
    }

    fn document_uri(&self, path: &str) -> String {
        format!(
            "https://github.com/{}/{}/blob/{}/{}",
            self.owner,
            self.repo,
            self.config.branch.as_deref().unwrap_or("HEAD"),
            path
        )
    }

    fn is_doc_file(&self, path: &str) -> bool {
        self.config.path_filter.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<ContentItem>> {
        let url = self.contents_url(path)?.to_string();
        let response = self
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| IndexError::fetch(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::fetch(&url, format!("HTTP {}: {}", status, body)));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IndexError::fetch(&url, e))?;
        // A file path returns a single object rather than an array.
        let items = if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|item| vec![item])
        };
        items.map_err(|e| IndexError::fetch(&url, format!("unexpected listing: {}", e)))
    }

    /// Depth-first walk of the contents tree under `config.path`.
    async fn walk(&self) -> Result<Vec<DocumentRef>> {
        let mut refs = Vec::new();
        let mut pending = vec![self.config.path.clone()];

        while let Some(dir) = pending.pop() {
            for item in self.list_dir(&dir).await? {
                match item.kind.as_str() {
                    "dir" => pending.push(item.path),
                    "file" if self.is_doc_file(&item.path) => refs.push(DocumentRef {
                        uri: self.document_uri(&item.path),
                        source: self.config.name.clone(),
                        locator: item.path,
                        marker: Some(item.sha),
                    }),
                    _ => {}
                }
            }
        }

        refs.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(refs)
    }

    fn mirror(&self, dir: &Path, repo_path: &str, text: &str) {
        let target = dir.join(mirror_file_name(repo_path));
        let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&target, text));
        if let Err(e) = result {
            tracing::warn!(path = %target.display(), error = %e, "failed to mirror document");
        }
    }
}

/// Local file name for a mirrored repository path.
pub fn mirror_file_name(repo_path: &str) -> PathBuf {
    PathBuf::from(repo_path.trim_matches('/').replace('/', "_"))
}

#[async_trait]
impl DocumentSource for GithubSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list(&self) -> Result<Vec<DocumentRef>> {
        let refs = self.walk().await?;
        tracing::debug!(
            source = %self.config.name,
            repo = %format!("{}/{}", self.owner, self.repo),
            documents = refs.len(),
            "listed repository"
        );
        Ok(refs)
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<Document> {
        let url = self.contents_url(&doc.locator)?;
        let response = self
            .get(url.as_str())
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(|e| IndexError::fetch(&doc.uri, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::fetch(&doc.uri, format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IndexError::fetch(&doc.uri, e))?;
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|_| IndexError::malformed(&doc.uri, "not valid UTF-8"))?;

        if let Some(dir) = &self.config.mirror_dir {
            self.mirror(dir, &doc.locator, &text);
        }

        Ok(Document {
            uri: doc.uri.clone(),
            source: self.config.name.clone(),
            title: doc.locator.rsplit('/').next().map(str::to_string),
            text,
            marker: doc.marker.clone().unwrap_or_default(),
            updated_at: chrono::Utc::now().timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path as UrlPath, Query};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_repo_url() {
        assert_eq!(
            parse_repo_url("https://github.com/example/protocol").unwrap(),
            ("example".to_string(), "protocol".to_string())
        );
        assert_eq!(
            parse_repo_url("https://github.com/example/protocol.git/").unwrap(),
            ("example".to_string(), "protocol".to_string())
        );
        assert!(parse_repo_url("https://gitlab.com/example/protocol").is_err());
        assert!(parse_repo_url("https://github.com/example").is_err());
        assert!(parse_repo_url("https://github.com/example/protocol/tree/main").is_err());
    }

    #[test]
    fn test_mirror_file_name() {
        assert_eq!(
            mirror_file_name("docs/guide/staking.md"),
            PathBuf::from("docs_guide_staking.md")
        );
    }

    /// Serves a tiny fake contents API on an ephemeral port. Raw requests
    /// get the file text, tagged with the requested ref.
    async fn fake_github() -> String {
        async fn contents(
            UrlPath(path): UrlPath<String>,
            Query(params): Query<HashMap<String, String>>,
            headers: HeaderMap,
        ) -> Response {
            let raw = headers
                .get("accept")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("raw"));
            if raw {
                let at = params.get("ref").map(String::as_str).unwrap_or("HEAD");
                return format!("contents of {} at {}", path, at).into_response();
            }
            let listing = match path.as_str() {
                "docs" => serde_json::json!([
                    {"type": "file", "path": "docs/intro.md", "sha": "sha-intro"},
                    {"type": "file", "path": "docs/logo.png", "sha": "sha-logo"},
                    {"type": "dir", "path": "docs/guide", "sha": "sha-dir"}
                ]),
                _ => serde_json::json!([
                    {"type": "file", "path": "docs/guide/staking.md", "sha": "sha-staking"}
                ]),
            };
            Json(listing).into_response()
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route(
                "/repos/example/protocol",
                get(|| async { Json(serde_json::json!({"full_name": "example/protocol"})) }),
            )
            .route("/repos/example/protocol/contents/{*path}", get(contents));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn config(api_url: String, mirror_dir: Option<PathBuf>) -> GithubSourceConfig {
        GithubSourceConfig {
            name: "protocol".to_string(),
            repo_url: "https://github.com/example/protocol".to_string(),
            path: "docs".to_string(),
            branch: None,
            path_filter: vec![".md".to_string()],
            mirror_dir,
            api_url,
            refresh_interval_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_list_recurses_and_filters() {
        let base = fake_github().await;
        let source = GithubSource::new(config(base, None)).unwrap();

        let refs = source.list().await.unwrap();
        let uris: Vec<&str> = refs.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://github.com/example/protocol/blob/HEAD/docs/guide/staking.md",
                "https://github.com/example/protocol/blob/HEAD/docs/intro.md",
            ]
        );
        assert_eq!(refs[0].marker.as_deref(), Some("sha-staking"));
    }

    #[tokio::test]
    async fn test_fetch_downloads_and_mirrors() {
        let base = fake_github().await;
        let mirror = TempDir::new().unwrap();
        let source = GithubSource::new(config(base, Some(mirror.path().to_path_buf()))).unwrap();

        let refs = source.list().await.unwrap();
        let doc = source.fetch(&refs[1]).await.unwrap();

        assert_eq!(doc.text, "contents of docs/intro.md at HEAD");
        assert_eq!(doc.marker, "sha-intro");
        assert_eq!(doc.title.as_deref(), Some("intro.md"));
        let mirrored = std::fs::read_to_string(mirror.path().join("docs_intro.md")).unwrap();
        assert_eq!(mirrored, doc.text);
    }

    #[tokio::test]
    async fn test_branch_with_slash() {
        let base = fake_github().await;
        let mirror = TempDir::new().unwrap();
        let mut cfg = config(base, Some(mirror.path().to_path_buf()));
        cfg.branch = Some("release/v1".to_string());
        let source = GithubSource::new(cfg).unwrap();

        let refs = source.list().await.unwrap();
        assert_eq!(
            refs[0].uri,
            "https://github.com/example/protocol/blob/release/v1/docs/guide/staking.md"
        );
        assert_eq!(refs[0].locator, "docs/guide/staking.md");

        let doc = source.fetch(&refs[0]).await.unwrap();
        assert_eq!(doc.text, "contents of docs/guide/staking.md at release/v1");
        assert_eq!(doc.title.as_deref(), Some("staking.md"));
        assert!(mirror.path().join("docs_guide_staking.md").exists());
    }

    #[tokio::test]
    async fn test_contents_url_encodes_ref() {
        let mut cfg = config("https://api.github.com".to_string(), None);
        cfg.branch = Some("feature/a b&c".to_string());
        let source = GithubSource::new(cfg).unwrap();
        let url = source.contents_url("docs/guide").unwrap();
        assert_eq!(url.path(), "/repos/example/protocol/contents/docs/guide");
        assert_eq!(url.query(), Some("ref=feature%2Fa+b%26c"));
    }

    #[tokio::test]
    async fn test_check_reachable_repository() {
        let base = fake_github().await;
        assert!(GithubSource::new(config(base, None)).unwrap().check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_fetch_error() {
        let source = GithubSource::new(config("http://127.0.0.1:1".to_string(), None)).unwrap();
        assert!(source.check().await.is_err());
        assert!(matches!(
            source.list().await.unwrap_err(),
            IndexError::Fetch { .. }
        ));
    }
}
