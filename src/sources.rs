//! `docidx sources`: configured sources and whether they are reachable.

use anyhow::Result;

use crate::config::Config;
use crate::source_fs::FilesystemSource;
use crate::source_github::GithubSource;

struct SourceRow {
    name: String,
    kind: &'static str,
    location: String,
    interval_secs: u64,
    status: String,
}

pub async fn list_sources(config: &Config) -> Result<()> {
    let mut rows = Vec::new();

    for fs in &config.sources.filesystem {
        let status = FilesystemSource::new(fs.clone()).and_then(|s| s.check());
        rows.push(SourceRow {
            name: fs.name.clone(),
            kind: "filesystem",
            location: fs.root.display().to_string(),
            interval_secs: fs.refresh_interval_secs,
            status: health(status),
        });
    }

    for gh in &config.sources.github {
        let status = match GithubSource::new(gh.clone()) {
            Ok(source) => source.check().await,
            Err(e) => Err(e),
        };
        let location = if gh.path.is_empty() {
            gh.repo_url.clone()
        } else {
            format!("{} ({})", gh.repo_url, gh.path)
        };
        rows.push(SourceRow {
            name: gh.name.clone(),
            kind: "github",
            location,
            interval_secs: gh.refresh_interval_secs,
            status: health(status),
        });
    }

    if rows.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:>9}  {:<10} LOCATION",
        "SOURCE", "TYPE", "INTERVAL", "STATUS"
    );
    for row in &rows {
        println!(
            "{:<20} {:<12} {:>8}s  {:<10} {}",
            row.name, row.kind, row.interval_secs, row.status, row.location
        );
    }
    Ok(())
}

fn health(result: Result<()>) -> String {
    match result {
        Ok(()) => "OK".to_string(),
        Err(e) => {
            tracing::debug!(error = %format!("{:#}", e), "source check failed");
            "UNHEALTHY".to_string()
        }
    }
}
