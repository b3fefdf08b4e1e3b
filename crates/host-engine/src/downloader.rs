use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

/// Fetches a job artifact by URL to a local path. A trait so bot-worker
/// tests can substitute a fake that copies a fixture file instead of
/// hitting the network.
#[async_trait::async_trait]
pub trait JobDownloader: Send + Sync {
    async fn download(&self, url: &str, file_name: &str) -> anyhow::Result<PathBuf>;
}

/// Fetches a job's artifact to the configured downloads directory.
///
/// No caching or dedup: a file of the same name is simply overwritten,
/// matching this system's non-goal of persisting job state across runs.
pub struct Downloader {
    client: reqwest::Client,
    downloads_dir: PathBuf,
}

impl Downloader {
    pub fn new(client: reqwest::Client, downloads_dir: PathBuf) -> Self {
        Self {
            client,
            downloads_dir,
        }
    }
}

#[async_trait::async_trait]
impl JobDownloader for Downloader {
    async fn download(&self, url: &str, file_name: &str) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        let dest = self.downloads_dir.join(sanitize_file_name(file_name));

        let resp = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = resp.bytes_stream();

        let mut file = tokio::fs::File::create(&dest).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(dest)
    }
}

fn sanitize_file_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("job.gcode")
}
