use serde::{Deserialize, Serialize};

/// Authoritative status of a bot as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Idle,
    Waiting,
    JobAssigned,
    Working,
    Offline,
    Error,
}

/// Status of a job as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Available,
    Assigned,
    InProgress,
    QualityCheck,
}

/// A retrievable job artifact: either a direct URL or an embedded file
/// record carrying its own download URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobFile {
    Url(String),
    Embedded { download_url: String },
}

impl JobFile {
    pub fn download_url(&self) -> &str {
        match self {
            JobFile::Url(url) => url,
            JobFile::Embedded { download_url } => download_url,
        }
    }
}

/// Immutable snapshot of a job as handed out by the bot source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub file: JobFile,
    #[serde(default)]
    pub progress: f64,
}

/// Driver configuration: identifies the transport kind and its parameters.
///
/// Two configurations are equal iff all fields are equal; the worker
/// manager uses this to decide when a driver reconnect is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    Serial { port: String, baud: u32 },
    Tcp { host: String, port: u16 },
    Dummy { command_delay_ms: u64 },
}

/// Immutable snapshot of a bot as handed out by the bot source.
///
/// Snapshots are values, never mutated in place: a new version of a bot is
/// always a freshly constructed `Bot`, and equality is full structural
/// equality over the whole tree (including the nested `job`/`driver`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub status: BotStatus,
    #[serde(default)]
    pub driver: Option<DriverConfig>,
    #[serde(default)]
    pub job_available: bool,
    #[serde(default)]
    pub current_job_id: Option<String>,
    #[serde(default)]
    pub current_job: Option<Job>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_equality_is_structural_over_nested_job_and_driver() {
        let base = Bot {
            id: "bot-1".into(),
            name: "Printer".into(),
            status: BotStatus::Idle,
            driver: Some(DriverConfig::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: 115_200,
            }),
            job_available: false,
            current_job_id: None,
            current_job: None,
        };

        let same = base.clone();
        assert_eq!(base, same);

        let mut changed_driver = base.clone();
        changed_driver.driver = Some(DriverConfig::Serial {
            port: "/dev/ttyUSB0".into(),
            baud: 250_000,
        });
        assert_ne!(base, changed_driver);

        let mut changed_job = base.clone();
        changed_job.current_job_id = Some("job-1".into());
        assert_ne!(base, changed_job);
    }

    #[test]
    fn job_file_download_url_covers_both_shapes() {
        let direct = JobFile::Url("https://example.test/a.gcode".into());
        assert_eq!(direct.download_url(), "https://example.test/a.gcode");

        let embedded = JobFile::Embedded {
            download_url: "https://example.test/b.gcode".into(),
        };
        assert_eq!(embedded.download_url(), "https://example.test/b.gcode");
    }
}
