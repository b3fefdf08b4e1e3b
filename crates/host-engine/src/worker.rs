use std::sync::Arc;
use std::time::{Duration, Instant};

use printhost_core::{DriverConfig, Job};
use tokio::sync::{mpsc, oneshot};

use crate::api::ServerApi;
use crate::downloader::JobDownloader;
use crate::driver::{build_driver, Driver, DriverCallbacks};

const COMMAND_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const PROGRESS_MIN_DELTA: f64 = 0.5;
const PROGRESS_MAX_SILENCE: Duration = Duration::from_secs(5);

/// A command posted to a bot worker's inbox.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    DriverUpdated(Option<DriverConfig>),
    RunJob(Job),
    Shutdown,
    /// Test/barrier probe: does nothing but complete.
    Nop,
}

struct Envelope {
    command: WorkerCommand,
    completed: Option<oneshot::Sender<()>>,
}

/// Handle to a running bot worker task.
#[derive(Clone)]
pub struct BotWorkerHandle {
    bot_id: String,
    tx: mpsc::Sender<Envelope>,
}

impl BotWorkerHandle {
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub async fn send(&self, command: WorkerCommand) {
        let _ = self
            .tx
            .send(Envelope {
                command,
                completed: None,
            })
            .await;
    }

    /// Posts `command` and waits until the worker has processed it.
    pub async fn send_and_wait(&self, command: WorkerCommand) {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(Envelope {
                command,
                completed: Some(tx),
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Spawns a bot worker actor and returns a handle to it. If `initial_driver`
/// is set, the worker attempts to connect it once before entering its
/// command loop, covering the common case where the bot already carries a
/// driver configuration when the worker is created.
pub fn spawn(
    bot_id: String,
    api: Arc<dyn ServerApi>,
    downloader: Arc<dyn JobDownloader>,
    initial_driver: Option<DriverConfig>,
) -> BotWorkerHandle {
    let (tx, rx) = mpsc::channel(32);
    let handle = BotWorkerHandle {
        bot_id: bot_id.clone(),
        tx,
    };
    tokio::spawn(run(bot_id, api, downloader, initial_driver, rx));
    handle
}

struct WorkerState {
    bot_id: String,
    api: Arc<dyn ServerApi>,
    downloader: Arc<dyn JobDownloader>,
    driver_config: Option<DriverConfig>,
    driver: Option<Driver>,
    connection_attempted: bool,
    current_job: Option<Job>,
    last_progress: f64,
    last_progress_at: Instant,
}

impl WorkerState {
    async fn try_attach_driver(&mut self, progress_tx: mpsc::Sender<f64>, finished_tx: mpsc::Sender<()>) {
        let Some(config) = self.driver_config.clone() else {
            return;
        };
        if self.driver.is_some() || self.connection_attempted {
            return;
        }

        let callbacks = DriverCallbacks {
            job_finished: Some(Arc::new(move || {
                let _ = finished_tx.try_send(());
            })),
            job_progress: Some(Arc::new(move |p| {
                let _ = progress_tx.try_send(p);
            })),
            ..Default::default()
        };

        let mut driver = build_driver(config, callbacks);
        self.connection_attempted = true;
        match driver.connect().await {
            Ok(()) => self.driver = Some(driver),
            Err(err) => log::warn!("bot {}: driver connect failed: {err:#}", self.bot_id),
        }
    }

    /// Returns `true` if the worker should stop.
    async fn handle_command(
        &mut self,
        command: WorkerCommand,
        progress_tx: &mpsc::Sender<f64>,
        finished_tx: &mpsc::Sender<()>,
    ) -> bool {
        match command {
            WorkerCommand::DriverUpdated(cfg) => {
                if let Some(driver) = self.driver.as_mut() {
                    driver.disconnect().await;
                }
                self.driver = None;
                self.connection_attempted = false;
                self.driver_config = cfg;
                self.try_attach_driver(progress_tx.clone(), finished_tx.clone()).await;
                false
            }
            WorkerCommand::RunJob(job) => {
                self.current_job = Some(job.clone());
                if let Err(err) = self.run_job(&job).await {
                    log::error!("bot {}: failed to run job {}: {err:#}", self.bot_id, job.id);
                }
                false
            }
            WorkerCommand::Shutdown => true,
            WorkerCommand::Nop => false,
        }
    }

    async fn run_job(&mut self, job: &Job) -> anyhow::Result<()> {
        let local_path = self
            .downloader
            .download(job.file.download_url(), &job.name)
            .await?;
        self.api.start_job(&job.id).await?;
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no driver attached for bot {}", self.bot_id))?;
        driver.start(&local_path).await?;
        Ok(())
    }

    async fn handle_progress(&mut self, percent: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_progress_at);
        if (percent - self.last_progress) > PROGRESS_MIN_DELTA || elapsed > PROGRESS_MAX_SILENCE {
            self.last_progress = percent;
            self.last_progress_at = now;
            if let Some(job) = &self.current_job {
                if let Err(err) = self.api.update_job_progress(&job.id, percent).await {
                    log::warn!("bot {}: failed to report progress: {err:#}", self.bot_id);
                }
            }
        }
    }

    async fn handle_job_finished(&mut self) {
        // `current_job` is left in place here: the server's next bot
        // snapshot is what actually clears it for this worker.
        if let Some(job) = self.current_job.clone() {
            if let Err(err) = self.api.finish_job(&job.id).await {
                log::warn!("bot {}: failed to finish job {}: {err:#}", self.bot_id, job.id);
            }
        }
    }
}

async fn run(
    bot_id: String,
    api: Arc<dyn ServerApi>,
    downloader: Arc<dyn JobDownloader>,
    initial_driver: Option<DriverConfig>,
    mut cmd_rx: mpsc::Receiver<Envelope>,
) {
    let (progress_tx, mut progress_rx) = mpsc::channel::<f64>(16);
    let (finished_tx, mut finished_rx) = mpsc::channel::<()>(4);

    let mut state = WorkerState {
        bot_id,
        api,
        downloader,
        driver_config: initial_driver,
        driver: None,
        connection_attempted: false,
        current_job: None,
        last_progress: -1.0,
        last_progress_at: Instant::now() - PROGRESS_MAX_SILENCE - Duration::from_secs(1),
    };

    state.try_attach_driver(progress_tx.clone(), finished_tx.clone()).await;

    loop {
        tokio::select! {
            res = tokio::time::timeout(COMMAND_POLL_TIMEOUT, cmd_rx.recv()) => {
                match res {
                    Ok(Some(envelope)) => {
                        let stop = state.handle_command(envelope.command, &progress_tx, &finished_tx).await;
                        if let Some(done) = envelope.completed {
                            let _ = done.send(());
                        }
                        if stop {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
            Some(percent) = progress_rx.recv() => {
                state.handle_progress(percent).await;
            }
            Some(()) = finished_rx.recv() => {
                state.handle_job_finished().await;
            }
        }
    }

    if let Some(driver) = state.driver.as_mut() {
        driver.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use printhost_core::{JobFile, JobStatus};

    use crate::api::ApiError;

    use super::*;

    /// Records calls in order so tests can assert on call sequencing
    /// instead of just call counts.
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn snapshot(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct FakeApi {
        log: Arc<CallLog>,
    }

    #[async_trait::async_trait]
    impl ServerApi for FakeApi {
        async fn get_bots(&self) -> Result<Vec<printhost_core::Bot>, ApiError> {
            Ok(vec![])
        }

        async fn get_a_job(&self, bot_id: &str) -> Result<(), ApiError> {
            self.log.record(format!("get_a_job({bot_id})"));
            Ok(())
        }

        async fn start_job(&self, job_id: &str) -> Result<Job, ApiError> {
            self.log.record(format!("start_job({job_id})"));
            Ok(Job {
                id: job_id.to_string(),
                name: "job.gcode".to_string(),
                status: JobStatus::InProgress,
                file: JobFile::Url("https://example.invalid/job.gcode".to_string()),
                progress: 0.0,
            })
        }

        async fn update_job_progress(&self, job_id: &str, progress: f64) -> Result<(), ApiError> {
            self.log.record(format!("update_job_progress({job_id}, {progress})"));
            Ok(())
        }

        async fn finish_job(&self, job_id: &str) -> Result<Job, ApiError> {
            self.log.record(format!("finish_job({job_id})"));
            Ok(Job {
                id: job_id.to_string(),
                name: "job.gcode".to_string(),
                status: JobStatus::Available,
                file: JobFile::Url("https://example.invalid/job.gcode".to_string()),
                progress: 100.0,
            })
        }

        async fn bot_error(&self, bot_id: &str, error: &str) -> Result<(), ApiError> {
            self.log.record(format!("bot_error({bot_id}, {error})"));
            Ok(())
        }
    }

    /// Writes a tiny local fixture file instead of touching the network,
    /// standing in for the real downloader in worker tests.
    struct FakeDownloader {
        log: Arc<CallLog>,
        local_path: std::path::PathBuf,
    }

    #[async_trait::async_trait]
    impl JobDownloader for FakeDownloader {
        async fn download(&self, url: &str, file_name: &str) -> anyhow::Result<std::path::PathBuf> {
            self.log.record(format!("download({url}, {file_name})"));
            tokio::fs::write(&self.local_path, "G1 X1\n").await?;
            Ok(self.local_path.clone())
        }
    }

    #[tokio::test]
    async fn run_job_calls_download_start_job_and_driver_start_in_order() {
        let log = Arc::new(CallLog::default());
        let tmp = tempfile::tempdir().unwrap();
        let local_path = tmp.path().join("job.gcode");

        let api = Arc::new(FakeApi { log: log.clone() });
        let downloader = Arc::new(FakeDownloader {
            log: log.clone(),
            local_path,
        });

        let handle = spawn(
            "bot-1".to_string(),
            api,
            downloader,
            Some(DriverConfig::Dummy { command_delay_ms: 1 }),
        );

        let job = Job {
            id: "job-1".to_string(),
            name: "job.gcode".to_string(),
            status: JobStatus::Assigned,
            file: JobFile::Url("https://example.invalid/job.gcode".to_string()),
            progress: 0.0,
        };
        handle.send_and_wait(WorkerCommand::RunJob(job)).await;

        // Let the dummy driver's background task run to completion.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.send_and_wait(WorkerCommand::Nop).await;

        let calls = log.snapshot();
        let download_idx = calls.iter().position(|c| c.starts_with("download(")).unwrap();
        let start_job_idx = calls.iter().position(|c| c.starts_with("start_job(")).unwrap();
        assert!(download_idx < start_job_idx, "calls: {calls:?}");
        assert!(
            calls.iter().any(|c| c.starts_with("finish_job(job-1)")),
            "expected finish_job to be invoked, calls: {calls:?}"
        );
        assert_eq!(
            calls.iter().filter(|c| c.starts_with("finish_job(")).count(),
            1,
            "finish_job should be invoked exactly once, calls: {calls:?}"
        );

        handle.send(WorkerCommand::Shutdown).await;
    }

    #[tokio::test]
    async fn progress_reports_are_rate_limited() {
        let mut state = WorkerState {
            bot_id: "bot-1".to_string(),
            api: Arc::new(FakeApi {
                log: Arc::new(CallLog::default()),
            }),
            downloader: Arc::new(FakeDownloader {
                log: Arc::new(CallLog::default()),
                local_path: std::env::temp_dir().join("unused.gcode"),
            }),
            driver_config: None,
            driver: None,
            connection_attempted: true,
            current_job: Some(Job {
                id: "job-1".to_string(),
                name: "job.gcode".to_string(),
                status: JobStatus::InProgress,
                file: JobFile::Url("https://example.invalid/job.gcode".to_string()),
                progress: 0.0,
            }),
            last_progress: 0.0,
            last_progress_at: Instant::now(),
        };

        // A tiny delta arriving immediately after the last report must not
        // be reported.
        state.handle_progress(0.2).await;
        assert_eq!(state.last_progress, 0.0);
    }
}
