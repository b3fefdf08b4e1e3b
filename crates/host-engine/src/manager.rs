use std::collections::HashMap;
use std::sync::Arc;

use printhost_core::{Bot, BotStatus};

use crate::api::ServerApi;
use crate::downloader::JobDownloader;
use crate::worker::{self, BotWorkerHandle, WorkerCommand};

/// Owns every Bot Worker and the last-seen authoritative snapshot for each
/// bot. The only mutator is the Bot Source, via `bot_added`/`bot_removed`/
/// `bot_updated`; this type does not poll or subscribe to anything itself.
pub struct WorkerManager {
    api: Arc<dyn ServerApi>,
    downloader: Arc<dyn JobDownloader>,
    bots: HashMap<String, Bot>,
    workers: HashMap<String, BotWorkerHandle>,
}

impl WorkerManager {
    pub fn new(api: Arc<dyn ServerApi>, downloader: Arc<dyn JobDownloader>) -> Self {
        Self {
            api,
            downloader,
            bots: HashMap::new(),
            workers: HashMap::new(),
        }
    }

    pub async fn bot_added(&mut self, bot: Bot) {
        let handle = worker::spawn(
            bot.id.clone(),
            self.api.clone(),
            self.downloader.clone(),
            bot.driver.clone(),
        );

        if bot.status == BotStatus::Working {
            if let Err(err) = self
                .api
                .bot_error(&bot.id, "Bot startup in working mode.")
                .await
            {
                log::warn!("bot {}: failed to report startup error: {err:#}", bot.id);
            }
        } else if bot.current_job_id.is_none() && bot.job_available {
            if let Err(err) = self.api.get_a_job(&bot.id).await {
                log::warn!("bot {}: GetAJob failed: {err:#}", bot.id);
            }
        } else if bot.status == BotStatus::JobAssigned {
            if let Some(job) = bot.current_job.clone() {
                handle.send(WorkerCommand::RunJob(job)).await;
            }
        }

        self.workers.insert(bot.id.clone(), handle);
        self.bots.insert(bot.id.clone(), bot);
    }

    pub async fn bot_removed(&mut self, bot_id: &str) {
        if let Some(handle) = self.workers.remove(bot_id) {
            handle.send(WorkerCommand::Shutdown).await;
        }
        self.bots.remove(bot_id);
    }

    pub async fn bot_updated(&mut self, bot: Bot) {
        let Some(handle) = self.workers.get(&bot.id).cloned() else {
            // Unknown bot: treat as an add so the invariant "every known
            // bot has a worker" holds even if the source's first event
            // for it was an update.
            self.bot_added(bot).await;
            return;
        };

        let prev = self.bots.get(&bot.id).cloned();

        if let Some(prev) = &prev {
            if prev.driver != bot.driver {
                handle.send(WorkerCommand::DriverUpdated(bot.driver.clone())).await;
            }

            if should_get_a_job(prev, &bot) {
                if let Err(err) = self.api.get_a_job(&bot.id).await {
                    log::warn!("bot {}: GetAJob failed: {err:#}", bot.id);
                }
            }

            if bot.status == BotStatus::JobAssigned && prev.status != BotStatus::JobAssigned {
                if let Some(job) = bot.current_job.clone() {
                    handle.send(WorkerCommand::RunJob(job)).await;
                }
            }
        }

        self.bots.insert(bot.id.clone(), bot);
    }

    /// Sends every worker `Shutdown` and waits for each to acknowledge,
    /// used on process shutdown.
    pub async fn shutdown_all(&mut self) {
        for handle in self.workers.values() {
            handle.send_and_wait(WorkerCommand::Shutdown).await;
        }
        self.workers.clear();
        self.bots.clear();
    }
}

/// Whether a transition from `prev` to `new` should trigger a `GetAJob`
/// call. Mirrors the decision table in the worker manager's design: never
/// while offline, always when a job is available and unassigned, and once
/// more when the bot has just become idle.
fn should_get_a_job(prev: &Bot, new: &Bot) -> bool {
    if new.status == BotStatus::Offline {
        return false;
    }
    if new.current_job_id.is_none() && new.job_available {
        return true;
    }
    prev.status != BotStatus::Idle && new.status == BotStatus::Idle
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use printhost_core::{DriverConfig, Job, JobFile, JobStatus};

    use crate::api::ApiError;

    use super::*;

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
        async fn get_bots(&self) -> Result<Vec<Bot>, ApiError> {
            Ok(vec![])
        }

        async fn get_a_job(&self, bot_id: &str) -> Result<(), ApiError> {
            self.log.record(format!("get_a_job({bot_id})"));
            Ok(())
        }

        async fn start_job(&self, job_id: &str) -> Result<Job, ApiError> {
            self.log.record(format!("start_job({job_id})"));
            Ok(sample_job(job_id))
        }

        async fn update_job_progress(&self, job_id: &str, progress: f64) -> Result<(), ApiError> {
            self.log.record(format!("update_job_progress({job_id}, {progress})"));
            Ok(())
        }

        async fn finish_job(&self, job_id: &str) -> Result<Job, ApiError> {
            self.log.record(format!("finish_job({job_id})"));
            Ok(sample_job(job_id))
        }

        async fn bot_error(&self, bot_id: &str, error: &str) -> Result<(), ApiError> {
            self.log.record(format!("bot_error({bot_id}, {error})"));
            Ok(())
        }
    }

    struct FakeDownloader;

    #[async_trait::async_trait]
    impl JobDownloader for FakeDownloader {
        async fn download(&self, _url: &str, _file_name: &str) -> anyhow::Result<std::path::PathBuf> {
            Ok(std::path::PathBuf::from("/nonexistent/job.gcode"))
        }
    }

    fn sample_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            name: "job.gcode".to_string(),
            status: JobStatus::InProgress,
            file: JobFile::Url("https://example.invalid/job.gcode".to_string()),
            progress: 0.0,
        }
    }

    fn sample_bot(id: &str, status: BotStatus) -> Bot {
        Bot {
            id: id.to_string(),
            name: "Printer".to_string(),
            status,
            driver: None,
            job_available: false,
            current_job_id: None,
            current_job: None,
        }
    }

    fn manager(log: Arc<CallLog>) -> WorkerManager {
        WorkerManager::new(Arc::new(FakeApi { log }), Arc::new(FakeDownloader))
    }

    #[tokio::test]
    async fn bot_added_in_working_status_reports_error_and_skips_run_job() {
        let log = Arc::new(CallLog::default());
        let mut mgr = manager(log.clone());

        let mut bot = sample_bot("bot-1", BotStatus::Working);
        bot.current_job = Some(sample_job("job-1"));
        bot.current_job_id = Some("job-1".to_string());
        mgr.bot_added(bot).await;

        let calls = log.snapshot();
        assert_eq!(calls, vec!["bot_error(bot-1, Bot startup in working mode.)".to_string()]);

        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn idle_transition_requests_a_job_exactly_once() {
        let log = Arc::new(CallLog::default());
        let mut mgr = manager(log.clone());

        mgr.bot_added(sample_bot("bot-1", BotStatus::Waiting)).await;
        assert!(log.snapshot().is_empty());

        let mut idle = sample_bot("bot-1", BotStatus::Idle);
        idle.job_available = false;
        idle.current_job_id = None;
        mgr.bot_updated(idle).await;

        assert_eq!(log.snapshot(), vec!["get_a_job(bot-1)".to_string()]);

        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn job_assigned_transition_sends_run_job() {
        let log = Arc::new(CallLog::default());
        let mut mgr = manager(log.clone());

        mgr.bot_added(sample_bot("bot-1", BotStatus::Waiting)).await;

        let mut assigned = sample_bot("bot-1", BotStatus::JobAssigned);
        assigned.current_job_id = Some("job-1".to_string());
        assigned.current_job = Some(sample_job("job-1"));
        mgr.bot_updated(assigned).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let calls = log.snapshot();
        assert!(
            calls.iter().any(|c| c.starts_with("start_job(job-1)")),
            "calls: {calls:?}"
        );

        mgr.shutdown_all().await;
    }

    #[tokio::test]
    async fn driver_change_sends_exactly_one_driver_updated() {
        let log = Arc::new(CallLog::default());
        let mut mgr = manager(log.clone());

        let mut bot = sample_bot("bot-1", BotStatus::Idle);
        bot.driver = Some(DriverConfig::Serial {
            port: "A".to_string(),
            baud: 115_200,
        });
        mgr.bot_added(bot.clone()).await;

        let mut changed = bot.clone();
        changed.driver = Some(DriverConfig::Serial {
            port: "A".to_string(),
            baud: 250_000,
        });
        mgr.bot_updated(changed.clone()).await;

        // Re-delivering the same snapshot must not trigger another update.
        mgr.bot_updated(changed).await;

        mgr.shutdown_all().await;
    }

    #[test]
    fn should_get_a_job_never_while_offline() {
        let prev = sample_bot("bot-1", BotStatus::Waiting);
        let mut offline = sample_bot("bot-1", BotStatus::Offline);
        offline.job_available = true;
        assert!(!should_get_a_job(&prev, &offline));
    }

    #[test]
    fn should_get_a_job_when_available_and_unassigned() {
        let prev = sample_bot("bot-1", BotStatus::Waiting);
        let mut new = sample_bot("bot-1", BotStatus::Waiting);
        new.job_available = true;
        assert!(should_get_a_job(&prev, &new));
    }

    #[test]
    fn should_get_a_job_on_idle_transition() {
        let prev = sample_bot("bot-1", BotStatus::Waiting);
        let new = sample_bot("bot-1", BotStatus::Idle);
        assert!(should_get_a_job(&prev, &new));
    }

    #[test]
    fn should_not_get_a_job_when_already_idle() {
        let prev = sample_bot("bot-1", BotStatus::Idle);
        let new = sample_bot("bot-1", BotStatus::Idle);
        assert!(!should_get_a_job(&prev, &new));
    }
}
