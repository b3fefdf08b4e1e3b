pub mod commands;
pub mod rest;
pub mod socket;

use printhost_core::{Bot, Job};
use serde_json::Value;
use tokio::sync::Mutex;

pub use socket::PushEvent;

/// Server-facing errors, split so a caller (usually the bot worker) can
/// swallow the domain form and must not swallow the transport form.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server error {code}: {message}")]
    Domain { code: i32, message: String },
    #[error("request failed: {0}")]
    Transport(String),
}

/// The server API, speaking either HTTP or WebSocket-RPC transparently.
///
/// `command()` is the only primitive; typed helpers below it build the
/// request payload and decode the response. A connected push socket is
/// preferred, with HTTP as the always-available fallback.
pub struct ApiFacade {
    rest: rest::RestClient,
    socket: Mutex<Option<socket::SocketClient>>,
}

impl ApiFacade {
    pub fn new(server_url: String, access_token: Option<String>) -> Self {
        Self {
            rest: rest::RestClient::new(server_url, access_token),
            socket: Mutex::new(None),
        }
    }

    pub async fn attach_socket(&self, client: socket::SocketClient) {
        *self.socket.lock().await = Some(client);
    }

    pub async fn detach_socket(&self) {
        *self.socket.lock().await = None;
    }

    pub async fn command(&self, name: &str, data: Option<Value>) -> Result<Option<Value>, ApiError> {
        {
            let guard = self.socket.lock().await;
            if let Some(socket) = guard.as_ref() {
                if socket.is_connected() {
                    match socket.command(name, data.clone()).await {
                        Ok(value) => return Ok(value),
                        Err(ApiError::Transport(_)) => {} // fall through to HTTP
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        self.rest.command(name, data).await
    }
}

/// The set of server operations the bot worker and worker manager need.
///
/// Expressed as a trait (rather than taking `ApiFacade` directly) so tests
/// can substitute a hand-rolled fake instead of pulling in a mocking
/// framework or a live server.
#[async_trait::async_trait]
pub trait ServerApi: Send + Sync {
    async fn get_bots(&self) -> Result<Vec<Bot>, ApiError>;
    async fn get_a_job(&self, bot_id: &str) -> Result<(), ApiError>;
    async fn start_job(&self, job_id: &str) -> Result<Job, ApiError>;
    async fn update_job_progress(&self, job_id: &str, progress: f64) -> Result<(), ApiError>;
    async fn finish_job(&self, job_id: &str) -> Result<Job, ApiError>;
    async fn bot_error(&self, bot_id: &str, error: &str) -> Result<(), ApiError>;
}

#[async_trait::async_trait]
impl ServerApi for ApiFacade {
    async fn get_bots(&self) -> Result<Vec<Bot>, ApiError> {
        let value = self
            .command(commands::CMD_GET_BOTS, None)
            .await?
            .unwrap_or(Value::Array(vec![]));
        commands::decode_bots(value).map_err(|err| ApiError::Transport(err.to_string()))
    }

    async fn get_a_job(&self, bot_id: &str) -> Result<(), ApiError> {
        let data = serde_json::to_value(commands::GetAJobRequest { bot: bot_id })
            .expect("serializable request");
        self.command(commands::CMD_GET_A_JOB, Some(data)).await?;
        Ok(())
    }

    async fn start_job(&self, job_id: &str) -> Result<Job, ApiError> {
        let data =
            serde_json::to_value(commands::StartJobRequest { id: job_id }).expect("serializable request");
        let value = self
            .command(commands::CMD_START_JOB, Some(data))
            .await?
            .ok_or_else(|| ApiError::Transport("StartJob returned no data".into()))?;
        commands::decode_job(value).map_err(|err| ApiError::Transport(err.to_string()))
    }

    async fn update_job_progress(&self, job_id: &str, progress: f64) -> Result<(), ApiError> {
        let data = serde_json::to_value(commands::UpdateJobProgressRequest {
            id: job_id,
            progress,
        })
        .expect("serializable request");
        match self.command(commands::CMD_UPDATE_JOB_PROGRESS, Some(data)).await {
            Ok(_) => Ok(()),
            // A domain error here typically means "progress can only
            // increase" — log and swallow per the error-handling design.
            Err(ApiError::Domain { code, message }) => {
                log::info!("update_job_progress rejected ({code}): {message}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn finish_job(&self, job_id: &str) -> Result<Job, ApiError> {
        let data =
            serde_json::to_value(commands::FinishJobRequest { id: job_id }).expect("serializable request");
        let value = self
            .command(commands::CMD_FINISH_JOB, Some(data))
            .await?
            .ok_or_else(|| ApiError::Transport("FinishJob returned no data".into()))?;
        commands::decode_job(value).map_err(|err| ApiError::Transport(err.to_string()))
    }

    async fn bot_error(&self, bot_id: &str, error: &str) -> Result<(), ApiError> {
        let data = serde_json::to_value(commands::BotErrorRequest { id: bot_id, error })
            .expect("serializable request");
        self.command(commands::CMD_BOT_ERROR, Some(data)).await?;
        Ok(())
    }
}
