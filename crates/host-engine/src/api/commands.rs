use printhost_core::{Bot, Job};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The name of a server RPC command (see `host::api::ApiFacade::command`).
pub const CMD_INFO: &str = "Info";
pub const CMD_GET_BOTS: &str = "GetBots";
pub const CMD_GET_A_JOB: &str = "GetAJob";
pub const CMD_START_JOB: &str = "StartJob";
pub const CMD_UPDATE_JOB_PROGRESS: &str = "UpdateJobProgress";
pub const CMD_FINISH_JOB: &str = "FinishJob";
pub const CMD_BOT_ERROR: &str = "BotError";

#[derive(Debug, Serialize)]
pub struct GetAJobRequest<'a> {
    pub bot: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StartJobRequest<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct UpdateJobProgressRequest<'a> {
    pub id: &'a str,
    pub progress: f64,
}

#[derive(Debug, Serialize)]
pub struct FinishJobRequest<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct BotErrorRequest<'a> {
    pub id: &'a str,
    pub error: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct InfoResponse {
    pub websocket: Option<WebsocketInfo>,
}

#[derive(Debug, Deserialize)]
pub struct WebsocketInfo {
    pub url: String,
    pub auth: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BotEnvelope {
    pub data: Bot,
}

/// Decodes `GetBots`'s response shape (a list of `{ data: BotJson }`
/// envelopes) into plain bot snapshots.
pub fn decode_bots(value: Value) -> serde_json::Result<Vec<Bot>> {
    let envelopes: Vec<BotEnvelope> = serde_json::from_value(value)?;
    Ok(envelopes.into_iter().map(|e| e.data).collect())
}

pub fn decode_job(value: Value) -> serde_json::Result<Job> {
    serde_json::from_value(value)
}
