use serde::Serialize;
use serde_json::Value;

use super::ApiError;

#[derive(Serialize)]
struct RpcRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// HTTP transport for the RPC envelope: `POST {server_url}/host`.
pub struct RestClient {
    client: reqwest::Client,
    server_url: String,
    access_token: Option<String>,
}

impl RestClient {
    pub fn new(server_url: String, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url,
            access_token,
        }
    }

    pub async fn command(&self, name: &str, data: Option<Value>) -> Result<Option<Value>, ApiError> {
        let url = format!("{}/host", self.server_url.trim_end_matches('/'));
        let mut req = self.client.post(url).json(&RpcRequest { command: name, data });
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body.get("data").cloned());
        }
        if let Some(code) = body.get("code").and_then(Value::as_i64) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ApiError::Domain {
                code: code as i32,
                message,
            });
        }
        Err(ApiError::Transport(format!(
            "unrecognized response envelope: {body}"
        )))
    }
}
