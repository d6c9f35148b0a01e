use std::time::Duration;

use reqwest::{Client, StatusCode};
use uuid::Uuid;

use crate::config::Settings;

/// Outcome of an `originate` RPC. `channel_id` is always the
/// client-generated UUID, never whatever id the PBX later assigns
/// (spec.md §4.2) — the reconciler keys off this value.
#[derive(Debug, Clone)]
pub struct OriginateOutcome {
    pub ok: bool,
    pub channel_id: Uuid,
    pub error: Option<String>,
}

pub struct PbxRestClient {
    http: Client,
    base_url: String,
    app: String,
    username: String,
    password: String,
    default_context: String,
    default_extension: String,
    default_priority: i32,
    default_timeout_ms: i32,
    default_caller_id: String,
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

impl PbxRestClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(20)
            .build()?;

        Ok(Self {
            http,
            base_url: settings.ari_http_url.trim_end_matches('/').to_string(),
            app: settings.ari_app.clone(),
            username: settings.ari_username.clone(),
            password: settings.ari_password.clone(),
            default_context: settings.default_context.clone(),
            default_extension: settings.default_extension.clone(),
            default_priority: settings.default_priority,
            default_timeout_ms: settings.default_timeout,
            default_caller_id: settings.default_caller_id.clone(),
        })
    }

    /// Validate credentials against `/applications`. Failure is non-fatal —
    /// the caller records `connected_ok=false` and keeps serving requests
    /// the circuit breaker will then reject (spec.md §4.2).
    pub async fn probe(&self) -> bool {
        match self
            .http
            .get(format!("{}/applications", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
        {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(err) => {
                tracing::warn!(error = %err, "ARI probe failed");
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn originate(
        &self,
        phone_number: &str,
        context: Option<&str>,
        extension: Option<&str>,
        priority: Option<i32>,
        timeout_ms: Option<i32>,
        caller_id: Option<&str>,
        variables: Option<&serde_json::Value>,
    ) -> OriginateOutcome {
        let context = context.unwrap_or(&self.default_context);
        let extension = extension.unwrap_or(&self.default_extension);
        let priority = priority.unwrap_or(self.default_priority);
        let timeout_ms = timeout_ms.unwrap_or(self.default_timeout_ms);
        let caller_id = caller_id.unwrap_or(&self.default_caller_id);
        let channel_id = Uuid::new_v4();

        let mut params = vec![
            ("endpoint".to_string(), format!("Local/{phone_number}@{context}")),
            ("app".to_string(), self.app.clone()),
            ("callerId".to_string(), caller_id.to_string()),
            ("timeout".to_string(), (timeout_ms / 1000).max(1).to_string()),
            ("channelId".to_string(), channel_id.to_string()),
            ("extension".to_string(), extension.to_string()),
            ("priority".to_string(), priority.to_string()),
        ];
        if let Some(vars) = variables {
            params.push(("variables".to_string(), vars.to_string()));
        }

        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            let outcome = self.try_originate(&params, channel_id).await;
            match outcome {
                Ok(result) => return result,
                Err(TransientFailure { retryable, error }) => {
                    last_error = Some(error);
                    attempts += 1;
                    if !retryable || attempts >= 3 {
                        break;
                    }
                    let backoff = Duration::from_secs_f64(0.3 * 2f64.powi(attempts as i32 - 1));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        OriginateOutcome {
            ok: false,
            channel_id,
            error: last_error,
        }
    }

    async fn try_originate(
        &self,
        params: &[(String, String)],
        channel_id: Uuid,
    ) -> Result<OriginateOutcome, TransientFailure> {
        let resp = self
            .http
            .post(format!("{}/channels", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .query(params)
            .send()
            .await
            .map_err(|err| TransientFailure {
                retryable: err.is_timeout() || err.is_connect(),
                error: err.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(OriginateOutcome {
                ok: true,
                channel_id,
                error: None,
            });
        }

        let retryable = is_retryable_status(status);
        Err(TransientFailure {
            retryable,
            error: format!("ARI error {status}"),
        })
    }

    /// `2xx`/`204` is success, per spec.md §4.2.
    pub async fn hangup(&self, channel_id: &str) -> bool {
        match self
            .http
            .delete(format!("{}/channels/{}", self.base_url, channel_id))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success() || resp.status() == StatusCode::NO_CONTENT,
            Err(err) => {
                tracing::warn!(error = %err, %channel_id, "ARI hangup request failed");
                false
            }
        }
    }
}

struct TransientFailure {
    retryable: bool,
    error: String,
}
