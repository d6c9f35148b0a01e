use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dto::PbxEvent;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use super::PbxStatus;
use crate::config::Settings;

/// Fixed reconnect schedule (spec.md §4.2): six attempts with this backoff,
/// then the whole cycle pauses 60s and restarts.
const RECONNECT_SCHEDULE: [Duration; 6] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];
const CYCLE_PAUSE: Duration = Duration::from_secs(60);

/// A handler capability, kept private to the connector per spec.md §4.2's
/// "reject generic callbacks as the public API at the core boundary"
/// design note — callers outside this module never see a raw callback,
/// only the decoded `PbxEvent` sum type routed through here.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &PbxEvent);
}

impl<F: Fn(&PbxEvent) + Send + Sync> EventHandler for F {
    fn handle(&self, event: &PbxEvent) {
        self(event)
    }
}

fn event_type_name(event: &PbxEvent) -> &'static str {
    match event {
        PbxEvent::StasisStart { .. } => "StasisStart",
        PbxEvent::ChannelStateChange { .. } => "ChannelStateChange",
        PbxEvent::ChannelDestroyed { .. } => "ChannelDestroyed",
        PbxEvent::Other => "Other",
    }
}

pub struct PbxEventStream {
    ws_url: String,
    status: PbxStatus,
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
    wildcard: Option<Arc<dyn EventHandler>>,
    stop: Arc<AtomicBool>,
}

impl PbxEventStream {
    pub fn new(settings: &Settings, status: PbxStatus) -> Self {
        let scheme = if settings.ari_http_url.starts_with("https://") {
            "wss"
        } else {
            "ws"
        };
        let base = settings
            .ari_http_url
            .replacen("http://", "", 1)
            .replacen("https://", "", 1);
        let ws_url = format!(
            "{scheme}://{base}/events?app={}&api_key={}:{}",
            settings.ari_app, settings.ari_username, settings.ari_password
        );

        Self {
            ws_url,
            status,
            handlers: HashMap::new(),
            wildcard: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_handler(&mut self, event_type: &'static str, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type, handler);
    }

    pub fn register_wildcard(&mut self, handler: Arc<dyn EventHandler>) {
        self.wildcard = Some(handler);
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs forever until `stop` is set. Each outer iteration is one
    /// connect->listen cycle; loss of the socket falls back into the fixed
    /// reconnect schedule, then pauses and restarts (spec.md §4.2).
    pub async fn run(&self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }

            match self.connect_and_listen().await {
                Ok(()) => {
                    tracing::info!("PBX event socket closed cleanly");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "PBX event socket error");
                }
            }
            self.status.set_ws_connected(false);

            if self.stop.load(Ordering::Relaxed) {
                return;
            }

            for (attempt, delay) in RECONNECT_SCHEDULE.iter().enumerate() {
                if self.stop.load(Ordering::Relaxed) {
                    return;
                }
                tracing::info!(attempt = attempt + 1, delay_s = delay.as_secs(), "reconnecting to PBX event socket");
                tokio::time::sleep(*delay).await;

                match self.connect_and_listen().await {
                    Ok(()) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, attempt = attempt + 1, "reconnect attempt failed");
                        if attempt + 1 == RECONNECT_SCHEDULE.len() {
                            tracing::warn!(pause_s = CYCLE_PAUSE.as_secs(), "reconnect schedule exhausted, pausing cycle");
                            tokio::time::sleep(CYCLE_PAUSE).await;
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_listen(&self) -> anyhow::Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url).await?;
        tracing::info!("PBX event socket connected");
        self.status.set_ws_connected(true);

        let (mut write, mut read) = ws_stream.split();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }

            match read.next().await {
                Some(Ok(Message::Text(text))) => self.dispatch(&text),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    fn dispatch(&self, raw: &str) {
        let event: PbxEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode PBX event");
                return;
            }
        };

        let type_name = event_type_name(&event);
        tracing::debug!(event_type = type_name, "PBX event received");

        if let Some(handler) = self.handlers.get(type_name) {
            invoke_guarded(handler.as_ref(), &event);
        }
        if let Some(handler) = &self.wildcard {
            invoke_guarded(handler.as_ref(), &event);
        }
    }
}

/// Handler exceptions must be caught and logged, never terminate the
/// listener (spec.md §4.2) — `catch_unwind` is the Rust analogue of the
/// original's per-event `try/except`.
fn invoke_guarded(handler: &dyn EventHandler, event: &PbxEvent) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
    if let Err(panic) = result {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(panic = %message, "PBX event handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_schedule_matches_spec() {
        let seconds: Vec<u64> = RECONNECT_SCHEDULE.iter().map(|d| d.as_secs()).collect();
        assert_eq!(seconds, vec![1, 2, 5, 10, 30, 60]);
    }

    #[test]
    fn event_type_name_covers_all_variants() {
        assert_eq!(
            event_type_name(&PbxEvent::StasisStart {
                channel: dto::ChannelInfo {
                    id: "c1".into(),
                    state: None,
                    cause: None,
                    cause_txt: None,
                }
            }),
            "StasisStart"
        );
        assert_eq!(event_type_name(&PbxEvent::Other), "Other");
    }
}
