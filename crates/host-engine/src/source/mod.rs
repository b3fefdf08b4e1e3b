pub mod poll;
pub mod push;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use printhost_core::Bot;
use tokio::sync::mpsc;

use crate::api::{PushEvent, ServerApi};

/// A change to a bot's authoritative snapshot, as produced by polling or a
/// push-channel event.
#[derive(Debug, Clone)]
pub enum BotEvent {
    Added(Bot),
    Updated(Bot),
    Removed(String),
}

const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Produces an eventually-consistent stream of bot snapshot events: a
/// 60 s `GetBots` poll diffed against a local cache, plus (when a push
/// channel is supplied) immediate reconciliation of `BotUpdated` and
/// `JobAssignedToBot` push events. While the push channel is connected,
/// polling performs at most one reconciliation pass between push events,
/// to avoid redundant Added/Updated emissions; a push disconnect resets
/// that gate.
pub struct BotSource {
    api: Arc<dyn ServerApi>,
    poll_interval: Duration,
}

impl BotSource {
    pub fn new(api: Arc<dyn ServerApi>) -> Self {
        Self {
            api,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(api: Arc<dyn ServerApi>, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    /// Spawns the source's reconciliation loop and returns a channel of
    /// `BotEvent`s. `push_events` is the receiver half returned by a
    /// connected [`crate::api::socket::SocketClient`], if one is attached;
    /// its closing is treated as a push disconnect.
    pub fn spawn(self, push_events: Option<mpsc::Receiver<PushEvent>>) -> mpsc::Receiver<BotEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(self.run(tx, push_events));
        rx
    }

    async fn run(self, events_tx: mpsc::Sender<BotEvent>, mut push_events: Option<mpsc::Receiver<PushEvent>>) {
        let mut cache: HashMap<String, Bot> = HashMap::new();
        let mut reconciled_since_push = false;
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            let push_active = push_events.is_some();
            tokio::select! {
                _ = ticker.tick() => {
                    if push_active && reconciled_since_push {
                        continue;
                    }
                    if self.poll_once(&mut cache, &events_tx).await.is_ok() && push_active {
                        reconciled_since_push = true;
                    }
                }
                event = recv_optional(&mut push_events), if push_active => {
                    match event {
                        Some(event) => self.handle_push_event(event, &mut cache, &events_tx).await,
                        None => {
                            push_events = None;
                            reconciled_since_push = false;
                        }
                    }
                }
                else => break,
            }

            if events_tx.is_closed() {
                break;
            }
        }
    }

    async fn poll_once(
        &self,
        cache: &mut HashMap<String, Bot>,
        events_tx: &mpsc::Sender<BotEvent>,
    ) -> Result<(), ()> {
        match self.api.get_bots().await {
            Ok(bots) => {
                poll::reconcile(cache, bots, events_tx).await;
                Ok(())
            }
            Err(err) => {
                log::warn!("bot source: GetBots failed: {err:#}");
                Err(())
            }
        }
    }

    async fn handle_push_event(
        &self,
        event: PushEvent,
        cache: &mut HashMap<String, Bot>,
        events_tx: &mpsc::Sender<BotEvent>,
    ) {
        if event.name != "BotUpdated" && event.name != "JobAssignedToBot" {
            return;
        }
        match push::decode_push_bot(event.data) {
            Some(bot) => poll::emit_if_changed(cache, bot, events_tx).await,
            None => log::warn!("bot source: failed to decode push event {}", event.name),
        }
    }
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<PushEvent>>) -> Option<PushEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use printhost_core::BotStatus;

    use super::*;

    struct FakeApi {
        responses: StdMutex<Vec<Vec<Bot>>>,
    }

    #[async_trait::async_trait]
    impl ServerApi for FakeApi {
        async fn get_bots(&self) -> Result<Vec<Bot>, crate::api::ApiError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(vec![])
            } else {
                Ok(responses.remove(0))
            }
        }
        async fn get_a_job(&self, _bot_id: &str) -> Result<(), crate::api::ApiError> {
            Ok(())
        }
        async fn start_job(&self, job_id: &str) -> Result<printhost_core::Job, crate::api::ApiError> {
            unimplemented!("{job_id}")
        }
        async fn update_job_progress(&self, _job_id: &str, _progress: f64) -> Result<(), crate::api::ApiError> {
            Ok(())
        }
        async fn finish_job(&self, job_id: &str) -> Result<printhost_core::Job, crate::api::ApiError> {
            unimplemented!("{job_id}")
        }
        async fn bot_error(&self, _bot_id: &str, _error: &str) -> Result<(), crate::api::ApiError> {
            Ok(())
        }
    }

    fn bot(id: &str, status: BotStatus) -> Bot {
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

    #[tokio::test]
    async fn polling_alone_emits_added_then_updated() {
        let api = Arc::new(FakeApi {
            responses: StdMutex::new(vec![
                vec![bot("bot-1", BotStatus::Idle)],
                vec![bot("bot-1", BotStatus::Waiting)],
            ]),
        });
        let source = BotSource::with_interval(api, Duration::from_millis(10));
        let mut events = source.spawn(None);

        let first = events.recv().await.unwrap();
        assert!(matches!(first, BotEvent::Added(b) if b.id == "bot-1"));

        let second = events.recv().await.unwrap();
        assert!(matches!(second, BotEvent::Updated(b) if b.id == "bot-1" && b.status == BotStatus::Waiting));
    }
}
