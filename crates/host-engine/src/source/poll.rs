use std::collections::{HashMap, HashSet};

use printhost_core::Bot;
use tokio::sync::mpsc;

use super::BotEvent;

/// Diffs a freshly polled bot list against `cache`: emits `Added` for
/// unseen ids, `Updated` for ids whose snapshot changed by full structural
/// equality, and `Removed` for cached ids absent from the new list. The
/// cache is left matching the new list.
pub async fn reconcile(cache: &mut HashMap<String, Bot>, bots: Vec<Bot>, events_tx: &mpsc::Sender<BotEvent>) {
    let mut seen = HashSet::with_capacity(bots.len());

    for bot in bots {
        seen.insert(bot.id.clone());
        emit_if_changed(cache, bot, events_tx).await;
    }

    let removed: Vec<String> = cache
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    for id in removed {
        cache.remove(&id);
        let _ = events_tx.send(BotEvent::Removed(id)).await;
    }
}

/// Emits `Added` (unknown id) or `Updated` (structurally different from
/// the cached snapshot) for a single observed bot. A snapshot identical to
/// the cached one emits nothing, which is what makes polling safe to run
/// alongside a push channel without duplicating events.
pub async fn emit_if_changed(cache: &mut HashMap<String, Bot>, bot: Bot, events_tx: &mpsc::Sender<BotEvent>) {
    match cache.get(&bot.id) {
        None => {
            cache.insert(bot.id.clone(), bot.clone());
            let _ = events_tx.send(BotEvent::Added(bot)).await;
        }
        Some(prev) if *prev != bot => {
            cache.insert(bot.id.clone(), bot.clone());
            let _ = events_tx.send(BotEvent::Updated(bot)).await;
        }
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use printhost_core::BotStatus;

    use super::*;

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
    async fn reconcile_emits_added_updated_and_removed() {
        let mut cache = HashMap::new();
        let (tx, mut rx) = mpsc::channel(16);

        reconcile(&mut cache, vec![bot("a", BotStatus::Idle)], &tx).await;
        assert!(matches!(rx.recv().await, Some(BotEvent::Added(b)) if b.id == "a"));

        reconcile(&mut cache, vec![bot("a", BotStatus::Waiting)], &tx).await;
        assert!(matches!(rx.recv().await, Some(BotEvent::Updated(b)) if b.id == "a"));

        // Re-delivering the same snapshot emits nothing.
        reconcile(&mut cache, vec![bot("a", BotStatus::Waiting)], &tx).await;

        reconcile(&mut cache, vec![], &tx).await;
        assert!(matches!(rx.recv().await, Some(BotEvent::Removed(id)) if id == "a"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn unrelated_snapshot_produces_no_event_on_repoll() {
        let mut cache = HashMap::new();
        let (tx, mut rx) = mpsc::channel(16);

        reconcile(&mut cache, vec![bot("a", BotStatus::Idle)], &tx).await;
        rx.recv().await.unwrap();

        reconcile(&mut cache, vec![bot("a", BotStatus::Idle)], &tx).await;
        assert!(rx.try_recv().is_err());
    }
}
