use printhost_core::Bot;
use serde_json::Value;

/// Decodes a push event payload into a bot snapshot. The server has been
/// observed to send either the bare `BotJson` object or the same
/// `{ data: BotJson }` envelope `GetBots` uses; both are accepted.
pub fn decode_push_bot(data: Value) -> Option<Bot> {
    if let Some(envelope) = data.get("data") {
        if let Ok(bot) = serde_json::from_value::<Bot>(envelope.clone()) {
            return Some(bot);
        }
    }
    serde_json::from_value::<Bot>(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_and_enveloped_shapes() {
        let bare = serde_json::json!({ "id": "bot-1", "name": "Printer", "status": "idle" });
        assert_eq!(decode_push_bot(bare).unwrap().id, "bot-1");

        let enveloped = serde_json::json!({
            "data": { "id": "bot-2", "name": "Printer", "status": "idle" }
        });
        assert_eq!(decode_push_bot(enveloped).unwrap().id, "bot-2");
    }

    #[test]
    fn garbage_payload_decodes_to_none() {
        assert!(decode_push_bot(serde_json::json!("not a bot")).is_none());
    }
}
