use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::adapters::UserDirectory;
use crate::message::{EnrichedMessage, Message};

/// Display name for messages without an author.
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Resolve display names for every distinct author, concurrently, and
/// attach them to `messages` in their original order.
///
/// A failed or blank lookup falls back to the raw user id; it never fails
/// the batch.
pub async fn enrich_messages(
    directory: &dyn UserDirectory,
    messages: Vec<Message>,
) -> Vec<EnrichedMessage> {
    let user_ids: BTreeSet<String> = messages
        .iter()
        .filter_map(|m| m.user_id.clone())
        .collect();

    let lookups = user_ids.into_iter().map(|user_id| async move {
        let result = directory.display_name(&user_id).await;
        (user_id, result)
    });

    let names: HashMap<String, String> = join_all(lookups)
        .await
        .into_iter()
        .map(|(user_id, result)| {
            let name = match result {
                Ok(name) if !name.trim().is_empty() => name,
                Ok(_) => user_id.clone(),
                Err(err) => {
                    warn!(user = %user_id, error = %err, "user lookup failed, using id as display name");
                    user_id.clone()
                }
            };
            (user_id, name)
        })
        .collect();
    debug!(users = names.len(), "resolved display names");

    messages
        .into_iter()
        .map(|message| {
            let name = message
                .user_id
                .as_ref()
                .and_then(|id| names.get(id).cloned())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
            EnrichedMessage::new(message, name)
        })
        .collect()
}
