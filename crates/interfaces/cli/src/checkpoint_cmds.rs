use anyhow::Result;

use recap_config::AppConfig;
use recap_digest::{CheckpointStore, MANUAL_CURSOR, SCHEDULED_CURSOR};

pub(crate) async fn run_show(config: &AppConfig) -> Result<()> {
    let store = CheckpointStore::new(&config.checkpoint.path);
    let document = store.load_all().await?;

    println!("── checkpoints ({}) ──────────────────────────────────", store.path().display());
    if !config.checkpoint.enabled {
        println!("  (checkpointing disabled; cursors are neither read nor written)");
    }
    for cursor in [SCHEDULED_CURSOR, MANUAL_CURSOR] {
        if !document.contains_key(cursor) {
            println!("  {cursor:<10} : (never run)");
        }
    }
    for (cursor, value) in &document {
        println!("  {cursor:<10} : {}", value.as_deref().unwrap_or("(reset)"));
    }
    Ok(())
}

pub(crate) async fn run_reset(config: &AppConfig, cursor: &str) -> Result<()> {
    let store = CheckpointStore::new(&config.checkpoint.path);
    if store.reset(cursor).await? {
        println!("cursor `{cursor}` reset; its next run uses the lookback window");
    } else {
        println!("cursor `{cursor}` had no stored value");
    }
    Ok(())
}
