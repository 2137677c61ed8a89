//! Banking Event Receiver - worker binary
//!
//! ```text
//! banking_event_receiver [--env dev] [--messages fixtures/messages.jsonl]
//! ```
//!
//! `--messages` pre-loads the in-memory queue with one JSON payload per line.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use banking_event_receiver::config::AppConfig;
use banking_event_receiver::logging::init_logging;
use banking_event_receiver::{
    AccountStore, InMemoryAccountStore, InMemoryQueue, JsonTransactionDecoder, MessageProcessor,
    MessageWorker, PostgresAccountStore, QueueClient, WorkerConfig,
};

// ============================================================
// COMMAND LINE
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_messages_file() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--messages" && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

// ============================================================
// BOOTSTRAP
// ============================================================

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AccountStore>> {
    let settings = &config.store;

    if let Some(url) = &settings.postgres_url {
        let store = PostgresAccountStore::connect(
            url,
            settings.max_connections,
            Duration::from_millis(settings.timeout_ms),
        )
        .await
        .context("Failed to connect to PostgreSQL")?;
        store
            .ensure_schema()
            .await
            .context("Failed to create bank_accounts table")?;

        for seed in &config.seed_accounts {
            if store.insert_account(seed.id, seed.balance).await? {
                tracing::info!(account_id = %seed.id, balance = %seed.balance, "Seeded account");
            }
        }
        return Ok(Arc::new(store));
    }

    tracing::warn!("No postgres_url configured, using in-memory account store");
    let store =
        InMemoryAccountStore::with_accounts(config.seed_accounts.iter().map(|s| (s.id, s.balance)));
    tracing::info!(accounts = store.len(), "Seeded in-memory accounts");
    Ok(Arc::new(store))
}

async fn load_messages(queue: &InMemoryQueue, path: &str) -> anyhow::Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read messages file: {}", path))?;

    let mut count = 0;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        queue.send(line.as_bytes().to_vec()).await;
        count += 1;
    }
    Ok(count)
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).context("Failed to load configuration")?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        mode = %app_config.processor.mode,
        "Starting Banking Event Receiver in {} mode",
        env
    );

    let store = build_store(&app_config).await?;

    let queue = Arc::new(InMemoryQueue::new(app_config.queue.max_delivery_count));
    if let Some(path) = get_messages_file() {
        let count = load_messages(&queue, &path).await?;
        tracing::info!(count, path = %path, "Loaded messages into queue");
    }

    let decoder = if app_config.processor.permissive_decoding {
        JsonTransactionDecoder::permissive()
    } else {
        JsonTransactionDecoder::strict()
    };
    let queue_client: Arc<dyn QueueClient> = queue.clone();
    let processor = Arc::new(MessageProcessor::new(
        queue_client,
        store.clone(),
        Arc::new(decoder),
        app_config.processor.policy(),
    ));

    let worker = MessageWorker::new(processor, WorkerConfig::from(&app_config.worker));

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        shutdown.request_shutdown();
    });

    tracing::info!(store = store.name(), "Worker running, press Ctrl-C to stop");
    worker.run().await;

    let remaining = queue.len().await;
    let dead_letters = queue.dead_letters().await;
    for dead in &dead_letters {
        tracing::warn!(message_id = %dead.message.id, reason = %dead.reason, "Dead-lettered message");
    }
    tracing::info!(
        remaining,
        dead_letters = dead_letters.len(),
        "{}",
        worker.stats().snapshot()
    );

    Ok(())
}
