use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::Message;
use time::OffsetDateTime;
use tracing::{info, warn};

use recall_recovery::cache::{ContextReadySignal, StateCache};
use recall_recovery::codec::{decode_oms_payload, decode_ticket};
use recall_recovery::journal::{entry_from_payload, TransactionJournal};
use recall_recovery::kafka::KafkaOutboundClient;
use recall_recovery::model::LogPayload;
use recall_recovery::recovery::{Bookmarks, RecoveryConfig, RecoveryDriver};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut cfg = RecoveryConfig::default();
    cfg.timeout_ms = getenv_u64("RECOVERY_TIMEOUT_MS", cfg.timeout_ms);
    cfg.ticket_history_topic = getenv("RECOVERY_TICKET_HISTORY_TOPIC", &cfg.ticket_history_topic);
    cfg.recall_to_oms_topic = getenv("RECOVERY_RECALL_TO_OMS_TOPIC", &cfg.recall_to_oms_topic);
    cfg.oms_to_recall_topic = getenv("RECOVERY_OMS_TO_RECALL_TOPIC", &cfg.oms_to_recall_topic);
    cfg.recall_ticket_topic = getenv("RECOVERY_RECALL_TICKET_TOPIC", &cfg.recall_ticket_topic);
    cfg.dfd_request_topic = getenv("RECOVERY_DFD_REQUEST_TOPIC", &cfg.dfd_request_topic);

    let brokers = getenv("RECOVERY_KAFKA_BROKERS", "localhost:9092");
    let group = getenv("RECOVERY_KAFKA_GROUP", "recall-recovery");
    let bookmarks = Bookmarks::from_raw(
        &getenv("RECOVERY_TICKET_BOOKMARK", ""),
        &getenv("RECOVERY_OMS_BOOKMARK", ""),
    );

    let cache = Arc::new(StateCache::new());
    let journal = Arc::new(TransactionJournal::new());

    let replay_cfg = cfg.clone();
    let replay_brokers = brokers.clone();
    let replay_journal = Arc::clone(&journal);
    let replay = std::thread::spawn(move || {
        replay_topics(&replay_cfg, &replay_brokers, &group, &replay_journal);
    });

    let outbound = match KafkaOutboundClient::new(&brokers, Duration::from_secs(2)) {
        Ok(client) => Some(client),
        Err(err) => {
            warn!(%err, "outbound client unavailable, republish and dfd steps will be skipped");
            None
        }
    };
    let mut driver = RecoveryDriver::new(cfg, Arc::clone(&cache), outbound);

    let driver_journal = Arc::clone(&journal);
    let signal = ContextReadySignal::new(Arc::clone(&cache), move || {
        driver.run(&driver_journal, bookmarks);
    });
    signal.context_refreshed();

    replay.join().map_err(|_| "replay thread panicked")?;

    info!(
        initialized = cache.is_initialized(),
        tickets = cache.ticket_count(),
        orders = cache.order_count(),
        "recall recovery service ready"
    );
    Ok(())
}

/// Replays the three transaction-log topics into the journal until the
/// replay window closes, then marks every stream caught-up so the driver
/// proceeds. A missing broker degrades to an empty-log recovery.
fn replay_topics(cfg: &RecoveryConfig, brokers: &str, group: &str, journal: &TransactionJournal) {
    let topics = [
        cfg.ticket_history_topic.as_str(),
        cfg.recall_to_oms_topic.as_str(),
        cfg.oms_to_recall_topic.as_str(),
    ];

    let consumer: BaseConsumer = match ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()
    {
        Ok(consumer) => consumer,
        Err(err) => {
            warn!(%err, "replay consumer unavailable, recovering from an empty log");
            mark_all_caught_up(journal, &topics);
            return;
        }
    };
    if let Err(err) = consumer.subscribe(&topics) {
        warn!(%err, "replay subscription failed, recovering from an empty log");
        mark_all_caught_up(journal, &topics);
        return;
    }

    let deadline = Instant::now() + Duration::from_millis(cfg.timeout_ms);
    while Instant::now() < deadline {
        let message = match consumer.poll(Duration::from_millis(50)) {
            None => continue,
            Some(Err(err)) => {
                warn!(%err, "replay poll error");
                continue;
            }
            Some(Ok(message)) => message,
        };
        let topic = message.topic().to_string();
        let Some(Ok(payload)) = message.payload_view::<str>() else {
            warn!(topic = %topic, "non-utf8 payload dropped");
            continue;
        };
        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(|ms| {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
            })
            .unwrap_or_else(OffsetDateTime::now_utc);

        let decoded = if topic == cfg.ticket_history_topic {
            decode_ticket(payload).map(LogPayload::Ticket)
        } else {
            decode_oms_payload(payload)
        };
        match decoded {
            Ok(decoded) => match entry_from_payload(&topic, decoded, timestamp) {
                Ok(entry) => journal.append(entry),
                Err(err) => warn!(topic = %topic, %err, "log entry dropped"),
            },
            Err(err) => warn!(topic = %topic, %err, "malformed payload dropped"),
        }
    }

    mark_all_caught_up(journal, &topics);
    info!(
        entries = journal.entry_count(),
        orders = journal.order_count(),
        "replay window closed"
    );
}

fn mark_all_caught_up(journal: &TransactionJournal, topics: &[&str]) {
    for topic in topics {
        journal.mark_caught_up(topic);
    }
}

fn getenv(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn getenv_u64(key: &str, fallback: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(fallback)
}
