//! Append-only collaboration store
//!
//! One log per (slot, session). All cross-slot communication goes through
//! appends tagged with the session id; nothing is ever mutated or deleted,
//! except that in-memory logs are capped and shed their oldest entries behind
//! a truncation marker. Every successful append is mirrored to the event bus.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::collab::bus::SharedEventBus;
use crate::domain::{Phase, SlotEvent};

pub const TRUNCATED_EVENT: &str = "log.truncated";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Persistence error for {slot}/{session}: {source}")]
    Persist {
        slot: String,
        session: String,
        #[source]
        source: std::io::Error,
    },
}

struct SlotLog {
    events: VecDeque<SlotEvent>,
    dropped: u64,
    last_ts: f64,
}

impl SlotLog {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            dropped: 0,
            last_ts: 0.0,
        }
    }
}

pub struct CollabStore {
    logs: RwLock<HashMap<(String, String), SlotLog>>,
    bus: SharedEventBus,
    max_events_per_log: usize,
    persist_root: Option<PathBuf>,
}

impl CollabStore {
    pub fn new(bus: SharedEventBus, max_events_per_log: usize, persist_root: Option<PathBuf>) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            bus,
            max_events_per_log: max_events_per_log.max(2),
            persist_root,
        }
    }

    /// Append one event to its (slot, session) log.
    ///
    /// Timestamps are clamped nondecreasing within the log. When persistence
    /// is enabled the JSONL line is flushed before this returns, so a crash
    /// loses at most events whose append had not yet completed.
    pub async fn append(&self, mut event: SlotEvent) -> Result<SlotEvent, StoreError> {
        let key = (event.slot.clone(), event.session.clone());
        {
            let mut logs = self.logs.write().await;
            let log = logs.entry(key).or_insert_with(SlotLog::new);

            if event.ts < log.last_ts {
                event.ts = log.last_ts;
            }
            log.last_ts = event.ts;

            self.persist(&event)?;

            log.events.push_back(event.clone());
            if log.events.len() > self.max_events_per_log {
                // Shed oldest entries, leaving room for the marker at the
                // head. The marker itself never counts as a dropped event.
                while log.events.len() >= self.max_events_per_log {
                    if let Some(old) = log.events.pop_front() {
                        if old.event != TRUNCATED_EVENT {
                            log.dropped += 1;
                        }
                    }
                }
                let mut marker = SlotEvent::new(
                    &event.slot,
                    &event.session,
                    Phase::Meta,
                    TRUNCATED_EVENT,
                    "",
                )
                .with_meta("dropped", log.dropped.to_string());
                // The marker heads the log; give it the timestamp of the
                // oldest surviving event so per-log order stays monotonic.
                marker.ts = log.events.front().map(|e| e.ts).unwrap_or(event.ts);
                log.events.push_front(marker);
            }
        }

        self.bus.publish(event.clone());
        Ok(event)
    }

    /// Last `n` events for a slot, newest first, across all of its sessions.
    pub async fn head(&self, slot: &str, n: usize) -> Vec<SlotEvent> {
        let mut events = self.slot_events(slot, f64::MIN).await;
        events.reverse();
        events.truncate(n.max(1));
        events
    }

    /// Events for a slot strictly after `ts`, oldest first.
    pub async fn tail_since(&self, slot: &str, ts: f64) -> Vec<SlotEvent> {
        self.slot_events(slot, ts).await
    }

    /// All of a slot's events strictly after `ts`, oldest first. Append
    /// position breaks timestamp ties within a log.
    async fn slot_events(&self, slot: &str, ts: f64) -> Vec<SlotEvent> {
        let logs = self.logs.read().await;
        let mut indexed: Vec<(f64, usize, SlotEvent)> = logs
            .iter()
            .filter(|((s, _), _)| s == slot)
            .flat_map(|(_, log)| {
                log.events
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.ts > ts)
                    .map(|(i, e)| (e.ts, i, e.clone()))
            })
            .collect();
        indexed.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        indexed.into_iter().map(|(_, _, e)| e).collect()
    }

    /// All events for one session, grouped by slot, each in append order.
    pub async fn session_snapshot(&self, session: &str) -> HashMap<String, Vec<SlotEvent>> {
        let logs = self.logs.read().await;
        let mut snapshot: HashMap<String, Vec<SlotEvent>> = HashMap::new();
        for ((slot, s), log) in logs.iter() {
            if s == session {
                snapshot
                    .entry(slot.clone())
                    .or_default()
                    .extend(log.events.iter().cloned());
            }
        }
        snapshot
    }

    fn persist(&self, event: &SlotEvent) -> Result<(), StoreError> {
        let Some(root) = &self.persist_root else {
            return Ok(());
        };
        let persist = || -> std::io::Result<()> {
            let dir = root.join(&event.slot);
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(format!("{}.jsonl", event.session));
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let line = serde_json::to_string(event)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
            file.flush()
        };
        persist().map_err(|source| StoreError::Persist {
            slot: event.slot.clone(),
            session: event.session.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::bus::{EventBus, EventFilter};
    use crate::domain::SlotEvent;

    fn store() -> (CollabStore, SharedEventBus) {
        let bus = EventBus::new(64, 8).shared();
        (CollabStore::new(bus.clone(), 1024, None), bus)
    }

    fn event(slot: &str, session: &str, text: &str) -> SlotEvent {
        SlotEvent::ok(slot, session, Phase::Proposal, text)
    }

    #[tokio::test]
    async fn test_append_then_head_returns_event() {
        let (store, _bus) = store();
        store.append(event("dexter", "s-1", "hello")).await.unwrap();

        let head = store.head("dexter", 1).await;
        assert_eq!(head.len(), 1);
        assert_eq!(head[0].text, "hello");
    }

    #[tokio::test]
    async fn test_head_is_newest_first() {
        let (store, _bus) = store();
        for i in 0..5 {
            store.append(event("dexter", "s-1", &format!("e{}", i))).await.unwrap();
        }
        let head = store.head("dexter", 3).await;
        assert_eq!(head.len(), 3);
        assert_eq!(head[0].text, "e4");
        assert_eq!(head[2].text, "e2");
    }

    #[tokio::test]
    async fn test_head_returns_all_when_fewer_exist() {
        let (store, _bus) = store();
        store.append(event("dexter", "s-1", "only")).await.unwrap();
        assert_eq!(store.head("dexter", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_tail_since_is_strict_and_oldest_first() {
        let (store, _bus) = store();
        let first = store.append(event("dexter", "s-1", "a")).await.unwrap();
        store.append(event("dexter", "s-1", "b")).await.unwrap();
        store.append(event("dexter", "s-1", "c")).await.unwrap();

        let tail = store.tail_since("dexter", first.ts).await;
        assert!(tail.iter().all(|e| e.ts > first.ts));
        for pair in tail.windows(2) {
            assert!(pair[0].ts <= pair[1].ts);
        }
    }

    #[tokio::test]
    async fn test_timestamps_nondecreasing_per_log() {
        let (store, _bus) = store();
        let mut stale = event("dexter", "s-1", "late");
        stale.ts = 1.0;
        store.append(event("dexter", "s-1", "now")).await.unwrap();
        let appended = store.append(stale).await.unwrap();
        // Clamped up to the log's last timestamp, never backwards.
        let head = store.head("dexter", 2).await;
        assert!(appended.ts >= head[1].ts);
    }

    #[tokio::test]
    async fn test_append_publishes_to_bus() {
        let (store, bus) = store();
        let mut stream = bus.subscribe(EventFilter::new().slot("dexter")).unwrap();

        store.append(event("dexter", "s-1", "published")).await.unwrap();

        let seen = stream.recv().await.unwrap();
        assert_eq!(seen.text, "published");
    }

    #[tokio::test]
    async fn test_log_cap_truncates_with_marker() {
        let bus = EventBus::new(64, 8).shared();
        let store = CollabStore::new(bus, 4, None);

        for i in 0..10 {
            store.append(event("dexter", "s-1", &format!("e{}", i))).await.unwrap();
        }

        let snapshot = store.session_snapshot("s-1").await;
        let log = &snapshot["dexter"];
        assert!(log.len() <= 5);
        assert_eq!(log[0].event, TRUNCATED_EVENT);
        assert!(log[0].meta.get("dropped").unwrap().parse::<u64>().unwrap() > 0);
        // Newest events survive.
        assert_eq!(log.last().unwrap().text, "e9");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (store, _bus) = store();
        store.append(event("dexter", "s-1", "one")).await.unwrap();
        store.append(event("dexter", "s-2", "two")).await.unwrap();

        let snapshot = store.session_snapshot("s-1").await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["dexter"].len(), 1);
        assert_eq!(snapshot["dexter"][0].text, "one");
    }

    #[tokio::test]
    async fn test_jsonl_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(64, 8).shared();
        let store = CollabStore::new(bus, 1024, Some(dir.path().to_path_buf()));

        store.append(event("dexter", "s-1", "persisted")).await.unwrap();
        store.append(event("dexter", "s-1", "twice")).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("dexter").join("s-1.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: SlotEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.text, "persisted");
    }
}
