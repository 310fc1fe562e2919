// riskgate/src/tasks.rs
//
// Bounded background job queue. The synchronous request path enqueues and
// returns; one worker drains at its own pace. Audit-log and alert failures
// are logged and swallowed — the request that produced them has already
// completed.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::alerts::AlertEngine;
use crate::events::RiskLogRecord;
use crate::store::RecordStore;

pub enum Job {
    AuditLog {
        record: RiskLogRecord,
    },
    RiskAlert {
        actor_id: String,
        risk_score: f64,
        record: RiskLogRecord,
    },
    UsageAlert {
        actor_id: String,
        key_id: String,
        usage: u64,
        limit: Option<u64>,
    },
}

#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<Job>,
}

impl BackgroundQueue {
    /// Spawn the worker and hand back the enqueue side. The handle lives for
    /// the process; client disconnects never cancel queued work.
    pub fn start(
        store: Arc<dyn RecordStore>,
        alerts: Arc<AlertEngine>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::AuditLog { record } => {
                        let inserted = store.create_risk_log(record);
                        if !inserted {
                            debug!("duplicate risk log skipped");
                        }
                    }
                    Job::RiskAlert { actor_id, risk_score, record } => {
                        let fired = alerts.process_risk_alert(&actor_id, risk_score, &record).await;
                        if !fired.is_empty() {
                            debug!(%actor_id, n = fired.len(), "risk alerts dispatched");
                        }
                    }
                    Job::UsageAlert { actor_id, key_id, usage, limit } => {
                        alerts.process_usage_alert(&actor_id, &key_id, usage, limit).await;
                    }
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Non-blocking enqueue. A full queue drops the job with a warning
    /// rather than stalling the request path.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                warn!("background queue rejected job: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LogEmailSink;
    use crate::events::RiskLevel;
    use crate::store::MemoryRecordStore;
    use chrono::Utc;
    use std::time::Duration;

    fn record(request: &str) -> RiskLogRecord {
        RiskLogRecord {
            user_id: "u1".into(),
            request_id: request.into(),
            risk_score: 3.0,
            risk_level: RiskLevel::Low,
            risks_detected: vec![],
            input_sanitized: false,
            output_sanitized: false,
            blocked: false,
            llm_provider: None,
            processing_ms: 1.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn audit_jobs_drain_to_the_store() {
        let store = Arc::new(MemoryRecordStore::new());
        let alerts = Arc::new(AlertEngine::new("", Arc::new(LogEmailSink)));
        let (queue, _handle) = BackgroundQueue::start(store.clone(), alerts, 64);

        assert!(queue.enqueue(Job::AuditLog { record: record("r1") }));
        assert!(queue.enqueue(Job::AuditLog { record: record("r1") })); // replay
        assert!(queue.enqueue(Job::AuditLog { record: record("r2") }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.list_risk_logs("u1", 10, 0).len(), 2);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        // Keep the receiver alive but never drain it.
        let (tx, _rx) = mpsc::channel::<Job>(1);
        let queue = BackgroundQueue { tx };

        assert!(queue.enqueue(Job::AuditLog { record: record("r1") }));
        assert!(!queue.enqueue(Job::AuditLog { record: record("r2") }));
    }
}
