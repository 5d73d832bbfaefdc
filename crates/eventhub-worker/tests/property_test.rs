//! Property-based tests for queue invariants.
//!
//! Randomly generated workloads verify the claim ordering, the attempts
//! bound and the backoff envelope regardless of input shape.

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;

use eventhub_core::{Job, JobStatus, NewJob};
use eventhub_testing::MemoryJobStore;
use eventhub_worker::{BackoffPolicy, JobQueue};

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(32);
    ProptestConfig::with_cases(cases)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

fn seeded_store(specs: &[(i32, i64, i64)]) -> MemoryJobStore {
    let store = MemoryJobStore::new();
    let base = Utc::now() - ChronoDuration::seconds(3600);

    for (priority, run_offset_secs, created_offset_secs) in specs {
        let mut job = Job::from_request(
            NewJob::new("event.publish", serde_json::json!({})),
            base + ChronoDuration::seconds(*created_offset_secs),
        );
        job.run_at = base + ChronoDuration::seconds(*run_offset_secs);
        job.priority = *priority;
        store.insert(job);
    }

    store
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Claimed jobs come out in (priority DESC, run_at ASC, created_at ASC)
    /// order within a single worker.
    #[test]
    fn claim_order_is_deterministic(
        specs in prop::collection::vec((-5i32..5, 0i64..600, 0i64..600), 1..25)
    ) {
        runtime().block_on(async {
            let store = seeded_store(&specs);
            let total = specs.len();

            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next("prop-worker").await.unwrap() {
                claimed.push(job);
            }
            prop_assert_eq!(claimed.len(), total);

            for pair in claimed.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let ordered = (b.priority, a.run_at, a.created_at, a.id)
                    <= (a.priority, b.run_at, b.created_at, b.id);
                prop_assert!(
                    ordered,
                    "claim order violated: ({}, {}, {}) before ({}, {}, {})",
                    a.priority, a.run_at, a.created_at, b.priority, b.run_at, b.created_at
                );
            }
            Ok(())
        })?;
    }

    /// However failures are sequenced, attempts never exceed max_attempts
    /// and the invocation count equals the budget.
    #[test]
    fn attempts_are_bounded(max_attempts in 1i32..8) {
        runtime().block_on(async {
            let store = MemoryJobStore::new();
            let mut request = NewJob::new("event.publish", serde_json::json!({}));
            request.max_attempts = max_attempts;
            let job = store.enqueue(request).unwrap();

            // Drive the §4.5 failure policy by hand: reschedule while the
            // budget allows, dead-letter on the last attempt.
            let mut invocations = 0;
            while let Some(claimed) = store.claim_next("prop-worker").await.unwrap() {
                invocations += 1;
                let next = claimed.attempts + 1;
                if next < claimed.max_attempts {
                    store
                        .reschedule(claimed.id, Utc::now() - ChronoDuration::seconds(1), "boom")
                        .await
                        .unwrap();
                } else {
                    store.mark_failed(claimed.id, "boom").await.unwrap();
                }
            }

            let terminal = store.get(job.id).unwrap();
            prop_assert_eq!(terminal.status, JobStatus::Failed);
            prop_assert!(terminal.attempts <= terminal.max_attempts);
            prop_assert_eq!(invocations, max_attempts);
            Ok(())
        })?;
    }

    /// The backoff envelope holds for any attempt count:
    /// exponential component within [base, cap], jitter strictly bounded.
    #[test]
    fn backoff_envelope_holds(
        attempt in 0u32..512,
        base_ms in 1u64..5_000,
        cap_ms in 5_000u64..600_000,
    ) {
        let policy = BackoffPolicy {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
            jitter: Duration::from_millis(250),
        };

        let exponent = attempt.min(20);
        let expected = Duration::from_millis(base_ms)
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(Duration::from_millis(cap_ms));

        let delay = policy.delay(attempt);
        prop_assert!(delay >= expected);
        prop_assert!(delay < expected + Duration::from_millis(250));
        prop_assert!(delay < Duration::from_millis(cap_ms) + Duration::from_millis(250));
    }
}

/// Concurrent claimers never observe the same job in `processing`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_double_claim() {
    let store = Arc::new(MemoryJobStore::new());
    let total = 200;
    for _ in 0..total {
        store.enqueue(NewJob::new("event.publish", serde_json::json!({}))).unwrap();
    }

    let mut handles = Vec::new();
    for worker_num in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("claimer-{worker_num}");
            let mut mine = Vec::new();
            while let Some(job) = store.claim_next(&worker_id).await.unwrap() {
                mine.push(job.id);
            }
            mine
        }));
    }

    let mut seen = std::collections::HashSet::new();
    let mut claimed_total = 0;
    for handle in handles {
        for id in handle.await.unwrap() {
            claimed_total += 1;
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }

    assert_eq!(claimed_total, total);
    assert_eq!(store.count_with_status(JobStatus::Processing), total);
}
