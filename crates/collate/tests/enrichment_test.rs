//! Enrichment client behavior under failures, concurrency and cancellation.
//!
//! All tests run on a paused tokio clock, so timeouts and backoff delays
//! elapse instantly and elapsed times are deterministic.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use collate::enrich::{
    EnrichmentCache, EnrichmentClient, EnrichmentStatus, MockOutcome, MockTransport,
    TransportError,
};
use collate::normalize::KeyNamespace;
use collate::{CollateConfig, Dataset, EnrichTarget, EnrichmentConfig, NormalizedKey, Pipeline};

fn key(v: &str) -> NormalizedKey {
    NormalizedKey::new(KeyNamespace::Issn, v)
}

fn keys(n: usize) -> Vec<NormalizedKey> {
    (0..n).map(|i| key(&format!("{:08}", i))).collect()
}

fn config() -> EnrichmentConfig {
    EnrichmentConfig {
        batch_size: 10,
        max_concurrency: 2,
        retry_ceiling: 3,
        request_timeout: Duration::from_secs(1),
        min_request_interval: Duration::ZERO,
        backoff_base: Duration::from_millis(100),
        max_backoff: Duration::from_secs(5),
        rate_limit_backoff: Duration::from_secs(2),
        ..EnrichmentConfig::default()
    }
}

fn client(transport: Arc<MockTransport>, config: EnrichmentConfig) -> EnrichmentClient {
    EnrichmentClient::new(transport, Arc::new(EnrichmentCache::new()), config)
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_timeouts_then_success() {
    let transport = Arc::new(
        MockTransport::new()
            .with_title("00280836", "Nature")
            .with_script(vec![MockOutcome::Hang, MockOutcome::Hang]),
    );
    let client = client(transport.clone(), config());

    let start = Instant::now();
    let report = client
        .enrich(vec![key("00280836")], &CancellationToken::new())
        .await;
    let elapsed = start.elapsed();

    assert_eq!(transport.call_count(), 3);
    assert_eq!(report.requests, 3);
    assert_eq!(report.entries[&key("00280836")].status, EnrichmentStatus::Success);

    // Two timeouts plus two backoff delays: [50, 100] ms then [100, 200] ms.
    assert!(elapsed >= Duration::from_millis(2150), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(2300), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_exhausted_marks_batch_failed() {
    let transport = Arc::new(MockTransport::new().with_script(vec![
        MockOutcome::Fail(TransportError::Server { status: 500 }),
        MockOutcome::Fail(TransportError::Server { status: 502 }),
        MockOutcome::Fail(TransportError::Server { status: 503 }),
        MockOutcome::Fail(TransportError::Server { status: 504 }),
    ]));
    let client = client(transport.clone(), config());

    let report = client
        .enrich(vec![key("00280836"), key("1050124X")], &CancellationToken::new())
        .await;

    assert_eq!(transport.call_count(), 4);
    assert_eq!(report.count(EnrichmentStatus::Failed), 2);
    let entry = &report.entries[&key("1050124X")];
    assert_eq!(entry.error.as_deref(), Some("server error (HTTP 504)"));
}

#[tokio::test(start_paused = true)]
async fn test_only_exhausted_batches_fail() {
    let transport = Arc::new(
        MockTransport::echo()
            .with_failing_key(key("00000003"))
            .with_failing_key(key("00000007")),
    );
    let config = EnrichmentConfig {
        batch_size: 1,
        max_concurrency: 3,
        ..config()
    };
    let client = client(transport.clone(), config);

    let report = client.enrich(keys(10), &CancellationToken::new()).await;

    assert_eq!(report.entries.len(), 10);
    for (k, entry) in &report.entries {
        let expected = if k.value() == "00000003" || k.value() == "00000007" {
            EnrichmentStatus::Failed
        } else {
            EnrichmentStatus::Success
        };
        assert_eq!(entry.status, expected, "key {}", k);
    }
    // Eight successes plus four attempts for each failing key.
    assert_eq!(report.requests, 8 + 2 * 4);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_for_retry_after() {
    let transport = Arc::new(MockTransport::echo().with_script(vec![MockOutcome::Fail(
        TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        },
    )]));
    let client = client(transport.clone(), config());

    let start = Instant::now();
    let report = client
        .enrich(vec![key("00280836")], &CancellationToken::new())
        .await;

    assert!(start.elapsed() >= Duration::from_secs(7));
    assert_eq!(report.count(EnrichmentStatus::Success), 1);
}

#[tokio::test(start_paused = true)]
async fn test_huge_retry_after_is_clamped() {
    let transport = Arc::new(MockTransport::echo().with_script(vec![MockOutcome::Fail(
        TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(86_400)),
        },
    )]));
    let config = EnrichmentConfig {
        max_retry_after: Duration::from_secs(10),
        ..config()
    };
    let client = client(transport.clone(), config);

    let start = Instant::now();
    let report = client
        .enrich(vec![key("00280836")], &CancellationToken::new())
        .await;

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(11), "elapsed {:?}", elapsed);
    assert_eq!(report.count(EnrichmentStatus::Success), 1);
}

// =============================================================================
// Batching and Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_each_key_requested_once() {
    let transport = Arc::new(MockTransport::echo().with_latency(Duration::from_millis(50)));
    let client = client(transport.clone(), config());

    let mut requested = keys(35);
    requested.extend(keys(35));
    let report = client.enrich(requested, &CancellationToken::new()).await;

    assert_eq!(report.requested, 35);
    assert_eq!(report.batches, 4);
    let calls = transport.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|c| c.len() <= 10));

    let mut sent: Vec<NormalizedKey> = calls.into_iter().flatten().collect();
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 35);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounds_elapsed_time() {
    let transport = Arc::new(MockTransport::echo().with_latency(Duration::from_millis(500)));
    let config = EnrichmentConfig {
        max_concurrency: 4,
        ..config()
    };
    let client = client(transport.clone(), config);

    let start = Instant::now();
    let report = client.enrich(keys(80), &CancellationToken::new()).await;

    // Eight batches on four slots: two rounds.
    assert_eq!(report.batches, 8);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_slot_pacing_spaces_requests() {
    let transport = Arc::new(MockTransport::echo());
    let config = EnrichmentConfig {
        max_concurrency: 1,
        min_request_interval: Duration::from_secs(1),
        ..config()
    };
    let client = client(transport.clone(), config);

    let start = Instant::now();
    client.enrich(keys(30), &CancellationToken::new()).await;

    assert_eq!(transport.call_count(), 3);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_merge_order_ignores_completion_order() {
    let issns = ["00280836", "1050124X", "12345679", "23456789"];
    let mut transport = MockTransport::echo();
    for (i, value) in issns.iter().enumerate() {
        let delay = Duration::from_millis(100 * (issns.len() - i) as u64);
        transport = transport.with_key_latency(key(value), delay);
    }
    let transport = Arc::new(transport);

    let config = CollateConfig {
        enrichment: EnrichmentConfig {
            target: EnrichTarget::All,
            batch_size: 1,
            max_concurrency: 4,
            ..config()
        },
        ..CollateConfig::default()
    };
    let pipeline = Pipeline::with_config(config).with_shared_transport(transport.clone());
    let datasets = vec![Dataset::from_column("A", "ISSN", &issns)];

    let report = pipeline.run_async(&datasets).await.unwrap();

    // The slowest batch was requested first, so answers arrive reversed.
    let completed: Vec<NormalizedKey> = transport.completed().into_iter().flatten().collect();
    let mut reversed: Vec<NormalizedKey> = issns.iter().map(|v| key(v)).collect();
    reversed.reverse();
    assert_eq!(completed, reversed);

    assert_eq!(report.rows.len(), issns.len());
    for (row, group) in report.rows.iter().zip(&report.outcome.groups) {
        assert_eq!(row.group.key, group.key);
        assert_eq!(row.entry().map(|e| &e.key), Some(&group.key));
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_finished_batches() {
    let transport = Arc::new(MockTransport::echo().with_latency(Duration::from_secs(1)));
    let config = EnrichmentConfig {
        max_concurrency: 1,
        request_timeout: Duration::from_secs(10),
        ..config()
    };
    let client = client(transport.clone(), config);
    let token = CancellationToken::new();

    let canceller = token.clone();
    let (report, _) = tokio::join!(client.enrich(keys(30), &token), async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        canceller.cancel();
    });

    assert!(report.cancelled);
    assert_eq!(report.entries.len(), 10);
    assert_eq!(client.cache().len(), 10);
    assert!(report
        .entries
        .values()
        .all(|e| e.status == EnrichmentStatus::Success));
}
