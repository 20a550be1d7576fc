// tests/source_runner.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use civic_events_harvester::source::FAILURE_THRESHOLD;
use civic_events_harvester::{
    adapter_fn, FixedClock, PersistentCache, RawRecord, SourceConfig, SourceError, SourceRunner, Transport,
    TransportError,
};

struct Offline;

#[async_trait]
impl Transport for Offline {
    async fn get_text(&self, url: &str) -> Result<String, TransportError> {
        Err(TransportError::Network {
            url: url.into(),
            message: "offline".into(),
        })
    }
}

fn cfg(key: &str) -> SourceConfig {
    SourceConfig::new(key, key.to_uppercase(), format!("https://{key}.example/calendar"))
}

fn failing_runner(calls: Arc<AtomicUsize>) -> SourceRunner {
    let adapter = adapter_fn(move |_ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<Vec<RawRecord>, _>(SourceError::adapter("calendar layout changed")) }
    });
    SourceRunner::new(cfg("flaky"), Arc::new(adapter), Arc::new(Offline))
}

fn fixed_runner(key: &str, records: Vec<RawRecord>, calls: Arc<AtomicUsize>) -> SourceRunner {
    let adapter = adapter_fn(move |_ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        let records = records.clone();
        async move { Ok(records) }
    });
    SourceRunner::new(cfg(key), Arc::new(adapter), Arc::new(Offline))
}

#[tokio::test]
async fn three_failures_open_the_circuit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runner = failing_runner(calls.clone());

    for n in 1..=FAILURE_THRESHOLD {
        assert!(runner.run().await.is_err());
        assert_eq!(runner.health().consecutive_failures, n);
    }
    let h = runner.health();
    assert!(!h.enabled, "source should auto-disable at the threshold");
    assert!(h.last_error.as_deref().unwrap().contains("calendar layout changed"));

    // Disabled: no-op success, adapter untouched.
    let out = runner.run().await.unwrap();
    assert!(out.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    runner.reset_health();
    let h = runner.health();
    assert!(h.enabled);
    assert_eq!(h.consecutive_failures, 0);
    assert!(h.last_error.is_none());
}

#[tokio::test]
async fn manual_reenable_without_reset_trips_on_next_failure() {
    let runner = failing_runner(Arc::new(AtomicUsize::new(0)));
    for _ in 0..3 {
        let _ = runner.run().await;
    }
    runner.set_enabled(true);
    assert_eq!(runner.health().consecutive_failures, 3);

    let _ = runner.run().await;
    let h = runner.health();
    assert_eq!(h.consecutive_failures, 4);
    assert!(!h.enabled);
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let flip = Arc::new(AtomicUsize::new(0));
    let counter = flip.clone();
    let adapter = adapter_fn(move |_ctx| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(SourceError::adapter("temporarily down"))
            } else {
                Ok(vec![RawRecord::new("Regular Session", "2099-06-01")])
            }
        }
    });
    let runner = SourceRunner::new(cfg("recovering"), Arc::new(adapter), Arc::new(Offline));

    let _ = runner.run().await;
    let _ = runner.run().await;
    assert_eq!(runner.health().consecutive_failures, 2);

    let events = runner.run().await.unwrap();
    assert_eq!(events.len(), 1);
    let h = runner.health();
    assert_eq!(h.consecutive_failures, 0);
    assert!(h.enabled);
    assert!(h.last_success.is_some());
    assert!(h.last_error.is_none());
    assert_eq!(h.events_produced, 1);
}

#[tokio::test]
async fn one_bad_record_does_not_sink_the_batch() {
    let mut records: Vec<RawRecord> = (1..=10)
        .map(|d| RawRecord::new(format!("Hearing {d}"), format!("2099-02-{d:02}")))
        .collect();
    records[4].date = "sometime next spring".into();

    let runner = fixed_runner("state", records, Arc::new(AtomicUsize::new(0)));
    let events = runner.run().await.unwrap();

    assert_eq!(events.len(), 9);
    assert!(events.iter().all(|e| e.name != "Hearing 5"));
    let h = runner.health();
    assert_eq!(h.consecutive_failures, 0);
    assert_eq!(h.events_produced, 9);
}

#[tokio::test]
async fn past_events_are_filtered_and_today_is_kept() {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()));
    let records = vec![
        RawRecord::new("Yesterday", "2025-03-09"),
        RawRecord::new("This Morning", "2025-03-10 08:00"),
        RawRecord::new("Tomorrow", "2025-03-11"),
    ];
    let runner = fixed_runner("city", records, Arc::new(AtomicUsize::new(0))).with_clock(clock);

    let events = runner.run().await.unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["This Morning", "Tomorrow"]);
    assert_eq!(runner.health().events_produced, 2);
}

#[tokio::test]
async fn ids_are_stable_across_runs() {
    let records = vec![
        RawRecord::new("Budget Hearing", "2099-01-05"),
        RawRecord::new("Zoning Board", "2099-01-05"),
    ];
    let runner = fixed_runner("council", records, Arc::new(AtomicUsize::new(0)));

    let first: Vec<String> = runner.run().await.unwrap().into_iter().map(|e| e.id).collect();
    let second: Vec<String> = runner.run().await.unwrap().into_iter().map(|e| e.id).collect();

    assert_eq!(first, second);
    assert_eq!(first[0], "council-2099-01-05-budget-hearing");
    assert_ne!(first[0], first[1]);
}

#[tokio::test]
async fn cached_records_skip_the_adapter_but_not_the_filter() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(PersistentCache::open(dir.path(), b"test-secret").unwrap());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap()));
    let calls = Arc::new(AtomicUsize::new(0));

    let runner = fixed_runner("cached", vec![RawRecord::new("Council Meeting", "2025-03-11")], calls.clone())
        .with_clock(clock.clone())
        .with_cache(cache.clone(), Duration::from_secs(3600));

    let first = runner.run().await.unwrap();
    let second = runner.run().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.has("source-records_cached"));

    // Same cached records, but the event is now in the past.
    clock.advance(chrono::Duration::days(2));
    assert!(runner.run().await.unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_adapter_hits_the_run_timeout() {
    let adapter = adapter_fn(|_ctx| async {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(vec![RawRecord::new("Never", "2099-01-01")])
    });
    let runner = SourceRunner::new(cfg("slow"), Arc::new(adapter), Arc::new(Offline))
        .with_run_timeout(Duration::from_secs(30));

    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, SourceError::RunTimeout(d) if d == Duration::from_secs(30)));
    assert_eq!(runner.health().consecutive_failures, 1);
}

#[tokio::test]
async fn normalized_fields_are_sanitized() {
    let mut rec = RawRecord::new("<b>Transit</b> &amp; Parking Committee", "03/15/2099");
    rec.time = Some("6:30 PM".into());
    rec.description = Some("<script>alert(1)</script>Public comment will be taken.".into());
    rec.url = Some("javascript:alert(1)".into());
    let runner = fixed_runner("metro", vec![rec], Arc::new(AtomicUsize::new(0)));

    let ev = runner.run().await.unwrap().remove(0);
    assert_eq!(ev.name, "Transit & Parking Committee");
    assert_eq!(ev.date, NaiveDate::from_ymd_opt(2099, 3, 15).unwrap());
    assert_eq!(ev.time, "6:30 PM");
    assert!(ev.public_participation);
    assert!(!ev.description.as_deref().unwrap().contains("alert"));
    assert_eq!(ev.source_key, "metro");
    assert_eq!(ev.source_url, "https://metro.example/calendar");
}
