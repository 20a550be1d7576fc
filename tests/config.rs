// tests/config.rs
use std::sync::Arc;
use std::{env, fs};

use async_trait::async_trait;
use civic_events_harvester::config::{load_default, load_from, SourceKind};
use civic_events_harvester::{HarvestContext, Transport, TransportError};

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("harvest.toml");
    fs::write(
        &p_toml,
        r#"
[cache]
dir = "cache/test"
ttl_secs = 600

[scheduler]
interval_secs = 900

[[sources]]
key = "springfield-council"
name = "Springfield City Council"
base_url = "https://springfield.example/RSSFeed.aspx?ModID=58"
reliability = "high"
"#,
    )
    .unwrap();
    let cfg = load_from(&p_toml).unwrap();
    assert_eq!(cfg.cache.ttl_secs, 600);
    assert_eq!(cfg.scheduler.interval_secs, 900);
    assert_eq!(cfg.sources.len(), 1);
    assert_eq!(cfg.sources[0].kind, SourceKind::Rss);
    assert_eq!(cfg.sources[0].update_frequency_hours, 24);

    let p_json = dir.path().join("harvest.json");
    fs::write(
        &p_json,
        r#"{"sources":[{"key":"leg","name":"Legislature","base_url":"https://leg.example","kind":"json"}]}"#,
    )
    .unwrap();
    let cj = load_from(&p_json).unwrap();
    assert_eq!(cj.sources[0].kind, SourceKind::Json);
    assert_eq!(cj.fetch.max_attempts, 3);
}

#[test]
fn unreadable_or_invalid_files_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_from(&dir.path().join("nope.toml")).is_err());

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[[sources]]\nkey = 5\n").unwrap();
    assert!(load_from(&bad).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the test never reads a real config/ from the repo.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    env::remove_var("HARVEST_CONFIG_PATH");

    // 1) Nothing on disk: defaults
    let c = load_default().unwrap();
    assert!(c.sources.is_empty());
    assert_eq!(c.scheduler.interval_secs, 3600);

    // 2) Fallback TOML in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("harvest.toml"), "[scheduler]\ninterval_secs = 120\n").unwrap();
    assert_eq!(load_default().unwrap().scheduler.interval_secs, 120);

    // 3) Env wins
    let p_env = tmp.path().join("override.json");
    fs::write(&p_env, r#"{"scheduler":{"interval_secs":45}}"#).unwrap();
    env::set_var("HARVEST_CONFIG_PATH", p_env.display().to_string());
    assert_eq!(load_default().unwrap().scheduler.interval_secs, 45);
    env::remove_var("HARVEST_CONFIG_PATH");

    env::set_current_dir(&old).unwrap();
}

struct CannedJson;

#[async_trait]
impl Transport for CannedJson {
    async fn get_text(&self, _url: &str) -> Result<String, TransportError> {
        Ok(r#"[{"name":"Transit Board","date":"2099-07-01"}]"#.to_string())
    }
}

#[serial_test::serial]
#[tokio::test]
async fn context_wires_sources_cache_and_settings() {
    env::set_var("HARVEST_CACHE_SECRET", "context-test-secret");
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("harvest.toml");
    fs::write(
        &p,
        format!(
            r#"
[cache]
dir = "{}"

[runner]
run_timeout_secs = 30

[[sources]]
key = "transit"
name = "Transit Authority"
base_url = "https://transit.example/api/meetings"
kind = "json"
"#,
            dir.path().join("cache").display()
        ),
    )
    .unwrap();

    let cfg = load_from(&p).unwrap();
    let ctx = HarvestContext::with_transport(&cfg, Arc::new(CannedJson)).unwrap();
    assert_eq!(ctx.registry.list_keys(), vec!["transit".to_string()]);

    let events = ctx.registry.run("transit").await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(ctx.cache.has("source-records_transit"));

    ctx.shutdown().await;
    env::remove_var("HARVEST_CACHE_SECRET");
}
