// tests/adapters.rs
use std::sync::Arc;

use chrono::NaiveDate;
use civic_events_harvester::adapters::rss_calendar::parse_feed;
use civic_events_harvester::adapters::{JsonFeedAdapter, RssCalendarAdapter};
use civic_events_harvester::fetch::ReqwestTransport;
use civic_events_harvester::{SourceConfig, SourceError, SourceRunner};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COUNCIL_XML: &str = include_str!("fixtures/council_rss.xml");

fn transport() -> Arc<ReqwestTransport> {
    Arc::new(ReqwestTransport::new("harvest-test/1.0").unwrap())
}

#[test]
fn rss_fixture_parses_dated_items_only() {
    let records = parse_feed(COUNCIL_XML).expect("fixture parses");
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["City Council Regular Meeting", "Planning & Zoning Commission", "Parks Board Workshop"]
    );

    assert_eq!(records[0].date, "March 18, 2099");
    assert_eq!(records[0].time.as_deref(), Some("6:00 PM"));
    assert_eq!(records[0].committee.as_deref(), Some("City Council"));
    assert_eq!(records[1].date, "March 20, 2099");
    assert!(records[2].time.is_none());
}

#[tokio::test]
async fn rss_source_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Calendar/RSSFeed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(COUNCIL_XML))
        .mount(&server)
        .await;

    let config = SourceConfig::new(
        "springfield-council",
        "Springfield City Council",
        format!("{}/Calendar/RSSFeed", server.uri()),
    );
    let runner = SourceRunner::new(config, Arc::new(RssCalendarAdapter::new()), transport());
    let events = runner.run().await.unwrap();
    assert_eq!(events.len(), 3);

    let council = &events[0];
    assert_eq!(council.id, "springfield-council-2099-03-18-city-council-regular-meeting");
    assert_eq!(council.date, NaiveDate::from_ymd_opt(2099, 3, 18).unwrap());
    assert_eq!(council.time, "6:00 PM");
    assert_eq!(council.location.as_deref(), Some("Council Chambers, 300 S 7th St"));
    assert!(council.public_participation);
    assert_eq!(
        council.description.as_deref(),
        Some("Agenda includes the FY26 budget. Public comment will be taken.")
    );
    assert_eq!(council.source_url, "https://springfield.example/Calendar.aspx?EID=101");

    let parks = &events[2];
    assert_eq!(parks.date, NaiveDate::from_ymd_opt(2099, 3, 24).unwrap());
    assert_eq!(parks.time, "5:30 PM");
    assert!(!parks.public_participation);
}

#[tokio::test]
async fn rss_source_serving_html_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Down for maintenance</body></html>"))
        .mount(&server)
        .await;

    let config = SourceConfig::new("down", "Down", server.uri());
    let runner = SourceRunner::new(config, Arc::new(RssCalendarAdapter::new()), transport());
    assert!(matches!(runner.run().await, Err(SourceError::Adapter(_))));
    assert_eq!(runner.health().consecutive_failures, 1);
}

#[tokio::test]
async fn json_feed_accepts_wrapped_lists_and_skips_bad_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/hearings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "events": [
                {
                    "name": "House Judiciary Committee",
                    "date": "2099-02-03",
                    "time": "10:00 AM",
                    "committee": "Judiciary",
                    "bills": [{"number": "HB 1234", "title": "Court fees"}]
                },
                {"name": 17, "date": "2099-02-03"},
                {"name": "Senate Finance", "date": "02/04/2099 1:30 PM"}
            ]
        })))
        .mount(&server)
        .await;

    let config = SourceConfig::new("state-leg", "State Legislature", server.uri());
    let adapter = JsonFeedAdapter::with_url(format!("{}/api/hearings", server.uri()));
    let runner = SourceRunner::new(config, Arc::new(adapter), transport());

    let events = runner.run().await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].bills.len(), 1);
    assert_eq!(events[0].bills[0].number, "HB 1234");
    assert_eq!(events[0].committee.as_deref(), Some("Judiciary"));
    assert_eq!(events[1].time, "1:30 PM");
}

#[tokio::test]
async fn json_feed_accepts_bare_arrays() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"name": "School Board", "date": "2099-09-01"}])),
        )
        .mount(&server)
        .await;

    let config = SourceConfig::new("schools", "School District", server.uri());
    let runner = SourceRunner::new(config, Arc::new(JsonFeedAdapter::new()), transport());
    let events = runner.run().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time, "TBD");
}

#[tokio::test]
async fn json_feed_with_no_usable_items_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"title": "x"}, {"when": "y"}])))
        .mount(&server)
        .await;

    let config = SourceConfig::new("shape-changed", "Shape Changed", server.uri());
    let runner = SourceRunner::new(config, Arc::new(JsonFeedAdapter::new()), transport());
    assert!(runner.run().await.is_err());
}
