//! FPL client against a mock API.

use leaguehub_cache::{
    BatchOptions, CacheOptions, CacheService, LocalStore, RetryPolicy, TieredCache,
};
use leaguehub_fpl::{ClearTarget, FetchMode, FplClient, FplClientConfig, FplError};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cache() -> CacheService {
    CacheService::new(
        TieredCache::local_only(LocalStore::default()),
        RetryPolicy::new(3, Duration::from_millis(1)),
        BatchOptions::default(),
    )
}

fn client(server: &MockServer) -> FplClient {
    let config = FplClientConfig {
        base_url: server.uri(),
        retry_base_delay: Duration::from_millis(1),
        rate_limit_base_delay: Duration::from_millis(2),
        batch_delay: Duration::ZERO,
        ..Default::default()
    };
    FplClient::new(config, cache()).unwrap()
}

fn standings_body(league_id: u64, leader: &str) -> Value {
    json!({
        "league": { "id": league_id, "name": "Work League" },
        "standings": {
            "has_next": false,
            "page": 1,
            "results": [{
                "id": 1, "entry": 501, "entry_name": leader,
                "player_name": "A Manager", "rank": 1, "total": 250
            }]
        }
    })
}

async fn requests(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn standings_are_fetched_once_then_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/leagues-classic/314/standings/"))
        .and(query_param("page_standings", "1"))
        .and(query_param("phase", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(standings_body(314, "Klopp Klub")))
        .expect(1)
        .mount(&server)
        .await;

    let fpl = client(&server);
    let first = fpl.league_standings(314, 1, FetchMode::default()).await.unwrap();
    let second = fpl.league_standings(314, 1, FetchMode::default()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.standings.results[0].entry_name, "Klopp Klub");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entry/42/"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entry/42/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42 })))
        .mount(&server)
        .await;

    let team = client(&server).team_data(42, false).await.unwrap();

    assert_eq!(team["id"], 42);
    assert_eq!(requests(&server).await, 3);
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/event/9/live/"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/event/9/live/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "elements": [] })))
        .mount(&server)
        .await;

    let live = client(&server).gameweek_live(9, false).await.unwrap();
    assert!(live["elements"].as_array().unwrap().is_empty());
    assert_eq!(requests(&server).await, 2);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entry/7/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).team_data(7, false).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn persistent_server_error_gives_up_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entry/8/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).team_data(8, false).await.unwrap_err();
    assert!(matches!(err, FplError::Status { .. }));
}

#[tokio::test]
async fn forced_refresh_falls_back_to_cached_standings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/leagues-classic/314/standings/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(standings_body(314, "Klopp Klub")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/leagues-classic/314/standings/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fpl = client(&server);
    let cached = fpl.league_standings(314, 1, FetchMode::default()).await.unwrap();

    let stale = fpl.league_standings(314, 1, FetchMode::fresh()).await.unwrap();
    assert_eq!(stale, cached);

    let no_stale = FetchMode {
        force_fresh: true,
        use_stale: false,
    };
    assert!(fpl.league_standings(314, 1, no_stale).await.is_err());
}

#[tokio::test]
async fn batch_team_data_fetches_only_uncached_teams() {
    let server = MockServer::start().await;
    for id in [3u64, 4, 5] {
        Mock::given(method("GET"))
            .and(path(format!("/entry/{id}/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/entry/6/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fpl = client(&server);
    for id in [1u64, 2] {
        fpl.cache()
            .set(&format!("fpl:team:{id}"), &json!({ "id": id, "cached": true }), &CacheOptions::default())
            .await;
    }

    let teams = fpl.batch_team_data(&[1, 2, 3, 4, 5, 6]).await;

    assert_eq!(teams.len(), 5);
    assert_eq!(teams[&1]["cached"], true);
    assert_eq!(teams[&5]["id"], 5);
    assert!(!teams.contains_key(&6));
    // fetched teams are cached for next time
    assert!(fpl.cache().get::<Value>("fpl:team:4").await.is_some());
}

#[tokio::test]
async fn current_gameweek_comes_from_bootstrap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bootstrap-static/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [
                { "id": 11, "is_current": false, "finished": true },
                { "id": 12, "is_current": true }
            ],
            "elements": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fpl = client(&server);
    assert_eq!(fpl.current_gameweek().await, 12);
    // second call reads the cached bootstrap
    assert_eq!(fpl.current_gameweek().await, 12);
}

#[tokio::test]
async fn current_gameweek_falls_back_when_api_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bootstrap-static/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let fpl = client(&server);
    assert_eq!(fpl.current_gameweek().await, fpl.config().fallback_gameweek);
}

#[tokio::test]
async fn preload_warms_bootstrap_and_live_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bootstrap-static/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [{ "id": 3, "is_current": true }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/event/3/live/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "elements": [1] })))
        .mount(&server)
        .await;

    let fpl = client(&server);
    fpl.preload_common_data().await;

    assert!(fpl.cache().get::<Value>("fpl:bootstrap_static").await.is_some());
    assert!(fpl.cache().get::<Value>("fpl:live:3").await.is_some());
}

#[tokio::test]
async fn clearing_a_team_forces_a_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entry/42/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42 })))
        .expect(2)
        .mount(&server)
        .await;

    let fpl = client(&server);
    fpl.team_data(42, false).await.unwrap();
    fpl.team_data(42, false).await.unwrap();
    fpl.clear_cache(ClearTarget::Team(42)).await;
    fpl.team_data(42, false).await.unwrap();
}

#[tokio::test]
async fn team_picks_are_cached_per_gameweek() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entry/42/event/5/picks/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "picks": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let fpl = client(&server);
    fpl.team_picks(42, 5).await.unwrap();
    fpl.team_picks(42, 5).await.unwrap();
    assert!(fpl.cache().get::<Value>("fpl:team:42:picks:5").await.is_some());
}

#[tokio::test]
async fn metrics_report_api_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bootstrap-static/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "events": [] })))
        .mount(&server)
        .await;

    let metrics = client(&server).metrics().await;
    assert!(metrics.api_healthy);
    assert!(!metrics.cache_stats.redis.connected);

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["apiHealth"], true);
    assert_eq!(json["cacheStats"]["memory"]["maxSize"], 1000);
}

#[tokio::test]
async fn metrics_report_unhealthy_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bootstrap-static/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    assert!(!client(&server).metrics().await.api_healthy);
}
