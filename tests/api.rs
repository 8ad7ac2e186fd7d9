//! End-to-end API tests.
//!
//! Drives the full router over the in-memory store: register agents,
//! create markets, trade, inspect holders, resolve, and read the
//! leaderboard, checking both the happy path and the error statuses.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use agentmarket::api::{build_router, ApiState};
use agentmarket::config::AppConfig;
use agentmarket::store::MemoryStore;

fn app() -> Router {
    let store = Arc::new(MemoryStore::new());
    build_router(Arc::new(ApiState::new(store, &AppConfig::default())))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_with_key(uri: &str, api_key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", api_key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register(app: &Router, name: &str) -> Value {
    let (status, body) = send(app, post_json("/api/agents/register", json!({ "agent_name": name }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["agent"].clone()
}

async fn create_market(app: &Router, yes_price: f64) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/api/markets",
            json!({
                "question": "Will BTC close above 100k this year?",
                "category": "Crypto",
                "option_a": "Above",
                "option_b": "Below",
                "initial_yes_price": yes_price,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["market"].clone()
}

#[tokio::test]
async fn full_market_lifecycle() {
    let app = app();

    let agent = register(&app, "alpha").await;
    let api_key = agent["api_key"].as_str().unwrap().to_string();
    assert!(agent["public_address"].as_str().unwrap().starts_with("0x"));

    let market = create_market(&app, 0.4).await;
    let market_id = market["id"].as_str().unwrap().to_string();
    assert_eq!(market["status"], "open");

    // price 0.4, stake 40 → 100 shares.
    let (status, body) = send(
        &app,
        post_json_with_key(
            "/api/trade",
            &api_key,
            json!({ "market_id": market_id, "side": "yes", "stake": 40.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!((body["trade"]["shares"].as_f64().unwrap() - 100.0).abs() < 1e-9);
    assert!((body["trade"]["price"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    assert!((body["position"]["yes_shares"].as_f64().unwrap() - 100.0).abs() < 1e-9);
    assert!((body["on_chain_stake"].as_f64().unwrap() - 40.0).abs() < 1e-9);

    // The stake now backs the market's liquidity.
    let markets = Request::builder()
        .uri("/api/markets")
        .header("x-api-key", &api_key)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, markets).await;
    assert_eq!(status, StatusCode::OK);
    let listed = &body["markets"][0];
    assert_eq!(listed["id"].as_str().unwrap(), market_id);
    assert!((listed["liquidity"].as_f64().unwrap() - 40.0).abs() < 1e-9);

    // Holders show the full yes side held by our agent.
    let (status, body) = send(
        &app,
        Request::builder()
            .uri(format!("/api/markets/holders?market_id={market_id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let holders = body["holders"].as_array().unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0]["agent_name"], "alpha");
    assert_eq!(holders[0]["side"], "yes");
    assert!((holders[0]["share_percent"].as_f64().unwrap() - 100.0).abs() < 1e-9);

    // Resolve to option_a: profit = shares - stake = 60, one win.
    let (status, body) = send(
        &app,
        post_json("/api/resolve", json!({ "market_id": market_id, "outcome": "Above" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["winning_side"], "yes");
    assert_eq!(body["updated_agents"], 1);

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/leaderboard")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let top = &body["agents"][0];
    assert_eq!(top["rank"], 1);
    assert_eq!(top["agent_name"], "alpha");
    assert!((top["total_profit"].as_f64().unwrap() - 60.0).abs() < 1e-9);
    assert_eq!(top["total_wins"], 1);
    assert_eq!(top["total_trades"], 1);
    assert!((top["total_volume_trade"].as_f64().unwrap() - 40.0).abs() < 1e-9);
    // Credentials never leak into the leaderboard.
    assert!(top.get("api_key").is_none());
}

#[tokio::test]
async fn trade_rejects_missing_and_unknown_keys() {
    let app = app();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        post_json("/api/trade", json!({ "market_id": market_id, "side": "yes", "stake": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("API key"));

    let (status, _) = send(
        &app,
        post_json_with_key(
            "/api/trade",
            "not-a-real-key",
            json!({ "market_id": market_id, "side": "yes", "stake": 1.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trade_accepts_bearer_auth() {
    let app = app();
    let agent = register(&app, "bearer-agent").await;
    let api_key = agent["api_key"].as_str().unwrap();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/trade")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::from(
            json!({ "market_id": market_id, "option": "Above", "stake": 2.0 }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["trade"]["side"], "yes");
}

#[tokio::test]
async fn trade_on_unknown_market_is_404() {
    let app = app();
    let agent = register(&app, "lost").await;
    let api_key = agent["api_key"].as_str().unwrap();

    let (status, body) = send(
        &app,
        post_json_with_key(
            "/api/trade",
            api_key,
            json!({
                "market_id": "00000000-0000-0000-0000-000000000000",
                "side": "yes",
                "stake": 1.0
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn trade_validates_stake_and_side() {
    let app = app();
    let agent = register(&app, "sloppy").await;
    let api_key = agent["api_key"].as_str().unwrap();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    for bad in [
        json!({ "market_id": market_id, "side": "yes", "stake": 0.0 }),
        json!({ "market_id": market_id, "side": "yes", "stake": -5.0 }),
        json!({ "market_id": market_id, "side": "banana", "stake": 1.0 }),
        json!({ "market_id": market_id, "stake": 1.0 }),
    ] {
        let (status, body) = send(&app, post_json_with_key("/api/trade", api_key, bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn oversized_stake_reports_the_cap() {
    let app = app();
    let agent = register(&app, "whale").await;
    let api_key = agent["api_key"].as_str().unwrap();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    // Fresh market, zero liquidity: cap is the absolute maximum (1000).
    let (status, body) = send(
        &app,
        post_json_with_key(
            "/api/trade",
            api_key,
            json!({ "market_id": market_id, "side": "yes", "stake": 1000.01 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!((body["max_stake_allowed"].as_f64().unwrap() - 1000.0).abs() < 1e-9);

    // Exactly at the cap is accepted.
    let (status, _) = send(
        &app,
        post_json_with_key(
            "/api/trade",
            api_key,
            json!({ "market_id": market_id, "side": "yes", "stake": 1000.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn resolve_is_single_shot() {
    let app = app();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        post_json("/api/resolve", json!({ "market_id": market_id, "outcome": "Above" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        post_json("/api/resolve", json!({ "market_id": market_id, "outcome": "Below" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already resolved"));

    // And no trades are accepted on a resolved market.
    let agent = register(&app, "late").await;
    let (status, _) = send(
        &app,
        post_json_with_key(
            "/api/trade",
            agent["api_key"].as_str().unwrap(),
            json!({ "market_id": market_id, "side": "yes", "stake": 1.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resolve_rejects_unknown_market_and_bad_outcome() {
    let app = app();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        post_json(
            "/api/resolve",
            json!({
                "market_id": "00000000-0000-0000-0000-000000000000",
                "outcome": "Above"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        post_json("/api/resolve", json!({ "market_id": market_id, "outcome": "Sideways" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("option_a"));
}

#[tokio::test]
async fn register_requires_a_name() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/api/agents/register", json!({ "agent_name": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("agent_name"));
}

#[tokio::test]
async fn register_same_name_twice_issues_distinct_credentials() {
    let app = app();
    let first = register(&app, "twin").await;
    let second = register(&app, "twin").await;
    assert_ne!(first["api_key"], second["api_key"]);
    assert_ne!(first["public_address"], second["public_address"]);
}

#[tokio::test]
async fn create_market_validates_inputs() {
    let app = app();

    for bad in [
        json!({ "question": "", "option_a": "A", "option_b": "B", "initial_yes_price": 0.5 }),
        json!({ "question": "Q", "option_a": "A", "option_b": "B", "initial_yes_price": 0.0 }),
        json!({ "question": "Q", "option_a": "A", "option_b": "B", "initial_yes_price": 1.0 }),
        json!({ "question": "Q", "option_a": "", "option_b": "B", "initial_yes_price": 0.5 }),
    ] {
        let (status, _) = send(&app, post_json("/api/markets", bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn holders_requires_market_id() {
    let app = app();
    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/markets/holders")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("market_id"));

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/markets/holders?market_id=not-a-uuid")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("UUID"));
}

#[tokio::test]
async fn holders_split_percentages_across_sides() {
    let app = app();
    let market = create_market(&app, 0.5).await;
    let market_id = market["id"].as_str().unwrap();

    let a = register(&app, "yes-heavy").await;
    let b = register(&app, "yes-light").await;
    let c = register(&app, "no-only").await;

    for (agent, side, stake) in [
        (&a, "yes", 30.0),
        (&b, "yes", 10.0),
        (&c, "no", 5.0),
    ] {
        let (status, _) = send(
            &app,
            post_json_with_key(
                "/api/trade",
                agent["api_key"].as_str().unwrap(),
                json!({ "market_id": market_id, "side": side, "stake": stake }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(
        &app,
        Request::builder()
            .uri(format!("/api/markets/holders?market_id={market_id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let holders = body["holders"].as_array().unwrap();
    assert_eq!(holders.len(), 3);

    let find = |name: &str| {
        holders
            .iter()
            .find(|h| h["agent_name"] == name)
            .unwrap()
            .clone()
    };
    assert!((find("yes-heavy")["share_percent"].as_f64().unwrap() - 75.0).abs() < 1e-9);
    assert!((find("yes-light")["share_percent"].as_f64().unwrap() - 25.0).abs() < 1e-9);
    assert!((find("no-only")["share_percent"].as_f64().unwrap() - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn leaderboard_limit_is_clamped() {
    let app = app();
    for i in 0..5 {
        register(&app, &format!("agent-{i}")).await;
    }

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/leaderboard?limit=2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"].as_array().unwrap().len(), 2);

    // Zero and garbage limits fall back to sane values.
    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/leaderboard?limit=0")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/leaderboard?limit=abc")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"].as_array().unwrap().len(), 5);
}
