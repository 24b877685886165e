mod support;

use reqwest::StatusCode;
use serde_json::{json, Value};
use support::{spawn_server, test_config, DEFAULT_LOBBY_ID};

#[tokio::test]
async fn seeded_lobby_is_listed() {
    let server = spawn_server(test_config()).await;

    let res = tokio_test::assert_ok!(reqwest::get(server.http("/lobbies")).await);
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    let lobbies = body["lobbies"].as_array().unwrap();
    assert_eq!(lobbies.len(), 1);
    assert_eq!(lobbies[0]["id"], DEFAULT_LOBBY_ID);
    assert_eq!(lobbies[0]["name"], "Lobby 1");
    assert_eq!(lobbies[0]["status"], "PENDING");
    assert_eq!(lobbies[0]["clients"], json!([]));
    assert_eq!(lobbies[0]["spectators"], 0);
}

#[tokio::test]
async fn health_reports_lobbies() {
    let server = spawn_server(test_config()).await;

    let body: Value = reqwest::get(server.http("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_lobbies"], 1);
    assert_eq!(body["connected_clients"], 0);
    assert!(body["started_at"].is_string());
}

#[tokio::test]
async fn created_lobby_shows_up_in_listing() {
    let server = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.http("/lobbies"))
        .json(&json!({ "name": "Arena", "tick_length_milli_seconds": 1000 }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let body: Value = reqwest::get(server.http("/lobbies"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = body["lobbies"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Arena", "Lobby 1"]);
    assert!(body["lobbies"]
        .as_array()
        .unwrap()
        .iter()
        .any(|l| l["id"] == id.as_str()));
}

#[tokio::test]
async fn tick_length_outside_bounds_is_rejected() {
    let server = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    for ms in [0, 60_001, u64::MAX] {
        let res = client
            .post(server.http("/lobbies"))
            .json(&json!({ "tick_length_milli_seconds": ms }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "tick length {ms}");
    }

    let res = client
        .post(server.http("/lobbies"))
        .json(&json!({ "tick_length_milli_seconds": 60_000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // Only the seeded lobby and the one valid request exist.
    let body: Value = reqwest::get(server.http("/lobbies"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["lobbies"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn lobby_limit_is_enforced() {
    let mut config = test_config();
    config.max_lobbies = 1;
    let server = spawn_server(config).await;

    let res = reqwest::Client::new()
        .post(server.http("/lobbies"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("limit"));
}

#[tokio::test]
async fn start_needs_known_lobby_with_quorum() {
    let server = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.http(&format!("/lobbies/{}/start", uuid::Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(server.http(&format!("/lobbies/{DEFAULT_LOBBY_ID}/start")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}
