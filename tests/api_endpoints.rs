//! Integration tests for the Chainge HTTP endpoints.

use axum_test::TestServer;
use chainge::api::{router, AppState};
use chainge::block::Block;
use chainge::crypto::KeyPair;
use chainge::persistence::InMemoryStore;
use chainge::protocol;
use serde_json::{json, Value};
use std::sync::Arc;

fn test_server() -> (TestServer, AppState) {
    let state = AppState::new(Arc::new(InMemoryStore::new()));
    let server = TestServer::new(router(state.clone())).expect("Failed to create test server");
    (server, state)
}

#[tokio::test]
async fn test_good_block_then_find_txn_at() {
    let (server, state) = test_server();

    let owner = KeyPair::generate(1024).unwrap();
    let data = protocol::create_data_txn(&owner, "email", "alice@example.edu", 2, 64).unwrap();
    let block = Block::assemble("prev", std::slice::from_ref(&data.txn), "0", 0, 5, Some(1000))
        .unwrap()
        .serialize()
        .unwrap();

    let response = server
        .post("/block/good-block")
        .json(&json!({ "block": block }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["result"], "good");
    assert!(state.store.block_at(5).unwrap().is_some());

    let response = server
        .get("/chain/find_txn_at")
        .add_query_param("block_num", 5)
        .add_query_param("txn_sig", &data.txn.signature)
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["value"], data.serialized);
    assert!(body["err"].is_null());

    // Unknown height answers "not found" rather than an error status.
    let response = server
        .get("/chain/find_txn_at")
        .add_query_param("block_num", 9)
        .add_query_param("txn_sig", &data.txn.signature)
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert!(body["value"].is_null());
    assert_eq!(body["err"], "not found");
}

#[tokio::test]
async fn test_malformed_block_is_swallowed() {
    let (server, _state) = test_server();
    let response = server
        .post("/block/good-block")
        .json(&json!({ "block": "garbage" }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["result"], "good");
}

#[tokio::test]
async fn test_new_txn_accepts_signed_transaction() {
    let (server, _state) = test_server();
    let owner = KeyPair::generate(1024).unwrap();
    let data = protocol::create_data_txn(&owner, "email", "alice@example.edu", 1, 64).unwrap();

    let response = server
        .post("/txn/new-txn")
        .json(&json!({ "txn": data.serialized }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["result"], "good");
}
