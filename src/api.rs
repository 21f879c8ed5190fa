//! HTTP API server for Chainge
//!
//! Three endpoints, matching the wire contract peers expect:
//! `POST /block/good-block` ingests an accepted block (fire-and-forget,
//! always answers `{"result":"good"}`), `GET /chain/find_txn_at` looks a
//! transaction up in a stored block, and `POST /txn/new-txn` accepts a
//! gossiped transaction after checking its timestamp and signature.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::block::Block;
use crate::error::ChainError;
use crate::persistence::Store;
use crate::reconcile::Reconciler;
use crate::transaction::Transaction;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        AppState {
            reconciler: Arc::new(Reconciler::new(store.clone())),
            store,
        }
    }
}

#[derive(Deserialize)]
pub struct GoodBlockBody {
    pub block: String,
}

#[derive(Serialize)]
pub struct ResultBody {
    pub result: &'static str,
}

#[derive(Deserialize)]
pub struct FindTxnParams {
    pub block_num: u64,
    pub txn_sig: String,
}

#[derive(Serialize)]
pub struct FindTxnBody {
    pub value: Option<String>,
    pub err: Option<String>,
}

#[derive(Deserialize)]
pub struct NewTxnBody {
    pub txn: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/block/good-block", post(good_block))
        .route("/chain/find_txn_at", get(find_txn_at))
        .route("/txn/new-txn", post(new_txn))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), ChainError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| ChainError::NetworkError(format!("API server failed: {}", e)))
}

/// Block ingestion is fire-and-forget: the sender already considers the
/// block good, so failures are logged locally and never surfaced.
async fn good_block(
    State(state): State<AppState>,
    Json(body): Json<GoodBlockBody>,
) -> Json<ResultBody> {
    match state.reconciler.receive_good_block(&body.block) {
        Ok(height) => info!(height, "accepted good block"),
        Err(e) => warn!(error = %e, "failed to apply good block"),
    }
    Json(ResultBody { result: "good" })
}

async fn find_txn_at(
    State(state): State<AppState>,
    Query(params): Query<FindTxnParams>,
) -> Json<FindTxnBody> {
    let found = state
        .store
        .block_at(params.block_num)
        .ok()
        .flatten()
        .and_then(|serialized| Block::from_json(&serialized).ok())
        .and_then(|block| {
            block
                .find_txn(&params.txn_sig)
                .ok()
                .flatten()
                .map(str::to_string)
        });

    match found {
        Some(value) => Json(FindTxnBody {
            value: Some(value),
            err: None,
        }),
        None => Json(FindTxnBody {
            value: None,
            err: Some("not found".to_string()),
        }),
    }
}

/// Validate a gossiped transaction: it must parse, carry a timestamp
/// that is not in the future, and verify against its own public key.
fn check_gossiped_txn(raw: &str) -> Result<Transaction, ChainError> {
    let txn = Transaction::from_json(raw)?;
    if !txn.timestamp_is_past() {
        return Err(ChainError::MalformedPayload(
            "Transaction timestamp is in the future".to_string(),
        ));
    }
    if !txn.verify_signature()? {
        return Err(ChainError::SignatureVerification(format!(
            "transaction {}",
            txn.signature
        )));
    }
    Ok(txn)
}

async fn new_txn(State(_state): State<AppState>, Json(body): Json<NewTxnBody>) -> Json<ResultBody> {
    match check_gossiped_txn(&body.txn) {
        Ok(txn) => info!(sig = %txn.signature, "accepted gossiped transaction"),
        Err(e) => warn!(error = %e, "rejected gossiped transaction"),
    }
    Json(ResultBody { result: "good" })
}
