mod constants;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use constants::{DEFAULT_CHAIN_LIMIT, MAX_BLOCKS_PER_REQUEST};
use powledger_core::{codec, Block, Ledger, LedgerConfig, LedgerError};
use powledger_storage::SledStore;
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Data directory for sled
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// TOML file with ledger settings
    #[arg(long)]
    config: Option<String>,

    /// Override the configured difficulty (leading zero bits)
    #[arg(long)]
    difficulty: Option<u32>,
}

#[derive(Clone)]
struct AppState {
    ledger: Arc<Ledger<SledStore>>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    tip: String,
    difficulty_bits: u32,
}

#[derive(Serialize)]
struct BlockRow {
    timestamp: i64,
    nonce: u64,
    hash: String,
    previous_hash: String,
    data: String,
    valid: bool,
}

#[derive(Deserialize)]
struct BlockIn {
    data: String,
}

#[derive(Deserialize)]
struct ChainQuery {
    limit: Option<usize>,
}

/// Raises the cancel flag when dropped, so mining stops if the request goes away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let status = match &e {
            LedgerError::MissingBlock(_) => StatusCode::NOT_FOUND,
            LedgerError::Cancelled | LedgerError::Exhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

fn row(ledger: &Ledger<SledStore>, block: &Block) -> BlockRow {
    BlockRow {
        timestamp: block.timestamp,
        nonce: block.nonce,
        hash: block.hash_hex(),
        previous_hash: hex::encode(&block.prev_hash),
        data: String::from_utf8_lossy(&block.data).into_owned(),
        valid: ledger.pow().validate(block),
    }
}

async fn head(State(state): State<AppState>) -> Result<Json<Head>, ApiError> {
    let tip = state.ledger.tip()?;
    Ok(Json(Head {
        tip: hex::encode(tip),
        difficulty_bits: state.ledger.pow().difficulty_bits(),
    }))
}

async fn chain(
    State(state): State<AppState>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<Vec<BlockRow>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CHAIN_LIMIT)
        .min(MAX_BLOCKS_PER_REQUEST);
    let ledger = &state.ledger;
    let rows = ledger
        .iterator()?
        .take(limit)
        .map(|b| b.map(|b| row(ledger, &b)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(rows))
}

async fn block(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<BlockRow>, ApiError> {
    let bytes = hex::decode(&hash)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, format!("invalid hash: {e}")))?;
    let hash = codec::decode_hash(&bytes)
        .map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))?;
    match state.ledger.get_block(&hash)? {
        Some(block) => Ok(Json(row(&state.ledger, &block))),
        None => Err(ApiError(StatusCode::NOT_FOUND, "block not found".into())),
    }
}

async fn add_block(
    State(state): State<AppState>,
    Json(input): Json<BlockIn>,
) -> Result<(StatusCode, Json<BlockRow>), ApiError> {
    let cancel = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(Arc::clone(&cancel));
    let ledger = Arc::clone(&state.ledger);
    let mined = tokio::task::spawn_blocking(move || {
        ledger.add_block_with_cancel(input.data, &cancel)
    })
    .await
    .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let block = mined.inspect_err(|e| warn!(error = %e, "add block failed"))?;
    Ok((StatusCode::CREATED, Json(row(&state.ledger, &block))))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(bits) = args.difficulty {
        config.difficulty_bits = bits;
    }
    let store = SledStore::open(&args.data_dir, &config.namespace)?;
    // Opening may mine the genesis block.
    let ledger = tokio::task::spawn_blocking(move || Ledger::open(store, config)).await??;
    let state = AppState {
        ledger: Arc::new(ledger),
    };

    let app = Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/healthz", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain/head", get(head))
        .route("/chain", get(chain))
        .route("/blocks", post(add_block))
        .route("/blocks/{hash}", get(block))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = args.listen.parse()?;
    info!("powledger-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
