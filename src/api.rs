//! REST API for Stockchain nodes
//!
//! Serves clients (wallet, transactions, mining) and peers (transaction and
//! block broadcasts, chain fetches) from the same router.

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::network::BlockEnvelope;
use crate::node::{BlockIngest, Node};
use crate::transaction::Transaction;
use crate::wallet::Wallet;

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BlockchainError(e) => {
                let status = match &e {
                    ChainError::ResolutionPending | ChainError::StaleCandidate(_) => {
                        StatusCode::CONFLICT
                    }
                    ChainError::PersistenceFailure(_)
                    | ChainError::IoError(_)
                    | ChainError::ConfigError(_)
                    | ChainError::MiningCancelled => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(format!("Required data is missing: {}", rejection.body_text()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct NewTransactionRequest {
    pub recipient: String,
    pub amount: u64,
    pub product_name: String,
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub is_nature: bool,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub message: String,
    pub transaction: Transaction,
}

#[derive(Serialize)]
pub struct BlockResponse {
    pub message: String,
    pub block: Block,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub participant: String,
    pub product_name: String,
    pub stock: i128,
}

#[derive(Deserialize)]
pub struct AddNodeRequest {
    pub node: String,
}

#[derive(Serialize)]
pub struct NodesResponse {
    pub message: String,
    pub all_nodes: Vec<String>,
}

#[derive(Serialize)]
struct WalletResponse {
    public_key: String,
    private_key: String,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        WalletResponse {
            public_key: wallet.public_key,
            private_key: wallet.secret_key_hex,
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

// ============================================================================
// Middleware
// ============================================================================

async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    Router::new()
        // Chain and pool
        .route("/chain", get(get_chain))
        .route("/transactions", get(get_open_transactions))
        .route("/product_stock/:participant/:product", get(get_product_stock))
        // Client operations
        .route("/transaction", post(add_transaction))
        .route("/mine", post(mine))
        .route("/resolve-conflicts", post(resolve_conflicts))
        // Peer traffic
        .route("/broadcast-transaction", post(broadcast_transaction))
        .route("/broadcast-block", post(broadcast_block))
        // Peer set
        .route("/node", post(add_node))
        .route("/node/:node", delete(remove_node))
        .route("/nodes", get(get_nodes))
        // Wallet
        .route("/wallet", get(load_wallet).post(create_wallet))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
        .layer(cors)
}

pub async fn run_api_server(
    node: Arc<Node>,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(node);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api.listening");

    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let chain_length = node.get_chain().await.len();
    let open_transactions = node.get_open_transactions().await.len();
    let peers = node.get_peer_nodes().await.len();
    let resolution_pending = node.resolution_pending().await;

    Json(serde_json::json!({
        "status": "healthy",
        "node_id": node.node_id().await,
        "chain_length": chain_length,
        "open_transactions": open_transactions,
        "peers": peers,
        "resolution_pending": resolution_pending,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_chain(State(node): State<Arc<Node>>) -> Json<Vec<Block>> {
    Json(node.get_chain().await)
}

async fn get_open_transactions(State(node): State<Arc<Node>>) -> Json<Vec<Transaction>> {
    Json(node.get_open_transactions().await)
}

async fn get_product_stock(
    State(node): State<Arc<Node>>,
    Path((participant, product_name)): Path<(String, String)>,
) -> Json<StockResponse> {
    let stock = node.get_product_stock(&participant, &product_name).await;
    Json(StockResponse {
        participant,
        product_name,
        stock,
    })
}

async fn add_transaction(
    State(node): State<Arc<Node>>,
    body: Result<Json<NewTransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let Json(req) = body?;
    let transaction = node
        .submit_transaction(&req.recipient, req.amount, &req.product_name, req.price, req.is_nature)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message: "Successfully added transaction.".to_string(),
            transaction,
        }),
    ))
}

async fn broadcast_transaction(
    State(node): State<Arc<Node>>,
    body: Result<Json<Transaction>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let Json(tx) = body?;
    let transaction = node.add_transaction(tx, true).await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message: "Successfully added transaction.".to_string(),
            transaction,
        }),
    ))
}

async fn broadcast_block(
    State(node): State<Arc<Node>>,
    body: Result<Json<BlockEnvelope>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Json(envelope) = body?;

    match node.receive_block(envelope.block).await {
        BlockIngest::Accepted => Ok((StatusCode::CREATED, message("Block added"))),
        BlockIngest::Conflict => Err(ApiError::Conflict(
            "Block seems invalid against the local chain.".to_string(),
        )),
        BlockIngest::Behind => Ok((
            StatusCode::OK,
            message("Blockchain seems to differ from local blockchain."),
        )),
        BlockIngest::Stale => Err(ApiError::Conflict(
            "Blockchain seems to be shorter, block not added.".to_string(),
        )),
    }
}

async fn mine(
    State(node): State<Arc<Node>>,
) -> Result<(StatusCode, Json<BlockResponse>), ApiError> {
    let block = node.mine_block().await?;
    Ok((
        StatusCode::CREATED,
        Json(BlockResponse {
            message: "Block added successfully.".to_string(),
            block,
        }),
    ))
}

async fn resolve_conflicts(State(node): State<Arc<Node>>) -> Json<MessageResponse> {
    if node.resolve().await {
        message("Chain was replaced!")
    } else {
        message("Local chain kept!")
    }
}

async fn add_node(
    State(node): State<Arc<Node>>,
    body: Result<Json<AddNodeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<NodesResponse>), ApiError> {
    let Json(req) = body?;
    if req.node.trim().is_empty() {
        return Err(ApiError::InvalidInput("No node data found.".to_string()));
    }
    node.add_peer_node(req.node.trim()).await;

    Ok((
        StatusCode::CREATED,
        Json(NodesResponse {
            message: "Node added successfully.".to_string(),
            all_nodes: node.get_peer_nodes().await,
        }),
    ))
}

async fn remove_node(
    State(node): State<Arc<Node>>,
    Path(peer): Path<String>,
) -> Result<Json<NodesResponse>, ApiError> {
    if peer.trim().is_empty() {
        return Err(ApiError::InvalidInput("No node found.".to_string()));
    }
    node.remove_peer_node(&peer).await;

    Ok(Json(NodesResponse {
        message: "Node removed".to_string(),
        all_nodes: node.get_peer_nodes().await,
    }))
}

async fn get_nodes(State(node): State<Arc<Node>>) -> Json<NodesResponse> {
    Json(NodesResponse {
        message: "Known peer nodes.".to_string(),
        all_nodes: node.get_peer_nodes().await,
    })
}

async fn create_wallet(
    State(node): State<Arc<Node>>,
) -> Result<(StatusCode, Json<WalletResponse>), ApiError> {
    let wallet = node
        .create_wallet()
        .await
        .map_err(|e| ApiError::InternalError(format!("Saving the keys failed: {}", e)))?;
    Ok((StatusCode::CREATED, Json(wallet.into())))
}

async fn load_wallet(
    State(node): State<Arc<Node>>,
) -> Result<(StatusCode, Json<WalletResponse>), ApiError> {
    let wallet = node
        .load_wallet()
        .await
        .map_err(|e| ApiError::InternalError(format!("Loading the keys failed: {}", e)))?;
    Ok((StatusCode::CREATED, Json(wallet.into())))
}
