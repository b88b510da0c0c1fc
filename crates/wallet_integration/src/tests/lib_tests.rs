use std::collections::HashMap;

use axum::{extract::State, routing::post, Json, Router};
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

#[derive(Clone)]
struct BridgeState {
    replies: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// Replies are queued per method as response-body fragments, either
/// `{"result": ...}` or `{"error": {...}}`, consumed front to back.
async fn handle_rpc(State(state): State<BridgeState>, Json(body): Json<Value>) -> Json<Value> {
    state.requests.lock().await.push(body.clone());

    let method = body["method"].as_str().unwrap_or_default().to_string();
    let id = body["id"].clone();

    let fragment = {
        let mut replies = state.replies.lock().await;
        match replies.get_mut(&method) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => json!({ "error": { "code": -32601, "message": "method not scripted" } }),
        }
    };

    let mut response = json!({ "jsonrpc": "2.0", "id": id });
    for (key, value) in fragment.as_object().expect("fragment is an object") {
        response[key] = value.clone();
    }
    Json(response)
}

async fn spawn_bridge(replies: HashMap<String, Vec<Value>>) -> Result<(String, BridgeState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = BridgeState {
        replies: Arc::new(Mutex::new(replies)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/", post(handle_rpc))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), state))
}

#[tokio::test]
async fn chain_id_round_trips_through_bridge() {
    let (url, state) = spawn_bridge(HashMap::from([(
        "eth_chainId".to_string(),
        vec![json!({ "result": "0x13881" })],
    )]))
    .await
    .expect("spawn bridge");

    let gateway = HttpWalletGateway::connect(&url).expect("connect");
    let wallet = Wallet::new(Arc::new(gateway));

    let chain = wallet.chain_id().await.expect("chain id");
    assert_eq!(chain, ChainId(0x13881));

    let requests = state.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["jsonrpc"], "2.0");
    assert_eq!(requests[0]["method"], "eth_chainId");
}

#[tokio::test]
async fn rpc_error_object_surfaces_as_wallet_error() {
    let (url, _state) = spawn_bridge(HashMap::from([(
        "wallet_switchEthereumChain".to_string(),
        vec![json!({ "error": { "code": 4902, "message": "Unrecognized chain ID" } })],
    )]))
    .await
    .expect("spawn bridge");

    let gateway = HttpWalletGateway::connect(&url).expect("connect");
    let wallet = Wallet::new(Arc::new(gateway));

    let err = wallet
        .switch_chain(ChainId(0x13881))
        .await
        .expect_err("switch must fail");
    let wallet_err = err
        .downcast_ref::<WalletError>()
        .expect("typed wallet error");
    assert!(wallet_err.is_unrecognized_chain());
    assert!(!wallet_err.is_user_rejected());
}

#[tokio::test]
async fn switch_chain_sends_hex_chain_id() {
    let (url, state) = spawn_bridge(HashMap::from([(
        "wallet_switchEthereumChain".to_string(),
        vec![json!({ "result": null })],
    )]))
    .await
    .expect("spawn bridge");

    let gateway = HttpWalletGateway::connect(&url).expect("connect");
    let wallet = Wallet::new(Arc::new(gateway));

    wallet.switch_chain(ChainId(80001)).await.expect("switch");

    let requests = state.requests.lock().await;
    assert_eq!(requests[0]["params"][0]["chainId"], "0x13881");
}

#[tokio::test]
async fn await_receipt_polls_until_mined() {
    let receipt = json!({
        "result": {
            "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "status": "0x1",
        }
    });
    let (url, state) = spawn_bridge(HashMap::from([(
        "eth_getTransactionReceipt".to_string(),
        vec![json!({ "result": null }), json!({ "result": null }), receipt],
    )]))
    .await
    .expect("spawn bridge");

    let gateway = HttpWalletGateway::connect(&url).expect("connect");
    let wallet = Wallet::new(Arc::new(gateway));
    let hash: TxHash = "0x3333333333333333333333333333333333333333333333333333333333333333"
        .parse()
        .expect("hash");

    let receipt = wallet.await_receipt(hash).await.expect("receipt");
    assert_eq!(receipt.tx_status(), shared::domain::TxStatus::Succeeded);

    let polls = state
        .requests
        .lock()
        .await
        .iter()
        .filter(|r| r["method"] == "eth_getTransactionReceipt")
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn missing_gateway_reports_install_hint() {
    let gateway = MissingWalletGateway::default();
    let err = gateway
        .request("eth_accounts", json!([]))
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("metamask.io"));
}
