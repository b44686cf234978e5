//! Waiting for a submitted signature to reach the configured commitment

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::{commitment_config::CommitmentLevel, signature::Signature};
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::rpc_manager::LedgerClient;

#[derive(Debug, Clone)]
pub struct ConfirmSettings {
    pub commitment: CommitmentLevel,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub ws_endpoint: Option<String>,
}

impl Default for ConfirmSettings {
    fn default() -> Self {
        Self {
            commitment: CommitmentLevel::Confirmed,
            timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
            ws_endpoint: None,
        }
    }
}

/// Wait until `signature` is confirmed, fails on chain, or its blockhash
/// expires. With a websocket endpoint configured, a `signatureSubscribe`
/// notification races the polling loop and the first verdict wins.
pub async fn await_confirmation<L: LedgerClient + ?Sized>(
    ledger: &L,
    signature: &Signature,
    last_valid_block_height: u64,
    settings: &ConfirmSettings,
) -> Result<()> {
    let poll = poll_confirmation(ledger, signature, last_valid_block_height, settings);

    let Some(ws_endpoint) = settings.ws_endpoint.as_deref() else {
        return poll.await;
    };

    tokio::pin!(poll);
    tokio::select! {
        res = &mut poll => res,
        res = subscribe_signature(ws_endpoint, signature, settings.commitment) => match res {
            Err(Error::Websocket(e)) => {
                warn!("Signature subscription failed, polling instead: {}", e);
                poll.await
            }
            other => other,
        },
    }
}

/// Poll signature status until a verdict, blockhash expiry or timeout
pub async fn poll_confirmation<L: LedgerClient + ?Sized>(
    ledger: &L,
    signature: &Signature,
    last_valid_block_height: u64,
    settings: &ConfirmSettings,
) -> Result<()> {
    let start = Instant::now();

    loop {
        match ledger.signature_status(signature).await {
            Ok(Some(Ok(()))) => {
                debug!("{} confirmed after {}ms", signature, start.elapsed().as_millis());
                return Ok(());
            }
            Ok(Some(Err(e))) => {
                return Err(Error::TransactionNotConfirmed {
                    signature: signature.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(None) => {}
            // transient; the next poll may succeed
            Err(e) => warn!("Error checking signature status: {}", e),
        }

        match ledger.block_height().await {
            Ok(height) if height > last_valid_block_height => {
                return Err(Error::BlockhashExpired(signature.to_string()));
            }
            Ok(_) => {}
            Err(e) => warn!("Error fetching block height: {}", e),
        }

        if start.elapsed() >= settings.timeout {
            return Err(Error::ConfirmationTimeout {
                signature: signature.to_string(),
                secs: settings.timeout.as_secs(),
            });
        }

        tokio::time::sleep(settings.poll_interval).await;
    }
}

#[derive(Debug, Deserialize)]
struct WsMessage {
    method: Option<String>,
    params: Option<NotificationParams>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    value: SignatureValue,
}

#[derive(Debug, Deserialize)]
struct SignatureValue {
    err: Option<serde_json::Value>,
}

/// Interpret one websocket frame. `None` means keep listening
/// (subscription acks and unrelated traffic).
fn parse_notification(signature: &Signature, text: &str) -> Option<Result<()>> {
    let message: WsMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => return Some(Err(Error::Websocket(format!("bad frame: {}", e)))),
    };

    if let Some(error) = message.error {
        return Some(Err(Error::Websocket(format!("subscribe rejected: {}", error))));
    }

    if message.method.as_deref() != Some("signatureNotification") {
        return None;
    }

    let params = message.params?;
    Some(match params.result.value.err {
        None => Ok(()),
        Some(err) => Err(Error::TransactionNotConfirmed {
            signature: signature.to_string(),
            reason: err.to_string(),
        }),
    })
}

async fn subscribe_signature(
    ws_endpoint: &str,
    signature: &Signature,
    commitment: CommitmentLevel,
) -> Result<()> {
    let (mut stream, _) = connect_async(ws_endpoint).await?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "signatureSubscribe",
        "params": [signature.to_string(), { "commitment": commitment }],
    });
    stream.send(Message::Text(request.to_string())).await?;
    debug!("Subscribed to {} via {}", signature, ws_endpoint);

    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                if let Some(verdict) = parse_notification(signature, &text) {
                    let _ = stream.close(None).await;
                    return verdict;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(Error::Websocket("stream closed before notification".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLedger;
    use solana_sdk::transaction::TransactionError;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn fast_settings() -> ConfirmSettings {
        ConfirmSettings {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_confirms() {
        let ledger = MockLedger::new();
        let signature = Signature::new_unique();
        ledger.set_status(signature, Ok(()));

        poll_confirmation(&ledger, &signature, 100, &fast_settings())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_poll_reports_on_chain_failure() {
        let ledger = MockLedger::new();
        let signature = Signature::new_unique();
        ledger.set_status(signature, Err(TransactionError::AccountNotFound));

        let err = poll_confirmation(&ledger, &signature, 100, &fast_settings())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionNotConfirmed { .. }));
    }

    #[tokio::test]
    async fn test_poll_stops_when_blockhash_expires() {
        let ledger = MockLedger::new();
        ledger.set_block_height(101);

        let err = poll_confirmation(&ledger, &Signature::new_unique(), 100, &fast_settings())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BlockhashExpired(_)));
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let ledger = MockLedger::new();
        let err = poll_confirmation(&ledger, &Signature::new_unique(), u64::MAX, &fast_settings())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfirmationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_websocket_falls_back_to_polling() {
        let ledger = MockLedger::new();
        let signature = Signature::new_unique();
        ledger.set_status(signature, Ok(()));

        let settings = ConfirmSettings {
            ws_endpoint: Some("ws://127.0.0.1:1".to_string()),
            ..fast_settings()
        };
        await_confirmation(&ledger, &signature, 100, &settings)
            .await
            .unwrap();
    }

    /// One-connection websocket node: acks the subscription, sends a single
    /// notification carrying `err`, and hands back the request it received.
    async fn serve_notification(err: serde_json::Value) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

            let request = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => text,
                other => panic!("unexpected frame {:?}", other),
            };

            let ack = r#"{"jsonrpc":"2.0","result":24006,"id":1}"#;
            ws.send(Message::Text(ack.to_string())).await.unwrap();

            let notification = json!({
                "jsonrpc": "2.0",
                "method": "signatureNotification",
                "params": {
                    "result": { "context": { "slot": 5207624 }, "value": { "err": err } },
                    "subscription": 24006,
                },
            });
            ws.send(Message::Text(notification.to_string())).await.unwrap();

            // wait for the client to hang up
            let _ = ws.next().await;
            request
        });

        (format!("ws://{}", addr), handle)
    }

    fn ws_settings(endpoint: String) -> ConfirmSettings {
        // long enough that polling alone would never decide
        ConfirmSettings {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
            ws_endpoint: Some(endpoint),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_websocket_notification_confirms() {
        let ledger = MockLedger::new();
        let signature = Signature::new_unique();
        let (endpoint, server) = serve_notification(serde_json::Value::Null).await;

        await_confirmation(&ledger, &signature, 100, &ws_settings(endpoint))
            .await
            .unwrap();

        let request: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["method"], "signatureSubscribe");
        assert_eq!(request["params"][0], signature.to_string());
        assert_eq!(request["params"][1]["commitment"], "confirmed");
    }

    #[tokio::test]
    async fn test_websocket_notification_reports_failure() {
        let ledger = MockLedger::new();
        let signature = Signature::new_unique();
        let err = json!({ "InstructionError": [1, { "Custom": 1 }] });
        let (endpoint, server) = serve_notification(err).await;

        let err = await_confirmation(&ledger, &signature, 100, &ws_settings(endpoint))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionNotConfirmed { .. }));
        server.await.unwrap();
    }

    #[test]
    fn test_parse_notifications() {
        let signature = Signature::new_unique();

        // subscription ack
        let ack = r#"{"jsonrpc":"2.0","result":23784,"id":1}"#;
        assert!(parse_notification(&signature, ack).is_none());

        let ok = r#"{"jsonrpc":"2.0","method":"signatureNotification","params":{"result":{"context":{"slot":5207624},"value":{"err":null}},"subscription":24006}}"#;
        assert!(matches!(parse_notification(&signature, ok), Some(Ok(()))));

        let failed = r#"{"jsonrpc":"2.0","method":"signatureNotification","params":{"result":{"context":{"slot":5207624},"value":{"err":{"InstructionError":[1,{"Custom":1}]}}},"subscription":24006}}"#;
        assert!(matches!(
            parse_notification(&signature, failed),
            Some(Err(Error::TransactionNotConfirmed { .. }))
        ));

        let rejected =
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params"},"id":1}"#;
        assert!(matches!(
            parse_notification(&signature, rejected),
            Some(Err(Error::Websocket(_)))
        ));
    }
}
