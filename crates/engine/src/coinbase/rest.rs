use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::config::PRODUCTION_API_URL;
use common::{
    DepositRequest, DepositResult, Error, ExchangeClient, OrderRequest, OrderSnapshot,
    PaymentMethod, PlacedOrder, Rejection, Reply, Result,
};

type HmacSha256 = Hmac<Sha256>;

/// Authenticated REST session against the Coinbase Pro private API.
///
/// Building one never touches the network. Whether the exchange accepts the
/// credentials is only known once the first call returns.
pub struct CoinbaseClient {
    api_key: String,
    /// Decoded HMAC key.
    secret: Vec<u8>,
    passphrase: String,
    base_url: String,
    http: Client,
}

impl CoinbaseClient {
    /// Authenticate against the production API.
    pub fn authenticate(
        api_key: impl Into<String>,
        secret: &str,
        passphrase: impl Into<String>,
    ) -> Result<Self> {
        Self::authenticate_with_url(api_key, secret, passphrase, PRODUCTION_API_URL)
    }

    /// Authenticate against an arbitrary REST root, e.g. the sandbox.
    pub fn authenticate_with_url(
        api_key: impl Into<String>,
        secret: &str,
        passphrase: impl Into<String>,
        base_url: &str,
    ) -> Result<Self> {
        let secret = BASE64
            .decode(secret)
            .map_err(|_| Error::InvalidCredentialFormat)?;

        let http = Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("cbpro-autobuy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            api_key: api_key.into(),
            secret,
            passphrase: passphrase.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// `base64(HMAC-SHA256(secret, timestamp + METHOD + path + body))`
    fn sign(&self, timestamp: &str, method: &Method, path: &str, body: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(timestamp.as_bytes());
        mac.update(method.as_str().as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<Reply<T>> {
        let body = body.unwrap_or_default();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&timestamp, &method, path, &body);
        let url = format!("{}{path}", self.base_url);

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("CB-ACCESS-KEY", &self.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", &timestamp)
            .header("CB-ACCESS-PASSPHRASE", &self.passphrase);
        if !body.is_empty() {
            req = req
                .header("Content-Type", "application/json")
                .body(body);
        }

        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        debug!(%method, %path, %status, "Coinbase Pro replied");

        match classify_response(status, &text) {
            Reply::Accepted(body) => Ok(Reply::Accepted(serde_json::from_str(&body)?)),
            Reply::Rejected(rejection) => Ok(Reply::Rejected(rejection)),
        }
    }
}

/// Decide whether a reply is a refusal. Coinbase reports errors as
/// `{"message": "..."}`, normally with a non-2xx status, but some refusals
/// arrive with 200.
pub(crate) fn classify_response(status: StatusCode, body: &str) -> Reply<String> {
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.message)
            .unwrap_or_else(|_| format!("HTTP {status}: {body}"));
        return Reply::Rejected(Rejection::from_message(message));
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if !map.contains_key("id") {
            if let Some(serde_json::Value::String(message)) = map.get("message") {
                return Reply::Rejected(Rejection::from_message(message.clone()));
            }
        }
    }

    Reply::Accepted(body.to_string())
}

#[async_trait]
impl ExchangeClient for CoinbaseClient {
    async fn payment_methods(&self) -> Result<Reply<Vec<PaymentMethod>>> {
        self.signed_request(Method::GET, "/payment-methods", None)
            .await
    }

    async fn deposit(&self, request: &DepositRequest) -> Result<Reply<DepositResult>> {
        let body = serde_json::to_string(request)?;
        debug!(amount = request.amount, currency = %request.currency, "Submitting deposit to Coinbase Pro");
        self.signed_request(Method::POST, "/deposits/payment-method", Some(body))
            .await
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<Reply<PlacedOrder>> {
        let body = serde_json::to_string(order)?;
        debug!(product = %order.product_id, side = %order.side, funds = order.funds, "Submitting order to Coinbase Pro");
        self.signed_request(Method::POST, "/orders", Some(body))
            .await
    }

    async fn order(&self, order_id: &str) -> Result<Reply<OrderSnapshot>> {
        self.signed_request(Method::GET, &format!("/orders/{order_id}"), None)
            .await
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use common::{FundingCategory, RejectionKind};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    const SECRET: &str = "c2VjcmV0LWtleS1ieXRlcw==";

    #[test]
    fn authenticate_rejects_non_base64_secret() {
        let err = CoinbaseClient::authenticate("key", "not base64!", "pass")
            .err()
            .expect("secret should be rejected");
        assert!(matches!(err, Error::InvalidCredentialFormat));
    }

    #[test]
    fn authenticate_accepts_base64_secret() {
        let client = CoinbaseClient::authenticate("key", SECRET, "pass").unwrap();
        assert_eq!(client.secret, b"secret-key-bytes");
        assert_eq!(client.base_url, PRODUCTION_API_URL);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = CoinbaseClient::authenticate_with_url(
            "key",
            SECRET,
            "pass",
            "https://api-public.sandbox.pro.coinbase.com/",
        )
        .unwrap();
        assert_eq!(client.base_url, "https://api-public.sandbox.pro.coinbase.com");
    }

    #[test]
    fn signature_is_stable_and_covers_the_body() {
        let client = CoinbaseClient::authenticate("key", SECRET, "pass").unwrap();
        let a = client.sign("1700000000", &Method::POST, "/orders", r#"{"funds":"100"}"#);
        let b = client.sign("1700000000", &Method::POST, "/orders", r#"{"funds":"100"}"#);
        let c = client.sign("1700000000", &Method::POST, "/orders", r#"{"funds":"200"}"#);

        assert_eq!(a, b);
        assert_ne!(a, c);
        // SHA-256 MAC is 32 bytes.
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn signature_matches_known_vector() {
        let client = CoinbaseClient::authenticate("key", SECRET, "pass").unwrap();
        assert_eq!(
            client.sign("1700000000", &Method::POST, "/orders", r#"{"funds":"100"}"#),
            "ysuLOdhBXcAyQ28pzRwUss9mX5sw7iFR7VVUvAurp+s="
        );
    }

    #[test]
    fn error_status_is_rejected_with_message() {
        let reply = classify_response(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid API Key"}"#);
        match reply {
            Reply::Rejected(r) => {
                assert_eq!(r.kind, RejectionKind::InvalidCredentials);
                assert_eq!(r.message, "Invalid API Key");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn error_status_without_json_keeps_raw_body() {
        let reply = classify_response(StatusCode::BAD_GATEWAY, "upstream down");
        match reply {
            Reply::Rejected(r) => {
                assert_eq!(r.kind, RejectionKind::Other);
                assert!(r.message.contains("upstream down"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn message_in_successful_reply_is_rejected() {
        let reply = classify_response(StatusCode::OK, r#"{"message":"Insufficient funds"}"#);
        assert!(matches!(
            reply,
            Reply::Rejected(Rejection { kind: RejectionKind::InsufficientFunds, .. })
        ));
    }

    #[test]
    fn listing_and_orders_are_accepted() {
        assert!(matches!(
            classify_response(StatusCode::OK, r#"[{"id":"m1"}]"#),
            Reply::Accepted(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::OK, r#"{"id":"o1","message":"note"}"#),
            Reply::Accepted(_)
        ));
    }

    // ─── Wire tests against a local listener ─────────────────────────────────

    /// What the client put on the wire.
    struct Captured {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    }

    /// Accept a single connection, record the request and answer with
    /// `status` and the JSON `reply`.
    async fn serve_once(status: u16, reply: &'static str) -> (CoinbaseClient, JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the request head");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let mut lines = head.split("\r\n");
            let mut request_line = lines.next().unwrap().split(' ');
            let method = request_line.next().unwrap().to_string();
            let path = request_line.next().unwrap().to_string();
            let headers: HashMap<String, String> = lines
                .filter_map(|l| l.split_once(':'))
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                .collect();

            let len: usize = headers
                .get("content-length")
                .map(|v| v.parse().unwrap())
                .unwrap_or(0);
            while buf.len() < header_end + len {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the request body");
                buf.extend_from_slice(&chunk[..n]);
            }
            let body = String::from_utf8(buf[header_end..header_end + len].to_vec()).unwrap();

            let reason = if status < 300 { "OK" } else { "Bad Request" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                reply.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;

            Captured {
                method,
                path,
                headers,
                body,
            }
        });

        let client =
            CoinbaseClient::authenticate_with_url("key", SECRET, "pass", &format!("http://{addr}"))
                .unwrap();
        (client, handle)
    }

    fn assert_signed(client: &CoinbaseClient, captured: &Captured) {
        assert_eq!(captured.headers["cb-access-key"], "key");
        assert_eq!(captured.headers["cb-access-passphrase"], "pass");
        let timestamp = &captured.headers["cb-access-timestamp"];
        assert!(timestamp.parse::<i64>().is_ok(), "timestamp {timestamp}");

        let method: Method = captured.method.parse().unwrap();
        assert_eq!(
            captured.headers["cb-access-sign"],
            client.sign(timestamp, &method, &captured.path, &captured.body)
        );
        assert!(captured.headers["user-agent"].starts_with("cbpro-autobuy/"));
    }

    #[tokio::test]
    async fn payment_methods_are_fetched_signed() {
        let (client, server) = serve_once(
            200,
            r#"[{"id":"m1","type":"ach_bank_account","name":"Checking","currency":"USD"}]"#,
        )
        .await;

        let reply = client.payment_methods().await.unwrap();
        let captured = server.await.unwrap();

        assert_eq!(captured.method, "GET");
        assert_eq!(captured.path, "/payment-methods");
        assert!(captured.body.is_empty());
        assert_signed(&client, &captured);

        let methods = reply.into_result().unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].id, "m1");
        assert_eq!(methods[0].category, FundingCategory::AchBankAccount);
        assert_eq!(methods[0].name, "Checking");
    }

    #[tokio::test]
    async fn deposit_posts_json_body() {
        let (client, server) = serve_once(
            200,
            r#"{"id":"dep-1","amount":"100.00","currency":"USD","payout_at":"2021-03-01T00:31:09Z","fee":"0.00"}"#,
        )
        .await;

        let request = DepositRequest {
            amount: 100.0,
            currency: "USD".into(),
            payment_method_id: "m1".into(),
        };
        let reply = client.deposit(&request).await.unwrap();
        let captured = server.await.unwrap();

        assert_eq!(captured.method, "POST");
        assert_eq!(captured.path, "/deposits/payment-method");
        assert_eq!(captured.headers["content-type"], "application/json");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&captured.body).unwrap(),
            json!({ "amount": "100", "currency": "USD", "payment_method_id": "m1" })
        );
        assert_signed(&client, &captured);

        let result = reply.into_result().unwrap();
        assert_eq!(result.id, "dep-1");
        assert_eq!(result.amount, 100.0);
        assert_eq!(result.extra["fee"], "0.00");
    }

    #[tokio::test]
    async fn market_order_posts_funds() {
        let (client, server) = serve_once(200, r#"{"id":"o1","status":"pending"}"#).await;

        let reply = client
            .place_market_order(&OrderRequest::market_buy("BTC-USD", 100.0))
            .await
            .unwrap();
        let captured = server.await.unwrap();

        assert_eq!(captured.method, "POST");
        assert_eq!(captured.path, "/orders");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&captured.body).unwrap(),
            json!({ "product_id": "BTC-USD", "side": "buy", "type": "market", "funds": "100" })
        );
        assert_signed(&client, &captured);
        assert_eq!(reply.into_result().unwrap().id.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn order_is_fetched_by_id() {
        let (client, server) = serve_once(
            200,
            r#"{"id":"o1","product_id":"BTC-USD","status":"done","settled":true,"filled_size":"0.00293","fill_fees":"0.4975","executed_value":"99.50","done_reason":"filled"}"#,
        )
        .await;

        let reply = client.order("o1").await.unwrap();
        let captured = server.await.unwrap();

        assert_eq!(captured.method, "GET");
        assert_eq!(captured.path, "/orders/o1");
        assert_signed(&client, &captured);

        let snapshot = reply.into_result().unwrap();
        assert!(snapshot.settled);
        assert_eq!(snapshot.filled_size, 0.00293);
        assert_eq!(snapshot.fill_fees, 0.4975);
        assert_eq!(snapshot.extra["done_reason"], "filled");
    }

    #[tokio::test]
    async fn error_status_on_the_wire_is_rejected() {
        let (client, server) = serve_once(400, r#"{"message":"Insufficient funds"}"#).await;

        let reply = client
            .place_market_order(&OrderRequest::market_buy("BTC-USD", 100.0))
            .await
            .unwrap();
        server.await.unwrap();

        match reply {
            Reply::Rejected(r) => {
                assert_eq!(r.kind, RejectionKind::InsufficientFunds);
                assert_eq!(r.message, "Insufficient funds");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
