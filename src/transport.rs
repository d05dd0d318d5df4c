use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Identifier of a chat message, increasing in arrival order.
pub type MessageId = i64;

/// Wait applied when the transport rate-limits without saying for how long.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// One message in the conversation with the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    /// `true` for messages we sent, `false` for the bot's replies.
    #[serde(default)]
    pub outgoing: bool,
    #[serde(default)]
    pub text: String,
}

/// Credentials forwarded to the transport's login flow.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_id: i64,
    pub api_hash: String,
    pub phone: String,
}

/// Outcome of submitting a login code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignIn {
    Done,
    PasswordRequired,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
}

/// Chat session able to talk to a bot contact on our behalf.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn is_authorized(&self) -> Result<bool, TransportError>;

    async fn request_login_code(&self, credentials: &Credentials) -> Result<(), TransportError>;

    async fn sign_in(&self, phone: &str, code: &str) -> Result<SignIn, TransportError>;

    async fn check_password(&self, password: &str) -> Result<(), TransportError>;

    /// Send `text` to `peer`, returning the id of the sent message.
    async fn send_message(&self, peer: &str, text: &str) -> Result<MessageId, TransportError>;

    /// Messages exchanged with `peer` with an id greater than `after`.
    async fn messages_since(
        &self,
        peer: &str,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// `ChatTransport` over the JSON API of a user-session relay.
///
/// Every call is scoped to `/v1/sessions/{session}`; HTTP 429 maps to
/// [`TransportError::RateLimited`].
pub struct RelayTransport {
    client: Client,
    session_url: Url,
}

#[derive(Deserialize)]
struct AuthorizedResponse {
    authorized: bool,
}

#[derive(Deserialize)]
struct SignInResponse {
    #[serde(default)]
    password_required: bool,
}

#[derive(Deserialize)]
struct SentResponse {
    id: MessageId,
}

#[derive(Deserialize)]
struct RetryAfterBody {
    retry_after: u64,
}

impl RelayTransport {
    pub fn new(base_url: &Url, session: &str) -> Result<Self, TransportError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let session_url = base.join(&format!("v1/sessions/{session}/"))?;
        Ok(Self {
            client: Client::new(),
            session_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.session_url.join(path)?)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, TransportError> {
        let resp = req.send().await?;
        check_status(resp).await
    }
}

/// Map 429 to `RateLimited` and any other non-success status to `Status`.
async fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let header_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::RateLimited {
            retry_after: retry_after_from(header_secs, &body),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status { status, body })
}

/// Body `retry_after` wins over the header; both missing → default.
pub fn retry_after_from(header_secs: Option<u64>, body: &str) -> Duration {
    serde_json::from_str::<RetryAfterBody>(body)
        .ok()
        .map(|b| b.retry_after)
        .or(header_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl ChatTransport for RelayTransport {
    async fn is_authorized(&self) -> Result<bool, TransportError> {
        let url = self.endpoint("authorized")?;
        let resp = self.send(self.client.get(url)).await?;
        Ok(resp.json::<AuthorizedResponse>().await?.authorized)
    }

    async fn request_login_code(&self, credentials: &Credentials) -> Result<(), TransportError> {
        let url = self.endpoint("login/code")?;
        let body = serde_json::json!({
            "api_id": credentials.api_id,
            "api_hash": credentials.api_hash,
            "phone": credentials.phone,
        });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn sign_in(&self, phone: &str, code: &str) -> Result<SignIn, TransportError> {
        let url = self.endpoint("login/sign-in")?;
        let body = serde_json::json!({ "phone": phone, "code": code });
        let resp = self.send(self.client.post(url).json(&body)).await?;
        if resp.json::<SignInResponse>().await?.password_required {
            Ok(SignIn::PasswordRequired)
        } else {
            Ok(SignIn::Done)
        }
    }

    async fn check_password(&self, password: &str) -> Result<(), TransportError> {
        let url = self.endpoint("login/password")?;
        let body = serde_json::json!({ "password": password });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn send_message(&self, peer: &str, text: &str) -> Result<MessageId, TransportError> {
        let url = self.endpoint("messages")?;
        let body = serde_json::json!({ "peer": peer, "text": text });
        let resp = self.send(self.client.post(url).json(&body)).await?;
        let sent: SentResponse = resp.json().await?;
        debug!("Sent message {} to {peer}", sent.id);
        Ok(sent.id)
    }

    async fn messages_since(
        &self,
        peer: &str,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        let url = self.endpoint("messages")?;
        let req = self.client.get(url).query(&[
            ("peer", peer.to_string()),
            ("after", after.to_string()),
            ("limit", limit.to_string()),
        ]);
        let resp = self.send(req).await?;
        Ok(resp.json().await?)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let url = self.endpoint("disconnect")?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST},
        MockServer,
    };
    use serde_json::json;

    fn relay(server: &MockServer) -> RelayTransport {
        RelayTransport::new(&Url::parse(&server.base_url()).unwrap(), "s").unwrap()
    }

    #[test]
    fn session_url_with_and_without_trailing_slash() {
        for base in ["http://relay:8080", "http://relay:8080/", "http://relay:8080/api"] {
            let url = Url::parse(base).unwrap();
            let t = RelayTransport::new(&url, "quantus").unwrap();
            assert!(
                t.session_url.as_str().ends_with("v1/sessions/quantus/"),
                "{}",
                t.session_url
            );
        }
        let t = RelayTransport::new(&Url::parse("http://relay/api").unwrap(), "s").unwrap();
        assert_eq!(
            t.endpoint("messages").unwrap().as_str(),
            "http://relay/api/v1/sessions/s/messages"
        );
    }

    #[test]
    fn retry_after_prefers_body() {
        assert_eq!(
            retry_after_from(Some(5), r#"{"retry_after": 42}"#),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn retry_after_falls_back_to_header_then_default() {
        assert_eq!(retry_after_from(Some(5), "slow down"), Duration::from_secs(5));
        assert_eq!(retry_after_from(None, ""), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn chat_message_defaults() {
        let msg: ChatMessage = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(msg.id, 7);
        assert!(!msg.outgoing);
        assert!(msg.text.is_empty());
    }

    #[test]
    fn rate_limited_display() {
        let err = TransportError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30s");
    }

    // ── relay HTTP ─────────────────────────────────────────────────

    #[tokio::test]
    async fn send_message_posts_peer_and_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/sessions/s/messages")
                    .json_body(json!({ "peer": "QuantusFaucetBot", "text": "/balance qA" }));
                then.status(200).json_body(json!({ "id": 42 }));
            })
            .await;
        let id = relay(&server)
            .send_message("QuantusFaucetBot", "/balance qA")
            .await
            .unwrap();
        assert_eq!(id, 42);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn messages_since_passes_query() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/sessions/s/messages")
                    .query_param("peer", "QuantusFaucetBot")
                    .query_param("after", "5")
                    .query_param("limit", "12");
                then.status(200)
                    .json_body(json!([{ "id": 6, "text": "Balance: 7 QU" }]));
            })
            .await;
        let msgs = relay(&server)
            .messages_since("QuantusFaucetBot", 5, 12)
            .await
            .unwrap();
        assert_eq!(
            msgs,
            vec![ChatMessage {
                id: 6,
                outgoing: false,
                text: "Balance: 7 QU".into(),
            }]
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sign_in_reports_password_required() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/sessions/s/login/sign-in");
                then.status(200).json_body(json!({ "password_required": true }));
            })
            .await;
        let outcome = relay(&server).sign_in("+48123", "11111").await.unwrap();
        assert_eq!(outcome, SignIn::PasswordRequired);
    }

    #[tokio::test]
    async fn too_many_requests_uses_body_retry_after() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/sessions/s/messages");
                then.status(429)
                    .header("Retry-After", "3")
                    .json_body(json!({ "retry_after": 7 }));
            })
            .await;
        let err = relay(&server).send_message("bot", "/balance qA").await.unwrap_err();
        assert!(
            matches!(err, TransportError::RateLimited { retry_after } if retry_after == Duration::from_secs(7)),
            "{err}"
        );
    }

    #[tokio::test]
    async fn too_many_requests_falls_back_to_header() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/sessions/s/authorized");
                then.status(429).header("Retry-After", "3");
            })
            .await;
        let err = relay(&server).is_authorized().await.unwrap_err();
        assert!(
            matches!(err, TransportError::RateLimited { retry_after } if retry_after == Duration::from_secs(3)),
            "{err}"
        );
    }

    #[tokio::test]
    async fn other_failures_keep_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/sessions/s/disconnect");
                then.status(500).body("session gone");
            })
            .await;
        match relay(&server).disconnect().await {
            Err(TransportError::Status { status, body }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "session gone");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
