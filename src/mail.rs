//! Outbound calls to the Brevo and Zoho Mail APIs.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;

use crate::model::ZohoOutgoingMessage;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider responded {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn json_body(request: RequestBuilder) -> Result<Value, MailError> {
    let res = checked(request).await?;
    Ok(res.json::<Value>().await?)
}

async fn checked(request: RequestBuilder) -> Result<reqwest::Response, MailError> {
    let res = request.send().await?;
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(MailError::Status { status, body });
    }
    Ok(res)
}

pub struct BrevoClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    sender_name: String,
    sender_email: String,
}

impl BrevoClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        sender_name: impl Into<String>,
        sender_email: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            sender_name: sender_name.into(),
            sender_email: sender_email.into(),
        }
    }

    /// Sends a transactional email from the fixed sender identity.
    pub async fn send(&self, to: &str, subject: &str, html_content: &str) -> Result<Value, MailError> {
        let mut request = self
            .http
            .post(format!("{}/smtp/email", self.base_url))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({
                "sender": {
                    "name": self.sender_name,
                    "email": self.sender_email,
                },
                "to": [{ "email": to }],
                "subject": subject,
                "htmlContent": html_content,
            }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        json_body(request).await
    }
}

pub struct ZohoClient {
    http: Client,
    base_url: String,
}

impl ZohoClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.authorized(self.http.get(format!("{}{}", self.base_url, path)), token)
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, token)
    }

    pub async fn list_accounts(&self, token: &str) -> Result<Value, MailError> {
        json_body(self.get("/accounts", token)).await
    }

    pub async fn send_message(
        &self,
        token: &str,
        account_id: &str,
        message: &ZohoOutgoingMessage,
    ) -> Result<Value, MailError> {
        let url = format!("{}/accounts/{}/messages", self.base_url, account_id);
        json_body(self.authorized(self.http.post(url), token).json(message)).await
    }

    /// Latest five messages sent by or to `email`.
    pub async fn search_messages(
        &self,
        token: &str,
        account_id: &str,
        email: &str,
    ) -> Result<Value, MailError> {
        let search_key = format!("sender:{email}::or:to:{email}");
        let request = self
            .get(&format!("/accounts/{account_id}/messages/search"), token)
            .query(&[("searchKey", search_key.as_str()), ("limit", "5")]);
        json_body(request).await
    }

    /// Raw message source. Returns the upstream content type alongside the bytes.
    pub async fn original_message(
        &self,
        token: &str,
        account_id: &str,
        message_id: &str,
    ) -> Result<(Option<String>, Vec<u8>), MailError> {
        let path = format!("/accounts/{account_id}/messages/{message_id}/originalmessage");
        let res = checked(self.get(&path, token)).await?;
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = res.bytes().await?;
        Ok((content_type, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn brevo_send_posts_sender_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/smtp/email"))
            .and(header("api-key", "xkeysib-test"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"messageId": "<m1>"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = BrevoClient::new(
            Client::new(),
            server.uri(),
            Some("xkeysib-test".into()),
            "Sender Alex",
            "senderalex@example.com",
        );
        let body = client.send("to@example.com", "Hi", "<p>Hi</p>").await.unwrap();
        assert_eq!(body, json!({"messageId": "<m1>"}));

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["sender"]["email"], "senderalex@example.com");
        assert_eq!(sent["to"][0]["email"], "to@example.com");
        assert_eq!(sent["htmlContent"], "<p>Hi</p>");
    }

    #[tokio::test]
    async fn provider_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts"))
            .respond_with(ResponseTemplate::new(401).set_body_string("INVALID_OAUTHTOKEN"))
            .mount(&server)
            .await;

        let client = ZohoClient::new(Client::new(), server.uri());
        let err = client.list_accounts("Zoho-oauthtoken bad").await.unwrap_err();

        match err {
            MailError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "INVALID_OAUTHTOKEN");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn search_passes_token_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/42/messages/search"))
            .and(header("authorization", "Zoho-oauthtoken t"))
            .and(query_param("searchKey", "sender:a@b.io::or:to:a@b.io"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ZohoClient::new(Client::new(), format!("{}/", server.uri()));
        let body = client
            .search_messages("Zoho-oauthtoken t", "42", "a@b.io")
            .await
            .unwrap();
        assert_eq!(body, json!({"data": []}));
    }
}
