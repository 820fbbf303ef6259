use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id")]
    pub oid: String,
    pub id: String,
    pub name: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Product {
    const TABLE: &'static str = "products";
    const KEY_FIELD: &'static str = "id";
    const UNIQUE_KEY: bool = false;
}

#[derive(Debug, Serialize)]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
}

impl From<Product> for ProductSummary {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhatsappMsg {
    pub role: String,
    pub msg: String,
    #[serde(default = "now_timestamps")]
    pub timestamps: Vec<DateTime<Utc>>,
}

fn now_timestamps() -> Vec<DateTime<Utc>> {
    vec![Utc::now()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(rename = "_id")]
    pub oid: String,
    pub id: String,
    pub context: Value,
    #[serde(default)]
    pub whatsapp_msgs: Vec<WhatsappMsg>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Lead {
    const TABLE: &'static str = "leads";
    const KEY_FIELD: &'static str = "id";
    const UNIQUE_KEY: bool = true;
}

#[derive(Debug, Serialize)]
pub struct LeadSummary {
    pub id: String,
}

impl From<Lead> for LeadSummary {
    fn from(lead: Lead) -> Self {
        Self { id: lead.id }
    }
}

/// Per-company settings. Not timestamped on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyConfig {
    #[serde(rename = "_id")]
    pub oid: String,
    pub company_name: String,
    pub config_data: Value,
}

impl Document for CompanyConfig {
    const TABLE: &'static str = "company_configs";
    const KEY_FIELD: &'static str = "companyName";
    const UNIQUE_KEY: bool = true;
}

#[derive(Debug, Deserialize)]
pub struct UpsertProductRequest {
    pub name: Option<String>,
    pub context: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertLeadRequest {
    pub context: Option<Value>,
    pub whatsapp_msgs: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertCompanyConfigRequest {
    pub company_name: Option<String>,
    pub config_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrevoMailRequest {
    pub to: Option<String>,
    pub subject: Option<String>,
    pub html_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZohoMailRequest {
    pub to_address: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZohoOutgoingMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    pub to_address: String,
    pub subject: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ZohoAccountList {
    #[serde(default)]
    pub data: Vec<ZohoAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZohoAccount {
    #[serde(default)]
    pub account_id: Option<Value>,
    #[serde(default)]
    pub send_mail_details: Vec<ZohoSendMailDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZohoSendMailDetail {
    #[serde(default)]
    pub from_address: Option<String>,
}

impl ZohoAccountList {
    /// The first account's id and first send address, when both are present.
    pub fn primary_identity(&self) -> Option<(String, String)> {
        let account = self.data.first()?;
        let account_id = match account.account_id.as_ref()? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let from_address = account
            .send_mail_details
            .first()?
            .from_address
            .clone()
            .filter(|a| !a.is_empty())?;
        Some((account_id, from_address))
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Sender and text of a WhatsApp message, either of which may be absent.
#[derive(Debug, Default, PartialEq)]
pub struct InboundMessage {
    pub from: Option<String>,
    pub text: Option<String>,
}

impl InboundMessage {
    /// Pulls `entry[0].changes[0].value.messages[0]` out of a webhook event.
    pub fn first_in(event: &Value) -> Option<Self> {
        let message = event.pointer("/entry/0/changes/0/value/messages/0")?;
        Some(Self {
            from: message.get("from").and_then(Value::as_str).map(str::to_string),
            text: message
                .pointer("/text/body")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
