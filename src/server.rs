use actix_web::{HttpRequest, HttpResponse, web};
use log::{debug, error, info};
use serde_json::{Map, Value};

use crate::AppState;
use crate::config_cache::CachedConfig;
use crate::error::ApiError;
use crate::model::{
    BrevoMailRequest, CompanyConfig, InboundMessage, Lead, LeadSummary, OAuthQuery, Product,
    ProductSummary, UpsertCompanyConfigRequest, UpsertLeadRequest, UpsertProductRequest,
    WebhookVerifyQuery, ZohoAccountList, ZohoMailRequest, ZohoOutgoingMessage,
};

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().body("Welcome to the ConvoFlow API server")
}

pub async fn log_entry(body: web::Bytes) -> HttpResponse {
    info!("Log entry: {}", String::from_utf8_lossy(&body));
    HttpResponse::Ok().body("OK")
}

/// Keeps only the fields that were actually supplied.
fn supplied(fields: impl IntoIterator<Item = (&'static str, Option<Value>)>) -> Map<String, Value> {
    fields
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// JavaScript-style truthiness for loosely typed JSON flags.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// Products

pub async fn list_products(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let products: Vec<Product> = state.store.find_all().await?;
    let summaries: Vec<ProductSummary> = products.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(summaries))
}

pub async fn get_product(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let product = state
        .store
        .find_by_key::<Product>(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))?;
    debug!("Fetched product: {:?}", product);
    Ok(HttpResponse::Ok().json(product))
}

pub async fn patch_product(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let product = state
        .store
        .update::<Product>(&id, body.into_inner())
        .await?
        .ok_or_else(|| ApiError::not_found("Product not found"))?;
    Ok(HttpResponse::Ok().json(product))
}

pub async fn upsert_product(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpsertProductRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!("Request body: {:?}", body);
    let UpsertProductRequest { name, context } = body.into_inner();
    let fields = supplied([("name", name.map(Value::String)), ("context", context)]);
    let product: Product = state.store.upsert(&id, fields).await?;
    Ok(HttpResponse::Created().json(product))
}

// Leads

pub async fn list_leads(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let leads: Vec<Lead> = state.store.find_all().await?;
    let summaries: Vec<LeadSummary> = leads.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(summaries))
}

pub async fn get_lead(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let lead = state
        .store
        .find_by_key::<Lead>(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Lead not found"))?;
    debug!("Fetched lead: {:?}", lead);
    Ok(HttpResponse::Ok().json(lead))
}

pub async fn patch_lead(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let lead = state
        .store
        .update::<Lead>(&id, body.into_inner())
        .await?
        .ok_or_else(|| ApiError::not_found("Lead not found"))?;
    Ok(HttpResponse::Ok().json(lead))
}

pub async fn upsert_lead(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpsertLeadRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!("Request body: {:?}", body);
    let UpsertLeadRequest {
        context,
        whatsapp_msgs,
    } = body.into_inner();
    let fields = supplied([("context", context), ("whatsappMsgs", whatsapp_msgs)]);
    let lead: Lead = state.store.upsert(&id, fields).await?;
    Ok(HttpResponse::Created().json(lead))
}

// Company config

pub async fn upsert_company_config(
    state: web::Data<AppState>,
    body: web::Json<UpsertCompanyConfigRequest>,
) -> Result<HttpResponse, ApiError> {
    let UpsertCompanyConfigRequest {
        company_name,
        config_data,
    } = body.into_inner();
    let (company_name, config_data) = match (non_empty(company_name), config_data) {
        (Some(name), Some(data)) if is_truthy(&data) => (name, data),
        _ => {
            return Err(ApiError::validation(
                "Missing required fields: companyName, configData",
            ));
        }
    };

    let stored: CompanyConfig = state
        .store
        .upsert(&company_name, supplied([("configData", Some(config_data))]))
        .await?;

    if let Err(e) = state.reload_company_config().await {
        error!("Error loading company config: {}", e);
    }

    Ok(HttpResponse::Created().json(stored))
}

pub async fn list_company_configs(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let configs: Vec<CompanyConfig> = state.store.find_all().await?;
    Ok(HttpResponse::Ok().json(configs))
}

// Mail

pub async fn send_mail_brevo(
    state: web::Data<AppState>,
    body: web::Json<BrevoMailRequest>,
) -> Result<HttpResponse, ApiError> {
    let BrevoMailRequest {
        to,
        subject,
        html_content,
    } = body.into_inner();
    let (Some(to), Some(subject), Some(html_content)) =
        (non_empty(to), non_empty(subject), non_empty(html_content))
    else {
        return Err(ApiError::validation(
            "Missing required fields: to, subject, htmlContent",
        ));
    };

    let response = state
        .brevo
        .send(&to, &subject, &html_content)
        .await
        .map_err(|e| ApiError::upstream("Failed to send email", e))?;
    Ok(HttpResponse::Ok().json(response))
}

fn require_token(cached: &CachedConfig) -> Result<String, ApiError> {
    non_empty(cached.token())
        .ok_or_else(|| ApiError::unauthorized("Authorization token not found."))
}

fn require_account_id(cached: &CachedConfig) -> Result<String, ApiError> {
    non_empty(cached.account_id())
        .ok_or_else(|| ApiError::validation("Account ID not found in config."))
}

pub async fn send_zoho_mail(
    state: web::Data<AppState>,
    body: web::Json<ZohoMailRequest>,
) -> Result<HttpResponse, ApiError> {
    let cached = state.cache.load().await;
    let token = require_token(&cached)?;

    let ZohoMailRequest {
        to_address,
        subject,
        content,
    } = body.into_inner();
    let (Some(to_address), Some(subject), Some(content)) =
        (non_empty(to_address), non_empty(subject), non_empty(content))
    else {
        return Err(ApiError::validation("Missing required fields in body"));
    };
    let account_id = require_account_id(&cached)?;

    let message = ZohoOutgoingMessage {
        from_address: cached.from_address(),
        to_address,
        subject,
        content,
    };
    let response = state
        .zoho
        .send_message(&token, &account_id, &message)
        .await
        .map_err(|e| ApiError::upstream("Failed to send Zoho mail", e))?;
    Ok(HttpResponse::Ok().json(response))
}

/// Fetches the Zoho accounts and remembers the first account's identity.
pub async fn get_account(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let cached = state.cache.load().await;
    let token = require_token(&cached)?;

    let response = state
        .zoho
        .list_accounts(&token)
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch Zoho accounts", e))?;
    debug!("Zoho Account Info: {}", response);

    let identity = serde_json::from_value::<ZohoAccountList>(response.clone())
        .ok()
        .and_then(|list| list.primary_identity());
    if let Some((account_id, from_address)) = identity {
        match state.cache.merge_account(&account_id, &from_address).await {
            Ok(()) => info!(
                "Saved Zoho account info: accountId={}, fromAddress={}",
                account_id, from_address
            ),
            Err(e) => error!("Failed to save Zoho account info: {}", e),
        }
        if let Err(e) = state.cache.remove_legacy_sidecar().await {
            error!("{}", e);
        }
    }

    Ok(HttpResponse::Ok().json(response))
}

pub async fn search_emails(
    state: web::Data<AppState>,
    email: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let cached = state.cache.load().await;
    let token = require_token(&cached)?;
    let account_id = require_account_id(&cached)?;

    let response = state
        .zoho
        .search_messages(&token, &account_id, &email)
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch Zoho emails", e))?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_original_email(
    state: web::Data<AppState>,
    message_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let cached = state.cache.load().await;
    let token = require_token(&cached)?;
    let account_id = require_account_id(&cached)?;

    let (content_type, body) = state
        .zoho
        .original_message(&token, &account_id, &message_id)
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch Zoho original email", e))?;
    Ok(HttpResponse::Ok()
        .content_type(content_type.unwrap_or_else(|| "text/plain; charset=utf-8".to_string()))
        .body(body))
}

// WhatsApp

pub async fn oauth_callback(query: web::Query<OAuthQuery>) -> HttpResponse {
    info!("OAuth code: {:?}", query.code);
    info!("OAuth state: {:?}", query.state);

    if query.code.is_some() && query.state.is_some() {
        HttpResponse::Ok().body("OAuth successful")
    } else {
        HttpResponse::InternalServerError().body("OAuth failed")
    }
}

pub async fn verify_webhook(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let query: WebhookVerifyQuery = match serde_urlencoded::from_str(req.query_string()) {
        Ok(query) => query,
        Err(_) => return HttpResponse::BadRequest().body("Invalid query string"),
    };

    let (Some(mode), Some(token)) = (query.mode, query.verify_token) else {
        return HttpResponse::BadRequest().body("Missing hub.mode or hub.verify_token");
    };

    if mode == "subscribe" && state.whatsapp_verify_token.as_deref() == Some(token.as_str()) {
        info!("Webhook verified!");
        HttpResponse::Ok().body(query.challenge.unwrap_or_default())
    } else {
        HttpResponse::Forbidden().body("Forbidden")
    }
}

pub async fn receive_webhook(body: web::Json<Value>) -> HttpResponse {
    let event = body.into_inner();
    info!("Received webhook event: {}", event);

    if !event.get("object").is_some_and(is_truthy) {
        return HttpResponse::NotFound().body("Not Found");
    }

    if let Some(message) = InboundMessage::first_in(&event) {
        info!("Message from: {}", message.from.as_deref().unwrap_or("<unknown>"));
        info!("Message text: {}", message.text.as_deref().unwrap_or("<none>"));
    }
    HttpResponse::Ok().body("OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_matches_loose_json_flags() {
        assert!(is_truthy(&json!("whatsapp_business_account")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn supplied_drops_absent_fields() {
        let fields = supplied([("name", Some(json!("Widget"))), ("context", None)]);
        assert_eq!(Value::Object(fields), json!({"name": "Widget"}));
    }
}
