pub mod config;
pub mod config_cache;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod model;
pub mod server;
pub mod store;

use actix_web::web;
use log::info;

use crate::config::Config;
use crate::config_cache::ConfigCache;
use crate::error::{ApiError, SeedError};
use crate::mail::{BrevoClient, ZohoClient};
use crate::model::CompanyConfig;
use crate::store::Store;

/// Shared state handed to every route.
pub struct AppState {
    pub store: Store,
    pub cache: ConfigCache,
    pub brevo: BrevoClient,
    pub zoho: ZohoClient,
    pub whatsapp_verify_token: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, store: Store) -> Self {
        let http = reqwest::Client::new();
        Self {
            store,
            cache: ConfigCache::new(&config.config_cache_path, &config.legacy_account_path),
            brevo: BrevoClient::new(
                http.clone(),
                &config.brevo_api_url,
                config.brevo_api_key.clone(),
                &config.sender_name,
                &config.sender_email,
            ),
            zoho: ZohoClient::new(http, &config.zoho_api_url),
            whatsapp_verify_token: config.whatsapp_verify_token.clone(),
        }
    }

    /// Overwrites the cache file with the most recently written company config.
    /// Returns `false` when there is no company config yet.
    pub async fn reload_company_config(&self) -> Result<bool, SeedError> {
        let Some(latest) = self.store.find_latest::<CompanyConfig>().await? else {
            return Ok(false);
        };
        self.cache.seed(&latest.config_data).await?;
        info!(
            "Company config for {} loaded and written to {}",
            latest.company_name,
            self.cache.path().display()
        );
        Ok(true)
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Body extraction failures answer with the same JSON shape as validation errors.
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::validation(err.to_string()).into()),
    );

    cfg.route("/", web::get().to(server::index))
        .service(web::resource("/product").route(web::get().to(server::list_products)))
        .service(
            web::resource("/product/{id}")
                .route(web::get().to(server::get_product))
                .route(web::patch().to(server::patch_product))
                .route(web::post().to(server::upsert_product)),
        )
        .service(web::resource("/lead").route(web::get().to(server::list_leads)))
        .service(
            web::resource("/lead/{id}")
                .route(web::get().to(server::get_lead))
                .route(web::patch().to(server::patch_lead))
                .route(web::post().to(server::upsert_lead)),
        )
        .service(
            web::resource("/company-config")
                .route(web::get().to(server::list_company_configs))
                .route(web::post().to(server::upsert_company_config)),
        )
        .route("/sendMailBrevo", web::post().to(server::send_mail_brevo))
        .route("/sendZohoMail", web::post().to(server::send_zoho_mail))
        .route("/account", web::get().to(server::get_account))
        .route("/email/{emailid}", web::get().to(server::search_emails))
        .route("/emailId/{id}", web::get().to(server::get_original_email))
        .route("/oauth", web::get().to(server::oauth_callback))
        .service(
            web::resource("/webhook")
                .route(web::get().to(server::verify_webhook))
                .route(web::post().to(server::receive_webhook)),
        )
        .route("/log", web::route().to(server::log_entry));
}
