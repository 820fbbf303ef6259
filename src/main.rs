use actix_cors::Cors;
use actix_web::middleware::{Logger, from_fn};
use actix_web::{App, HttpServer, web};
use log::{error, info};

use convoflow_api::config::Config;
use convoflow_api::middleware::capture_token;
use convoflow_api::store::Store;
use convoflow_api::{AppState, configure};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(std::io::Error::other)?;

    // A missing database is not fatal; store-backed routes fail individually.
    let store = match Store::open(&config.database_url) {
        Ok(store) => {
            info!("Database connected: {}", config.database_url);
            store
        }
        Err(e) => {
            error!("Database connection error: {}", e);
            Store::unavailable(e.to_string())
        }
    };

    let state = web::Data::new(AppState::new(&config, store));
    if state.store.is_available() {
        if let Err(e) = state.reload_company_config().await {
            error!("Error loading company config: {}", e);
        }
    }

    info!("🚀 ConvoFlow API server starting on port {}", config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(from_fn(capture_token))
            .wrap(Cors::permissive())
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
