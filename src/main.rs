// src/main.rs

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use campusconnect::app_state::AppState;
use campusconnect::auth::Authentication;
use campusconnect::config::{Config, StoreBackend};
use campusconnect::configure;
use campusconnect::store::{DocumentStore, MemoryStore, MongoStore};

async fn run<S: DocumentStore + 'static>(store: Arc<S>, config: Config) -> io::Result<()> {
    let bind_addr = config.bind_addr.clone();
    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(&config.jwt_secret))
            .app_data(web::Data::new(AppState {
                store: store.clone(),
                config: config.clone(),
            }))
            .configure(configure::<S>)
    })
    .bind(bind_addr)?
    .run()
    .await
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    match config.store_backend {
        StoreBackend::Mongo => {
            let uri = config.mongo_uri.clone().unwrap_or_default();
            let store = MongoStore::init(&uri, &config.database_name)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            run(Arc::new(store), config).await
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on shutdown");
            run(Arc::new(MemoryStore::new()), config).await
        }
    }
}
