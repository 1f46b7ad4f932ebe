use std::env;

use crate::error::AppError;

/// Which document store implementation the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub frontend_origin: String,
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    /// Length of the "top N" lists on the dashboards.
    pub dashboard_top_n: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv::dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "mongo".to_string())
            .to_lowercase()
            .as_str()
        {
            "mongo" | "mongodb" => StoreBackend::Mongo,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(AppError::Config(format!("unknown STORE_BACKEND '{}'", other)))
            }
        };

        let mongo_uri = env::var("MONGO_URI").ok();
        if store_backend == StoreBackend::Mongo && mongo_uri.is_none() {
            return Err(AppError::Config("MONGO_URI must be set".to_string()));
        }

        let dashboard_top_n = env::var("DASHBOARD_TOP_N")
            .ok()
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|_| AppError::Config(format!("DASHBOARD_TOP_N is not a number: {}", v)))
            })
            .transpose()?
            .unwrap_or(5);

        Ok(Self {
            mongo_uri,
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "campusconnect".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| AppError::Config("JWT_SECRET must be set".to_string()))?,
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            store_backend,
            dashboard_top_n,
        })
    }

    /// Configuration for tests and local runs against the in-memory store.
    pub fn for_memory(jwt_secret: &str) -> Self {
        Self {
            mongo_uri: None,
            database_name: "campusconnect".to_string(),
            jwt_secret: jwt_secret.to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            store_backend: StoreBackend::Memory,
            dashboard_top_n: 5,
        }
    }
}
