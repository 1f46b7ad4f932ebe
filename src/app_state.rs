use crate::config::Config;
use std::sync::Arc;

pub struct AppState<S> {
    pub store: Arc<S>,
    pub config: Config,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}
