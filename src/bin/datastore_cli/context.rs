use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::runtime::Runtime;

use datastore::data::TypeSpec;
use datastore::io::{HttpTransport, StaticSession};
use datastore::{CoreConfig, CrudOrchestrator, DataStore};

use crate::output::ConsoleMessenger;

/// Everything one CLI invocation needs
pub struct Context {
    crud: CrudOrchestrator,
    runtime: Runtime,
}

impl Context {
    pub fn new(config_path: Option<&Path>, server: Option<&str>, type_tag: &str) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => CoreConfig::load(path)?,
            None => CoreConfig::default(),
        };
        if let Some(server) = server {
            config.server_url = server.to_string();
        }
        if config.types.is_empty() {
            log::warn!("no types configured, registering {} for this run", type_tag);
            config.types.push(TypeSpec::new(type_tag));
        }
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| anyhow!("Failed to create Tokio runtime: {}", e))?;

        let crud = CrudOrchestrator::from_config(
            &config,
            Arc::new(DataStore::new_in_memory()),
            Arc::new(HttpTransport::with_config(config.client())),
            Arc::new(ConsoleMessenger),
            Arc::new(StaticSession::new(config.user_id.clone())),
        );

        Ok(Context { crud, runtime })
    }

    pub fn crud(&self) -> &CrudOrchestrator {
        &self.crud
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
