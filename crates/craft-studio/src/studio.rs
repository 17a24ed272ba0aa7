//! Application context: everything a tool needs, wired from one `Config`.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::conversation::ConversationBuffer;
use crate::error::{StoreError, UploadError};
use crate::gateway::backend::ModelBackend;
use crate::gateway::gemini::GeminiBackend;
use crate::gateway::ModelGateway;
use crate::metrics;
use crate::session::SessionId;
use crate::session_db::SessionDatabase;
use crate::session_store::SessionStore;
use crate::telemetry;
use crate::uploads::UploadDescriptor;

pub struct Studio {
    pub config: Config,
    pub database: Arc<SessionDatabase>,
    pub gateway: Arc<ModelGateway>,
    pub conversations: ConversationBuffer,
}

impl Studio {
    /// Install logging, open the database, build the Gemini backend and wire
    /// the gateway.
    ///
    /// A database that cannot be opened on disk degrades to an in-memory
    /// one so the tools keep working without durable history.
    pub fn bootstrap(config: Config) -> Result<Self> {
        telemetry::init_tracing(config.debug_mode);
        info!("Starting {} v{}", config.app_name, config.app_version);
        config.print_config();

        if let Err(e) = metrics::init_metrics() {
            warn!("Failed to initialize metrics: {}. Metrics disabled.", e);
        }

        let database = match SessionDatabase::open(&config.database_path, config.database_pool_size) {
            Ok(db) => {
                info!("Session database ready at {}", config.database_path.display());
                Arc::new(db)
            }
            Err(e) => {
                warn!("Failed to open session database: {}. Falling back to in-memory.", e);
                Arc::new(
                    SessionDatabase::open_in_memory()
                        .context("Failed to open in-memory session database")?,
                )
            }
        };

        let gateway_config = config.gateway_config();
        let backend = GeminiBackend::new(
            &config.google_api_key,
            config.model_name.clone(),
            &config.gemini_base_url,
            gateway_config.request_timeout,
        )?;

        Ok(Self::with_backend(config, database, Arc::new(backend)))
    }

    /// Wire a studio around an existing database and any model backend.
    pub fn with_backend(
        config: Config,
        database: Arc<SessionDatabase>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let gateway = Arc::new(ModelGateway::new(backend, config.gateway_config()));
        Self {
            config,
            database,
            gateway,
            conversations: ConversationBuffer::default(),
        }
    }

    /// A store handle for a brand-new session.
    pub fn session(&self) -> SessionStore {
        SessionStore::start(self.database.clone())
    }

    pub fn resume_session(&self, session_id: &str) -> Result<SessionStore, StoreError> {
        let id = SessionId::parse(session_id)?;
        Ok(SessionStore::new(self.database.clone(), id))
    }

    /// Classify an upload against the configured size limit.
    pub fn inspect_upload(&self, filename: &str, content: &[u8]) -> Result<UploadDescriptor, UploadError> {
        UploadDescriptor::inspect(filename, content, self.config.max_file_size_bytes)
    }
}
