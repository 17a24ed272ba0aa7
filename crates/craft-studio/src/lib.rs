// craft-studio/crates/craft-studio/src/lib.rs

pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod session;
pub mod session_db;
pub mod session_store;
pub mod studio;
pub mod telemetry;
pub mod uploads;

// Public API exports
pub use config::Config;
pub use conversation::{BufferedMessage, ConversationBuffer, ConversationExport};
pub use error::{GenerationError, GenerationErrorKind, StoreError, UploadError};
pub use session::{MessageRole, SessionId, Tool};
pub use session_db::SessionDatabase;
pub use session_store::SessionStore;
pub use studio::Studio;
pub use uploads::{FileCategory, UploadDescriptor};

// Gateway exports
pub use gateway::{
    backend::{BackendRequest, ImageInput, ModelBackend},
    gemini::GeminiBackend,
    CacheStats, GatewayConfig, Generation, GenerationParams, GenerationRequest, ModelGateway,
};
