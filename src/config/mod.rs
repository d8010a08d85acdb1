pub mod app;
pub mod engine;

pub use app::{
    AllowedOrigin, AppConfig, AppConfigSet, CorsOptions, EncryptionKey, HostBinding, HostUsage,
};
pub use engine::{
    AppSourceConfig, CacheConfig, DatabaseConfig, DebugFeatures, EngineConfig, LogSinkConfig,
    RemoteCredentials, ResourceGroupConfig, ServerConfig, StorageConfig, DEFAULT_GROUP_ID,
};
