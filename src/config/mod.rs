pub mod schema;

pub use schema::{
    Config, GatewayConfig, GithubConfig, LockBackend, NetworkConfig, RegistryConfig,
    StorageConfig, SyncConfig, WecomConfig,
};
