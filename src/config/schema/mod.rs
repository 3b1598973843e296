mod core;
mod gateway;
mod github;
mod storage;
mod sync;
mod wecom;

pub use self::core::Config;
pub use gateway::GatewayConfig;
pub use github::{GithubConfig, RegistryConfig};
pub use storage::{NetworkConfig, StorageConfig};
pub use sync::{LockBackend, SyncConfig};
pub use wecom::WecomConfig;
