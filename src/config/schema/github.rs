use serde::{Deserialize, Serialize};

/// Repository whose image list and workflow perform the actual mirroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub token: String,
    /// `owner/name`
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Image list file the workflow reads
    #[serde(default = "default_file_path")]
    pub file_path: String,
    /// Workflow file (e.g. `sync.yml`). When set, the pipeline is started via
    /// `workflow_dispatch` and run status is scoped to it; otherwise a marker
    /// commit to `file_path` starts the pipeline.
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Route API calls through `network.proxy_url`
    #[serde(default = "default_true")]
    pub use_proxy: bool,
}

fn default_branch() -> String {
    "main".into()
}

fn default_file_path() -> String {
    "images.txt".into()
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}

fn default_true() -> bool {
    true
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            repo: String::new(),
            branch: default_branch(),
            file_path: default_file_path(),
            workflow: None,
            api_base: default_api_base(),
            use_proxy: true,
        }
    }
}

/// Target registry for mirrored images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry")]
    pub registry: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_registry() -> String {
    "registry.cn-hangzhou.aliyuncs.com".into()
}

fn default_namespace() -> String {
    "namespace".into()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            namespace: default_namespace(),
        }
    }
}
