use serde::{Deserialize, Serialize};

/// Messaging platform application credentials and callback secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WecomConfig {
    /// Corporate id; also the receive id trailing every callback frame
    #[serde(default)]
    pub corp_id: String,
    /// Application (agent) id used when sending messages
    #[serde(default)]
    pub agent_id: String,
    /// Application secret used to fetch access tokens
    #[serde(default)]
    pub secret: String,
    /// Callback token used for signatures
    #[serde(default)]
    pub token: String,
    /// 43-character callback `EncodingAESKey`
    #[serde(default)]
    pub encoding_aes_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Reject callback frames whose receive id differs from `corp_id`
    #[serde(default)]
    pub enforce_receive_id: bool,
}

fn default_api_base() -> String {
    "https://qyapi.weixin.qq.com".into()
}

impl Default for WecomConfig {
    fn default() -> Self {
        Self {
            corp_id: String::new(),
            agent_id: String::new(),
            secret: String::new(),
            token: String::new(),
            encoding_aes_key: String::new(),
            api_base: default_api_base(),
            enforce_receive_id: false,
        }
    }
}
