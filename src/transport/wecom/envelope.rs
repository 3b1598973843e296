//! XML documents carried by callbacks: the outer envelope holding the
//! ciphertext, and the inner message recovered after decryption.

use serde::Deserialize;

use crate::error::CallbackError;

/// Outer callback document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEnvelope {
    pub to_user: String,
    pub encrypted_payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Other(String),
}

impl MessageKind {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "text" => Self::Text,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Other(name) => name,
        }
    }
}

/// An authenticated, decrypted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub to_user: String,
    pub from_user: String,
    pub create_time: i64,
    pub msg_type: MessageKind,
    pub content: Option<String>,
    pub msg_id: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "ToUserName", default)]
    to_user: Option<String>,
    #[serde(rename = "Encrypt", default)]
    encrypt: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "ToUserName", default)]
    to_user: Option<String>,
    #[serde(rename = "FromUserName", default)]
    from_user: Option<String>,
    #[serde(rename = "CreateTime", default)]
    create_time: Option<String>,
    #[serde(rename = "MsgType", default)]
    msg_type: Option<String>,
    #[serde(rename = "Content", default)]
    content: Option<String>,
    #[serde(rename = "MsgId", default)]
    msg_id: Option<String>,
}

pub fn parse_envelope(xml: &str) -> Result<CallbackEnvelope, CallbackError> {
    let raw: RawEnvelope = quick_xml::de::from_str(xml)
        .map_err(|e| CallbackError::Decode(format!("envelope is not valid XML: {e}")))?;

    let encrypted_payload = raw
        .encrypt
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CallbackError::Decode("envelope has no Encrypt element".into()))?;

    Ok(CallbackEnvelope {
        to_user: raw.to_user.unwrap_or_default(),
        encrypted_payload,
    })
}

pub fn parse_message(xml: &str) -> Result<DecryptedMessage, CallbackError> {
    let raw: RawMessage = quick_xml::de::from_str(xml)
        .map_err(|e| CallbackError::Decode(format!("message is not valid XML: {e}")))?;

    let create_time = required(raw.create_time, "CreateTime")?;
    let create_time = create_time
        .trim()
        .parse::<i64>()
        .map_err(|_| CallbackError::Decode(format!("CreateTime {create_time:?} is not an integer")))?;

    Ok(DecryptedMessage {
        to_user: required(raw.to_user, "ToUserName")?,
        from_user: required(raw.from_user, "FromUserName")?,
        create_time,
        msg_type: MessageKind::parse(&required(raw.msg_type, "MsgType")?),
        content: raw.content,
        msg_id: raw.msg_id.filter(|id| !id.trim().is_empty()),
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, CallbackError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CallbackError::Decode(format!("missing required field {field}")))
}

/// Renders an outer envelope, as the platform would POST it.
pub fn render_envelope(to_user: &str, agent_id: &str, encrypted: &str) -> String {
    format!(
        "<xml><ToUserName>{}</ToUserName><AgentID>{}</AgentID><Encrypt>{}</Encrypt></xml>",
        cdata(to_user),
        cdata(agent_id),
        cdata(encrypted)
    )
}

/// Renders an inner text message document.
pub fn render_text_message(
    to_user: &str,
    from_user: &str,
    create_time: i64,
    content: &str,
    msg_id: &str,
) -> String {
    format!(
        "<xml><ToUserName>{}</ToUserName><FromUserName>{}</FromUserName>\
         <CreateTime>{create_time}</CreateTime><MsgType>{}</MsgType>\
         <Content>{}</Content><MsgId>{}</MsgId></xml>",
        cdata(to_user),
        cdata(from_user),
        cdata("text"),
        cdata(content),
        cdata(msg_id)
    )
}

fn cdata(value: &str) -> String {
    format!("<![CDATA[{}]]>", value.replace("]]>", "]]]]><![CDATA[>"))
}
