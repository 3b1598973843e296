//! Classification of a text message into upload or image-sync work.

use crate::config::RegistryConfig;
use crate::integrations::ImageMapping;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Whole message is a single http(s) URL.
    Upload(String),
    /// Cleaned source image names, in message order.
    Images(Vec<String>),
    Unrecognized,
}

/// Matches `^https?://\S+$` against the trimmed content.
pub fn is_single_url(content: &str) -> bool {
    let trimmed = content.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    rest.is_some_and(|rest| !rest.is_empty() && !rest.chars().any(char::is_whitespace))
}

/// Newline-separated, `#` comments skipped, commas split further, empties dropped.
pub fn parse_image_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

const PLATFORM_FLAG: &str = "--platform=";

/// Drop `--platform=<value>` fragments copied along with `docker pull` lines.
pub fn format_image_name(image: &str) -> String {
    let mut out = String::with_capacity(image.len());
    let mut rest = image;
    while let Some(pos) = rest.find(PLATFORM_FLAG) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + PLATFORM_FLAG.len()..];
        let value_end = after.find(char::is_whitespace).unwrap_or(after.len());
        rest = &after[value_end..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

pub fn classify(content: &str) -> SyncRequest {
    if is_single_url(content) {
        return SyncRequest::Upload(content.trim().to_string());
    }

    let images: Vec<String> = parse_image_list(content)
        .iter()
        .map(|image| format_image_name(image))
        .filter(|image| !image.is_empty())
        .collect();

    if images.is_empty() {
        SyncRequest::Unrecognized
    } else {
        SyncRequest::Images(images)
    }
}

/// `{registry}/{namespace}/{last path segment}:{tag or latest}`
pub fn target_image(registry: &RegistryConfig, source: &str) -> String {
    let last_slash = source.rfind('/').map_or(0, |idx| idx + 1);
    let (name, tag) = match source[last_slash..].split_once(':') {
        Some((name, tag)) if !tag.is_empty() => (name, tag),
        Some((name, _)) => (name, "latest"),
        None => (&source[last_slash..], "latest"),
    };
    format!("{}/{}/{name}:{tag}", registry.registry, registry.namespace)
}

pub fn map_images(registry: &RegistryConfig, images: &[String]) -> Vec<ImageMapping> {
    images
        .iter()
        .map(|source| ImageMapping {
            source: source.clone(),
            target: target_image(registry, source),
        })
        .collect()
}
