//! User-visible notification texts.

use std::fmt::Write;
use std::time::Duration;

use crate::integrations::{ImageMapping, RunConclusion, UploadReceipt};

pub fn help() -> String {
    "❌ Request not recognised\n\n\
     Supported requests:\n\
     1️⃣  Image sync: send image names, one per line or comma-separated\n   \
     e.g. nginx:latest\n\n\
     2️⃣  File upload: send a single http(s) link\n   \
     e.g. https://example.com/file.pdf"
        .to_string()
}

pub fn busy() -> String {
    "⏳ Another sync task is in progress, please try again later".to_string()
}

pub fn sync_accepted(mappings: &[ImageMapping]) -> String {
    let mut text = format!(
        "🔄 Processing image sync request...\n{} image(s):",
        mappings.len()
    );
    for (i, mapping) in mappings.iter().enumerate() {
        let _ = write!(text, "\n{}. {mapping}", i + 1);
    }
    text
}

pub fn sync_submitted(count: usize) -> String {
    format!(
        "✅ Image sync submitted!\n\n{count} image(s) added to the sync list.\n\
         You will be notified when the pipeline finishes."
    )
}

pub fn sync_failed(stage: &str, reason: &str) -> String {
    format!("❌ Image sync failed while {stage}\n\nError: {reason}")
}

pub fn run_succeeded(url: &str) -> String {
    format!("🎉 Image sync finished successfully!\n\nRun: {url}")
}

pub fn run_failed(conclusion: Option<RunConclusion>, url: &str) -> String {
    let conclusion = conclusion.map_or_else(|| "unknown".to_string(), |c| c.to_string());
    format!("❌ Image sync failed ({conclusion})\n\nRun: {url}")
}

pub fn run_timed_out(timeout: Duration, last_url: Option<&str>) -> String {
    let minutes = timeout.as_secs() / 60;
    let mut text = format!(
        "⏰ Image sync did not finish within {minutes} minute(s); stopped watching."
    );
    if let Some(url) = last_url {
        let _ = write!(text, "\n\nLast run: {url}");
    }
    text
}

pub fn upload_not_configured() -> String {
    "❌ Object storage is not configured\n\n\
     Set QINGSTOR_ACCESS_KEY_ID and QINGSTOR_SECRET_ACCESS_KEY \
     (QINGSTOR_ZONE and QINGSTOR_BUCKET optional)."
        .to_string()
}

pub fn upload_started(url: &str) -> String {
    format!("📥 Downloading file...\n\nURL: {url}")
}

pub fn upload_succeeded(receipt: &UploadReceipt) -> String {
    format!(
        "✅ File uploaded!\n\nName: {}\nSize: {} bytes\nBucket: {}\nLink: {}",
        receipt.filename, receipt.size, receipt.bucket, receipt.url
    )
}

pub fn upload_failed(reason: &str) -> String {
    format!("❌ File upload failed\n\nError: {reason}")
}
