//! Attachment text extraction from a local upload directory.

use async_trait::async_trait;
use chatforge_core::error::StorageError;
use chatforge_core::message::Attachment;
use chatforge_core::storage::FileExtractor;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const TEXT_EXTENSIONS: &[&str] = &[
    ".js", ".ts", ".tsx", ".jsx", ".py", ".rs", ".md", ".json", ".csv", ".toml", ".yaml", ".yml",
];

/// Whether the attachment can be read as UTF-8 text.
pub fn is_text_attachment(attachment: &Attachment) -> bool {
    let name = attachment.name.to_lowercase();
    attachment.mime_type.starts_with("text/") || TEXT_EXTENSIONS.iter().any(|e| name.ends_with(e))
}

/// Reads attachments out of `root`, keyed by the last segment of their URL
/// (`/uploads/<file>`, `/api/files/<file>` and `file://` URLs all work).
pub struct LocalFileExtractor {
    root: PathBuf,
}

impl LocalFileExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, attachment: &Attachment) -> Result<PathBuf, StorageError> {
        let url = attachment.url.trim_start_matches("file://");
        let relative = url
            .rsplit('/')
            .find(|s| !s.is_empty())
            .ok_or_else(|| StorageError::NotFound(format!("attachment {}", attachment.name)))?;
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::NotFound(format!(
                "attachment {} escapes the upload directory",
                attachment.name
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileExtractor for LocalFileExtractor {
    async fn extract_text(
        &self,
        attachment: &Attachment,
        max_chars: usize,
    ) -> Result<String, StorageError> {
        if !is_text_attachment(attachment) {
            return Err(StorageError::Backend(format!(
                "{} ({}) is not a text file",
                attachment.name, attachment.mime_type
            )));
        }
        let path = self.resolve(attachment)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StorageError::Backend(format!("{}: {e}", path.display())))?;

        if content.chars().count() <= max_chars {
            return Ok(content);
        }
        debug!(file = %attachment.name, max_chars, "Attachment truncated");
        let truncated: String = content.chars().take(max_chars).collect();
        Ok(format!(
            "{truncated}\n\n(Note: The content of \"{}\" has been truncated to {max_chars} characters for brevity. Please ask if you need to see more.)",
            attachment.name
        ))
    }
}
