//! Out-of-scope collaborators named only by interface (spec.md §1): the
//! language analysis backend and the virtual file system. This crate ships a
//! minimal reference implementation of each so the Dispatcher and Master
//! Router are runnable and testable standalone, the way the teacher's own
//! `rls-analysis`/`rls-vfs` crates stand behind its `Analysis`/`Vfs` traits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;

/// The language-analysis backend collaborator: one method per LSP operation
/// this core dispatches. Consumers of this crate implement this trait with a
/// real analysis engine; `NullLanguageHandler` below answers every method
/// with an empty, well-typed result.
#[async_trait]
pub trait LanguageHandler: Send + Sync {
    async fn initialize(&self, params: Value) -> Result<Value, HandlerError>;
    async fn shutdown(&self, params: Value) -> Result<Value, HandlerError>;
    async fn hover(&self, params: Value) -> Result<Value, HandlerError>;
    async fn definition(&self, params: Value) -> Result<Value, HandlerError>;
    async fn references(&self, params: Value) -> Result<Value, HandlerError>;
    async fn document_symbol(&self, params: Value) -> Result<Value, HandlerError>;
    async fn completion(&self, params: Value) -> Result<Value, HandlerError>;
    async fn workspace_symbol(&self, params: Value) -> Result<Value, HandlerError>;
}

/// A `LanguageHandler` that answers every method with an empty but
/// well-typed result. Useful for running the dispatch core standalone (e.g.
/// in integration tests) without a real analysis engine wired in.
#[derive(Default)]
pub struct NullLanguageHandler;

#[async_trait]
impl LanguageHandler for NullLanguageHandler {
    async fn initialize(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(serde_json::json!({"capabilities": {}}))
    }

    async fn shutdown(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(Value::Null)
    }

    async fn hover(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(Value::Null)
    }

    async fn definition(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(serde_json::json!([]))
    }

    async fn references(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(serde_json::json!([]))
    }

    async fn document_symbol(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(serde_json::json!([]))
    }

    async fn completion(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(serde_json::json!([]))
    }

    async fn workspace_symbol(&self, _params: Value) -> Result<Value, HandlerError> {
        Ok(serde_json::json!([]))
    }
}

/// The virtual file system collaborator (spec.md §1). In `--strict` mode
/// (spec.md §6) a real implementation proxies through `workspace/xfiles` /
/// `textDocument/xcontent` reverse requests instead of touching local disk;
/// that proxying lives in `router`, not here.
///
/// URIs are validated with `url::Url` (the teacher's own `rls-vfs` takes
/// `Url` rather than a bare path for exactly this reason: LSP URIs are not
/// guaranteed to be `file://`, and parsing catches a malformed one before it
/// reaches a handler).
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_dir(&self, uri: &str) -> Result<Vec<String>, HandlerError>;
    async fn read_file(&self, uri: &str) -> Result<String, HandlerError>;
}

fn validate_uri(uri: &str) -> Result<url::Url, HandlerError> {
    url::Url::parse(uri).map_err(|err| HandlerError::new(format!("invalid URI `{}`: {}", uri, err)))
}

/// An in-memory `FileSystem`, standing in for local disk access in tests and
/// non-strict standalone runs.
#[derive(Default)]
pub struct LocalFileSystem {
    files: Mutex<HashMap<String, String>>,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, uri: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.lock().unwrap().insert(uri.into(), contents.into());
        self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_dir(&self, uri: &str) -> Result<Vec<String>, HandlerError> {
        let uri = validate_uri(uri)?;
        let prefix = format!("{}/", uri.as_str().trim_end_matches('/'));
        Ok(self.files.lock().unwrap().keys().filter(|k| k.starts_with(&prefix)).cloned().collect())
    }

    async fn read_file(&self, uri: &str) -> Result<String, HandlerError> {
        let uri = validate_uri(uri)?;
        self.files
            .lock()
            .unwrap()
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| HandlerError::new(format!("no such file: {}", uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_language_handler_answers_every_method() {
        let handler = NullLanguageHandler;
        assert!(handler.initialize(Value::Null).await.is_ok());
        assert_eq!(handler.definition(Value::Null).await.unwrap(), serde_json::json!([]));
    }

    #[tokio::test]
    async fn local_file_system_round_trips_a_written_file() {
        let fs = LocalFileSystem::new().with_file("file:///a.rs", "fn main() {}");
        assert_eq!(fs.read_file("file:///a.rs").await.unwrap(), "fn main() {}");
        assert!(fs.read_file("file:///missing.rs").await.is_err());
    }

    #[tokio::test]
    async fn local_file_system_lists_a_directory() {
        let fs = LocalFileSystem::new().with_file("file:///src/a.rs", "a").with_file("file:///src/b.rs", "b");
        let mut entries = fs.read_dir("file:///src").await.unwrap();
        entries.sort();
        assert_eq!(entries, vec!["file:///src/a.rs".to_string(), "file:///src/b.rs".to_string()]);
    }
}
