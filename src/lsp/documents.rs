// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Open-document tracking.
//!
//! The server must see a document opened before it is queried. Documents
//! are opened lazily on first use, changes are sent as whole-content
//! replacements, and versions only ever move forward for a given URI, even
//! across close and reopen.

use async_trait::async_trait;
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem, Uri,
    VersionedTextDocumentIdentifier,
};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::correlator::Correlator;
use crate::error::{EngineError, Result};

/// Supplies the current text of a document the first time it is opened.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Reads the document at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if there is nothing at `uri`.
    async fn read(&self, uri: &Uri) -> Result<String>;
}

/// Reads `file://` URIs from the local file system. Bytes that are not
/// valid UTF-8 are replaced with U+FFFD.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsContentSource;

#[async_trait]
impl ContentSource for FsContentSource {
    async fn read(&self, uri: &Uri) -> Result<String> {
        let not_found = |reason: String| EngineError::NotFound {
            uri: uri.as_str().to_string(),
            reason,
        };

        let path = url::Url::parse(uri.as_str())
            .map_err(|e| not_found(e.to_string()))?
            .to_file_path()
            .map_err(|()| not_found("not a local file URI".to_string()))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| not_found(e.to_string()))?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(
                    "{} is not valid UTF-8 at byte {}; opening with replacement characters",
                    path.display(),
                    e.utf8_error().valid_up_to()
                );
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }
}

/// Converts an absolute file path to a `file://` URI.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] for relative paths.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path).map_err(|()| EngineError::NotFound {
        uri: path.display().to_string(),
        reason: "path is not absolute".to_string(),
    })?;
    Uri::from_str(url.as_str()).map_err(|e| EngineError::NotFound {
        uri: url.to_string(),
        reason: e.to_string(),
    })
}

/// A document the server currently has open.
#[derive(Debug, Clone)]
pub struct OpenDocument {
    /// Last version sent to the server.
    pub version: i32,
    /// Content as of that version.
    pub content: String,
    /// Language id sent with `didOpen`.
    pub language_id: String,
    last_accessed: Instant,
}

/// Per-URI state. Survives close so a reopened document continues its
/// version sequence.
#[derive(Debug, Default)]
struct DocSlot {
    doc: Option<OpenDocument>,
    last_version: i32,
}

type Slot = Arc<tokio::sync::Mutex<DocSlot>>;

/// Tracks open documents and emits the matching notifications.
///
/// Operations on the same URI are serialized; different URIs proceed
/// independently.
pub struct DocumentSync {
    correlator: Arc<Correlator>,
    source: Arc<dyn ContentSource>,
    language_id: String,
    /// One entry per URI ever opened in this session, kept after close so
    /// versions never repeat. Grows with the number of distinct URIs and
    /// is released by [`DocumentSync::clear`].
    slots: Mutex<HashMap<Uri, Slot>>,
}

impl DocumentSync {
    /// Creates an empty synchronizer.
    pub fn new(
        correlator: Arc<Correlator>,
        source: Arc<dyn ContentSource>,
        language_id: impl Into<String>,
    ) -> Self {
        Self {
            correlator,
            source,
            language_id: language_id.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, uri: &Uri) -> Slot {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(uri.clone())
            .or_default()
            .clone()
    }

    fn existing_slots(&self) -> Vec<(Uri, Slot)> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(uri, slot)| (uri.clone(), slot.clone()))
            .collect()
    }

    /// Opens `uri` unless it is already open. Returns true if a `didOpen`
    /// was sent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the content source has nothing
    /// for `uri`, or a transport error if the notification cannot be sent.
    pub async fn ensure_open(&self, uri: &Uri) -> Result<bool> {
        let slot = self.slot(uri);
        let mut slot = slot.lock().await;

        if let Some(doc) = slot.doc.as_mut() {
            doc.last_accessed = Instant::now();
            trace!("Document already open: {}", uri.as_str());
            return Ok(false);
        }

        let content = self.source.read(uri).await?;
        let version = slot.last_version + 1;
        slot.last_version = version;

        debug!(
            "Opening document: {} ({}, v{})",
            uri.as_str(),
            self.language_id,
            version
        );
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: self.language_id.clone(),
                version,
                text: content.clone(),
            },
        };
        self.correlator
            .notify("textDocument/didOpen", Some(serde_json::to_value(params)?))?;

        slot.doc = Some(OpenDocument {
            version,
            content,
            language_id: self.language_id.clone(),
            last_accessed: Instant::now(),
        });
        Ok(true)
    }

    /// Replaces the content of an open document. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DocumentNotOpen`] if `uri` is not open.
    pub async fn notify_changed(&self, uri: &Uri, content: impl Into<String>) -> Result<i32> {
        let slot = self.slot(uri);
        let mut slot = slot.lock().await;
        if slot.doc.is_none() {
            return Err(EngineError::DocumentNotOpen(uri.as_str().to_string()));
        }

        let content = content.into();
        let version = slot.last_version + 1;
        slot.last_version = version;

        debug!("Document changed: {} (v{})", uri.as_str(), version);
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: uri.clone(),
                version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: content.clone(),
            }],
        };
        self.correlator
            .notify("textDocument/didChange", Some(serde_json::to_value(params)?))?;

        if let Some(doc) = slot.doc.as_mut() {
            doc.version = version;
            doc.content = content;
            doc.last_accessed = Instant::now();
        }
        Ok(version)
    }

    /// Closes `uri`. Returns false if it was not open.
    ///
    /// # Errors
    ///
    /// Returns a transport error if `didClose` cannot be sent.
    pub async fn close(&self, uri: &Uri) -> Result<bool> {
        let slot = self.slot(uri);
        let mut slot = slot.lock().await;
        if slot.doc.take().is_none() {
            return Ok(false);
        }

        debug!("Closing document: {}", uri.as_str());
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri: uri.clone() },
        };
        self.correlator
            .notify("textDocument/didClose", Some(serde_json::to_value(params)?))?;
        Ok(true)
    }

    /// Snapshot of an open document.
    pub async fn document(&self, uri: &Uri) -> Option<OpenDocument> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()?;
        let slot = slot.lock().await;
        slot.doc.clone()
    }

    /// URIs of every open document.
    pub async fn open_uris(&self) -> Vec<Uri> {
        let mut open = Vec::new();
        for (uri, slot) in self.existing_slots() {
            if slot.lock().await.doc.is_some() {
                open.push(uri);
            }
        }
        open
    }

    /// Number of open documents, skipping any that are mid-update.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.existing_slots()
            .iter()
            .filter(|(_, slot)| slot.try_lock().is_ok_and(|s| s.doc.is_some()))
            .count()
    }

    /// Open documents not touched within `max_idle`.
    pub async fn idle(&self, max_idle: Duration) -> Vec<Uri> {
        let now = Instant::now();
        let mut idle = Vec::new();
        for (uri, slot) in self.existing_slots() {
            let slot = slot.lock().await;
            if let Some(doc) = &slot.doc
                && now.duration_since(doc.last_accessed) >= max_idle
            {
                idle.push(uri);
            }
        }
        idle
    }

    /// Forgets every document without notifying the server, releasing all
    /// per-URI state. Only valid once the server is gone.
    pub async fn clear(&self) {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        for slot in slots {
            slot.lock().await.doc = None;
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::protocol::{DEFAULT_MAX_FRAME_BYTES, Message, MessageReader, Notification};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::io::DuplexStream;

    struct MemorySource(HashMap<String, String>);

    #[async_trait]
    impl ContentSource for MemorySource {
        async fn read(&self, uri: &Uri) -> Result<String> {
            self.0
                .get(uri.as_str())
                .cloned()
                .ok_or_else(|| EngineError::NotFound {
                    uri: uri.as_str().to_string(),
                    reason: "no such document".to_string(),
                })
        }
    }

    fn uri(s: &str) -> Uri {
        Uri::from_str(s).unwrap()
    }

    fn harness() -> (DocumentSync, MessageReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let correlator = Arc::new(Correlator::new(client, Duration::from_secs(5)));
        let source = MemorySource(HashMap::from([
            ("file:///a.swift".to_string(), "struct A {}".to_string()),
            ("file:///b.swift".to_string(), "struct B {}".to_string()),
        ]));
        (
            DocumentSync::new(correlator, Arc::new(source), "swift"),
            MessageReader::new(server, DEFAULT_MAX_FRAME_BYTES),
        )
    }

    /// Drops the synchronizer so the pipe closes, then collects every
    /// notification that was written.
    async fn drain(sync: DocumentSync, mut wire: MessageReader<DuplexStream>) -> Vec<Notification> {
        drop(sync);
        let mut sent = Vec::new();
        while let Some(message) = wire.next_message().await.unwrap() {
            match message {
                Message::Notification(n) => sent.push(n),
                other => panic!("unexpected message {other:?}"),
            }
        }
        sent
    }

    #[tokio::test]
    async fn test_ensure_open_sends_one_did_open() {
        let (sync, wire) = harness();
        let a = uri("file:///a.swift");

        assert!(sync.ensure_open(&a).await.unwrap());
        assert!(!sync.ensure_open(&a).await.unwrap());
        assert_eq!(sync.open_count(), 1);

        let sent = drain(sync, wire).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, "textDocument/didOpen");
        let params = sent[0].params.as_ref().unwrap();
        assert_eq!(params["textDocument"]["version"], 1);
        assert_eq!(params["textDocument"]["languageId"], "swift");
        assert_eq!(params["textDocument"]["text"], "struct A {}");
    }

    #[tokio::test]
    async fn test_concurrent_ensure_open_opens_once() {
        let (sync, wire) = harness();
        let a = uri("file:///a.swift");

        let (first, second) = tokio::join!(sync.ensure_open(&a), sync.ensure_open(&a));
        assert!(first.unwrap() ^ second.unwrap());

        let sent = drain(sync, wire).await;
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn test_versions_strictly_increase() {
        let (sync, wire) = harness();
        let a = uri("file:///a.swift");
        sync.ensure_open(&a).await.unwrap();

        let mut last = sync.document(&a).await.unwrap().version;
        for i in 0..5 {
            let version = sync.notify_changed(&a, format!("struct A{i} {{}}")).await.unwrap();
            assert!(version > last);
            last = version;
        }
        assert_eq!(sync.document(&a).await.unwrap().content, "struct A4 {}");

        let sent = drain(sync, wire).await;
        let last_change = sent.last().unwrap().params.as_ref().unwrap();
        assert_eq!(last_change["textDocument"]["version"], 6);
        assert_eq!(last_change["contentChanges"][0]["text"], "struct A4 {}");
        assert!(last_change["contentChanges"][0].get("range").is_none());
    }

    #[tokio::test]
    async fn test_reopen_continues_version_sequence() {
        let (sync, wire) = harness();
        let a = uri("file:///a.swift");

        sync.ensure_open(&a).await.unwrap();
        sync.notify_changed(&a, "x").await.unwrap();
        assert!(sync.close(&a).await.unwrap());
        assert!(!sync.close(&a).await.unwrap());
        sync.ensure_open(&a).await.unwrap();
        assert_eq!(sync.document(&a).await.unwrap().version, 3);

        let methods: Vec<_> = drain(sync, wire).await.into_iter().map(|n| n.method).collect();
        assert_eq!(
            methods,
            [
                "textDocument/didOpen",
                "textDocument/didChange",
                "textDocument/didClose",
                "textDocument/didOpen"
            ]
        );
    }

    #[tokio::test]
    async fn test_change_without_open_is_rejected() {
        let (sync, wire) = harness();
        let b = uri("file:///b.swift");

        assert!(matches!(
            sync.notify_changed(&b, "x").await,
            Err(EngineError::DocumentNotOpen(_))
        ));
        assert!(sync.document(&b).await.is_none());
        assert!(drain(sync, wire).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_content_is_not_found() {
        let (sync, wire) = harness();
        let missing = uri("file:///missing.swift");

        assert!(matches!(
            sync.ensure_open(&missing).await,
            Err(EngineError::NotFound { .. })
        ));
        assert_eq!(sync.open_count(), 0);
        assert!(drain(sync, wire).await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_documents() {
        let (sync, _wire) = harness();
        let a = uri("file:///a.swift");
        let b = uri("file:///b.swift");
        sync.ensure_open(&a).await.unwrap();
        sync.ensure_open(&b).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        sync.ensure_open(&b).await.unwrap();

        let idle = sync.idle(Duration::from_millis(40)).await;
        assert_eq!(idle, vec![a]);
        assert!(sync.idle(Duration::from_secs(3600)).await.is_empty());

        let mut open = sync.open_uris().await;
        open.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(open.len(), 2);
        sync.clear().await;
        assert!(sync.open_uris().await.is_empty());
        assert!(sync.slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_content_source() {
        let mut file = NamedTempFile::with_suffix(".swift").unwrap();
        write!(file, "let x = 1").unwrap();

        let uri = path_to_uri(file.path()).unwrap();
        assert!(uri.as_str().starts_with("file:///"));
        assert_eq!(FsContentSource.read(&uri).await.unwrap(), "let x = 1");

        let gone = path_to_uri(&file.path().with_extension("gone")).unwrap();
        assert!(matches!(
            FsContentSource.read(&gone).await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(path_to_uri(Path::new("relative.swift")).is_err());
    }

    #[tokio::test]
    async fn test_fs_content_source_replaces_invalid_utf8() {
        let mut file = NamedTempFile::with_suffix(".swift").unwrap();
        file.write_all(b"let s = \"\xff\"\n").unwrap();

        let uri = path_to_uri(file.path()).unwrap();
        let text = FsContentSource.read(&uri).await.unwrap();
        assert_eq!(text, "let s = \"\u{FFFD}\"\n");
    }
}
