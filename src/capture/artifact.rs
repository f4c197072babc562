use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decode::{encode_data_uri, ImageMime};

/// Opaque reference to an artifact registered with a [`DisplaySurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayHandle(u64);

impl DisplayHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Allocator for the scarce display resource backing an artifact preview.
///
/// Every handle returned by `register` is passed to `release` exactly once by
/// the capture manager.
pub trait DisplaySurface: Send + Sync {
    fn register(&self, bytes: &Arc<[u8]>, mime: ImageMime) -> Result<DisplayHandle>;
    fn release(&self, handle: DisplayHandle);
}

/// One decoded screen image.
#[derive(Debug, Clone)]
pub struct CaptureArtifact {
    pub generation: u64,
    pub bytes: Arc<[u8]>,
    pub mime: ImageMime,
    pub width: u32,
    pub height: u32,
    pub display_handle: DisplayHandle,
    pub captured_at: DateTime<Utc>,
}

impl CaptureArtifact {
    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            generation: self.generation,
            width: self.width,
            height: self.height,
            byte_len: self.bytes.len(),
            mime: self.mime,
            handle: self.display_handle,
            captured_at: self.captured_at,
        }
    }
}

/// Read-side projection of the current artifact (no image bytes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
    pub mime: ImageMime,
    pub handle: DisplayHandle,
    pub captured_at: DateTime<Utc>,
}

/// In-process display surface: keeps the bytes of every live handle so the
/// presentation layer can fetch a preview by handle.
#[derive(Default)]
pub struct PreviewTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<DisplayHandle, (ImageMime, Arc<[u8]>)>>,
}

impl PreviewTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preview as a data URI, or `None` once the handle has been released.
    pub fn preview(&self, handle: DisplayHandle) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .get(&handle)
            .map(|(mime, bytes)| encode_data_uri(*mime, bytes))
    }

    pub fn live_handles(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl DisplaySurface for PreviewTable {
    fn register(&self, bytes: &Arc<[u8]>, mime: ImageMime) -> Result<DisplayHandle> {
        let handle = DisplayHandle(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(handle, (mime, Arc::clone(bytes)));
        Ok(handle)
    }

    fn release(&self, handle: DisplayHandle) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&handle);
    }
}
