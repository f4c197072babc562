use std::ops::Deref;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::error::CaptureError;

use super::artifact::{CaptureArtifact, CaptureSummary, DisplaySurface};
use super::decode::{decode_payload, ScreenCapture};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Source of screen images (native OS capture in the desktop build).
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture_screen(&self) -> anyhow::Result<ScreenCapture>;
}

struct ArtifactSlot {
    artifact: CaptureArtifact,
    released: AtomicBool,
}

impl ArtifactSlot {
    fn release(&self, surface: &dyn DisplaySurface) {
        if !self.released.swap(true, Ordering::SeqCst) {
            surface.release(self.artifact.display_handle);
            log_debug!(
                "released display handle {} (generation {})",
                self.artifact.display_handle.id(),
                self.artifact.generation
            );
        }
    }
}

/// Read access to one artifact generation.
///
/// While any lease for a generation is alive its display handle is not
/// released, even after a newer artifact has been installed. Drop leases at
/// the end of the unit of work that needed them.
#[derive(Clone)]
pub struct ArtifactLease {
    slot: Arc<ArtifactSlot>,
}

impl Deref for ArtifactLease {
    type Target = CaptureArtifact;

    fn deref(&self) -> &CaptureArtifact {
        &self.slot.artifact
    }
}

#[derive(Default)]
struct Slots {
    current: Option<Arc<ArtifactSlot>>,
    /// Superseded generations still pinned by a lease.
    retired: Vec<Arc<ArtifactSlot>>,
    disposed: bool,
}

/// Sole owner of the current capture artifact and its display handle.
pub struct CaptureArtifactManager {
    provider: Arc<dyn CaptureProvider>,
    surface: Arc<dyn DisplaySurface>,
    slots: Mutex<Slots>,
    generation: AtomicU64,
    state: watch::Sender<Option<CaptureSummary>>,
}

impl CaptureArtifactManager {
    pub fn new(provider: Arc<dyn CaptureProvider>, surface: Arc<dyn DisplaySurface>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            provider,
            surface,
            slots: Mutex::new(Slots::default()),
            generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CaptureSummary>> {
        self.state.subscribe()
    }

    pub fn summary(&self) -> Option<CaptureSummary> {
        self.state.borrow().clone()
    }

    /// Captures, decodes and installs a new current artifact.
    ///
    /// On any failure the previous artifact stays current.
    pub async fn capture_once(&self) -> Result<ArtifactLease, CaptureError> {
        let disposed = self.lock().disposed;
        if disposed {
            return Err(CaptureError::Disposed);
        }

        let capture = self
            .provider
            .capture_screen()
            .await
            .map_err(|err| CaptureError::Provider(format!("{err:#}")))?;

        let (mime, bytes) = decode_payload(&capture.data)?;
        let bytes: Arc<[u8]> = bytes.into();
        let handle = self
            .surface
            .register(&bytes, mime)
            .map_err(|err| CaptureError::Display(format!("{err:#}")))?;

        let slot = Arc::new(ArtifactSlot {
            artifact: CaptureArtifact {
                generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
                bytes,
                mime,
                width: capture.width,
                height: capture.height,
                display_handle: handle,
                captured_at: Utc::now(),
            },
            released: AtomicBool::new(false),
        });

        let summary = slot.artifact.summary();
        {
            let mut slots = self.lock();
            if slots.disposed {
                slot.release(self.surface.as_ref());
                return Err(CaptureError::Disposed);
            }
            if let Some(previous) = slots.current.replace(Arc::clone(&slot)) {
                slots.retired.push(previous);
            }
            self.sweep(&mut slots);
        }

        log_info!(
            "capture generation {} installed: {}x{}, {} bytes",
            summary.generation,
            summary.width,
            summary.height,
            summary.byte_len
        );
        self.state.send_replace(Some(summary));

        Ok(ArtifactLease { slot })
    }

    /// Snapshot of the current artifact. Holding the lease pins its handle.
    pub fn current(&self) -> Option<ArtifactLease> {
        self.lock()
            .current
            .as_ref()
            .map(|slot| ArtifactLease {
                slot: Arc::clone(slot),
            })
    }

    /// Releases superseded generations whose leases have all been dropped.
    /// Returns how many are still pinned.
    pub fn collect(&self) -> usize {
        let mut slots = self.lock();
        self.sweep(&mut slots);
        slots.retired.len()
    }

    /// Releases every handle unconditionally. Idempotent.
    pub fn dispose(&self) {
        let mut slots = self.lock();
        if slots.disposed {
            return;
        }
        slots.disposed = true;

        let current = slots.current.take();
        let retired = std::mem::take(&mut slots.retired);
        for slot in current.iter().chain(retired.iter()) {
            slot.release(self.surface.as_ref());
        }
        drop(slots);

        log_info!("capture manager disposed");
        self.state.send_replace(None);
    }

    fn sweep(&self, slots: &mut Slots) {
        // Leases are only minted from `current`, so a retired slot whose
        // count is 1 can never be leased again.
        let surface = self.surface.as_ref();
        slots.retired.retain(|slot| {
            if Arc::strong_count(slot) == 1 {
                slot.release(surface);
                false
            } else {
                true
            }
        });
        if !slots.retired.is_empty() {
            log_debug!(
                "{} superseded capture(s) still leased; release deferred",
                slots.retired.len()
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for CaptureArtifactManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::artifact::{DisplayHandle, PreviewTable};
    use crate::capture::decode::{encode_data_uri, ImageMime};
    use anyhow::anyhow;
    use std::collections::{HashMap, VecDeque};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn frame() -> ScreenCapture {
        ScreenCapture {
            data: encode_data_uri(ImageMime::Png, PNG),
            width: 1920,
            height: 1080,
        }
    }

    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<anyhow::Result<ScreenCapture>>>,
    }

    impl ScriptedProvider {
        fn push(&self, next: anyhow::Result<ScreenCapture>) {
            self.script.lock().unwrap().push_back(next);
        }
    }

    #[async_trait]
    impl CaptureProvider for ScriptedProvider {
        async fn capture_screen(&self) -> anyhow::Result<ScreenCapture> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(frame()))
        }
    }

    /// Counts releases per handle on top of a preview table.
    #[derive(Default)]
    struct CountingSurface {
        table: PreviewTable,
        releases: Mutex<HashMap<DisplayHandle, usize>>,
    }

    impl DisplaySurface for CountingSurface {
        fn register(&self, bytes: &Arc<[u8]>, mime: ImageMime) -> anyhow::Result<DisplayHandle> {
            self.table.register(bytes, mime)
        }

        fn release(&self, handle: DisplayHandle) {
            *self.releases.lock().unwrap().entry(handle).or_default() += 1;
            self.table.release(handle);
        }
    }

    fn manager() -> (
        CaptureArtifactManager,
        Arc<ScriptedProvider>,
        Arc<CountingSurface>,
    ) {
        let provider = Arc::new(ScriptedProvider::default());
        let surface = Arc::new(CountingSurface::default());
        (
            CaptureArtifactManager::new(provider.clone(), surface.clone()),
            provider,
            surface,
        )
    }

    #[tokio::test]
    async fn new_capture_releases_previous_handle() {
        let (manager, _, surface) = manager();

        let first = manager.capture_once().await.unwrap();
        let first_handle = first.display_handle;
        drop(first);
        let second = manager.capture_once().await.unwrap();

        assert_eq!(second.generation, 2);
        assert_eq!(surface.table.live_handles(), 1);
        assert!(surface.table.preview(first_handle).is_none());
        assert_eq!(manager.current().unwrap().generation, 2);
    }

    #[tokio::test]
    async fn leased_generation_is_released_after_lease_drops() {
        let (manager, _, surface) = manager();

        let pinned = manager.capture_once().await.unwrap();
        let _second = manager.capture_once().await.unwrap();
        assert_eq!(surface.table.live_handles(), 2);
        assert!(surface.table.preview(pinned.display_handle).is_some());

        let handle = pinned.display_handle;
        drop(pinned);
        assert_eq!(manager.collect(), 0);
        assert!(surface.table.preview(handle).is_none());
        assert_eq!(surface.table.live_handles(), 1);
    }

    #[tokio::test]
    async fn failed_capture_keeps_current_artifact() {
        let (manager, provider, _) = manager();
        manager.capture_once().await.unwrap();

        provider.push(Err(anyhow!("screen locked")));
        let err = manager.capture_once().await.err().unwrap();
        assert!(matches!(err, CaptureError::Provider(_)));

        provider.push(Ok(ScreenCapture {
            data: "data:image/bmp;base64,Qk0=".into(),
            width: 1,
            height: 1,
        }));
        let err = manager.capture_once().await.err().unwrap();
        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));

        assert_eq!(manager.current().unwrap().generation, 1);
        assert_eq!(manager.summary().unwrap().generation, 1);
    }

    #[tokio::test]
    async fn dispose_releases_everything_once() {
        let (manager, _, surface) = manager();

        let pinned = manager.capture_once().await.unwrap();
        manager.capture_once().await.unwrap();

        manager.dispose();
        manager.dispose();
        drop(pinned);
        manager.collect();

        assert_eq!(surface.table.live_handles(), 0);
        let releases = surface.releases.lock().unwrap().clone();
        assert_eq!(releases.len(), 2);
        assert!(releases.values().all(|count| *count == 1));
        assert!(manager.current().is_none());
        assert!(manager.summary().is_none());
        assert!(matches!(
            manager.capture_once().await,
            Err(CaptureError::Disposed)
        ));
    }

    #[tokio::test]
    async fn dropping_manager_disposes() {
        let (manager, _, surface) = manager();
        manager.capture_once().await.unwrap();
        drop(manager);
        assert_eq!(surface.table.live_handles(), 0);
    }
}
