use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

// Chatty at 100ms; flip on when debugging the sampler.
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointerPosition {
    pub x: i32,
    pub y: i32,
}

/// Reads the global pointer position. Implementations may block briefly.
pub trait PointerProvider: Send + Sync {
    fn pointer_position(&self) -> anyhow::Result<PointerPosition>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PointerSnapshot {
    pub tracking: bool,
    /// Last good sample; kept through failed samples.
    pub position: Option<PointerPosition>,
    pub samples: u64,
}

/// Polls the pointer provider while tracking and republishes each position.
#[derive(Clone)]
pub struct PointerSampler {
    inner: Arc<SamplerInner>,
}

struct SamplerInner {
    provider: Arc<dyn PointerProvider>,
    interval: Duration,
    epoch: AtomicU64,
    worker: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
    state: watch::Sender<PointerSnapshot>,
}

impl PointerSampler {
    pub fn new(provider: Arc<dyn PointerProvider>, interval_ms: u64) -> Self {
        let (state, _) = watch::channel(PointerSnapshot::default());
        Self {
            inner: Arc::new(SamplerInner {
                provider,
                interval: Duration::from_millis(interval_ms.max(1)),
                epoch: AtomicU64::new(0),
                worker: Mutex::new(None),
                state,
            }),
        }
    }

    pub fn snapshot(&self) -> PointerSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PointerSnapshot> {
        self.inner.state.subscribe()
    }

    /// Starts polling. Samples once immediately. No-op while already tracking.
    pub async fn start_tracking(&self) -> PointerSnapshot {
        let mut worker = self.inner.worker.lock().await;
        if self.inner.state.borrow().tracking {
            return self.snapshot();
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_modify(|snapshot| snapshot.tracking = true);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(Arc::clone(&self.inner), epoch, cancel.clone()));
        if let Some((previous, token)) = worker.replace((handle, cancel)) {
            token.cancel();
            drop(previous);
        }

        log_info!("pointer tracking started every {:?}", self.inner.interval);
        self.snapshot()
    }

    /// Stops polling. A sample already being taken is discarded.
    pub async fn stop_tracking(&self) -> PointerSnapshot {
        let worker = self.inner.worker.lock().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_if_modified(|snapshot| {
            let was_tracking = snapshot.tracking;
            snapshot.tracking = false;
            was_tracking
        });
        if let Some((_, token)) = worker.as_ref() {
            token.cancel();
        }

        log_info!("pointer tracking stopped");
        self.snapshot()
    }

    /// Stops tracking and waits for the polling task to exit.
    pub async fn shutdown(&self) {
        self.stop_tracking().await;
        let worker = self.inner.worker.lock().await.take();
        if let Some((handle, _)) = worker {
            if let Err(err) = handle.await {
                log_warn!("pointer sampler task failed to join: {err}");
            }
        }
    }
}

async fn sampling_loop(inner: Arc<SamplerInner>, epoch: u64, cancel_token: CancellationToken) {
    loop {
        let provider = Arc::clone(&inner.provider);
        let sample = tokio::task::spawn_blocking(move || provider.pointer_position()).await;

        if inner.epoch.load(Ordering::SeqCst) != epoch {
            break;
        }

        match sample {
            Ok(Ok(position)) => {
                log_debug!("pointer at ({}, {})", position.x, position.y);
                inner.state.send_modify(|snapshot| {
                    snapshot.position = Some(position);
                    snapshot.samples += 1;
                });
            }
            Ok(Err(err)) => log_warn!("pointer sample failed: {err:#}"),
            Err(err) => log_warn!("pointer sample worker join failed: {err}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.interval) => {}
            _ = cancel_token.cancelled() => break,
        }

        if inner.epoch.load(Ordering::SeqCst) != epoch {
            break;
        }
    }
}
