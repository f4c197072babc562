use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::capture::ImageMime;
use crate::error::ClassificationError;

use super::verdict::{ClassificationVerdict, INSTRUCTION};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Hosted model that judges a screenshot. Returns the raw structured reply.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, instruction: &str, image: &[u8], mime: ImageMime)
        -> anyhow::Result<Value>;
}

/// Single-flight wrapper around the classifier backend.
///
/// A call made while another is pending returns `None` immediately; callers
/// keep whatever verdict they had. Failures never escape: they become
/// [`ClassificationVerdict::fallback`]. One attempt per call, no retries.
pub struct ClassifierGate {
    backend: Arc<dyn Classifier>,
    busy: AtomicBool,
    state: watch::Sender<Option<ClassificationVerdict>>,
}

/// Clears the busy flag even if the classifying future is dropped mid-call.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ClassifierGate {
    pub fn new(backend: Arc<dyn Classifier>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            backend,
            busy: AtomicBool::new(false),
            state,
        }
    }

    pub fn latest(&self) -> Option<ClassificationVerdict> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ClassificationVerdict>> {
        self.state.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn classify(&self, image: &[u8], mime: ImageMime) -> Option<ClassificationVerdict> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log_debug!("classification already in flight; request dropped");
            return None;
        }
        let _busy = BusyGuard(&self.busy);

        let outcome = self
            .backend
            .classify(INSTRUCTION, image, mime)
            .await
            .map_err(|err| ClassificationError::Backend(format!("{err:#}")))
            .and_then(ClassificationVerdict::from_response);

        let verdict = match outcome {
            Ok(verdict) => {
                log_info!(
                    "verdict: productive={} confidence={:.2} ({})",
                    verdict.is_productive,
                    verdict.confidence,
                    verdict.reason
                );
                verdict
            }
            Err(err) => {
                log_warn!("{err}; using fallback verdict");
                ClassificationVerdict::fallback()
            }
        };

        self.state.send_replace(Some(verdict.clone()));
        Some(verdict)
    }
}
