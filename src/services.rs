use std::sync::Arc;

use crate::capture::{CaptureArtifactManager, CaptureProvider, PreviewTable};
use crate::classifier::{Classifier, ClassifierGate};
use crate::device::{DeviceLink, SerialTransport};
use crate::metrics::MetricsCollector;
use crate::pointer::{PointerProvider, PointerSampler};
use crate::sensing::SensingScheduler;
use crate::settings::MonitorSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// The external systems the monitor talks to.
pub struct Collaborators {
    pub transport: Arc<dyn SerialTransport>,
    pub capture: Arc<dyn CaptureProvider>,
    pub classifier: Arc<dyn Classifier>,
    pub pointer: Arc<dyn PointerProvider>,
}

#[cfg(feature = "desktop")]
impl Collaborators {
    /// Real serial port, screen, Gemini backend and OS pointer.
    pub fn native(settings: &MonitorSettings) -> Self {
        use crate::capture::screen::ScreenCaptureProvider;
        use crate::classifier::GeminiClassifier;
        use crate::device::SerialPortTransport;
        use crate::pointer::MousePointerProvider;

        Self {
            transport: Arc::new(SerialPortTransport::new(&settings.serial)),
            capture: Arc::new(ScreenCaptureProvider),
            classifier: Arc::new(GeminiClassifier::new(&settings.classifier)),
            pointer: Arc::new(MousePointerProvider),
        }
    }
}

/// Every component, wired together. Cheap handles; clone what you need.
pub struct MonitorServices {
    pub device: DeviceLink,
    pub capture: Arc<CaptureArtifactManager>,
    pub preview: Arc<PreviewTable>,
    pub gate: Arc<ClassifierGate>,
    pub scheduler: SensingScheduler,
    pub pointer: PointerSampler,
    pub metrics: MetricsCollector,
}

impl MonitorServices {
    pub fn new(collaborators: Collaborators, settings: &MonitorSettings) -> Self {
        let settings = settings.clone().normalized();

        let preview = Arc::new(PreviewTable::new());
        let device = DeviceLink::new(collaborators.transport);
        let capture = Arc::new(CaptureArtifactManager::new(
            collaborators.capture,
            preview.clone(),
        ));
        let gate = Arc::new(ClassifierGate::new(collaborators.classifier));
        let metrics = MetricsCollector::new();
        let scheduler = SensingScheduler::new(
            capture.clone(),
            gate.clone(),
            device.clone(),
            metrics.clone(),
            settings.capture_interval_ms,
        );
        let pointer = PointerSampler::new(collaborators.pointer, settings.pointer_interval_ms);

        Self {
            device,
            capture,
            preview,
            gate,
            scheduler,
            pointer,
            metrics,
        }
    }

    /// Winds everything down: loops exit, the port is closed and every
    /// display handle is released.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.pointer.shutdown().await;
        if self.device.is_connected() {
            self.device.disconnect().await;
        }
        self.capture.dispose();
        log_info!("monitor services shut down");
    }
}
