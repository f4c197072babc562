pub mod artifact;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod decode;
pub mod manager;
pub mod screen;

pub use artifact::{CaptureArtifact, CaptureSummary, DisplayHandle, DisplaySurface, PreviewTable};
pub use decode::{ImageMime, ScreenCapture};
pub use manager::{ArtifactLease, CaptureArtifactManager, CaptureProvider};
