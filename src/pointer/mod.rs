#[cfg(feature = "desktop")]
pub mod commands;
#[cfg(feature = "desktop")]
mod native;
mod sampler;

#[cfg(feature = "desktop")]
pub use native::MousePointerProvider;
pub use sampler::{PointerPosition, PointerProvider, PointerSampler, PointerSnapshot};
