use anyhow::{bail, Result};
use mouse_position::mouse_position::Mouse;

use super::sampler::{PointerPosition, PointerProvider};

/// Global cursor position from the OS.
pub struct MousePointerProvider;

impl PointerProvider for MousePointerProvider {
    fn pointer_position(&self) -> Result<PointerPosition> {
        match Mouse::get_mouse_position() {
            Mouse::Position { x, y } => Ok(PointerPosition { x, y }),
            Mouse::Error => bail!("failed to read the pointer position"),
        }
    }
}
