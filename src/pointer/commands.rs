use tauri::State;

use crate::pointer::PointerSnapshot;
use crate::AppState;

#[tauri::command]
pub async fn start_pointer_tracking(state: State<'_, AppState>) -> Result<PointerSnapshot, String> {
    Ok(state.services.pointer.start_tracking().await)
}

#[tauri::command]
pub async fn stop_pointer_tracking(state: State<'_, AppState>) -> Result<PointerSnapshot, String> {
    Ok(state.services.pointer.stop_tracking().await)
}

#[tauri::command]
pub fn get_pointer_state(state: State<'_, AppState>) -> PointerSnapshot {
    state.services.pointer.snapshot()
}
