use tauri::State;

use crate::classifier::ClassificationVerdict;
use crate::metrics::CycleOutcome;
use crate::sensing::{SensingScheduler, SensingSnapshot};
use crate::AppState;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

fn scheduler_from_state(state: &State<'_, AppState>) -> SensingScheduler {
    state.services.scheduler.clone()
}

#[tauri::command]
pub async fn get_sensing_state(state: State<'_, AppState>) -> Result<SensingSnapshot, String> {
    Ok(scheduler_from_state(&state).snapshot().await)
}

#[tauri::command]
pub async fn start_sensing(state: State<'_, AppState>) -> Result<SensingSnapshot, String> {
    scheduler_from_state(&state)
        .start()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_sensing(state: State<'_, AppState>) -> Result<SensingSnapshot, String> {
    Ok(scheduler_from_state(&state).stop().await)
}

#[tauri::command]
pub async fn retune_sensing(
    state: State<'_, AppState>,
    interval_ms: u64,
) -> Result<SensingSnapshot, String> {
    let snapshot = scheduler_from_state(&state)
        .retune(interval_ms)
        .await
        .map_err(|e| e.to_string())?;

    if let Err(err) = state.settings.update_capture_interval(interval_ms) {
        log_warn!("failed to persist capture interval: {err:#}");
    }
    Ok(snapshot)
}

#[tauri::command]
pub async fn analyze_now(state: State<'_, AppState>) -> Result<CycleOutcome, String> {
    Ok(scheduler_from_state(&state).analyze_now().await)
}

#[tauri::command]
pub fn get_latest_verdict(state: State<'_, AppState>) -> Option<ClassificationVerdict> {
    state.services.gate.latest()
}
