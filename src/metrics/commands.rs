use tauri::State;

use super::MetricsSnapshot;
use crate::AppState;

#[tauri::command]
pub async fn get_metrics(state: State<'_, AppState>) -> Result<MetricsSnapshot, String> {
    Ok(state.services.metrics.get_snapshot().await)
}
