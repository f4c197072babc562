use serde::Serialize;
use tauri::State;

use crate::capture::CaptureSummary;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePreview {
    pub summary: CaptureSummary,
    pub data_uri: String,
}

/// Current artifact as a data URI, or `None` before the first capture.
#[tauri::command]
pub fn get_capture_preview(state: State<'_, AppState>) -> Option<CapturePreview> {
    let lease = state.services.capture.current()?;
    let data_uri = state.services.preview.preview(lease.display_handle)?;

    Some(CapturePreview {
        summary: lease.summary(),
        data_uri,
    })
}
