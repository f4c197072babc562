use tauri::State;

use crate::device::{DeviceConnection, DeviceLink, DeviceSnapshot, PortCatalog};
use crate::AppState;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

fn link_from_state(state: &State<'_, AppState>) -> DeviceLink {
    state.services.device.clone()
}

#[tauri::command]
pub async fn list_serial_ports(state: State<'_, AppState>) -> Result<PortCatalog, String> {
    Ok(link_from_state(&state).enumerate().await)
}

#[tauri::command]
pub async fn connect_device(
    state: State<'_, AppState>,
    port: String,
) -> Result<DeviceConnection, String> {
    let link = link_from_state(&state);
    let connection = link.connect(&port).await.map_err(|e| e.to_string())?;

    if let Some(port) = connection.port() {
        if let Err(err) = state.settings.update_preferred_port(port) {
            log_warn!("failed to remember port {port}: {err:#}");
        }
    }
    Ok(connection)
}

#[tauri::command]
pub async fn disconnect_device(state: State<'_, AppState>) -> Result<DeviceSnapshot, String> {
    let link = link_from_state(&state);
    link.disconnect().await;
    Ok(link.snapshot())
}

#[tauri::command]
pub async fn send_device_command(
    state: State<'_, AppState>,
    command: String,
) -> Result<String, String> {
    link_from_state(&state)
        .send_command(&command)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_device_state(state: State<'_, AppState>) -> DeviceSnapshot {
    state.services.device.snapshot()
}
