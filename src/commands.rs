use tauri::{AppHandle, Emitter, Runtime, State};

use crate::bridge::SharedBridge;
use crate::serial::sink::dispatch;

/// Event carrying one chunk of received bytes.
pub const DATA_EVENT: &str = "serial-port://data";

/// Managed plugin state.
pub type SerialPortState = SharedBridge;

/// Open a serial device
#[tauri::command]
pub async fn open(
    device_path: String,
    baudrate: i64,
    state: State<'_, SerialPortState>,
) -> Result<bool, String> {
    log::debug!("Open {}, baudrate: {}", device_path, baudrate);
    state
        .run_blocking(move |bridge| bridge.open(&device_path, baudrate))
        .await
        .map_err(|e| e.to_string())
}

/// Close the open serial device
#[tauri::command]
pub async fn close(state: State<'_, SerialPortState>) -> Result<bool, String> {
    state
        .run_blocking(|bridge| bridge.close())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn write(data: Vec<u8>, state: State<'_, SerialPortState>) -> Result<(), String> {
    state
        .run_blocking(move |bridge| bridge.write(&data))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| format!("Failed to write: {}", e))
}

#[tauri::command]
pub fn list_devices(state: State<'_, SerialPortState>) -> Result<Vec<String>, String> {
    state
        .with(|bridge| bridge.list_devices())
        .and_then(|devices| devices)
        .map_err(|e| format!("Failed to list devices: {}", e))
}

#[tauri::command]
pub fn list_device_paths(state: State<'_, SerialPortState>) -> Result<Vec<String>, String> {
    state
        .with(|bridge| bridge.list_device_paths())
        .and_then(|paths| paths)
        .map_err(|e| format!("Failed to list device paths: {}", e))
}

/// Start forwarding received bytes to the frontend as [`DATA_EVENT`]
#[tauri::command]
pub fn listen<R: Runtime>(app: AppHandle<R>, state: State<'_, SerialPortState>) -> Result<(), String> {
    let rx = state
        .with(|bridge| bridge.listen())
        .map_err(|e| e.to_string())?;
    tauri::async_runtime::spawn(dispatch(rx, move |chunk| {
        if let Err(e) = app.emit(DATA_EVENT, chunk) {
            log::warn!("Failed to emit serial data: {}", e);
        }
    }));
    Ok(())
}

#[tauri::command]
pub fn cancel_listen(state: State<'_, SerialPortState>) -> Result<(), String> {
    state
        .with(|bridge| bridge.cancel_listen())
        .map_err(|e| e.to_string())
}
