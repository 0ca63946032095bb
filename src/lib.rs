pub mod bridge;
pub mod config;
pub mod device;
pub mod serial;

#[cfg(feature = "tauri")]
pub mod commands;

pub use bridge::{SerialPortBridge, SharedBridge};
pub use config::BridgeConfig;
pub use serial::{SerialConnection, SerialError};

/// Tauri plugin exposing the bridge commands and the serial data event.
#[cfg(feature = "tauri")]
pub fn init<R: tauri::Runtime>() -> tauri::plugin::TauriPlugin<R> {
  init_with_config(BridgeConfig::default())
}

#[cfg(feature = "tauri")]
pub fn init_with_config<R: tauri::Runtime>(config: BridgeConfig) -> tauri::plugin::TauriPlugin<R> {
  use tauri::Manager;

  tauri::plugin::Builder::new("serial-port")
    .invoke_handler(tauri::generate_handler![
      commands::open,
      commands::close,
      commands::write,
      commands::list_devices,
      commands::list_device_paths,
      commands::listen,
      commands::cancel_listen,
    ])
    .setup(move |app, _api| {
      app.manage(commands::SerialPortState::new(SerialPortBridge::new(config)));
      log::info!("Serial port plugin initialized");
      Ok(())
    })
    .on_drop(|app| {
      if let Some(state) = app.try_state::<commands::SerialPortState>() {
        state.shutdown();
      }
      log::debug!("Serial port plugin detached and resources cleaned up");
    })
    .build()
}
