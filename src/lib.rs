pub mod capture;
pub mod classifier;
pub mod device;
pub mod error;
pub mod metrics;
pub mod pointer;
pub mod sensing;
pub mod services;
pub mod settings;
mod utils;

#[cfg(feature = "desktop")]
pub use desktop::{run, AppState};

#[cfg(feature = "desktop")]
mod desktop {
    use std::time::Duration;

    use log::warn;
    use serde::Serialize;
    use tauri::{AppHandle, Emitter, Manager, RunEvent, State};
    use tokio::sync::watch;

    use crate::capture::commands::get_capture_preview;
    use crate::device::commands::{
        connect_device, disconnect_device, get_device_state, list_serial_ports,
        send_device_command,
    };
    use crate::metrics::commands::get_metrics;
    use crate::pointer::commands::{get_pointer_state, start_pointer_tracking, stop_pointer_tracking};
    use crate::sensing::commands::{
        analyze_now, get_latest_verdict, get_sensing_state, retune_sensing, start_sensing,
        stop_sensing,
    };
    use crate::services::{Collaborators, MonitorServices};
    use crate::settings::{MonitorSettings, SettingsStore};

    const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    pub struct AppState {
        pub(crate) services: MonitorServices,
        pub(crate) settings: SettingsStore,
    }

    #[tauri::command]
    fn get_settings(state: State<AppState>) -> MonitorSettings {
        state.settings.current()
    }

    /// Forwards every change on `rx` to the webview as `event`.
    fn forward<T>(app: &AppHandle, event: &'static str, mut rx: watch::Receiver<T>)
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let app = app.clone();
        tauri::async_runtime::spawn(async move {
            while rx.changed().await.is_ok() {
                let payload = rx.borrow_and_update().clone();
                if let Err(err) = app.emit(event, payload) {
                    warn!("failed to emit {event}: {err}");
                }
            }
        });
    }

    fn spawn_heartbeat(app: &AppHandle) {
        let app = app.clone();
        tauri::async_runtime::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let Some(state) = app.try_state::<AppState>() else {
                    continue;
                };
                let snapshot = state.services.scheduler.snapshot().await;
                if snapshot.session.is_active() {
                    if let Err(err) = app.emit("sensing-heartbeat", &snapshot) {
                        warn!("failed to emit heartbeat: {err}");
                    }
                }
            }
        });
    }

    fn bridge_events(app: &AppHandle, services: &MonitorServices) {
        forward(app, "device-state-changed", services.device.subscribe());
        forward(app, "sensing-state-changed", services.scheduler.subscribe());
        forward(app, "verdict-updated", services.gate.subscribe());
        forward(app, "capture-updated", services.capture.subscribe());
        forward(app, "pointer-moved", services.pointer.subscribe());
        spawn_heartbeat(app);
    }

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        let debug_mode = std::env::var("WHEELAWAY_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        // RUST_LOG still wins over the default level
        env_logger::Builder::new()
            .filter_level(if debug_mode {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            })
            .parse_default_env()
            .init();

        log::info!("Wheel Away starting up...");

        tauri::Builder::default()
            .plugin(tauri_plugin_opener::init())
            .setup(|app| {
                let result = (|| -> anyhow::Result<()> {
                    let app_data_dir = app
                        .path()
                        .app_data_dir()
                        .map_err(|err| anyhow::anyhow!(err))?;
                    std::fs::create_dir_all(&app_data_dir)?;

                    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
                    let settings = settings_store.current();

                    let services =
                        MonitorServices::new(Collaborators::native(&settings), &settings);

                    let device = services.device.clone();
                    let catalog = tauri::async_runtime::block_on(async move {
                        device.enumerate().await
                    });
                    if let Some(port) = settings.serial.preferred_port.as_deref() {
                        if catalog.iter().any(|entry| entry.name == port) {
                            log::info!("last used port {port} is available");
                        }
                    }

                    bridge_events(app.handle(), &services);

                    app.manage(AppState {
                        services,
                        settings: settings_store,
                    });

                    Ok(())
                })();

                result.map_err(|err| err.into())
            })
            .invoke_handler(tauri::generate_handler![
                list_serial_ports,
                connect_device,
                disconnect_device,
                send_device_command,
                get_device_state,
                start_sensing,
                stop_sensing,
                retune_sensing,
                analyze_now,
                get_sensing_state,
                get_latest_verdict,
                get_capture_preview,
                start_pointer_tracking,
                stop_pointer_tracking,
                get_pointer_state,
                get_metrics,
                get_settings,
            ])
            .build(tauri::generate_context!())
            .expect("error while building tauri application")
            .run(|app, event| {
                if let RunEvent::Exit = event {
                    if let Some(state) = app.try_state::<AppState>() {
                        let finished = tauri::async_runtime::block_on(async {
                            tokio::time::timeout(SHUTDOWN_GRACE, state.services.shutdown()).await
                        });
                        if finished.is_err() {
                            warn!("shutdown did not finish within {SHUTDOWN_GRACE:?}");
                            state.services.capture.dispose();
                        }
                    }
                }
            });
    }
}
