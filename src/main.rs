// Hide console window on Windows in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod charts;
mod config;
mod connection;
mod device_scanner;
mod error;
mod parser;
mod recorder;
mod sensor;
mod timeseries;
mod transport;
mod ui;

use app::ImuLogger;
use config::Config;
use iced::Theme;

fn main() -> iced::Result {
    // On Windows, force wgpu to use Vulkan backend instead of DirectX 12
    #[cfg(target_os = "windows")]
    std::env::set_var("WGPU_BACKEND", "vulkan");

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}; using default settings", e);
            Config::default()
        }
    };

    iced::application("IMU Logger", ImuLogger::update, ImuLogger::view)
        .subscription(ImuLogger::subscription)
        .theme(|_| Theme::Light)
        .window_size((1200.0, 850.0))
        .run_with(move || ImuLogger::new(config))
}
