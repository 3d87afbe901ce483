//! # linkhubd
//!
//! A Linux daemon for AIO liquid coolers, RGB memory, LCD pump covers and
//! wireless peripherals.
//!
//! ## Features
//!
//! - **Per-device pipelines**: telemetry, control loop, RGB and LCD engines
//!   run as independent workers sharing one serialized transport
//! - **Speed profiles**: table or curve duty mapping with safe clamping
//! - **RGB effects**: catalog-driven profiles, temperature colouring and
//!   external frame submission
//! - **LCD rendering**: gauges, clocks and animations streamed as JPEG
//! - **Profile store**: JSON profiles, presets and catalogs on disk
//! - **D-Bus**: optional control interface and sleep/resume monitoring
//!
//! ## Architecture
//!
//! - [`Supervisor`](supervisor::Supervisor) - discovery, device lifecycle,
//!   main event loop
//! - [`Device`](device::Device) - one attached device and its workers
//! - [`DeviceDriver`](drivers::DeviceDriver) - family protocol behind a
//!   [`Transport`](transport::Transport)
//! - [`EventBus`](event::EventBus) - inter-service communication
//!
//! ## Example
//!
//! ```no_run
//! use linkhubd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None)?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod discovery;
pub mod drivers;
pub mod error;
pub mod event;
pub mod interface;
pub mod lcd;
pub mod profile;
pub mod providers;
pub mod registry;
pub mod rgb;
pub mod runtime;
pub mod sensors;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod task_manager;
pub mod temperature_sensors;
pub mod transport;
