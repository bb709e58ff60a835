//! # BEACN Link
//!
//! Virtual audio endpoints on a PipeWire-style audio server, with volume and
//! mute control and status queries for a calling application.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         LinkClient (client)                          │
//! │                                                                      │
//! │   create_all_devices / cleanup        set_volume / set_mute / status │
//! │              │                                    │                  │
//! │              ▼                                    ▼                  │
//! │  ┌───────────────────────┐            ┌───────────────────────┐      │
//! │  │ Lifecycle Controller  │            │     Control Plane     │      │
//! │  │  (device::lifecycle)  │            │   (device::control)   │      │
//! │  └──────────┬────────────┘            └──────────┬────────────┘      │
//! │             │       ┌──────────────────────┐     │                   │
//! │             ├──────►│  Slot Table (5 slots)│◄────┤                   │
//! │             │       │   Signal<LinkState>  │     │                   │
//! │             │       └──────────▲───────────┘     │                   │
//! │             │                  │ update + notify │                   │
//! │             │       ┌──────────┴───────────┐     │                   │
//! │             │       │  Event Dispatcher    │     │                   │
//! │             │       │  (background thread) │     │                   │
//! │             │       └──────────▲───────────┘     │                   │
//! │  ┌──────────┴─────────┐        │ ServerEvent     │                   │
//! │  │ Connection Manager │        │ (tagged by slot)│                   │
//! │  └──────────┬─────────┘        │                 │                   │
//! └─────────────┼──────────────────┼─────────────────┼───────────────────┘
//!               ▼                  │                 ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  AudioServer (server) - daemon binding               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Calls block the caller until the dispatcher has applied the awaited
//! notification or the bounded wait expires; see [`sync::Signal`].

pub mod client;
pub mod config;
pub mod connection;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod server;
pub mod state;
pub mod sync;

pub use client::LinkClient;
pub use config::LinkConfig;
pub use device::{Confirmation, DeviceSpec, DeviceStatus, DEVICES};
pub use error::{Error, Result};
pub use server::{AudioServer, SimOptions, SimulatedServer};
pub use state::LinkStats;

/// Application-wide constants
pub mod constants {
    /// Fixed number of device slots
    pub const MAX_DEVICES: usize = 5;

    /// Default sample rate for every virtual device
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Number of buffers negotiated per stream
    pub const DEFAULT_BUFFERS: u32 = 8;

    /// Frames per negotiated buffer
    pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 1024;

    /// Connection readiness wait
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Per-device readiness wait
    pub const DEFAULT_STREAM_READY_TIMEOUT_MS: u64 = 5000;

    /// Overall wait for creating the whole device set
    pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 10_000;

    /// Stream disconnect wait during teardown
    pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u64 = 1000;

    /// Control confirmation wait
    pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 2000;

    /// Pause between device creations so the server is not flooded
    pub const DEFAULT_DEVICE_SPACING_MS: u64 = 100;

    /// Re-check interval while waiting on server-side state
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
}
