//! Link control demo
//!
//! Brings up the virtual device set on the simulated audio server, applies a
//! volume and mute change to one device and prints the device list as JSON.
//!
//! Usage: `linkctl [device] [volume] [mute]`

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use beacn_link::{LinkClient, LinkConfig, SimulatedServer, DEVICES};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting BEACN Link control");

    let mut args = std::env::args().skip(1);
    let device = args.next().unwrap_or_else(|| DEVICES[0].name.to_string());
    let volume: f32 = args
        .next()
        .map(|v| v.parse::<f32>())
        .transpose()
        .context("volume must be a number between 0 and 1")?
        .unwrap_or(0.5);
    let mute: bool = args
        .next()
        .map(|v| v.parse::<bool>())
        .transpose()
        .context("mute must be true or false")?
        .unwrap_or(true);

    let config = LinkConfig::load_or_default()?;
    let mut client = LinkClient::new(SimulatedServer::new(), config)?;

    client
        .create_all_devices()
        .context("failed to create virtual devices")?;

    println!("\n=== Virtual Devices ===");
    println!("{}", serde_json::to_string_pretty(&client.list_devices())?);

    let confirmation = client.set_volume(&device, volume)?;
    tracing::info!("Volume of {} set to {} ({:?})", device, volume, confirmation);
    let confirmation = client.set_mute(&device, mute)?;
    tracing::info!("Mute of {} set to {} ({:?})", device, mute, confirmation);

    let status = client.get_status(&device)?;
    println!("\n=== {} ===", status.description);
    println!("{}", serde_json::to_string_pretty(&status)?);

    client.cleanup();

    let stats = client.stats();
    println!("\n=== Statistics ===");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("Success rate: {:.1}%", stats.success_rate() * 100.0);

    Ok(())
}
