//! Virtual device slots, stream lifecycle and controls

pub mod control;
pub mod lifecycle;
pub mod slot;
pub mod stream;

use serde::Serialize;

use crate::server::{Direction, StreamState};

pub use control::{Confirmation, ControlRequest};
pub use slot::{DeviceSlot, SlotTable};
pub use stream::StreamHandle;

/// A device in the fixed device set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub direction: Direction,
}

/// The device set created by [`LinkClient::create_all_devices`], in creation order.
///
/// Names and descriptions are what other components search for.
///
/// [`LinkClient::create_all_devices`]: crate::LinkClient::create_all_devices
pub const DEVICES: [DeviceSpec<'static>; 5] = [
    DeviceSpec {
        name: "beacn_link_out",
        description: "Link Out",
        direction: Direction::Sink,
    },
    DeviceSpec {
        name: "beacn_link_2_out",
        description: "Link 2 Out",
        direction: Direction::Sink,
    },
    DeviceSpec {
        name: "beacn_link_3_out",
        description: "Link 3 Out",
        direction: Direction::Sink,
    },
    DeviceSpec {
        name: "beacn_link_4_out",
        description: "Link 4 Out",
        direction: Direction::Sink,
    },
    DeviceSpec {
        name: "beacn_virtual_input",
        description: "BEACN Virtual Input",
        direction: Direction::Source,
    },
];

/// Cached status of an active device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub description: String,
    pub volume: f32,
    pub mute: bool,
    pub direction: Direction,
    pub state: StreamState,
}
