//! Volume and mute control with asynchronous confirmation

use std::time::Instant;

use crate::client::LinkClient;
use crate::device::{DeviceSlot, DeviceStatus};
use crate::error::{ConnectionError, ControlError, DeviceError, Error, Result};
use crate::server::{AudioServer, Control, SlotTag};

/// Outcome of a control write that the server accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The server echoed the new value back
    Confirmed,
    /// No confirmation within the timeout; the requested value is cached anyway
    TimedOut,
}

/// An in-flight control write
#[derive(Debug, Clone, Copy)]
pub struct ControlRequest {
    pub tag: SlotTag,
    pub control: Control,
    pub previous: f32,
    pub requested: f32,
    /// Confirmation count when the write was issued
    pub seq: u64,
    pub deadline: Instant,
}

impl ControlRequest {
    /// A confirmation arrived after the write and moved the cached value away
    /// from `previous`, or the write did not change the value at all.
    pub fn is_confirmed(&self, slot: &DeviceSlot) -> bool {
        if slot.control_seq(self.control) <= self.seq {
            return false;
        }
        slot.control_value(self.control) != self.previous || self.requested == self.previous
    }
}

impl<S: AudioServer + 'static> LinkClient<S> {
    /// Set a device's volume, `volume` in [0.0, 1.0].
    ///
    /// The range is checked before anything else; a rejected value leaves
    /// the device untouched.
    pub fn set_volume(&self, name: &str, volume: f32) -> Result<Confirmation> {
        let result = if (0.0..=1.0).contains(&volume) {
            self.write_control(name, Control::Volume, volume)
        } else {
            Err(ControlError::OutOfRange(volume).into())
        };
        self.track(result)
    }

    pub fn set_mute(&self, name: &str, mute: bool) -> Result<Confirmation> {
        let value = if mute { 1.0 } else { 0.0 };
        let result = self.write_control(name, Control::Mute, value);
        self.track(result)
    }

    /// Cached status of an active device; no server round trip
    pub fn get_status(&self, name: &str) -> Result<DeviceStatus> {
        let result = {
            let state = self.shared.lock();
            state
                .slots
                .find_active(name)
                .and_then(|index| state.slots.get(index))
                .map(DeviceSlot::status)
                .ok_or_else(|| Error::from(DeviceError::NotFound(name.to_string())))
        };
        self.track(result)
    }

    /// Status of every active device in slot order
    pub fn list_devices(&self) -> Vec<DeviceStatus> {
        let state = self.shared.lock();
        state.slots.active().map(|(_, slot)| slot.status()).collect()
    }

    fn write_control(&self, name: &str, control: Control, value: f32) -> Result<Confirmation> {
        let (request, stream) = {
            let state = self.shared.lock();
            let not_found = || Error::from(DeviceError::NotFound(name.to_string()));
            let index = state.slots.find_active(name).ok_or_else(not_found)?;
            if !state.connection.is_ready() {
                return Err(ConnectionError::NotConnected.into());
            }
            let slot = state.slots.get(index).ok_or_else(not_found)?;
            let stream = slot.stream.as_ref().map(|s| s.id()).ok_or_else(not_found)?;
            let request = ControlRequest {
                tag: slot.tag(index),
                control,
                previous: slot.control_value(control),
                requested: value,
                seq: slot.control_seq(control),
                deadline: Instant::now() + self.config.timeouts.confirmation(),
            };
            (request, stream)
        };

        tracing::debug!("Setting {} {:?} to {}", name, control, value);
        self.server
            .set_control(stream, control, &[value])
            .map_err(|e| {
                tracing::warn!("Control update for {} rejected: {}", name, e);
                ControlError::ServerRejected(e.to_string())
            })?;

        let outcome = self.shared.wait_until(
            request.deadline,
            self.config.timeouts.poll_interval(),
            |state| match state.slots.slot_for(request.tag) {
                None => Some(false),
                Some(slot) => request.is_confirmed(slot).then_some(true),
            },
        );

        match outcome {
            Ok(true) => Ok(Confirmation::Confirmed),
            Ok(false) => Err(DeviceError::NotFound(name.to_string()).into()),
            Err(_) => {
                tracing::warn!(
                    "No confirmation for {} {:?}={} within {:?}",
                    name,
                    control,
                    value,
                    self.config.timeouts.confirmation()
                );
                self.shared.update(|state| {
                    if let Some(slot) = state.slots.slot_for_mut(request.tag) {
                        slot.store_control(control, value);
                    }
                    state.stats.unconfirmed_controls += 1;
                });
                Ok(Confirmation::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::server::{ServerEvent, SimOptions, SimulatedServer, ERR_CONNECTION_LOST};
    use std::time::Duration;

    fn client_with_device(options: SimOptions) -> LinkClient<SimulatedServer> {
        let mut client =
            LinkClient::new(SimulatedServer::with_options(options), LinkConfig::fast()).unwrap();
        client.connect().unwrap();
        client.create_device("dev", "Dev", false).unwrap();
        client
    }

    #[test]
    fn test_volume_is_confirmed() {
        let c = client_with_device(SimOptions::default());
        assert_eq!(c.set_volume("dev", 0.25).unwrap(), Confirmation::Confirmed);
        assert_eq!(c.get_status("dev").unwrap().volume, 0.25);
        assert_eq!(c.server().stream_controls("dev"), Some((0.25, false)));
    }

    #[test]
    fn test_unchanged_value_still_confirms() {
        let c = client_with_device(SimOptions::default());
        let started = Instant::now();
        assert_eq!(c.set_volume("dev", 1.0).unwrap(), Confirmation::Confirmed);
        assert!(started.elapsed() < c.config().timeouts.confirmation());
    }

    #[test]
    fn test_out_of_range_touches_nothing() {
        let c = client_with_device(SimOptions::default());
        c.server().clear_calls();
        for bad in [-0.01, 1.01, f32::NAN, f32::INFINITY] {
            let err = c.set_volume("dev", bad).unwrap_err();
            assert!(matches!(err, Error::Control(ControlError::OutOfRange(_))));
        }
        assert!(c.server().calls().is_empty());
        assert_eq!(c.get_status("dev").unwrap().volume, 1.0);
    }

    #[test]
    fn test_mute_encoding() {
        let c = client_with_device(SimOptions::default());
        c.server().clear_calls();
        c.set_mute("dev", true).unwrap();
        assert!(c.get_status("dev").unwrap().mute);
        c.set_mute("dev", false).unwrap();
        assert!(!c.get_status("dev").unwrap().mute);
        assert_eq!(
            c.server().calls(),
            vec!["set_control dev Mute=1", "set_control dev Mute=0"]
        );
    }

    #[test]
    fn test_confirmation_timeout_keeps_requested_value() {
        let c = client_with_device(SimOptions {
            confirm_controls: false,
            ..Default::default()
        });
        assert_eq!(c.set_volume("dev", 0.4).unwrap(), Confirmation::TimedOut);
        assert_eq!(c.get_status("dev").unwrap().volume, 0.4);
        assert_eq!(c.stats().unconfirmed_controls, 1);
    }

    #[test]
    fn test_rejected_write() {
        let c = client_with_device(SimOptions::default());
        c.server().update_options(|o| o.reject_controls = true);
        let err = c.set_volume("dev", 0.5).unwrap_err();
        assert!(matches!(err, Error::Control(ControlError::ServerRejected(_))));
        assert_eq!(c.get_status("dev").unwrap().volume, 1.0);
    }

    #[test]
    fn test_unknown_name() {
        let c = client_with_device(SimOptions::default());
        assert!(c.set_volume("nope", 0.5).unwrap_err().is_not_found());
        assert!(c.set_mute("nope", true).unwrap_err().is_not_found());
        assert!(c.get_status("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_connection_lost_reports_not_connected() {
        let c = client_with_device(SimOptions::default());
        c.server().inject(ServerEvent::CoreError {
            id: 0,
            seq: 0,
            code: ERR_CONNECTION_LOST,
            message: "broken pipe".into(),
        });
        let lost = c
            .shared
            .wait_for(Duration::from_secs(1), Duration::from_millis(2), |state| {
                (!state.connection.is_ready()).then_some(())
            });
        assert!(lost.is_ok());

        let err = c.set_volume("dev", 0.5).unwrap_err();
        assert!(matches!(err, Error::Connection(ConnectionError::NotConnected)));
        // cached status stays readable
        assert!(c.get_status("dev").is_ok());
    }

    #[test]
    fn test_list_devices_in_slot_order() {
        let c = client_with_device(SimOptions::default());
        c.create_device("mic", "Mic", true).unwrap();
        let names: Vec<String> = c.list_devices().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["dev", "mic"]);
    }

    #[test]
    fn test_request_confirmation_rule() {
        let mut slot = DeviceSlot::default();
        let request = ControlRequest {
            tag: slot.tag(0),
            control: Control::Volume,
            previous: 1.0,
            requested: 0.5,
            seq: 0,
            deadline: Instant::now(),
        };
        assert!(!request.is_confirmed(&slot));

        // a confirmation that leaves the value where it was does not count
        slot.volume_seq = 1;
        assert!(!request.is_confirmed(&slot));

        slot.volume = 0.5;
        assert!(request.is_confirmed(&slot));
    }
}
