//! Stream lifecycle: create, connect, wait for readiness, destroy
//!
//! Per-device state machine as reported by the server:
//!
//! ```text
//! Unconnected -> Connecting -> Paused | Streaming -> Unconnected
//!                          \-> Error (terminal for the attempt)
//! ```

use std::thread;
use std::time::{Duration, Instant};

use crate::client::LinkClient;
use crate::device::{DeviceSpec, StreamHandle, DEVICES};
use crate::error::{ConnectionError, DeviceError, Error, Result};
use crate::server::{keys, AudioServer, Direction, Properties, SlotTag, StreamFlags, StreamState};

/// Properties advertising a virtual device
pub fn device_properties(
    name: &str,
    description: &str,
    direction: Direction,
    latency_hint: &str,
) -> Properties {
    Properties::new()
        .with(keys::MEDIA_CLASS, direction.media_class())
        .with(keys::NODE_NAME, name)
        .with(keys::NODE_DESCRIPTION, description)
        .with(keys::NODE_VIRTUAL, "1")
        .with(keys::NODE_NETWORK, "1")
        .with(keys::NODE_LATENCY, latency_hint)
}

impl<S: AudioServer + 'static> LinkClient<S> {
    /// Create every device in [`DEVICES`], all or nothing.
    ///
    /// Reuses a ready connection and skips devices that already exist;
    /// otherwise connects first. Any failure tears the whole connection down
    /// and leaves it `Failed` with the reason.
    pub fn create_all_devices(&mut self) -> Result<()> {
        let result = self.create_all_inner();
        if let Err(e) = &result {
            tracing::error!("Error creating virtual devices: {}", e);
            self.abort(e);
        }
        self.track(result)
    }

    fn create_all_inner(&mut self) -> Result<()> {
        if !self.is_connected() {
            self.connect()?;
        }

        let batch = self.config.timeouts.batch();
        let deadline = Instant::now() + batch;
        let spacing = self.config.timeouts.device_spacing();
        let mut created_previous = false;

        tracing::info!("Creating virtual devices");
        for spec in DEVICES.iter() {
            if created_previous && !spacing.is_zero() {
                thread::sleep(spacing);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::StreamReadyTimeout {
                    name: spec.name.to_string(),
                    timeout: batch,
                }
                .into());
            }
            let stream_ready = self.config.timeouts.stream_ready();
            let clipped = remaining < stream_ready;
            created_previous = match self.create_spec(spec, remaining.min(stream_ready)) {
                // the batch budget ran out, not the device's own wait
                Err(Error::Device(DeviceError::StreamReadyTimeout { name, .. })) if clipped => {
                    return Err(DeviceError::StreamReadyTimeout {
                        name,
                        timeout: batch,
                    }
                    .into());
                }
                other => other?,
            };
        }
        tracing::info!("All virtual devices created");
        Ok(())
    }

    /// Create one device. Succeeds without doing anything if `name` exists.
    pub fn create_device(&self, name: &str, description: &str, is_source: bool) -> Result<()> {
        let spec = DeviceSpec {
            name,
            description,
            direction: Direction::from_is_source(is_source),
        };
        let timeout = self.config.timeouts.stream_ready();
        let result = self.create_spec(&spec, timeout).map(|_| ());
        self.track(result)
    }

    /// Returns whether a new device was created
    fn create_spec(&self, spec: &DeviceSpec<'_>, timeout: Duration) -> Result<bool> {
        let reserved = self.shared.update(|state| -> Result<std::result::Result<SlotTag, usize>> {
            if !state.connection.is_ready() {
                return Err(Error::from(ConnectionError::NotConnected));
            }
            if let Some(index) = state.slots.find_by_name(spec.name) {
                return Ok(Err(index));
            }
            Ok(Ok(state
                .slots
                .reserve(spec.name, spec.description, spec.direction)?))
        })?;
        let tag = match reserved {
            Ok(tag) => tag,
            Err(index) => {
                tracing::info!("Device {} already exists at index {}", spec.name, index);
                return Ok(false);
            }
        };

        match self.open_stream(spec, tag, timeout) {
            Ok(handle) => {
                let orphan = self.shared.update(|state| match state.slots.slot_for_mut(tag) {
                    Some(slot) => {
                        slot.stream = Some(handle);
                        slot.active = true;
                        None
                    }
                    None => Some(handle),
                });
                if let Some(handle) = orphan {
                    drop(handle);
                    return Err(DeviceError::StreamCreateFailure {
                        name: spec.name.to_string(),
                        reason: "destroyed while connecting".into(),
                    }
                    .into());
                }
                tracing::info!("Created virtual device {} at index {}", spec.name, tag.index);
                Ok(true)
            }
            Err(e) => {
                let leftover = self.shared.update(|state| {
                    if state.slots.slot_for(tag).is_some() {
                        state.slots.release(tag.index)
                    } else {
                        None
                    }
                });
                drop(leftover);
                Err(e)
            }
        }
    }

    /// Create, connect and await readiness; the stream is fully rolled back on error
    fn open_stream(&self, spec: &DeviceSpec<'_>, tag: SlotTag, timeout: Duration) -> Result<StreamHandle> {
        let params = self.config.format.params();
        let props = device_properties(spec.name, spec.description, spec.direction, &params.latency_hint());

        let create_failure = |reason: String| -> Error {
            DeviceError::StreamCreateFailure {
                name: spec.name.to_string(),
                reason,
            }
            .into()
        };

        let handle = StreamHandle::create(self.dyn_server(), spec.name, &props, tag)
            .map_err(|e| create_failure(e.to_string()))?;
        handle
            .connect(spec.direction.port_direction(), StreamFlags::VIRTUAL_DEVICE, &params)
            .map_err(|e| create_failure(e.to_string()))?;

        let outcome = self
            .shared
            .wait_for(timeout, self.config.timeouts.poll_interval(), |state| {
                match state.slots.slot_for(tag) {
                    None => Some(Err("destroyed while connecting".to_string())),
                    Some(slot) if slot.state.is_ready() => Some(Ok(())),
                    Some(slot) if slot.state == StreamState::Error => Some(Err(slot
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "stream error".into()))),
                    Some(_) => None,
                }
            });

        let err = match outcome {
            Ok(Ok(())) => return Ok(handle),
            Ok(Err(reason)) => create_failure(reason),
            Err(_) => {
                tracing::error!("Timeout waiting for {} to be ready", spec.name);
                DeviceError::StreamReadyTimeout {
                    name: spec.name.to_string(),
                    timeout,
                }
                .into()
            }
        };
        // half-open: disconnect, then the handle drop unregisters and destroys
        if let Err(e) = handle.disconnect() {
            tracing::debug!("Disconnect of half-open {} failed: {}", spec.name, e);
        }
        drop(handle);
        Err(err)
    }

    /// Tear down the device in slot `index`.
    ///
    /// Notifications are unregistered before anything else. A stream that
    /// does not reach unconnected within the disconnect timeout is released
    /// anyway.
    pub fn destroy_device(&self, index: usize) {
        let taken = self.shared.update(|state| {
            let slot = state.slots.get_mut(index).filter(|slot| slot.occupied)?;
            slot.active = false;
            Some((slot.name.clone(), slot.stream.take()))
        });
        let Some((name, stream)) = taken else {
            return;
        };

        if let Some(mut handle) = stream {
            handle.unlisten();
            if let Err(e) = handle.disconnect() {
                tracing::warn!("Disconnect of {} failed: {}", name, e);
            }
            let timeout = self.config.timeouts.disconnect();
            let unconnected = self
                .shared
                .wait_for(timeout, self.config.timeouts.poll_interval(), |_| {
                    (handle.state().0 == StreamState::Unconnected).then_some(())
                });
            if unconnected.is_err() {
                tracing::warn!("Timeout waiting for stream {} ({}) to disconnect", index, name);
            }
            drop(handle);
        }

        let leftover = self.shared.update(|state| state.slots.release(index));
        drop(leftover);
        tracing::info!("Destroyed virtual device {}", name);
    }

    /// Destroy every occupied slot
    pub fn destroy_all_devices(&self) {
        let occupied = self.shared.lock().slots.occupied();
        for index in occupied {
            self.destroy_device(index);
        }
    }

    /// Lifecycle state of a device, including ones still connecting
    pub fn device_state(&self, name: &str) -> Option<StreamState> {
        let state = self.shared.lock();
        state
            .slots
            .find_by_name(name)
            .and_then(|index| state.slots.get(index))
            .map(|slot| slot.state)
    }

    pub fn device_count(&self) -> usize {
        self.shared.lock().slots.occupied_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::server::{SimOptions, SimulatedServer};

    fn client(options: SimOptions) -> LinkClient<SimulatedServer> {
        LinkClient::new(SimulatedServer::with_options(options), LinkConfig::fast()).unwrap()
    }

    #[test]
    fn test_device_properties() {
        let props = device_properties("beacn_virtual_input", "BEACN Virtual Input", Direction::Source, "1024/48000");
        assert_eq!(props.get(keys::MEDIA_CLASS), Some("Audio/Source"));
        assert_eq!(props.get(keys::NODE_NAME), Some("beacn_virtual_input"));
        assert_eq!(props.get(keys::NODE_DESCRIPTION), Some("BEACN Virtual Input"));
        assert_eq!(props.get(keys::NODE_VIRTUAL), Some("1"));
        assert_eq!(props.get(keys::NODE_NETWORK), Some("1"));
        assert_eq!(props.get(keys::NODE_LATENCY), Some("1024/48000"));
    }

    #[test]
    fn test_create_requires_connection() {
        let c = client(SimOptions::default());
        let err = c.create_device("dev", "Dev", false).unwrap_err();
        assert!(matches!(err, Error::Connection(ConnectionError::NotConnected)));
    }

    #[test]
    fn test_create_single_device() {
        let mut c = client(SimOptions::default());
        c.connect().unwrap();
        c.create_device("dev", "Dev", false).unwrap();

        assert_eq!(c.device_count(), 1);
        assert_eq!(c.device_state("dev"), Some(StreamState::Paused));
        let params = c.server().stream_params("dev").unwrap();
        assert_eq!(params.buffers, 8);
        assert_eq!(params.frames_per_buffer, 1024);
    }

    #[test]
    fn test_create_existing_is_skipped() {
        let mut c = client(SimOptions::default());
        c.connect().unwrap();
        c.create_device("dev", "Dev", false).unwrap();
        c.server().clear_calls();

        c.create_device("dev", "Dev", false).unwrap();
        assert_eq!(c.device_count(), 1);
        assert!(c.server().calls().is_empty());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut c = client(SimOptions::default());
        c.connect().unwrap();
        for i in 0..5 {
            c.create_device(&format!("dev{i}"), "", false).unwrap();
        }
        let err = c.create_device("dev5", "", false).unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::CapacityExceeded(5))));
        assert_eq!(c.device_count(), 5);
    }

    #[test]
    fn test_stream_error_releases_slot() {
        let mut options = SimOptions::default();
        options.fail_streams.insert("dev".into());
        let mut c = client(options);
        c.connect().unwrap();

        let err = c.create_device("dev", "Dev", false).unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::StreamCreateFailure { .. })));
        assert_eq!(c.device_count(), 0);
        assert!(c.server().stream_names().is_empty());
    }

    #[test]
    fn test_ready_timeout_rolls_back_half_open_stream() {
        let mut options = SimOptions::default();
        options.stall_streams.insert("dev".into());
        let mut c = client(options);
        c.connect().unwrap();
        c.server().clear_calls();

        let err = c.create_device("dev", "Dev", false).unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::StreamReadyTimeout { .. })));
        assert_eq!(c.device_count(), 0);

        let calls = c.server().calls();
        let tail: Vec<&str> = calls.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["disconnect_stream dev", "remove_listener dev", "destroy_stream dev"]);
    }

    #[test]
    fn test_rejected_create() {
        let mut options = SimOptions::default();
        options.reject_create.insert("dev".into());
        let mut c = client(options);
        c.connect().unwrap();
        let err = c.create_device("dev", "Dev", false).unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::StreamCreateFailure { .. })));
        assert_eq!(c.device_count(), 0);
    }

    #[test]
    fn test_destroy_unregisters_first() {
        let mut c = client(SimOptions::default());
        c.connect().unwrap();
        c.create_device("dev", "Dev", true).unwrap();
        c.server().clear_calls();

        c.destroy_device(0);
        assert_eq!(
            c.server().calls(),
            vec!["remove_listener dev", "disconnect_stream dev", "destroy_stream dev"]
        );
        assert_eq!(c.device_count(), 0);
    }

    #[test]
    fn test_destroy_times_out_and_releases() {
        let mut c = client(SimOptions::default());
        c.connect().unwrap();
        c.create_device("dev", "Dev", false).unwrap();
        c.server().update_options(|o| o.linger_on_disconnect = true);

        let started = Instant::now();
        c.destroy_device(0);
        assert!(started.elapsed() >= c.config().timeouts.disconnect());
        assert_eq!(c.device_count(), 0);
        assert!(c.server().stream_names().is_empty());
    }

    #[test]
    fn test_destroy_free_slot_is_noop() {
        let mut c = client(SimOptions::default());
        c.connect().unwrap();
        c.server().clear_calls();
        c.destroy_device(3);
        c.destroy_device(99);
        assert!(c.server().calls().is_empty());
    }
}
