//! Event dispatcher
//!
//! Runs on its own thread for the lifetime of a connection, draining the
//! server's notification channel. Each notification is applied to the shared
//! state under the lock (waking every waiter); anything that needs to call
//! back into the server happens after the lock is released.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::connection::ConnectionState;
use crate::device::StreamHandle;
use crate::process::{ProcessContext, ProcessHandler};
use crate::server::{
    AudioServer, Control, Direction, ServerEvent, StreamId, StreamState, ERR_CONNECTION_LOST,
};
use crate::state::{LinkState, SharedState};

/// Work left over after a notification has been applied
pub enum Followup {
    None,
    /// Run the processing callback for a stream
    Process {
        stream: StreamId,
        slot: usize,
        direction: Direction,
    },
    /// The server destroyed a stream; forget its handle
    Forget(StreamHandle),
}

/// Handle to the dispatcher thread
pub struct Dispatcher {
    /// Stop request for the thread
    quit: Sender<()>,

    /// Dispatcher thread handle
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(
        shared: Arc<SharedState>,
        server: Arc<dyn AudioServer>,
        events: Receiver<ServerEvent>,
        handler: Arc<dyn ProcessHandler>,
    ) -> std::io::Result<Self> {
        let (quit, quit_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("link-dispatch".into())
            .spawn(move || run(&shared, server.as_ref(), handler.as_ref(), &events, &quit_rx))?;
        Ok(Self {
            quit,
            handle: Some(handle),
        })
    }

    /// Stop delivering notifications and join the thread
    pub fn stop(&mut self) {
        let _ = self.quit.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    shared: &SharedState,
    server: &dyn AudioServer,
    handler: &dyn ProcessHandler,
    events: &Receiver<ServerEvent>,
    quit: &Receiver<()>,
) {
    tracing::debug!("Dispatcher started");
    loop {
        select! {
            recv(events) -> msg => match msg {
                Ok(event) => dispatch(shared, server, handler, event),
                Err(_) => break,
            },
            recv(quit) -> _ => break,
        }
    }
    tracing::debug!("Dispatcher stopped");
}

/// Apply one notification and run its followup
pub fn dispatch(
    shared: &SharedState,
    server: &dyn AudioServer,
    handler: &dyn ProcessHandler,
    event: ServerEvent,
) {
    let followup = shared.update(|state| apply(state, &event));
    match followup {
        Followup::None => {}
        Followup::Process {
            stream,
            slot,
            direction,
        } => {
            if let Some(mut buffer) = server.dequeue_buffer(stream) {
                let ctx = ProcessContext {
                    slot,
                    direction,
                    channels: buffer.channels,
                };
                handler.process(&ctx, &mut buffer.data);
                server.queue_buffer(stream, buffer);
            }
        }
        Followup::Forget(handle) => handle.detach(),
    }
}

/// Route a notification to its owner and update the state
pub fn apply(state: &mut LinkState, event: &ServerEvent) -> Followup {
    match event {
        ServerEvent::CoreInfo { id, seq } | ServerEvent::CoreDone { id, seq } => {
            if state.connection == ConnectionState::Connecting {
                tracing::info!("Audio server ready (id={}, seq={})", id, seq);
                state.connection = ConnectionState::Ready;
            } else {
                tracing::trace!("Core notification id={} seq={}", id, seq);
            }
            Followup::None
        }

        ServerEvent::CoreError {
            id,
            seq,
            code,
            message,
        } => {
            tracing::warn!("Core error: id={} seq={} code={} message={}", id, seq, code, message);
            match state.connection {
                ConnectionState::Connecting => {
                    state.connection = ConnectionState::Failed(message.clone());
                }
                ConnectionState::Ready if *code == ERR_CONNECTION_LOST => {
                    tracing::error!("Connection to audio server lost");
                    state.connection = ConnectionState::Failed("connection lost".into());
                }
                _ => {}
            }
            Followup::None
        }

        ServerEvent::StateChanged {
            tag,
            old,
            new,
            error,
        } => {
            let Some(slot) = state.slots.slot_for_mut(*tag) else {
                tracing::debug!("Dropping state change for stale slot {:?}", tag);
                return Followup::None;
            };
            slot.state = *new;
            slot.last_error = error.clone();
            state.stats.state_changes += 1;
            if *new == StreamState::Error {
                state.stats.stream_errors += 1;
                tracing::warn!(
                    "Stream {} ({}) error: {}",
                    tag.index,
                    slot.name,
                    error.as_deref().unwrap_or("unknown")
                );
            } else {
                tracing::debug!("Stream {} ({}) state {} -> {}", tag.index, slot.name, old, new);
            }
            Followup::None
        }

        ServerEvent::ParamChanged { tag, param } => {
            if let Some(slot) = state.slots.slot_for(*tag) {
                tracing::debug!("Stream {} ({}) {:?} changed", tag.index, slot.name, param);
            }
            Followup::None
        }

        ServerEvent::ControlInfo {
            tag,
            control,
            values,
        } => {
            let Some(slot) = state.slots.slot_for_mut(*tag) else {
                return Followup::None;
            };
            let Some(&value) = values.first() else {
                return Followup::None;
            };
            slot.store_control(*control, value);
            match control {
                Control::Volume => slot.volume_seq += 1,
                Control::Mute => slot.mute_seq += 1,
            }
            state.stats.confirmations += 1;
            tracing::debug!("Stream {} ({}) {:?} = {}", tag.index, slot.name, control, value);
            Followup::None
        }

        ServerEvent::Process { tag } => {
            let Some(slot) = state.slots.slot_for(*tag) else {
                return Followup::None;
            };
            match (&slot.stream, slot.active) {
                (Some(stream), true) => Followup::Process {
                    stream: stream.id(),
                    slot: tag.index,
                    direction: slot.direction,
                },
                _ => Followup::None,
            }
        }

        ServerEvent::Destroyed { tag } => {
            let Some(slot) = state.slots.slot_for(*tag) else {
                return Followup::None;
            };
            tracing::info!("Stream {} ({}) destroyed by server", tag.index, slot.name);
            match state.slots.release(tag.index) {
                Some(handle) => Followup::Forget(handle),
                None => Followup::None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ParamKind, SlotTag};

    fn state_with_device() -> (LinkState, SlotTag) {
        let mut state = LinkState::default();
        state.connection = ConnectionState::Ready;
        let tag = state
            .slots
            .reserve("beacn_link_out", "Link Out", Direction::Sink)
            .unwrap();
        (state, tag)
    }

    #[test]
    fn test_readiness_flips_connecting_only() {
        let mut state = LinkState::default();
        apply(&mut state, &ServerEvent::CoreDone { id: 0, seq: 1 });
        assert_eq!(state.connection, ConnectionState::Uninitialized);

        state.connection = ConnectionState::Connecting;
        apply(&mut state, &ServerEvent::CoreInfo { id: 0, seq: 1 });
        assert_eq!(state.connection, ConnectionState::Ready);
    }

    #[test]
    fn test_core_error_fails_connecting() {
        let mut state = LinkState::default();
        state.connection = ConnectionState::Connecting;
        apply(
            &mut state,
            &ServerEvent::CoreError {
                id: 0,
                seq: 1,
                code: -2,
                message: "no such remote".into(),
            },
        );
        assert_eq!(state.connection, ConnectionState::Failed("no such remote".into()));
    }

    #[test]
    fn test_connection_lost_while_ready() {
        let (mut state, _) = state_with_device();
        let benign = ServerEvent::CoreError {
            id: 3,
            seq: 0,
            code: -22,
            message: "bad param".into(),
        };
        apply(&mut state, &benign);
        assert!(state.connection.is_ready());

        let lost = ServerEvent::CoreError {
            id: 0,
            seq: 0,
            code: ERR_CONNECTION_LOST,
            message: "broken pipe".into(),
        };
        apply(&mut state, &lost);
        assert!(matches!(state.connection, ConnectionState::Failed(_)));
    }

    #[test]
    fn test_state_change_updates_slot() {
        let (mut state, tag) = state_with_device();
        apply(
            &mut state,
            &ServerEvent::StateChanged {
                tag,
                old: StreamState::Unconnected,
                new: StreamState::Connecting,
                error: None,
            },
        );
        apply(
            &mut state,
            &ServerEvent::StateChanged {
                tag,
                old: StreamState::Connecting,
                new: StreamState::Error,
                error: Some("no target".into()),
            },
        );
        let slot = state.slots.get(0).unwrap();
        assert_eq!(slot.state, StreamState::Error);
        assert_eq!(slot.last_error.as_deref(), Some("no target"));
        // error is not auto-destroyed
        assert!(slot.occupied);
        assert_eq!(state.stats.state_changes, 2);
        assert_eq!(state.stats.stream_errors, 1);
    }

    #[test]
    fn test_control_info_updates_cache() {
        let (mut state, tag) = state_with_device();
        apply(
            &mut state,
            &ServerEvent::ControlInfo {
                tag,
                control: Control::Volume,
                values: vec![0.5],
            },
        );
        apply(
            &mut state,
            &ServerEvent::ControlInfo {
                tag,
                control: Control::Mute,
                values: vec![1.0],
            },
        );
        let slot = state.slots.get(0).unwrap();
        assert_eq!(slot.volume, 0.5);
        assert!(slot.muted);
        assert_eq!(slot.volume_seq, 1);
        assert_eq!(slot.mute_seq, 1);
        assert_eq!(state.stats.confirmations, 2);
    }

    #[test]
    fn test_stale_tag_is_ignored() {
        let (mut state, tag) = state_with_device();
        state.slots.release(tag.index);
        let reused = state.slots.reserve("other", "Other", Direction::Sink).unwrap();
        assert_eq!(reused.index, tag.index);

        apply(
            &mut state,
            &ServerEvent::ControlInfo {
                tag,
                control: Control::Volume,
                values: vec![0.1],
            },
        );
        apply(&mut state, &ServerEvent::Destroyed { tag });

        let slot = state.slots.get(reused.index).unwrap();
        assert!(slot.occupied);
        assert_eq!(slot.name, "other");
        assert_eq!(slot.volume, 1.0);
    }

    #[test]
    fn test_destroy_clears_slot() {
        let (mut state, tag) = state_with_device();
        apply(&mut state, &ServerEvent::ParamChanged { tag, param: ParamKind::Format });
        let followup = apply(&mut state, &ServerEvent::Destroyed { tag });
        assert!(matches!(followup, Followup::None));
        assert_eq!(state.slots.occupied_count(), 0);
        assert_eq!(state.slots.find_by_name("beacn_link_out"), None);
    }

    #[test]
    fn test_process_skips_inactive_slot() {
        let (mut state, tag) = state_with_device();
        let followup = apply(&mut state, &ServerEvent::Process { tag });
        assert!(matches!(followup, Followup::None));
    }
}
