//! Scoped ownership of a server-side stream
//!
//! Dropping a [`StreamHandle`] removes its listener before destroying the
//! stream, so no notification can reach a slot after its stream is gone.

use std::sync::Arc;

use crate::error::ServerError;
use crate::server::{
    AudioServer, Control, FormatParams, ListenerId, PortDirection, Properties, SlotTag,
    StreamFlags, StreamId, StreamState,
};

pub struct StreamHandle {
    server: Arc<dyn AudioServer>,
    id: StreamId,
    listener: Option<ListenerId>,
    detached: bool,
}

impl StreamHandle {
    /// Create a stream and register its listener under `tag`
    pub fn create(
        server: Arc<dyn AudioServer>,
        name: &str,
        props: &Properties,
        tag: SlotTag,
    ) -> Result<Self, ServerError> {
        let id = server.create_stream(name, props)?;
        let mut handle = Self {
            server,
            id,
            listener: None,
            detached: false,
        };
        // on failure the handle drops and destroys the stream
        handle.listener = Some(handle.server.add_stream_listener(id, tag)?);
        Ok(handle)
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn connect(
        &self,
        direction: PortDirection,
        flags: StreamFlags,
        params: &FormatParams,
    ) -> Result<(), ServerError> {
        self.server.connect_stream(self.id, direction, flags, params)
    }

    pub fn disconnect(&self) -> Result<(), ServerError> {
        self.server.disconnect_stream(self.id)
    }

    pub fn state(&self) -> (StreamState, Option<String>) {
        self.server.stream_state(self.id)
    }

    pub fn set_control(&self, control: Control, values: &[f32]) -> Result<(), ServerError> {
        self.server.set_control(self.id, control, values)
    }

    /// Stop notification delivery for this stream
    pub fn unlisten(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.server.remove_listener(listener);
        }
    }

    /// The server already destroyed the stream; forget it without releasing
    pub fn detach(mut self) {
        self.detached = true;
        self.listener = None;
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        self.unlisten();
        self.server.destroy_stream(self.id);
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("listener", &self.listener)
            .field("detached", &self.detached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::SimulatedServer;
    use crossbeam_channel::unbounded;

    fn server() -> Arc<SimulatedServer> {
        let server = Arc::new(SimulatedServer::new());
        let (tx, _rx) = unbounded();
        server.init();
        server.create_context(&Properties::new(), tx).unwrap();
        server.connect().unwrap();
        server
    }

    const TAG: SlotTag = SlotTag {
        index: 0,
        generation: 1,
    };

    #[test]
    fn test_drop_unregisters_before_destroy() {
        let sim = server();
        let handle = StreamHandle::create(sim.clone(), "dev", &Properties::new(), TAG).unwrap();
        assert!(handle.is_listening());
        sim.clear_calls();

        drop(handle);
        assert_eq!(sim.calls(), vec!["remove_listener dev", "destroy_stream dev"]);
        assert!(sim.stream_names().is_empty());
    }

    #[test]
    fn test_detach_skips_release() {
        let sim = server();
        let handle = StreamHandle::create(sim.clone(), "dev", &Properties::new(), TAG).unwrap();
        sim.clear_calls();

        handle.detach();
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_unlisten_is_idempotent() {
        let sim = server();
        let mut handle = StreamHandle::create(sim.clone(), "dev", &Properties::new(), TAG).unwrap();
        handle.unlisten();
        handle.unlisten();
        assert!(!handle.is_listening());
        sim.clear_calls();
        drop(handle);
        assert_eq!(sim.calls(), vec!["destroy_stream dev"]);
    }
}
