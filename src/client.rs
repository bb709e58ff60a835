//! Application-facing client
//!
//! [`LinkClient`] is the context object every operation goes through. It owns
//! the audio server binding outright, so one client means one connection:
//! the server cannot be shared with a second client.

use std::sync::Arc;

use crate::config::LinkConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::process::{ProcessHandler, Silence};
use crate::server::AudioServer;
use crate::state::{LinkStats, SharedState};

pub struct LinkClient<S: AudioServer + 'static> {
    /// Audio server binding, shared with the dispatcher and stream handles
    pub(crate) server: Arc<S>,

    /// Connection state, slot table and stats
    pub(crate) shared: Arc<SharedState>,

    /// Timeouts, format and client identity
    pub(crate) config: LinkConfig,

    /// Per-buffer processing callback
    pub(crate) handler: Arc<dyn ProcessHandler>,

    /// Resources held while connected
    pub(crate) connection: Connection,
}

impl<S: AudioServer + 'static> LinkClient<S> {
    pub fn new(server: S, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            server: Arc::new(server),
            shared: Arc::new(SharedState::default()),
            config,
            handler: Arc::new(Silence),
            connection: Connection::new(),
        })
    }

    /// Install the processing callback; takes effect on the next connect
    pub fn with_process_handler(mut self, handler: Arc<dyn ProcessHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// The audio server binding
    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connection.is_ready()
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.lock().stats
    }

    pub(crate) fn dyn_server(&self) -> Arc<dyn AudioServer> {
        self.server.clone()
    }

    /// (Re)establish the connection.
    ///
    /// Tears down any existing connection first: every device is destroyed,
    /// then the connection resources are released.
    pub fn connect(&mut self) -> Result<()> {
        self.destroy_all_devices();
        let server = self.dyn_server();
        self.connection
            .open(&server, &self.shared, &self.config, &self.handler)
    }

    /// Destroy every device and release the connection. Idempotent.
    pub fn disconnect(&mut self) {
        self.destroy_all_devices();
        self.connection.close(self.server.as_ref(), &self.shared);
    }

    /// Destroy every device and release the connection after a failed
    /// operation, leaving the state `Failed` so callers can see why
    pub(crate) fn abort(&mut self, err: &Error) {
        self.destroy_all_devices();
        self.connection
            .fail(self.server.as_ref(), &self.shared, err);
    }

    /// Tear everything down; always succeeds
    pub fn cleanup(&mut self) {
        tracing::info!("Cleaning up virtual devices");
        self.count_operation(true);
        self.disconnect();
    }

    pub(crate) fn count_operation(&self, ok: bool) {
        self.shared.update(|state| {
            state.stats.operations += 1;
            if !ok {
                state.stats.failed_operations += 1;
            }
        });
    }

    /// Record the outcome of a public operation
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        self.count_operation(result.is_ok());
        result
    }
}

impl<S: AudioServer + 'static> Drop for LinkClient<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
