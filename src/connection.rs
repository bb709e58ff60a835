//! Connection to the audio server
//!
//! Owns the resources acquired during bring-up (subsystem, dispatcher
//! thread, context, daemon connection, core listener) and releases them in
//! reverse acquisition order, whether bring-up failed halfway or the
//! connection is being torn down.

use crossbeam_channel::unbounded;
use std::sync::Arc;

use crate::config::LinkConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ConnectionError, Error, Result};
use crate::process::ProcessHandler;
use crate::server::{AudioServer, ListenerId, ServerEvent};
use crate::state::SharedState;

/// Connection state machine: Uninitialized -> Connecting -> Ready | Failed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Connecting,
    Ready,
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

/// Resources held while connected
#[derive(Default)]
pub struct Connection {
    /// Client subsystem initialized
    initialized: bool,

    /// Event dispatcher thread
    dispatcher: Option<Dispatcher>,

    /// Connection context created
    context: bool,

    /// Connected to the daemon
    connected: bool,

    /// Info/done/error listener on the connection
    core_listener: Option<ListenerId>,

    /// Sequence of the last sync request
    sync_seq: i32,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while any resource is held
    pub fn is_open(&self) -> bool {
        self.initialized || self.dispatcher.is_some() || self.context || self.connected
    }

    /// Bring up the connection and wait for readiness.
    ///
    /// Any previous connection is closed first. On failure everything
    /// acquired so far is released and the state is left `Failed`.
    pub fn open(
        &mut self,
        server: &Arc<dyn AudioServer>,
        shared: &Arc<SharedState>,
        config: &LinkConfig,
        handler: &Arc<dyn ProcessHandler>,
    ) -> Result<()> {
        self.close(server.as_ref(), shared);

        tracing::info!("Connecting to audio server ({})", config.client.remote_name);
        shared.update(|state| state.connection = ConnectionState::Connecting);

        match self.acquire(server, shared, config, handler) {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Audio server bring-up failed: {}", e);
                self.fail(server.as_ref(), shared, &e);
                return Err(e);
            }
        }

        let timeout = config.timeouts.connect();
        let outcome = shared.wait_for(timeout, config.timeouts.poll_interval(), |state| {
            match &state.connection {
                ConnectionState::Ready => Some(Ok(())),
                ConnectionState::Failed(reason) => Some(Err(reason.clone())),
                _ => None,
            }
        });

        let err: Error = match outcome {
            Ok(Ok(())) => {
                tracing::info!("Connected to audio server");
                return Ok(());
            }
            Ok(Err(reason)) => ConnectionError::InitializationFailure(reason).into(),
            Err(_) => {
                tracing::error!("Timeout waiting for audio server readiness");
                ConnectionError::ConnectTimeout(timeout).into()
            }
        };
        self.fail(server.as_ref(), shared, &err);
        Err(err)
    }

    fn acquire(
        &mut self,
        server: &Arc<dyn AudioServer>,
        shared: &Arc<SharedState>,
        config: &LinkConfig,
        handler: &Arc<dyn ProcessHandler>,
    ) -> Result<()> {
        server.init();
        self.initialized = true;

        let (events_tx, events_rx) = unbounded::<ServerEvent>();
        let dispatcher = Dispatcher::spawn(shared.clone(), server.clone(), events_rx, handler.clone())
            .map_err(|e| ConnectionError::InitializationFailure(format!("event loop: {e}")))?;
        self.dispatcher = Some(dispatcher);

        server
            .create_context(&config.client.properties(), events_tx)
            .map_err(|e| ConnectionError::InitializationFailure(format!("context: {e}")))?;
        self.context = true;

        server
            .connect()
            .map_err(|e| ConnectionError::InitializationFailure(format!("connect: {e}")))?;
        self.connected = true;

        let listener = server
            .add_core_listener()
            .map_err(|e| ConnectionError::InitializationFailure(format!("listener: {e}")))?;
        self.core_listener = Some(listener);

        self.sync_seq = self.sync_seq.wrapping_add(1);
        server
            .sync(self.sync_seq)
            .map_err(|e| ConnectionError::InitializationFailure(format!("sync: {e}")))?;
        Ok(())
    }

    /// Release every held resource and leave the state `Failed`
    pub(crate) fn fail(&mut self, server: &dyn AudioServer, shared: &SharedState, err: &Error) {
        self.release(server);
        shared.update(|state| state.connection = ConnectionState::Failed(err.to_string()));
    }

    /// Release every held resource and return to `Uninitialized`.
    ///
    /// Streams must already be destroyed. Safe to call when nothing is held.
    pub fn close(&mut self, server: &dyn AudioServer, shared: &SharedState) {
        if self.is_open() {
            tracing::info!("Disconnecting from audio server");
        }
        self.release(server);
        shared.update(|state| state.connection = ConnectionState::Uninitialized);
    }

    fn release(&mut self, server: &dyn AudioServer) {
        if let Some(listener) = self.core_listener.take() {
            server.remove_listener(listener);
        }
        if self.connected {
            server.disconnect();
            self.connected = false;
        }
        if self.context {
            server.destroy_context();
            self.context = false;
        }
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        if self.initialized {
            server.deinit();
            self.initialized = false;
        }
    }
}
