//! Simulated audio server for testing without a running daemon.
//!
//! Behaves like a well-mannered PipeWire daemon: a connected stream moves
//! through connecting to the configured ready state, control writes are
//! echoed back as control notifications, and every notification is delivered
//! from a separate delivery thread after a configurable latency. Faults are
//! injected through [`SimOptions`].

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{
    AudioServer, Buffer, Control, EventSender, FormatParams, ListenerId, ParamKind,
    PortDirection, Properties, ServerEvent, SlotTag, StreamFlags, StreamId, StreamState,
};
use crate::error::ServerError;

/// Fault injection and timing knobs
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Delay between a request and its notification
    pub event_latency: Duration,
    /// Refuse the daemon connection
    pub fail_connect: bool,
    /// Never answer sync requests, so readiness never arrives
    pub ignore_sync: bool,
    /// State a healthy stream settles in
    pub ready_state: StreamState,
    /// Streams (by name) that fail `create_stream`
    pub reject_create: HashSet<String>,
    /// Streams (by name) that end up in the error state
    pub fail_streams: HashSet<String>,
    /// Streams (by name) that stay in connecting forever
    pub stall_streams: HashSet<String>,
    /// Echo control writes back as notifications
    pub confirm_controls: bool,
    /// Refuse control writes
    pub reject_controls: bool,
    /// Streams stay connected after a disconnect request
    pub linger_on_disconnect: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            event_latency: Duration::from_millis(1),
            fail_connect: false,
            ignore_sync: false,
            ready_state: StreamState::Paused,
            reject_create: HashSet::new(),
            fail_streams: HashSet::new(),
            stall_streams: HashSet::new(),
            confirm_controls: true,
            reject_controls: false,
            linger_on_disconnect: false,
        }
    }
}

struct SimStream {
    name: String,
    props: Properties,
    state: StreamState,
    listener: Option<(ListenerId, SlotTag)>,
    params: Option<FormatParams>,
    volume: f32,
    mute: bool,
    last_queued: Option<Buffer>,
}

#[derive(Default)]
struct SimState {
    options: SimOptions,
    initialized: bool,
    delivery: Option<Sender<(Instant, ServerEvent)>>,
    delivery_thread: Option<JoinHandle<()>>,
    context_props: Option<Properties>,
    connected: bool,
    core_listener: Option<ListenerId>,
    streams: HashMap<StreamId, SimStream>,
    next_id: u32,
    calls: Vec<String>,
}

impl SimState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.delivery {
            let due = Instant::now() + self.options.event_latency;
            let _ = tx.send((due, event));
        }
    }

    fn emit_for(&self, stream: StreamId, make: impl FnOnce(SlotTag) -> ServerEvent) {
        if let Some(tag) = self
            .streams
            .get(&stream)
            .and_then(|s| s.listener.map(|(_, tag)| tag))
        {
            self.emit(make(tag));
        }
    }

    fn transition(&mut self, stream: StreamId, new: StreamState, error: Option<String>) {
        let old = match self.streams.get_mut(&stream) {
            Some(s) => std::mem::replace(&mut s.state, new),
            None => return,
        };
        if old != new {
            self.emit_for(stream, |tag| ServerEvent::StateChanged {
                tag,
                old,
                new,
                error,
            });
        }
    }
}

/// In-process audio server
#[derive(Default)]
pub struct SimulatedServer {
    inner: Mutex<SimState>,
}

impl SimulatedServer {
    pub fn new() -> Self {
        Self::with_options(SimOptions::default())
    }

    pub fn with_options(options: SimOptions) -> Self {
        Self {
            inner: Mutex::new(SimState {
                options,
                ..Default::default()
            }),
        }
    }

    /// Modify the fault injection options in place
    pub fn update_options(&self, f: impl FnOnce(&mut SimOptions)) {
        f(&mut self.inner.lock().options);
    }

    /// Ordered log of server calls
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn has_context(&self) -> bool {
        self.inner.lock().context_props.is_some()
    }

    /// Properties the context was created with
    pub fn context_props(&self) -> Option<Properties> {
        self.inner.lock().context_props.clone()
    }

    /// Names of streams the server currently holds
    pub fn stream_names(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut names: Vec<String> = state.streams.values().map(|s| s.name.clone()).collect();
        names.sort();
        names
    }

    pub fn stream_props(&self, name: &str) -> Option<Properties> {
        let state = self.inner.lock();
        state
            .streams
            .values()
            .find(|s| s.name == name)
            .map(|s| s.props.clone())
    }

    pub fn stream_params(&self, name: &str) -> Option<FormatParams> {
        let state = self.inner.lock();
        state
            .streams
            .values()
            .find(|s| s.name == name)
            .and_then(|s| s.params)
    }

    /// Server-side volume and mute for a stream
    pub fn stream_controls(&self, name: &str) -> Option<(f32, bool)> {
        let state = self.inner.lock();
        state
            .streams
            .values()
            .find(|s| s.name == name)
            .map(|s| (s.volume, s.mute))
    }

    /// Last buffer the processing callback queued for a stream
    pub fn last_queued(&self, name: &str) -> Option<Buffer> {
        let state = self.inner.lock();
        state
            .streams
            .values()
            .find(|s| s.name == name)
            .and_then(|s| s.last_queued.clone())
    }

    /// Emit one process notification for every ready stream
    pub fn tick(&self) {
        let state = self.inner.lock();
        for (id, stream) in &state.streams {
            if stream.state.is_ready() {
                state.emit_for(*id, |tag| ServerEvent::Process { tag });
            }
        }
    }

    /// Inject an arbitrary notification
    pub fn inject(&self, event: ServerEvent) {
        self.inner.lock().emit(event);
    }

    /// Destroy a stream from the server side, as if the daemon removed it
    pub fn destroy_remote(&self, name: &str) -> bool {
        let mut state = self.inner.lock();
        let id = match state.streams.iter().find(|(_, s)| s.name == name) {
            Some((id, _)) => *id,
            None => return false,
        };
        state.emit_for(id, |tag| ServerEvent::Destroyed { tag });
        state.streams.remove(&id);
        state.calls.push(format!("remote_destroy {name}"));
        true
    }

    /// Push a stream into the error state, as if the graph failed it
    pub fn fail_remote(&self, name: &str, reason: &str) -> bool {
        let mut state = self.inner.lock();
        let id = match state.streams.iter().find(|(_, s)| s.name == name) {
            Some((id, _)) => *id,
            None => return false,
        };
        state.transition(id, StreamState::Error, Some(reason.to_string()));
        true
    }
}

impl AudioServer for SimulatedServer {
    fn init(&self) {
        let mut state = self.inner.lock();
        state.initialized = true;
        state.calls.push("init".into());
    }

    fn deinit(&self) {
        let mut state = self.inner.lock();
        state.initialized = false;
        state.calls.push("deinit".into());
    }

    fn create_context(&self, props: &Properties, events: EventSender) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        if !state.initialized {
            return Err(ServerError::Unavailable("subsystem not initialized".into()));
        }
        let (tx, rx) = unbounded::<(Instant, ServerEvent)>();
        let handle = thread::Builder::new()
            .name("sim-delivery".into())
            .spawn(move || {
                for (due, event) in rx.iter() {
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                    if events.send(event).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| ServerError::Unavailable(e.to_string()))?;
        state.delivery = Some(tx);
        state.delivery_thread = Some(handle);
        state.context_props = Some(props.clone());
        state.calls.push("create_context".into());
        Ok(())
    }

    fn destroy_context(&self) {
        let handle = {
            let mut state = self.inner.lock();
            state.delivery = None;
            state.context_props = None;
            state.streams.clear();
            state.calls.push("destroy_context".into());
            state.delivery_thread.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn connect(&self) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        if state.context_props.is_none() {
            return Err(ServerError::NoContext);
        }
        if state.options.fail_connect {
            return Err(ServerError::Unavailable("connection refused".into()));
        }
        state.connected = true;
        state.calls.push("connect".into());
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.connected = false;
        state.calls.push("disconnect".into());
    }

    fn add_core_listener(&self) -> Result<ListenerId, ServerError> {
        let mut state = self.inner.lock();
        if !state.connected {
            return Err(ServerError::NoContext);
        }
        let id = ListenerId(state.next_id());
        state.core_listener = Some(id);
        state.calls.push("add_core_listener".into());
        Ok(id)
    }

    fn remove_listener(&self, listener: ListenerId) {
        let mut state = self.inner.lock();
        if state.core_listener == Some(listener) {
            state.core_listener = None;
            state.calls.push("remove_core_listener".into());
            return;
        }
        let mut removed = None;
        for stream in state.streams.values_mut() {
            if matches!(stream.listener, Some((id, _)) if id == listener) {
                stream.listener = None;
                removed = Some(stream.name.clone());
            }
        }
        if let Some(name) = removed {
            state.calls.push(format!("remove_listener {name}"));
        }
    }

    fn sync(&self, seq: i32) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        if !state.connected {
            return Err(ServerError::NoContext);
        }
        state.calls.push(format!("sync {seq}"));
        if state.core_listener.is_some() && !state.options.ignore_sync {
            state.emit(ServerEvent::CoreInfo { id: 0, seq });
            state.emit(ServerEvent::CoreDone { id: 0, seq });
        }
        Ok(())
    }

    fn create_stream(&self, name: &str, props: &Properties) -> Result<StreamId, ServerError> {
        let mut state = self.inner.lock();
        if !state.connected {
            return Err(ServerError::NoContext);
        }
        if state.options.reject_create.contains(name) {
            return Err(ServerError::Failed {
                code: -12,
                message: "out of memory".into(),
            });
        }
        let id = StreamId(state.next_id());
        state.streams.insert(
            id,
            SimStream {
                name: name.to_string(),
                props: props.clone(),
                state: StreamState::Unconnected,
                listener: None,
                params: None,
                volume: 1.0,
                mute: false,
                last_queued: None,
            },
        );
        state.calls.push(format!("create_stream {name}"));
        Ok(id)
    }

    fn add_stream_listener(&self, stream: StreamId, tag: SlotTag) -> Result<ListenerId, ServerError> {
        let mut state = self.inner.lock();
        let id = ListenerId(state.next_id());
        let entry = state
            .streams
            .get_mut(&stream)
            .ok_or(ServerError::UnknownStream(stream))?;
        entry.listener = Some((id, tag));
        let name = entry.name.clone();
        state.calls.push(format!("add_listener {name}"));
        Ok(id)
    }

    fn connect_stream(
        &self,
        stream: StreamId,
        _direction: PortDirection,
        _flags: StreamFlags,
        params: &FormatParams,
    ) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        let entry = state
            .streams
            .get_mut(&stream)
            .ok_or(ServerError::UnknownStream(stream))?;
        entry.params = Some(*params);
        let name = entry.name.clone();
        let (volume, mute) = (entry.volume, entry.mute);
        state.calls.push(format!("connect_stream {name}"));

        state.transition(stream, StreamState::Connecting, None);
        if state.options.stall_streams.contains(&name) {
            return Ok(());
        }
        if state.options.fail_streams.contains(&name) {
            state.transition(stream, StreamState::Error, Some("no target node".into()));
            return Ok(());
        }
        state.emit_for(stream, |tag| ServerEvent::ParamChanged {
            tag,
            param: ParamKind::Format,
        });
        state.emit_for(stream, |tag| ServerEvent::ControlInfo {
            tag,
            control: Control::Volume,
            values: vec![volume],
        });
        state.emit_for(stream, |tag| ServerEvent::ControlInfo {
            tag,
            control: Control::Mute,
            values: vec![if mute { 1.0 } else { 0.0 }],
        });
        let ready = state.options.ready_state;
        state.transition(stream, ready, None);
        Ok(())
    }

    fn disconnect_stream(&self, stream: StreamId) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        let name = state
            .streams
            .get(&stream)
            .map(|s| s.name.clone())
            .ok_or(ServerError::UnknownStream(stream))?;
        state.calls.push(format!("disconnect_stream {name}"));
        if !state.options.linger_on_disconnect {
            state.transition(stream, StreamState::Unconnected, None);
        }
        Ok(())
    }

    fn destroy_stream(&self, stream: StreamId) {
        let mut state = self.inner.lock();
        state.emit_for(stream, |tag| ServerEvent::Destroyed { tag });
        if let Some(entry) = state.streams.remove(&stream) {
            state.calls.push(format!("destroy_stream {}", entry.name));
        }
    }

    fn stream_state(&self, stream: StreamId) -> (StreamState, Option<String>) {
        let state = self.inner.lock();
        match state.streams.get(&stream) {
            Some(s) => (s.state, None),
            None => (StreamState::Unconnected, None),
        }
    }

    fn set_control(&self, stream: StreamId, control: Control, values: &[f32]) -> Result<(), ServerError> {
        let mut state = self.inner.lock();
        if state.options.reject_controls {
            return Err(ServerError::Failed {
                code: -22,
                message: "invalid argument".into(),
            });
        }
        let value = *values.first().ok_or(ServerError::Failed {
            code: -22,
            message: "empty control value".into(),
        })?;
        let entry = state
            .streams
            .get_mut(&stream)
            .ok_or(ServerError::UnknownStream(stream))?;
        match control {
            Control::Volume => entry.volume = value,
            Control::Mute => entry.mute = value >= 0.5,
        }
        let name = entry.name.clone();
        state.calls.push(format!("set_control {name} {control:?}={value}"));
        if state.options.confirm_controls {
            let values = values.to_vec();
            state.emit_for(stream, |tag| ServerEvent::ControlInfo {
                tag,
                control,
                values,
            });
        }
        Ok(())
    }

    fn dequeue_buffer(&self, stream: StreamId) -> Option<Buffer> {
        let state = self.inner.lock();
        let entry = state.streams.get(&stream)?;
        if !entry.state.is_ready() {
            return None;
        }
        let params = entry.params?;
        let mut buffer = Buffer::new(params.frames_per_buffer as usize, params.channels);
        // stale contents, so a callback that forgets to write is visible
        buffer.data.iter_mut().for_each(|s| *s = 1.0);
        Some(buffer)
    }

    fn queue_buffer(&self, stream: StreamId, buffer: Buffer) {
        let mut state = self.inner.lock();
        if let Some(entry) = state.streams.get_mut(&stream) {
            entry.last_queued = Some(buffer);
        }
    }
}

impl Drop for SimulatedServer {
    fn drop(&mut self) {
        let state = self.inner.get_mut();
        state.delivery = None;
        if let Some(handle) = state.delivery_thread.take() {
            let _ = handle.join();
        }
    }
}
