//! Audio server capability set
//!
//! Everything the controller needs from the host audio server is expressed by
//! the [`AudioServer`] trait. Implementations deliver every asynchronous
//! notification as a [`ServerEvent`] on the [`EventSender`] handed to
//! [`AudioServer::create_context`]; stream notifications carry the
//! [`SlotTag`] they were registered with so the dispatcher can route them
//! without comparing handles.

pub mod sim;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ServerError;

pub use sim::{SimOptions, SimulatedServer};

/// Channel on which a server delivers notifications
pub type EventSender = crossbeam_channel::Sender<ServerEvent>;

/// Error code a server reports when the connection to the daemon is lost
pub const ERR_CONNECTION_LOST: i32 = -32;

/// Well-known property keys
pub mod keys {
    pub const CONFIG_NAME: &str = "config.name";
    pub const APP_NAME: &str = "application.name";
    pub const APP_PROCESS_BINARY: &str = "application.process.binary";
    pub const REMOTE_NAME: &str = "remote.name";
    pub const MEDIA_CLASS: &str = "media.class";
    pub const NODE_NAME: &str = "node.name";
    pub const NODE_DESCRIPTION: &str = "node.description";
    pub const NODE_VIRTUAL: &str = "node.virtual";
    pub const NODE_NETWORK: &str = "node.network";
    pub const NODE_LATENCY: &str = "node.latency";
}

/// Keyed string properties attached to a context or stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Server-side stream handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Registered listener handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

/// Routing tag attached to every stream notification.
///
/// The generation changes every time a slot is reused, so a late event for a
/// previous occupant never lands on the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotTag {
    pub index: usize,
    pub generation: u64,
}

/// Stream state as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Error,
    Unconnected,
    Connecting,
    Paused,
    Streaming,
}

impl StreamState {
    /// Paused and streaming both mean the endpoint is usable
    pub fn is_ready(self) -> bool {
        matches!(self, StreamState::Paused | StreamState::Streaming)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Error => "error",
            StreamState::Unconnected => "unconnected",
            StreamState::Connecting => "connecting",
            StreamState::Paused => "paused",
            StreamState::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Direction of a device from the server's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device produces audio (a virtual microphone)
    Source,
    /// Device consumes audio (a virtual speaker)
    Sink,
}

impl Direction {
    pub fn from_is_source(is_source: bool) -> Self {
        if is_source {
            Direction::Source
        } else {
            Direction::Sink
        }
    }

    /// Media class advertised for a node in this direction
    pub fn media_class(self) -> &'static str {
        match self {
            Direction::Source => "Audio/Source",
            Direction::Sink => "Audio/Sink",
        }
    }

    /// Port direction the stream connects with: a source writes, a sink reads
    pub fn port_direction(self) -> PortDirection {
        match self {
            Direction::Source => PortDirection::Output,
            Direction::Sink => PortDirection::Input,
        }
    }
}

/// Port direction passed to [`AudioServer::connect_stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Stream connection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags {
    /// Let the session manager route to a default endpoint
    pub autoconnect: bool,
    /// Map buffer memory for the processing callback
    pub map_buffers: bool,
    /// Run the processing callback on the real-time thread
    pub rt_process: bool,
}

impl StreamFlags {
    /// Flags used for every virtual device
    pub const VIRTUAL_DEVICE: StreamFlags = StreamFlags {
        autoconnect: true,
        map_buffers: true,
        rt_process: true,
    };
}

/// Sample format of the negotiated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::F32 => 4,
        }
    }
}

/// Format descriptor and buffer geometry negotiated on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatParams {
    pub format: SampleFormat,
    pub channels: u16,
    pub rate: u32,
    pub buffers: u32,
    pub frames_per_buffer: u32,
}

impl FormatParams {
    /// Bytes per interleaved frame
    pub fn stride(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Bytes per buffer
    pub fn buffer_size(&self) -> usize {
        self.stride() * self.frames_per_buffer as usize
    }

    /// Latency hint in the `frames/rate` notation servers expect
    pub fn latency_hint(&self) -> String {
        format!("{}/{}", self.frames_per_buffer, self.rate)
    }
}

/// Controls exposed on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Volume,
    Mute,
}

/// Parameter kinds reported by param-changed notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Format,
    Buffers,
    Props,
}

/// A dequeued buffer handed to the processing callback
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    /// Interleaved samples
    pub data: Vec<f32>,
    pub channels: u16,
}

impl Buffer {
    pub fn new(frames: usize, channels: u16) -> Self {
        Self {
            data: vec![0.0; frames * channels as usize],
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }
}

/// Asynchronous notification from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    CoreInfo { id: u32, seq: i32 },
    CoreDone { id: u32, seq: i32 },
    CoreError { id: u32, seq: i32, code: i32, message: String },
    StateChanged {
        tag: SlotTag,
        old: StreamState,
        new: StreamState,
        error: Option<String>,
    },
    ParamChanged { tag: SlotTag, param: ParamKind },
    ControlInfo {
        tag: SlotTag,
        control: Control,
        values: Vec<f32>,
    },
    Process { tag: SlotTag },
    Destroyed { tag: SlotTag },
}

impl ServerEvent {
    /// Routing tag for stream notifications
    pub fn tag(&self) -> Option<SlotTag> {
        match self {
            ServerEvent::StateChanged { tag, .. }
            | ServerEvent::ParamChanged { tag, .. }
            | ServerEvent::ControlInfo { tag, .. }
            | ServerEvent::Process { tag }
            | ServerEvent::Destroyed { tag } => Some(*tag),
            _ => None,
        }
    }
}

/// Capability set required from the host audio server.
///
/// Calls are made from the caller's thread and from the dispatcher thread;
/// implementations must not block on the controller's own state.
pub trait AudioServer: Send + Sync {
    /// Initialize the client subsystem
    fn init(&self);

    /// Deinitialize the client subsystem
    fn deinit(&self);

    /// Create the connection context; notifications go to `events`
    fn create_context(&self, props: &Properties, events: EventSender) -> Result<(), ServerError>;

    fn destroy_context(&self);

    /// Connect the context to the server daemon
    fn connect(&self) -> Result<(), ServerError>;

    fn disconnect(&self);

    /// Register for info/done/error notifications on the connection
    fn add_core_listener(&self) -> Result<ListenerId, ServerError>;

    fn remove_listener(&self, listener: ListenerId);

    /// Request a round trip; answered by [`ServerEvent::CoreDone`] with `seq`
    fn sync(&self, seq: i32) -> Result<(), ServerError>;

    fn create_stream(&self, name: &str, props: &Properties) -> Result<StreamId, ServerError>;

    /// Register for state/param/control/process/destroy notifications on a stream
    fn add_stream_listener(&self, stream: StreamId, tag: SlotTag) -> Result<ListenerId, ServerError>;

    fn connect_stream(
        &self,
        stream: StreamId,
        direction: PortDirection,
        flags: StreamFlags,
        params: &FormatParams,
    ) -> Result<(), ServerError>;

    fn disconnect_stream(&self, stream: StreamId) -> Result<(), ServerError>;

    fn destroy_stream(&self, stream: StreamId);

    /// Current state plus optional error string
    fn stream_state(&self, stream: StreamId) -> (StreamState, Option<String>);

    /// Set a named control to an array of values
    fn set_control(&self, stream: StreamId, control: Control, values: &[f32]) -> Result<(), ServerError>;

    fn dequeue_buffer(&self, stream: StreamId) -> Option<Buffer>;

    fn queue_buffer(&self, stream: StreamId, buffer: Buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_mapping() {
        assert_eq!(Direction::from_is_source(true), Direction::Source);
        assert_eq!(Direction::Source.media_class(), "Audio/Source");
        assert_eq!(Direction::Source.port_direction(), PortDirection::Output);
        assert_eq!(Direction::Sink.media_class(), "Audio/Sink");
        assert_eq!(Direction::Sink.port_direction(), PortDirection::Input);
    }

    #[test]
    fn test_format_geometry() {
        let params = FormatParams {
            format: SampleFormat::F32,
            channels: 2,
            rate: 48000,
            buffers: 8,
            frames_per_buffer: 1024,
        };
        assert_eq!(params.stride(), 8);
        assert_eq!(params.buffer_size(), 8192);
        assert_eq!(params.latency_hint(), "1024/48000");
    }

    #[test]
    fn test_ready_states() {
        assert!(StreamState::Paused.is_ready());
        assert!(StreamState::Streaming.is_ready());
        assert!(!StreamState::Connecting.is_ready());
        assert!(!StreamState::Error.is_ready());
    }

    #[test]
    fn test_properties_builder() {
        let props = Properties::new()
            .with(keys::NODE_NAME, "beacn_link_out")
            .with(keys::NODE_VIRTUAL, "1");
        assert_eq!(props.len(), 2);
        assert_eq!(props.get(keys::NODE_NAME), Some("beacn_link_out"));
        assert_eq!(props.get(keys::MEDIA_CLASS), None);
    }
}
