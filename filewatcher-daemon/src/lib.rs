//! Filewatcher daemon runtime: directory poller + file dispatcher + control socket.

mod error;
pub mod gate;
pub mod handler;
pub mod paths;
pub mod poller;
pub mod protocol;
mod runtime;
pub mod transport;

pub use error::{DaemonError, TransportError};
pub use gate::{FileOutcome, Readiness};
pub use poller::TickSummary;
pub use protocol::{ControlClient, DaemonRequest, DaemonResponse, StatusReport, StopAck};
pub use runtime::{run, start_blocking, AgentOptions, Identity};
pub use transport::{Message, MemoryTransport, OutboxTransport, SentEvent, Transport};
