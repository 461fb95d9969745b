//! Transport seam.
//!
//! A [`Connector`] opens one transport and hands back a [`Link`]: a pair of
//! packet channels plus the tasks pumping them. Protocol logic stays in the
//! Sans-IO client; a link only moves packets.

use std::future::Future;

use dealroom_proto::Packet;
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Established stream failed.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Handle to an open transport.
///
/// Dropping the server side of `from_server` (a `recv` returning `None`)
/// means the transport closed.
#[derive(Debug)]
pub struct Link {
    /// Packets to the server.
    pub to_server: mpsc::Sender<Packet>,
    /// Packets from the server, already decoded.
    pub from_server: mpsc::Receiver<Packet>,
    tasks: Vec<AbortHandle>,
}

impl Link {
    /// Link over the given channels.
    pub fn new(to_server: mpsc::Sender<Packet>, from_server: mpsc::Receiver<Packet>) -> Self {
        Self { to_server, from_server, tasks: Vec::new() }
    }

    /// Attach a task aborted by [`Link::close`].
    #[must_use]
    pub fn with_task(mut self, task: AbortHandle) -> Self {
        self.tasks.push(task);
        self
    }

    /// Close the link.
    ///
    /// Dropping `to_server` lets a writer flush what is already queued and
    /// exit; attached tasks are aborted immediately.
    pub fn close(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens transports to the real-time endpoint.
///
/// The credential travels in the CONNECT frame, never in the connect call.
pub trait Connector: Clone + Send + Sync + 'static {
    /// Open a new transport.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connection` if the endpoint is unreachable.
    fn connect(&self) -> impl Future<Output = Result<Link, TransportError>> + Send;
}
