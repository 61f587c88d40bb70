//! Command side of a running session.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chatter_proto::transport::Connector;

use super::{Session, SessionConfig, SessionEvent};

/// Capacity of the command channel into the session loop.
const COMMAND_BUFFER: usize = 32;

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Join `host:port` as `screen_name`.
    Connect {
        /// Requested screen name.
        screen_name: String,
        /// Server host name or address.
        host: String,
        /// Server port.
        port: u16,
    },
    /// Leave the room.
    Disconnect,
    /// Send a chat line.
    SendChat {
        /// Message text.
        body: String,
    },
    /// Leave if joined, then end the session loop.
    Stop,
}

/// The session loop has already ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session is no longer running")]
pub struct SessionClosed;

/// Why [`SessionHandle::try_submit`] did not queue a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The command queue is full; the command was dropped.
    #[error("session is busy, command dropped")]
    Busy,
    /// The session loop has ended.
    #[error(transparent)]
    Closed(#[from] SessionClosed),
}

/// Cloneable handle for driving a session.
///
/// Dropping every handle has the same effect as [`SessionHandle::stop`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Starts joining `host:port` under `screen_name`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session loop has ended.
    pub async fn connect(
        &self,
        screen_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), SessionClosed> {
        self.submit(SessionCommand::Connect {
            screen_name: screen_name.into(),
            host: host.into(),
            port,
        })
        .await
    }

    /// Starts leaving the room.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session loop has ended.
    pub async fn disconnect(&self) -> Result<(), SessionClosed> {
        self.submit(SessionCommand::Disconnect).await
    }

    /// Sends a chat line. The line is shown once the server relays it back.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session loop has ended.
    pub async fn send_chat(&self, body: impl Into<String>) -> Result<(), SessionClosed> {
        self.submit(SessionCommand::SendChat { body: body.into() })
            .await
    }

    /// Asks the session to leave (if joined) and finish.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session loop has ended.
    pub async fn stop(&self) -> Result<(), SessionClosed> {
        self.submit(SessionCommand::Stop).await
    }

    /// Queues a command without waiting for room in the queue.
    ///
    /// For callers that must keep servicing the event stream, such as a
    /// terminal loop.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Busy`] if the queue is full and
    /// [`SubmitError::Closed`] if the session loop has ended.
    pub fn try_submit(&self, command: SessionCommand) -> Result<(), SubmitError> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(command) => {
                tracing::warn!(?command, "command queue full, dropping command");
                SubmitError::Busy
            }
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed(SessionClosed),
        })
    }

    async fn submit(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.commands.send(command).await.map_err(|_| SessionClosed)
    }
}

/// Spawns a session loop on the current runtime.
///
/// Returns the command handle, the event stream, and the task, which
/// completes once the session stops.
pub fn spawn_session<C>(
    connector: C,
    config: SessionConfig,
) -> (
    SessionHandle,
    mpsc::Receiver<SessionEvent>,
    JoinHandle<()>,
)
where
    C: Connector + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));

    let session = Session::new(connector, config, event_tx);
    let task = tokio::spawn(session.run(cmd_rx));

    (SessionHandle { commands: cmd_tx }, event_rx, task)
}
