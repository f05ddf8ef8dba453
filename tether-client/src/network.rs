//! Network reachability input
//!
//! The platform knows when the device goes offline long before a socket
//! notices. [`NetworkSignal`] lets that knowledge reach the state machine:
//! `down()` while connected tears the connection down at once, `up()` while
//! waiting cancels the pending backoff and dials immediately.
//!
//! The signal only holds a weak reference to the machine, so a platform
//! listener that outlives the client does not keep it running.

use crate::machine::Command;
use futures::{Stream, StreamExt};
use std::fmt;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;

/// Whether the device currently has a usable network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reachability {
    Up,
    Down,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Up => f.write_str("up"),
            Reachability::Down => f.write_str("down"),
        }
    }
}

/// Feeds reachability changes into one client
#[derive(Clone)]
pub struct NetworkSignal {
    commands: WeakUnboundedSender<Command>,
}

impl NetworkSignal {
    pub(crate) fn new(commands: WeakUnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Report the current reachability
    ///
    /// Returns false once the client is gone. Repeating the current value is
    /// harmless; the machine only reacts to changes.
    pub fn report(&self, reachability: Reachability) -> bool {
        match self.commands.upgrade() {
            Some(sender) => sender.send(Command::Network(reachability)).is_ok(),
            None => false,
        }
    }

    /// Shorthand for `report(Reachability::Up)`
    pub fn up(&self) -> bool {
        self.report(Reachability::Up)
    }

    /// Shorthand for `report(Reachability::Down)`
    pub fn down(&self) -> bool {
        self.report(Reachability::Down)
    }

    /// Forward every item of a platform reachability stream
    ///
    /// The task ends when the stream ends or the client goes away. Must be
    /// called from within a Tokio runtime.
    pub fn attach<S>(&self, stream: S) -> JoinHandle<()>
    where
        S: Stream<Item = Reachability> + Send + 'static,
    {
        let signal = self.clone();
        tokio::spawn(async move {
            futures::pin_mut!(stream);
            while let Some(reachability) = stream.next().await {
                if !signal.report(reachability) {
                    tracing::debug!("Client dropped, detaching network stream");
                    break;
                }
            }
        })
    }
}

impl fmt::Debug for NetworkSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkSignal").finish_non_exhaustive()
    }
}
