use crossbeam_channel as cb;

use super::RenderError;
use super::commands::{CommandKind, RenderCommand, Ticket};

/// Default bound on commands waiting for the render thread.
pub const DEFAULT_MAX_PENDING: usize = 30;

/// Creates a bounded FIFO command queue.
///
/// `max_pending` is clamped to at least one slot.
pub fn command_queue(max_pending: usize) -> (CommandSender, CommandReceiver) {
    let max_pending = max_pending.max(1);
    let (tx, rx) = cb::bounded(max_pending);
    (
        CommandSender { tx, max_pending },
        CommandReceiver { rx },
    )
}

/// Producer side of the queue. Cloneable; pushes from several producers
/// serialize on the channel.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: cb::Sender<RenderCommand>,
    max_pending: usize,
}

impl CommandSender {
    /// Enqueues `command`, blocking while the queue is full.
    pub fn push(&self, command: RenderCommand) -> Result<(), RenderError> {
        self.tx.send(command).map_err(|_| RenderError::Disconnected)
    }

    /// Enqueues without blocking. A full queue hands the command back.
    pub fn try_push(&self, command: RenderCommand) -> Result<(), (RenderCommand, RenderError)> {
        self.tx.try_send(command).map_err(|e| match e {
            cb::TrySendError::Full(command) => (command, RenderError::QueueFull),
            cb::TrySendError::Disconnected(command) => (command, RenderError::Disconnected),
        })
    }

    /// Fire-and-forget submission.
    pub fn post(&self, kind: CommandKind) -> Result<(), RenderError> {
        self.push(RenderCommand::post(kind))
    }

    /// Synchronous submission; wait on the returned ticket for the result.
    pub fn submit(&self, kind: CommandKind) -> Result<Ticket, RenderError> {
        let (command, ticket) = RenderCommand::submit(kind);
        self.push(command)?;
        Ok(ticket)
    }

    /// Submits `kind` and blocks until it has executed.
    pub fn execute(&self, kind: CommandKind) -> Result<(), RenderError> {
        self.submit(kind)?.wait()
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

/// Consumer side of the queue, owned by the render thread.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: cb::Receiver<RenderCommand>,
}

impl CommandReceiver {
    /// Blocks for the next command. `None` once every sender is gone and the
    /// queue is drained.
    pub fn pop(&self) -> Option<RenderCommand> {
        self.rx.recv().ok()
    }

    pub fn try_pop(&self) -> Option<RenderCommand> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
