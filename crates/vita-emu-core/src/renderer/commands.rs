use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel as cb;

use super::RenderError;
use super::driver::{
    BlendInfo, ContextHandle, DrawParams, FragmentProgramHandle, GuestProgram,
    RenderTargetHandle, RenderTargetParams, VertexProgramHandle, Viewport,
};

/// Outcome written to a synchronous command's completion slot.
pub type CommandResult = Result<(), RenderError>;

/// One serialized GPU operation.
#[derive(Debug)]
pub enum CommandKind {
    CreateContext {
        context: ContextHandle,
    },
    CreateRenderTarget {
        target: RenderTargetHandle,
        params: RenderTargetParams,
    },
    DestroyRenderTarget {
        target: RenderTargetHandle,
    },
    CreateFragmentProgram {
        program: FragmentProgramHandle,
        source: GuestProgram,
        blend: Option<BlendInfo>,
    },
    CreateVertexProgram {
        program: VertexProgramHandle,
        source: GuestProgram,
    },
    Draw {
        context: ContextHandle,
        target: RenderTargetHandle,
        params: DrawParams,
    },
    SetViewport {
        context: ContextHandle,
        viewport: Viewport,
    },
    /// Completes once every earlier command has executed and the backend
    /// has drained its own queue.
    Sync,
    /// Stops the consumer loop after everything queued before it.
    Shutdown,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateContext { .. } => "create_context",
            Self::CreateRenderTarget { .. } => "create_render_target",
            Self::DestroyRenderTarget { .. } => "destroy_render_target",
            Self::CreateFragmentProgram { .. } => "create_fragment_program",
            Self::CreateVertexProgram { .. } => "create_vertex_program",
            Self::Draw { .. } => "draw",
            Self::SetViewport { .. } => "set_viewport",
            Self::Sync => "sync",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Executing,
    Completed,
    Discarded,
}

impl CommandState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Queued,
            1 => Self::Executing,
            2 => Self::Completed,
            _ => Self::Discarded,
        }
    }
}

/// Producer-side view of a command's lifecycle.
#[derive(Clone, Debug)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(CommandState::Queued as u8)))
    }

    fn set(&self, state: CommandState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> CommandState {
        CommandState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Single-slot completion channel owned by a synchronous command.
struct Completion {
    tx: cb::Sender<CommandResult>,
    state: StateCell,
}

/// A command as it travels through the queue.
pub struct RenderCommand {
    pub kind: CommandKind,
    completion: Option<Completion>,
}

impl fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCommand")
            .field("kind", &self.kind)
            .field("synchronous", &self.is_synchronous())
            .finish()
    }
}

impl RenderCommand {
    /// Fire-and-forget command. Its result is discarded.
    pub fn post(kind: CommandKind) -> Self {
        Self {
            kind,
            completion: None,
        }
    }

    /// Synchronous command plus the ticket its producer waits on.
    pub fn submit(kind: CommandKind) -> (Self, Ticket) {
        let (tx, rx) = cb::bounded(1);
        let state = StateCell::new();
        let command = Self {
            kind,
            completion: Some(Completion {
                tx,
                state: state.clone(),
            }),
        };
        (command, Ticket { rx, state })
    }

    pub fn is_synchronous(&self) -> bool {
        self.completion.is_some()
    }

    pub(crate) fn mark_executing(&self) {
        if let Some(completion) = &self.completion {
            completion.state.set(CommandState::Executing);
        }
    }

    /// Splits the command so its kind can be executed while the completion
    /// slot waits for the result.
    pub(crate) fn into_parts(self) -> (CommandKind, CompletionSlot) {
        (self.kind, CompletionSlot(self.completion))
    }
}

/// Completion half of a dequeued command. Consumed by [`complete`].
pub struct CompletionSlot(Option<Completion>);

/// Delivers `result` to the producer waiting on `slot`.
///
/// Wakes exactly that producer. Fire-and-forget commands, and producers that
/// dropped their ticket, discard the result.
pub fn complete(slot: CompletionSlot, result: CommandResult) -> CommandState {
    let Some(completion) = slot.0 else {
        return CommandState::Discarded;
    };
    let state = match completion.tx.try_send(result) {
        Ok(()) => CommandState::Completed,
        Err(_) => CommandState::Discarded,
    };
    completion.state.set(state);
    state
}

/// Producer handle for a synchronous command.
#[derive(Debug)]
pub struct Ticket {
    rx: cb::Receiver<CommandResult>,
    state: StateCell,
}

impl Ticket {
    pub fn state(&self) -> CommandState {
        self.state.get()
    }

    /// Blocks until the consumer completes the command.
    ///
    /// There is no timeout. If the consumer drops the command without
    /// completing it the wait ends with [`RenderError::Disconnected`].
    pub fn wait(self) -> CommandResult {
        self.rx.recv().unwrap_or(Err(RenderError::Disconnected))
    }

    /// Non-blocking poll of the completion slot.
    pub fn try_result(&self) -> Option<CommandResult> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_reaches_ticket_once() {
        let (command, ticket) = RenderCommand::submit(CommandKind::Sync);
        assert_eq!(ticket.state(), CommandState::Queued);

        command.mark_executing();
        assert_eq!(ticket.state(), CommandState::Executing);

        let (_, slot) = command.into_parts();
        assert_eq!(complete(slot, Ok(())), CommandState::Completed);
        assert_eq!(ticket.state(), CommandState::Completed);
        assert_eq!(ticket.try_result(), Some(Ok(())));
        assert_eq!(ticket.try_result(), None);
    }

    #[test]
    fn fire_and_forget_result_is_discarded() {
        let command = RenderCommand::post(CommandKind::Sync);
        assert!(!command.is_synchronous());
        let (_, slot) = command.into_parts();
        assert_eq!(complete(slot, Ok(())), CommandState::Discarded);
    }

    #[test]
    fn dropped_ticket_discards_result() {
        let (command, ticket) = RenderCommand::submit(CommandKind::Sync);
        drop(ticket);
        let (_, slot) = command.into_parts();
        assert_eq!(complete(slot, Ok(())), CommandState::Discarded);
    }

    #[test]
    fn dropped_command_unblocks_waiter() {
        let (command, ticket) = RenderCommand::submit(CommandKind::Sync);
        drop(command);
        assert_eq!(ticket.wait(), Err(RenderError::Disconnected));
    }
}
