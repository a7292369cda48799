//! Deferred GPU command pipeline.
//!
//! The guest-facing driver emulation pushes [`CommandKind`]s through a
//! bounded queue; a single render thread owns the [`Renderer`], pops commands
//! in order and executes them on the active backend's [`GpuDriver`].

pub mod commands;
pub mod driver;
pub mod null;
pub mod pipeline;

use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use thiserror::Error;

pub use commands::{CommandKind, CommandResult, CommandState, RenderCommand, Ticket, complete};
pub use driver::GpuDriver;

use driver::{BlendInfo, FragmentProgramHandle, GuestProgram, VertexProgramHandle};
pub use pipeline::{CommandReceiver, CommandSender, DEFAULT_MAX_PENDING, command_queue};

#[cfg(feature = "render-trace")]
macro_rules! render_trace {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}
#[cfg(not(feature = "render-trace"))]
macro_rules! render_trace {
    ($($arg:tt)*) => {};
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    OpenGl,
    Vulkan,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::OpenGl => "OpenGL",
            Backend::Vulkan => "Vulkan",
        })
    }
}

impl FromStr for Backend {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opengl" | "gl" => Ok(Backend::OpenGl),
            "vulkan" | "vk" => Ok(Backend::Vulkan),
            _ => Err(RenderError::UnknownBackend(s.to_owned())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("{operation} is not implemented for the {backend} backend")]
    Missing {
        backend: Backend,
        operation: &'static str,
    },
    #[error("unknown renderer backend {0:?}")]
    UnknownBackend(String),
    #[error("driver implements {driver} but {requested} was requested")]
    BackendMismatch { requested: Backend, driver: Backend },
    #[error("{0} handle is empty")]
    EmptyHandle(&'static str),
    #[error("command queue is full")]
    QueueFull,
    #[error("render thread is gone")]
    Disconnected,
    #[error("backend failure: {0}")]
    Driver(String),
}

impl RenderError {
    pub fn missing(backend: Backend, operation: &'static str) -> Self {
        Self::Missing { backend, operation }
    }
}

/// What [`Renderer::pop_and_execute`] did with the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Executed,
    Shutdown,
    /// All producers are gone and the queue is drained.
    Disconnected,
    /// Only returned by [`Renderer::try_pop_and_execute`].
    Idle,
}

/// Consumer half of the pipeline, owned by the render thread.
pub struct Renderer {
    current_backend: Backend,
    driver: Box<dyn GpuDriver>,
    queue: CommandReceiver,
    executed: u64,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("current_backend", &self.current_backend)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

/// Builds the renderer for `backend` with a queue of `max_pending` slots.
///
/// Returns the consumer, to be moved to the render thread, and the producer
/// handle for the guest driver emulation.
pub fn init(
    backend: Backend,
    driver: Box<dyn GpuDriver>,
    max_pending: usize,
) -> Result<(Renderer, CommandSender), RenderError> {
    check_backend(backend, &*driver)?;
    let (tx, rx) = command_queue(max_pending);
    info!(
        "Renderer: {backend} backend, {} pending commands max",
        tx.max_pending()
    );
    let renderer = Renderer {
        current_backend: backend,
        driver,
        queue: rx,
        executed: 0,
    };
    Ok((renderer, tx))
}

fn check_backend(backend: Backend, driver: &dyn GpuDriver) -> Result<(), RenderError> {
    if driver.backend() == backend {
        Ok(())
    } else {
        Err(RenderError::BackendMismatch {
            requested: backend,
            driver: driver.backend(),
        })
    }
}

/// Compiles a fragment program on the calling thread, bypassing the queue.
///
/// Dispatches on `backend` exactly like the queued command; a driver without
/// program support fails with [`RenderError::Missing`].
pub fn create_fragment_program(
    backend: Backend,
    driver: &mut dyn GpuDriver,
    program: &FragmentProgramHandle,
    source: &GuestProgram,
    blend: Option<&BlendInfo>,
) -> CommandResult {
    check_backend(backend, driver)?;
    program.set(driver.create_fragment_program(source, blend)?);
    Ok(())
}

/// Vertex program counterpart of [`create_fragment_program`].
pub fn create_vertex_program(
    backend: Backend,
    driver: &mut dyn GpuDriver,
    program: &VertexProgramHandle,
    source: &GuestProgram,
) -> CommandResult {
    check_backend(backend, driver)?;
    program.set(driver.create_vertex_program(source)?);
    Ok(())
}

impl Renderer {
    pub fn current_backend(&self) -> Backend {
        self.current_backend
    }

    /// Number of commands executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Blocks for the next command, executes it and completes it.
    pub fn pop_and_execute(&mut self) -> Step {
        match self.queue.pop() {
            Some(command) => self.execute(command),
            None => Step::Disconnected,
        }
    }

    /// Like [`Renderer::pop_and_execute`] but returns [`Step::Idle`] instead
    /// of blocking on an empty queue.
    pub fn try_pop_and_execute(&mut self) -> Step {
        match self.queue.try_pop() {
            Some(command) => self.execute(command),
            None => Step::Idle,
        }
    }

    /// Runs until a shutdown command arrives or every producer is gone.
    pub fn run(&mut self) {
        loop {
            match self.pop_and_execute() {
                Step::Executed | Step::Idle => {}
                Step::Shutdown | Step::Disconnected => break,
            }
        }
        info!("Renderer: stopped after {} commands", self.executed);
    }

    fn execute(&mut self, command: RenderCommand) -> Step {
        command.mark_executing();
        let (kind, slot) = command.into_parts();
        render_trace!("render: {} on {}", kind.name(), self.current_backend);

        let shutdown = matches!(kind, CommandKind::Shutdown);
        let name = kind.name();
        let result = self.dispatch(kind);
        if let Err(e) = &result {
            match e {
                RenderError::Missing { .. } => warn!("Renderer: {e}"),
                _ => debug!("Renderer: {name} failed: {e}"),
            }
        }
        complete(slot, result);
        self.executed += 1;

        if shutdown { Step::Shutdown } else { Step::Executed }
    }

    fn dispatch(&mut self, kind: CommandKind) -> CommandResult {
        let backend = self.current_backend;
        let driver = self.driver.as_mut();
        match kind {
            CommandKind::CreateContext { context } => {
                context.set(driver.create_context()?);
                Ok(())
            }
            CommandKind::CreateRenderTarget { target, params } => {
                target.set(driver.create_render_target(&params)?);
                Ok(())
            }
            CommandKind::DestroyRenderTarget { target } => {
                if !target.reset() {
                    debug!("Renderer: destroy on empty render target handle");
                }
                Ok(())
            }
            CommandKind::CreateFragmentProgram {
                program,
                source,
                blend,
            } => create_fragment_program(backend, driver, &program, &source, blend.as_ref()),
            CommandKind::CreateVertexProgram { program, source } => {
                create_vertex_program(backend, driver, &program, &source)
            }
            CommandKind::Draw {
                context,
                target,
                params,
            } => context
                .with(|ctx| {
                    target
                        .with(|rt| driver.draw(ctx, rt, &params))
                        .unwrap_or(Err(RenderError::EmptyHandle("render target")))
                })
                .unwrap_or(Err(RenderError::EmptyHandle("context"))),
            CommandKind::SetViewport { context, viewport } => context
                .with(|ctx| driver.set_viewport(ctx, &viewport))
                .unwrap_or(Err(RenderError::EmptyHandle("context"))),
            CommandKind::Sync | CommandKind::Shutdown => driver.finish(),
        }
    }
}
