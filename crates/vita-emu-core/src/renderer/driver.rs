//! Seam between the command consumer and a concrete GPU backend.
//!
//! A driver implements the operations its backend supports. Every method has
//! a default body reporting [`RenderError::Missing`], so an unimplemented
//! (command, backend) pair degrades to a failed command instead of a crash.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Backend, RenderError};

/// Backend rendering context (GL context, Vulkan device queue, ...).
pub trait Context: Send {}

/// Backend colour/depth surface set a scene is rendered into.
pub trait RenderTarget: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

pub trait FragmentProgram: Send {}

pub trait VertexProgram: Send {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MultisampleMode {
    #[default]
    None,
    X2,
    X4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetParams {
    pub width: u32,
    pub height: u32,
    pub scenes_per_frame: u32,
    pub multisample: MultisampleMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Primitive {
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
    Lines,
    Points,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawParams {
    pub primitive: Primitive,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// Window rectangle in render target pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlendInfo {
    pub color_mask: u8,
    pub color_func: u8,
    pub alpha_func: u8,
}

/// Guest shader binary as uploaded by the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestProgram {
    pub bytecode: Arc<[u8]>,
}

/// Shared owning slot for a backend object.
///
/// The producer allocates an empty handle, the consumer fills it when the
/// create command runs and empties it on destroy. Resetting an empty handle
/// is a no-op.
pub struct Handle<T: ?Sized> {
    slot: Arc<Mutex<Option<Box<T>>>>,
}

impl<T: ?Sized> Handle<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<T>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Stores `value`, dropping whatever the handle owned before.
    pub fn set(&self, value: Box<T>) {
        *self.lock() = Some(value);
    }

    /// Drops the owned object. Returns whether there was one.
    pub fn reset(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Runs `f` on the owned object, if any.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.lock().as_deref_mut().map(f)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: ?Sized> Default for Handle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("empty", &self.is_empty())
            .finish()
    }
}

pub type ContextHandle = Handle<dyn Context>;
pub type RenderTargetHandle = Handle<dyn RenderTarget>;
pub type FragmentProgramHandle = Handle<dyn FragmentProgram>;
pub type VertexProgramHandle = Handle<dyn VertexProgram>;

/// Operations a GPU backend executes on the render thread.
pub trait GpuDriver: Send {
    fn backend(&self) -> Backend;

    fn create_context(&mut self) -> Result<Box<dyn Context>, RenderError> {
        Err(RenderError::missing(self.backend(), "create_context"))
    }

    fn create_render_target(
        &mut self,
        _params: &RenderTargetParams,
    ) -> Result<Box<dyn RenderTarget>, RenderError> {
        Err(RenderError::missing(self.backend(), "create_render_target"))
    }

    fn create_fragment_program(
        &mut self,
        _program: &GuestProgram,
        _blend: Option<&BlendInfo>,
    ) -> Result<Box<dyn FragmentProgram>, RenderError> {
        Err(RenderError::missing(self.backend(), "create_fragment_program"))
    }

    fn create_vertex_program(
        &mut self,
        _program: &GuestProgram,
    ) -> Result<Box<dyn VertexProgram>, RenderError> {
        Err(RenderError::missing(self.backend(), "create_vertex_program"))
    }

    fn draw(
        &mut self,
        _context: &mut dyn Context,
        _target: &mut dyn RenderTarget,
        _params: &DrawParams,
    ) -> Result<(), RenderError> {
        Err(RenderError::missing(self.backend(), "draw"))
    }

    fn set_viewport(
        &mut self,
        _context: &mut dyn Context,
        _viewport: &Viewport,
    ) -> Result<(), RenderError> {
        Err(RenderError::missing(self.backend(), "set_viewport"))
    }

    /// Waits for all submitted GPU work. Backends without deferred work
    /// have nothing to do.
    fn finish(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}
