use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::driver::{
    BlendInfo, Context, DrawParams, FragmentProgram, GpuDriver, GuestProgram, RenderTarget,
    RenderTargetParams, VertexProgram, Viewport,
};
use super::{Backend, RenderError};

/// Counters exposed by [`NullDriver`].
#[derive(Debug, Default)]
pub struct NullStats {
    pub contexts: AtomicU64,
    pub render_targets: AtomicU64,
    pub programs: AtomicU64,
    pub draws: AtomicU64,
    pub vertices: AtomicU64,
    pub viewports: AtomicU64,
}

impl NullStats {
    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::Relaxed)
    }
}

struct NullContext;

impl Context for NullContext {}

struct NullSurface {
    width: u32,
    height: u32,
}

impl RenderTarget for NullSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

struct NullProgram;

impl FragmentProgram for NullProgram {}

impl VertexProgram for NullProgram {}

/// Driver that accepts every operation and renders nothing.
///
/// Used for headless runs; it impersonates whichever backend it was built
/// for.
#[derive(Debug)]
pub struct NullDriver {
    backend: Backend,
    stats: Arc<NullStats>,
}

impl NullDriver {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            stats: Arc::new(NullStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<NullStats> {
        Arc::clone(&self.stats)
    }
}

impl GpuDriver for NullDriver {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn create_context(&mut self) -> Result<Box<dyn Context>, RenderError> {
        self.stats.contexts.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(NullContext))
    }

    fn create_render_target(
        &mut self,
        params: &RenderTargetParams,
    ) -> Result<Box<dyn RenderTarget>, RenderError> {
        if params.width == 0 || params.height == 0 {
            return Err(RenderError::Driver(format!(
                "invalid render target size {}x{}",
                params.width, params.height
            )));
        }
        self.stats.render_targets.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(NullSurface {
            width: params.width,
            height: params.height,
        }))
    }

    fn create_fragment_program(
        &mut self,
        _program: &GuestProgram,
        _blend: Option<&BlendInfo>,
    ) -> Result<Box<dyn FragmentProgram>, RenderError> {
        self.stats.programs.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(NullProgram))
    }

    fn create_vertex_program(
        &mut self,
        _program: &GuestProgram,
    ) -> Result<Box<dyn VertexProgram>, RenderError> {
        self.stats.programs.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(NullProgram))
    }

    fn draw(
        &mut self,
        _context: &mut dyn Context,
        _target: &mut dyn RenderTarget,
        params: &DrawParams,
    ) -> Result<(), RenderError> {
        self.stats.draws.fetch_add(1, Ordering::Relaxed);
        let vertices = u64::from(params.vertex_count) * u64::from(params.instance_count.max(1));
        self.stats.vertices.fetch_add(vertices, Ordering::Relaxed);
        Ok(())
    }

    fn set_viewport(
        &mut self,
        _context: &mut dyn Context,
        viewport: &Viewport,
    ) -> Result<(), RenderError> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(RenderError::Driver(format!(
                "empty viewport {}x{}",
                viewport.width, viewport.height
            )));
        }
        self.stats.viewports.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
