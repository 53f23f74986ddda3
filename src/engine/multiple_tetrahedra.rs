//! Two tetrahedral volumes in one engine, each with its own transfer
//! function and pre-integration table. Both are drawn in every pass under one
//! repetition count, so they share the random offset and time step.

use super::tetrahedra::TetrahedraEngine;
use super::{EngineType, FrameContext, RenderEngine, SharedResources};
use crate::error::RenderError;
use crate::gpu::{Device, RenderTarget};
use crate::object::RenderObject;
use crate::shading::Shading;
use crate::transfer_function::TransferFunction;
use crate::{Float, Result};
use std::sync::Arc;

#[derive(Default)]
pub struct MultipleTetrahedraEngine {
    volumes: [TetrahedraEngine; 2],
    repetition_count: usize,
}

impl MultipleTetrahedraEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(first: Arc<RenderObject>, second: Arc<RenderObject>) -> Result<Self> {
        let mut engine = Self::new();
        engine.attach_objects(first, second)?;
        Ok(engine)
    }

    /// Binds both volumes. When either is rejected neither binding changes.
    pub fn attach_objects(&mut self, first: Arc<RenderObject>, second: Arc<RenderObject>) -> Result<()> {
        TetrahedraEngine::new().attach_object(second.clone())?;
        self.volumes[0].attach_object(first)?;
        self.volumes[1].attach_object(second)
    }

    /// Engine drawing volume `index` (0 or 1).
    pub fn volume(&self, index: usize) -> Option<&TetrahedraEngine> {
        self.volumes.get(index)
    }

    pub fn volume_mut(&mut self, index: usize) -> Option<&mut TetrahedraEngine> {
        self.volumes.get_mut(index)
    }

    pub fn set_transfer_functions(&mut self, first: &TransferFunction, second: &TransferFunction) {
        self.volumes[0].set_transfer_function(first);
        self.volumes[1].set_transfer_function(second);
    }

    pub fn set_edge_size(&mut self, edge_size: Float) {
        self.volumes.iter_mut().for_each(|v| v.set_edge_size(edge_size));
    }

    pub fn set_shading(&mut self, shading: Shading) {
        self.volumes.iter_mut().for_each(|v| v.set_shading(shading));
    }

    /// Selects the time step of both volumes; fails without changing either
    /// when one of them has fewer steps.
    pub fn set_step(&mut self, step: usize) -> Result<()> {
        for volume in self.volumes.iter() {
            let steps = volume.volume().map(|v| v.time_steps()).unwrap_or(1);
            if step >= steps {
                return Err(RenderError::StepOutOfRange { step, steps });
            }
        }
        self.volumes.iter_mut().try_for_each(|v| v.set_step(step))
    }

    pub fn step(&self) -> usize {
        self.volumes[0].step()
    }
}

impl RenderEngine for MultipleTetrahedraEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Tetrahedra
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        self.volumes[0].object()
    }

    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()> {
        self.volumes.iter_mut().try_for_each(|v| v.setup(device, shared))
    }

    fn build_buffers(&mut self, device: &mut Device) -> Result<()> {
        for volume in self.volumes.iter_mut().filter(|v| v.needs_rebuild()) {
            volume.build_buffers(device)?;
        }
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.volumes.iter().any(|v| v.needs_rebuild())
    }

    fn clear_ensemble(&mut self) {
        self.volumes.iter_mut().for_each(|v| v.clear_ensemble());
        self.repetition_count = 0;
    }

    fn repetition_count(&self) -> usize {
        self.repetition_count
    }

    fn set_render_size(&mut self, width: usize, height: usize) {
        self.volumes.iter_mut().for_each(|v| v.set_render_size(width, height));
    }

    fn draw(&mut self, ctx: &FrameContext, target: &mut RenderTarget<'_>) -> Result<()> {
        for volume in self.volumes.iter_mut() {
            volume.draw(ctx, target)?;
        }
        self.repetition_count += 1;
        Ok(())
    }

    fn release(&mut self, device: &mut Device) {
        self.volumes.iter_mut().for_each(|v| v.release(device));
    }
}
