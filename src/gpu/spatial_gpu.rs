//! GPU spatial hashing infrastructure
//!
//! Handles cell id computation, the bitonic key/value sort, the cell table
//! and the coherent rearrange.

use wgpu::util::DeviceExt;

use super::{bind_buffers, create_kernel_pipeline, dispatch, AgentBuffers};
use crate::shaders::{bitonic_stages, Kernel, SimParams};

/// GPU resources for the grid index.
#[allow(dead_code)] // Buffers are referenced through the bind groups
pub(super) struct SpatialGpu {
    // Buffers
    keys: wgpu::Buffer,
    values: wgpu::Buffer,
    cell_start: wgpu::Buffer,
    cell_end: wgpu::Buffer,
    stage_buffers: Vec<wgpu::Buffer>,

    // Pipelines
    clear_cells_pipeline: wgpu::ComputePipeline,
    compute_indices_pipeline: wgpu::ComputePipeline,
    bitonic_pipeline: wgpu::ComputePipeline,
    build_cells_pipeline: wgpu::ComputePipeline,
    rearrange_pipeline: wgpu::ComputePipeline,

    // Bind groups; one per sort stage so no uniform is rewritten mid-encoder
    clear_cells_bind_group: wgpu::BindGroup,
    compute_indices_bind_group: wgpu::BindGroup,
    bitonic_bind_groups: Vec<wgpu::BindGroup>,
    build_cells_bind_group: wgpu::BindGroup,
    rearrange_bind_group: wgpu::BindGroup,

    num_agents: u32,
    padded_len: u32,
    cell_count: u32,
}

impl SpatialGpu {
    pub fn new(
        device: &wgpu::Device,
        params_buffer: &wgpu::Buffer,
        params: &SimParams,
        agents: &AgentBuffers,
    ) -> Self {
        let key_bytes = (params.padded_len as usize * std::mem::size_of::<u32>()) as u64;
        let cell_bytes = (params.cell_count as usize * std::mem::size_of::<u32>()) as u64;

        let keys = storage_buffer(device, "Cell Keys", key_bytes);
        let values = storage_buffer(device, "Slot Values", key_bytes);
        let cell_start = storage_buffer(device, "Cell Start", cell_bytes);
        let cell_end = storage_buffer(device, "Cell End", cell_bytes);

        let stage_buffers: Vec<wgpu::Buffer> = bitonic_stages(params.padded_len)
            .iter()
            .map(|stage| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Bitonic Stage"),
                    contents: bytemuck::bytes_of(stage),
                    usage: wgpu::BufferUsages::UNIFORM,
                })
            })
            .collect();

        let clear_cells_pipeline = create_kernel_pipeline(device, Kernel::ClearCells);
        let compute_indices_pipeline = create_kernel_pipeline(device, Kernel::ComputeIndices);
        let bitonic_pipeline = create_kernel_pipeline(device, Kernel::BitonicStep);
        let build_cells_pipeline = create_kernel_pipeline(device, Kernel::BuildCells);
        let rearrange_pipeline = create_kernel_pipeline(device, Kernel::Rearrange);

        let clear_cells_bind_group = bind_buffers(
            device,
            &clear_cells_pipeline,
            "Clear Cells Bind Group",
            &[params_buffer, &cell_start, &cell_end],
        );
        let compute_indices_bind_group = bind_buffers(
            device,
            &compute_indices_pipeline,
            "Compute Indices Bind Group",
            &[params_buffer, &agents.positions, &keys, &values],
        );
        let bitonic_bind_groups = stage_buffers
            .iter()
            .map(|stage| {
                bind_buffers(
                    device,
                    &bitonic_pipeline,
                    "Bitonic Bind Group",
                    &[stage, &keys, &values],
                )
            })
            .collect();
        let build_cells_bind_group = bind_buffers(
            device,
            &build_cells_pipeline,
            "Build Cells Bind Group",
            &[params_buffer, &keys, &cell_start, &cell_end],
        );
        let rearrange_bind_group = bind_buffers(
            device,
            &rearrange_pipeline,
            "Rearrange Bind Group",
            &[
                params_buffer,
                &values,
                &agents.positions,
                &agents.velocities,
                &agents.ids,
                &agents.positions_scratch,
                &agents.velocities_scratch,
                &agents.ids_scratch,
            ],
        );

        Self {
            keys,
            values,
            cell_start,
            cell_end,
            stage_buffers,
            clear_cells_pipeline,
            compute_indices_pipeline,
            bitonic_pipeline,
            build_cells_pipeline,
            rearrange_pipeline,
            clear_cells_bind_group,
            compute_indices_bind_group,
            bitonic_bind_groups,
            build_cells_bind_group,
            rearrange_bind_group,
            num_agents: params.num_agents,
            padded_len: params.padded_len,
            cell_count: params.cell_count,
        }
    }

    /// Slot-to-agent table, valid after [`sort`](Self::sort).
    pub fn values(&self) -> &wgpu::Buffer {
        &self.values
    }

    pub fn cell_start(&self) -> &wgpu::Buffer {
        &self.cell_start
    }

    pub fn cell_end(&self) -> &wgpu::Buffer {
        &self.cell_end
    }

    /// Cell id per agent, padding keys to the sort length.
    pub fn compute_indices(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "Compute Indices",
            &self.compute_indices_pipeline,
            &self.compute_indices_bind_group,
            self.padded_len,
        );
    }

    /// Bitonic sort, one dispatch per compare-exchange stage.
    pub fn sort(&self, encoder: &mut wgpu::CommandEncoder) {
        for bind_group in &self.bitonic_bind_groups {
            dispatch(
                encoder,
                "Bitonic Step",
                &self.bitonic_pipeline,
                bind_group,
                self.padded_len,
            );
        }
    }

    /// Reset and rebuild the cell table from the sorted keys.
    pub fn build_cells(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "Clear Cells",
            &self.clear_cells_pipeline,
            &self.clear_cells_bind_group,
            self.cell_count,
        );
        dispatch(
            encoder,
            "Build Cell Table",
            &self.build_cells_pipeline,
            &self.build_cells_bind_group,
            self.num_agents,
        );
    }

    /// Gather agent state into the scratch buffers in slot order.
    pub fn rearrange(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "Rearrange",
            &self.rearrange_pipeline,
            &self.rearrange_bind_group,
            self.num_agents,
        );
    }
}

fn storage_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}
