//! Headless wgpu backend.
//!
//! [`GpuFlock`] runs the same step pipeline as
//! [`FlockSimulation`](crate::FlockSimulation). Each stage is its own
//! submission inside a validation error scope, timed into a
//! [`StepClock`](crate::StepClock) the same way the CPU passes are.
//!
//! Agent state lives in canonical buffers; passes that produce new state
//! write scratch buffers which are then copied back, so every bind group is
//! built once at startup.
//!
//! ```ignore
//! let mut flock = GpuFlock::new(FlockConfig::default().with_agent_count(100_000))?;
//! flock.step(0.2, SearchVariant::GridCoherent)?;
//! let positions = flock.read_positions()?;
//! ```

mod spatial_gpu;

use bytemuck::Pod;
use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::config::FlockConfig;
use crate::error::GpuError;
use crate::grid::GridParams;
use crate::neighbors::SearchVariant;
use crate::shaders::{Kernel, SimParams, WORKGROUP_SIZE};
use crate::store::AgentStore;
use crate::time::{Pass, StepClock};

use spatial_gpu::SpatialGpu;

/// Canonical agent state plus the scratch buffers passes write into.
pub(crate) struct AgentBuffers {
    positions: wgpu::Buffer,
    velocities: wgpu::Buffer,
    ids: wgpu::Buffer,
    positions_scratch: wgpu::Buffer,
    velocities_scratch: wgpu::Buffer,
    ids_scratch: wgpu::Buffer,
}

/// A flock simulated on the GPU.
pub struct GpuFlock {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: FlockConfig,
    grid: GridParams,
    params: SimParams,
    params_buffer: wgpu::Buffer,
    agents: AgentBuffers,
    spatial: SpatialGpu,
    staging: wgpu::Buffer,

    brute_force_pipeline: wgpu::ComputePipeline,
    indirect_pipeline: wgpu::ComputePipeline,
    coherent_pipeline: wgpu::ComputePipeline,
    integrate_pipeline: wgpu::ComputePipeline,
    brute_force_bind_group: wgpu::BindGroup,
    indirect_bind_group: wgpu::BindGroup,
    coherent_bind_group: wgpu::BindGroup,
    integrate_bind_group: wgpu::BindGroup,

    num_agents: u32,
    clock: StepClock,
}

impl GpuFlock {
    /// Seed a random flock from `config` and upload it.
    pub fn new(config: FlockConfig) -> Result<Self, GpuError> {
        config.validate()?;
        let store = AgentStore::random(&config)?;
        Self::from_agents(config, &store.export_positions(), &store.export_velocities())
    }

    /// Upload explicit agent state; `config.agent_count` is replaced by its length.
    pub fn from_agents(
        config: FlockConfig,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Result<Self, GpuError> {
        if positions.len() != velocities.len() {
            return Err(GpuError::AgentCountMismatch {
                positions: positions.len(),
                velocities: velocities.len(),
            });
        }
        let config = config.with_agent_count(positions.len() as u32);
        config.validate()?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gridflock device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "GPU device ready");

        let num_agents = positions.len() as u32;
        let grid = GridParams::from_config(&config);
        let params = SimParams::new(&config, &grid, num_agents);
        params.check_dispatch(device.limits().max_compute_workgroups_per_dimension)?;

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sim Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let positions4: Vec<[f32; 4]> = positions.iter().map(|p| p.extend(0.0).to_array()).collect();
        let velocities4: Vec<[f32; 4]> = velocities.iter().map(|v| v.extend(0.0).to_array()).collect();
        let ids: Vec<u32> = (0..num_agents).collect();
        let agents = AgentBuffers {
            positions: agent_buffer(&device, "Positions", bytemuck::cast_slice(&positions4)),
            velocities: agent_buffer(&device, "Velocities", bytemuck::cast_slice(&velocities4)),
            ids: agent_buffer(&device, "Agent Ids", bytemuck::cast_slice(&ids)),
            positions_scratch: agent_buffer(&device, "Positions Scratch", bytemuck::cast_slice(&positions4)),
            velocities_scratch: agent_buffer(&device, "Velocities Scratch", bytemuck::cast_slice(&velocities4)),
            ids_scratch: agent_buffer(&device, "Agent Ids Scratch", bytemuck::cast_slice(&ids)),
        };

        let spatial = SpatialGpu::new(&device, &params_buffer, &params, &agents);

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: (num_agents as usize * std::mem::size_of::<[f32; 4]>()) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let brute_force_pipeline = create_kernel_pipeline(&device, Kernel::UpdateBruteForce);
        let indirect_pipeline = create_kernel_pipeline(&device, Kernel::UpdateIndirect);
        let coherent_pipeline = create_kernel_pipeline(&device, Kernel::UpdateCoherent);
        let integrate_pipeline = create_kernel_pipeline(&device, Kernel::Integrate);

        let brute_force_bind_group = bind_buffers(
            &device,
            &brute_force_pipeline,
            "Brute Force Bind Group",
            &[&params_buffer, &agents.positions, &agents.velocities, &agents.velocities_scratch],
        );
        let indirect_bind_group = bind_buffers(
            &device,
            &indirect_pipeline,
            "Grid Indirect Bind Group",
            &[
                &params_buffer,
                &agents.positions,
                &agents.velocities,
                spatial.cell_start(),
                spatial.cell_end(),
                spatial.values(),
                &agents.velocities_scratch,
            ],
        );
        let coherent_bind_group = bind_buffers(
            &device,
            &coherent_pipeline,
            "Grid Coherent Bind Group",
            &[
                &params_buffer,
                &agents.positions,
                &agents.velocities,
                spatial.cell_start(),
                spatial.cell_end(),
                &agents.velocities_scratch,
            ],
        );
        let integrate_bind_group = bind_buffers(
            &device,
            &integrate_pipeline,
            "Integrate Bind Group",
            &[&params_buffer, &agents.positions, &agents.velocities],
        );

        Ok(Self {
            device,
            queue,
            config,
            grid,
            params,
            params_buffer,
            agents,
            spatial,
            staging,
            brute_force_pipeline,
            indirect_pipeline,
            coherent_pipeline,
            integrate_pipeline,
            brute_force_bind_group,
            indirect_bind_group,
            coherent_bind_group,
            integrate_bind_group,
            num_agents,
            clock: StepClock::new(),
        })
    }

    /// Advance the flock by `dt`, blocking until the device is done.
    ///
    /// Each pass is submitted and timed on its own, so a validation failure
    /// names the pass that caused it.
    pub fn step(&mut self, dt: f32, variant: SearchVariant) -> Result<(), GpuError> {
        let started = self.clock.begin_step();
        self.params.dt = dt;
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));

        let device = &self.device;
        let queue = &self.queue;
        let spatial = &self.spatial;
        let agents = &self.agents;
        let clock = &mut self.clock;
        let bytes4 = vec4_bytes(self.num_agents);
        let num_agents = self.num_agents;

        if variant.uses_grid() {
            submit_pass(device, queue, clock, Pass::Index, |e| spatial.compute_indices(e))?;
            submit_pass(device, queue, clock, Pass::Sort, |e| spatial.sort(e))?;
            submit_pass(device, queue, clock, Pass::Buckets, |e| spatial.build_cells(e))?;
        }

        if variant == SearchVariant::GridCoherent {
            submit_pass(device, queue, clock, Pass::Rearrange, |e| {
                spatial.rearrange(e);
                e.copy_buffer_to_buffer(&agents.positions_scratch, 0, &agents.positions, 0, bytes4);
                e.copy_buffer_to_buffer(&agents.velocities_scratch, 0, &agents.velocities, 0, bytes4);
                e.copy_buffer_to_buffer(
                    &agents.ids_scratch,
                    0,
                    &agents.ids,
                    0,
                    (num_agents as usize * std::mem::size_of::<u32>()) as u64,
                );
            })?;
        }

        let (label, pipeline, bind_group) = match variant {
            SearchVariant::BruteForce => (
                "Update Brute Force",
                &self.brute_force_pipeline,
                &self.brute_force_bind_group,
            ),
            SearchVariant::GridIndirect => (
                "Update Grid Indirect",
                &self.indirect_pipeline,
                &self.indirect_bind_group,
            ),
            SearchVariant::GridCoherent => (
                "Update Grid Coherent",
                &self.coherent_pipeline,
                &self.coherent_bind_group,
            ),
        };
        submit_pass(device, queue, clock, Pass::Velocity, |e| {
            dispatch(e, label, pipeline, bind_group, num_agents);
            e.copy_buffer_to_buffer(&agents.velocities_scratch, 0, &agents.velocities, 0, bytes4);
        })?;

        submit_pass(device, queue, clock, Pass::Integrate, |e| {
            dispatch(
                e,
                "Integrate",
                &self.integrate_pipeline,
                &self.integrate_bind_group,
                num_agents,
            )
        })?;

        clock.end_step(started);
        tracing::debug!(
            step = clock.steps(),
            %variant,
            elapsed_us = clock.last_step().as_micros() as u64,
            "GPU step complete"
        );
        Ok(())
    }

    /// Positions indexed by agent id.
    pub fn read_positions(&self) -> Result<Vec<Vec3>, GpuError> {
        let raw: Vec<[f32; 4]> = self.read_buffer(&self.agents.positions, self.num_agents as usize)?;
        self.export(&raw)
    }

    /// Velocities indexed by agent id.
    pub fn read_velocities(&self) -> Result<Vec<Vec3>, GpuError> {
        let raw: Vec<[f32; 4]> = self.read_buffer(&self.agents.velocities, self.num_agents as usize)?;
        self.export(&raw)
    }

    /// Agent id held in each slot of the device buffers.
    pub fn read_agent_ids(&self) -> Result<Vec<u32>, GpuError> {
        self.read_buffer(&self.agents.ids, self.num_agents as usize)
    }

    pub fn agent_count(&self) -> usize {
        self.num_agents as usize
    }

    pub fn steps(&self) -> u64 {
        self.clock.steps()
    }

    /// Wall time per pass and per step so far.
    pub fn stats(&self) -> &StepClock {
        &self.clock
    }

    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    pub fn grid(&self) -> &GridParams {
        &self.grid
    }

    fn export(&self, raw: &[[f32; 4]]) -> Result<Vec<Vec3>, GpuError> {
        let ids = self.read_agent_ids()?;
        let mut out = vec![Vec3::ZERO; raw.len()];
        for (&id, value) in ids.iter().zip(raw) {
            out[id as usize] = Vec3::new(value[0], value[1], value[2]);
        }
        Ok(out)
    }

    /// Copy `count` elements of `source` through the staging buffer.
    fn read_buffer<T: Pod>(&self, source: &wgpu::Buffer, count: usize) -> Result<Vec<T>, GpuError> {
        let bytes = (count * std::mem::size_of::<T>()) as u64;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gridflock readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &self.staging, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = self.staging.slice(..bytes);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let data = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&view).to_vec()
        };
        self.staging.unmap();
        Ok(data)
    }
}

fn vec4_bytes(num_agents: u32) -> u64 {
    (num_agents as usize * std::mem::size_of::<[f32; 4]>()) as u64
}

/// Record one pass into its own submission, inside a validation error scope.
fn submit_pass(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    clock: &mut StepClock,
    pass: Pass,
    record: impl FnOnce(&mut wgpu::CommandEncoder),
) -> Result<(), GpuError> {
    clock.time(pass, || {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(pass.name()),
        });
        record(&mut encoder);
        queue.submit(Some(encoder.finish()));
        device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(device.pop_error_scope()) {
            Some(error) => Err(GpuError::Execution {
                pass: pass.name(),
                message: error.to_string(),
            }),
            None => Ok(()),
        }
    })
}

fn agent_buffer(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
    })
}

fn create_kernel_pipeline(device: &wgpu::Device, kernel: Kernel) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.label()),
        source: wgpu::ShaderSource::Wgsl(kernel.source().into()),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.label()),
        layout: None, // Auto layout
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Bind `buffers` to consecutive bindings of group 0.
fn bind_buffers(
    device: &wgpu::Device,
    pipeline: &wgpu::ComputePipeline,
    label: &str,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let layout = pipeline.get_bind_group_layout(0);
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layout,
        entries: &entries,
    })
}

fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    items: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(items.div_ceil(WORKGROUP_SIZE), 1, 1);
}
