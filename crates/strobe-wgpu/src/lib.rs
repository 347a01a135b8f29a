#![doc = include_str!("../README.md")]

use std::ops::Range;
use std::sync::Arc;
use std::sync::mpsc;

use tracing::debug;

use strobe_core::error::{ProfileError, Result};
use strobe_core::provider::TimestampProvider;
use strobe_core::types::{
    CalibrationSample, GpuBackendKind, PassKind, SampleGranularity, host_time_ns,
};

/// One double-buffer half: a timestamp query set plus its resolve and
/// readback staging buffers, all sized to `capacity` slots.
pub struct QueryBuffer {
    query_set: Arc<wgpu::QuerySet>,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    capacity: u32,
}

impl QueryBuffer {
    /// Slots in this buffer.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Describes a pass being recorded, before the encoder scope opens.
///
/// The profiler wires a query pair in through
/// [`TimestampProvider::attach`]; the application then feeds the wiring to
/// `wgpu` when it opens the pass:
///
/// ```ignore
/// let mut pass = WgpuPass::new(PassKind::Compute);
/// let _zone = context.begin_zone(&mut pass, zone_location!("blur"), true)?;
/// let cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
///     label: Some("blur"),
///     timestamp_writes: pass.compute_timestamp_writes(),
/// });
/// ```
pub struct WgpuPass {
    kind: PassKind,
    attachment: Option<PassAttachment>,
}

struct PassAttachment {
    query_set: Arc<wgpu::QuerySet>,
    start_index: u32,
    end_index: u32,
}

impl WgpuPass {
    pub fn new(kind: PassKind) -> Self {
        Self {
            kind,
            attachment: None,
        }
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Whether a zone is wired into this pass.
    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Timestamp wiring for a compute pass descriptor.
    ///
    /// `None` when no zone is attached or the pass is not compute-shaped,
    /// which encodes the pass without timestamps rather than failing.
    pub fn compute_timestamp_writes(&self) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        if self.kind != PassKind::Compute {
            return None;
        }
        self.attachment
            .as_ref()
            .map(|attachment| wgpu::ComputePassTimestampWrites {
                query_set: &attachment.query_set,
                beginning_of_pass_write_index: Some(attachment.start_index),
                end_of_pass_write_index: Some(attachment.end_index),
            })
    }

    /// Timestamp wiring for a render pass descriptor.
    ///
    /// Samples exactly once at pass start and once at pass end; per-stage
    /// sampling inside the pass is not requested.
    pub fn render_timestamp_writes(&self) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        if self.kind != PassKind::Draw {
            return None;
        }
        self.attachment
            .as_ref()
            .map(|attachment| wgpu::RenderPassTimestampWrites {
                query_set: &attachment.query_set,
                beginning_of_pass_write_index: Some(attachment.start_index),
                end_of_pass_write_index: Some(attachment.end_index),
            })
    }

    /// Sample the start boundary of a data-transfer scope.
    ///
    /// Call immediately before recording the copies this zone brackets.
    pub fn write_transfer_begin(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.kind != PassKind::Transfer {
            return;
        }
        if let Some(attachment) = &self.attachment {
            encoder.write_timestamp(&attachment.query_set, attachment.start_index);
        }
    }

    /// Sample the end boundary of a data-transfer scope.
    pub fn write_transfer_end(&self, encoder: &mut wgpu::CommandEncoder) {
        if self.kind != PassKind::Transfer {
            return;
        }
        if let Some(attachment) = &self.attachment {
            encoder.write_timestamp(&attachment.query_set, attachment.end_index);
        }
    }
}

/// Timestamp provider backed by a `wgpu` device/queue pair.
pub struct WgpuProvider {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    backend: wgpu::Backend,
}

impl WgpuProvider {
    /// Feature the device must be created with.
    pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::TIMESTAMP_QUERY;

    /// Features that unlock optional granularities when available.
    pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::TIMESTAMP_QUERY_INSIDE_PASSES
        .union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS);

    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, backend: wgpu::Backend) -> Self {
        Self {
            device,
            queue,
            backend,
        }
    }

    fn create_staging(&self, label: &str, capacity: u32) -> (wgpu::Buffer, wgpu::Buffer) {
        let size = capacity as u64 * wgpu::QUERY_SIZE as u64;
        let resolve_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} resolve")),
            size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} readback")),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        (resolve_buffer, readback_buffer)
    }

    /// Submit a resolve + copy for `range`, block on the readback mapping,
    /// and return the slot values.
    fn read_back(&self, buffer: &QueryBuffer, range: Range<u32>) -> Result<Vec<u64>> {
        let bytes = range.len() as u64 * wgpu::QUERY_SIZE as u64;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strobe timestamp resolve"),
            });
        encoder.resolve_query_set(&buffer.query_set, range, &buffer.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&buffer.resolve_buffer, 0, &buffer.readback_buffer, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.readback_buffer.slice(..bytes);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(ProfileError::Resolve(format!("readback map failed: {err}")));
            }
            Err(_) => {
                return Err(ProfileError::Resolve(
                    "readback mapping never completed".into(),
                ));
            }
        }
        let values = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u64>(&view).to_vec()
        };
        buffer.readback_buffer.unmap();
        Ok(values)
    }
}

impl TimestampProvider for WgpuProvider {
    type Buffer = QueryBuffer;
    type Pass = WgpuPass;

    fn supports(&self, granularity: SampleGranularity) -> bool {
        let features = self.device.features();
        match granularity {
            SampleGranularity::StageBoundary => {
                features.contains(wgpu::Features::TIMESTAMP_QUERY)
            }
            SampleGranularity::DrawCall | SampleGranularity::Dispatch => {
                features.contains(wgpu::Features::TIMESTAMP_QUERY_INSIDE_PASSES)
            }
        }
    }

    fn allocate_buffer(&self, capacity: u32) -> Result<QueryBuffer> {
        if capacity > wgpu::QUERY_SET_MAX_QUERIES {
            return Err(ProfileError::BufferAllocation(format!(
                "capacity {capacity} exceeds device query-set limit {}",
                wgpu::QUERY_SET_MAX_QUERIES
            )));
        }
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("strobe zone queries"),
            ty: wgpu::QueryType::Timestamp,
            count: capacity,
        });
        let (resolve_buffer, readback_buffer) = self.create_staging("strobe zone queries", capacity);
        debug!(capacity, "timestamp query buffer allocated");
        Ok(QueryBuffer {
            query_set: Arc::new(query_set),
            resolve_buffer,
            readback_buffer,
            capacity,
        })
    }

    fn attach(
        &self,
        pass: &mut WgpuPass,
        buffer: &QueryBuffer,
        start_index: u32,
        end_index: u32,
    ) -> Result<()> {
        if end_index >= buffer.capacity {
            return Err(ProfileError::Attach(format!(
                "sample indices {start_index}/{end_index} out of range for capacity {}",
                buffer.capacity
            )));
        }
        if pass.attachment.is_some() {
            return Err(ProfileError::Attach(
                "pass already carries a timestamp pair; one zone per pass".into(),
            ));
        }
        if pass.kind == PassKind::Transfer
            && !self
                .device
                .features()
                .contains(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS)
        {
            return Err(ProfileError::Attach(
                "data-transfer zones need TIMESTAMP_QUERY_INSIDE_ENCODERS".into(),
            ));
        }
        pass.attachment = Some(PassAttachment {
            query_set: Arc::clone(&buffer.query_set),
            start_index,
            end_index,
        });
        Ok(())
    }

    fn resolve(&self, buffer: &QueryBuffer, range: Range<u32>) -> Result<Vec<u64>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        if range.end > buffer.capacity {
            return Err(ProfileError::Resolve(format!(
                "range {range:?} out of bounds for capacity {}",
                buffer.capacity
            )));
        }
        self.read_back(buffer, range)
    }

    fn calibrate(&self) -> Result<CalibrationSample> {
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("strobe calibration queries"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let (resolve_buffer, readback_buffer) = self.create_staging("strobe calibration", 2);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strobe calibration"),
            });
        {
            // Empty pass: its boundary timestamps are the calibration read.
            let _pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("strobe calibration pass"),
                timestamp_writes: Some(wgpu::ComputePassTimestampWrites {
                    query_set: &query_set,
                    beginning_of_pass_write_index: Some(0),
                    end_of_pass_write_index: Some(1),
                }),
            });
        }
        encoder.resolve_query_set(&query_set, 0..2, &resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &resolve_buffer,
            0,
            &readback_buffer,
            0,
            2 * wgpu::QUERY_SIZE as u64,
        );
        let host_time = host_time_ns();
        self.queue.submit(Some(encoder.finish()));

        let slice = readback_buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            _ => {
                return Err(ProfileError::Calibration(
                    "calibration readback failed".into(),
                ));
            }
        }
        let device_timestamp = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u64>(&view)[0]
        };
        readback_buffer.unmap();

        Ok(CalibrationSample {
            device_timestamp,
            host_time_ns: host_time,
            period: self.queue.get_timestamp_period(),
        })
    }

    fn backend_kind(&self) -> GpuBackendKind {
        match self.backend {
            wgpu::Backend::Vulkan => GpuBackendKind::Vulkan,
            wgpu::Backend::Metal => GpuBackendKind::Metal,
            wgpu::Backend::Dx12 => GpuBackendKind::Dx12,
            wgpu::Backend::Gl => GpuBackendKind::OpenGl,
            wgpu::Backend::BrowserWebGpu => GpuBackendKind::WebGpu,
            wgpu::Backend::Empty => GpuBackendKind::Simulated,
        }
    }
}
