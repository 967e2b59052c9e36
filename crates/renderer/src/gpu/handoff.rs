use std::sync::mpsc;
use std::time::Instant;

use crate::error::SyncError;
use crate::sync::{HandoffBackend, KernelTiming};
use crate::types::DispatchGeometry;

use super::kernel::ComputeKernel;

const TIMESTAMP_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

/// Device-side start/end stamps around the kernel pass.
pub(crate) struct KernelTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
}

impl KernelTimer {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("kernel timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel timestamp resolve"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel timestamp readback"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            query_set,
            resolve,
            readback,
        }
    }
}

/// Blocks until the device has finished everything submitted so far.
pub(crate) fn wait_idle(device: &wgpu::Device, step: &'static str) -> Result<(), SyncError> {
    device
        .poll(wgpu::PollType::Wait)
        .map(|_| ())
        .map_err(|err| SyncError::Device {
            step,
            message: err.to_string(),
        })
}

/// Maps `buffer` for reading and hands its bytes to `read`.
pub(crate) fn read_mapped<T>(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    step: &'static str,
    read: impl FnOnce(&[u8]) -> T,
) -> Result<T, SyncError> {
    let slice = buffer.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    wait_idle(device, step)?;
    rx.recv()
        .map_err(|_| SyncError::Device {
            step,
            message: "map callback was dropped".into(),
        })?
        .map_err(|err| SyncError::Device {
            step,
            message: err.to_string(),
        })?;

    let value = {
        let data = slice.get_mapped_range();
        read(&data)
    };
    buffer.unmap();
    Ok(value)
}

/// Converts raw timestamp ticks to nanoseconds, scaling the difference so the
/// elapsed time stays exact for large stamps.
fn timing_from_ticks(start: u64, end: u64, period: f32) -> KernelTiming {
    let period = f64::from(period);
    let start_ns = (start as f64 * period) as u64;
    let elapsed_ns = (end.saturating_sub(start) as f64 * period) as u64;
    KernelTiming::new(start_ns, start_ns.saturating_add(elapsed_ns))
}

/// One kernel pass on the shared device and queue.
///
/// Commands are recorded into a single encoder between acquire and release,
/// so the queue orders the kernel's writes after every earlier draw and
/// before every later one.
pub(crate) struct DeviceHandoff<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    kernel: &'a ComputeKernel,
    argument: &'a wgpu::BindGroup,
    timer: Option<&'a KernelTimer>,
    encoder: Option<wgpu::CommandEncoder>,
    submission: Option<wgpu::SubmissionIndex>,
    host_start: Option<Instant>,
}

impl<'a> DeviceHandoff<'a> {
    pub(crate) fn new(
        device: &'a wgpu::Device,
        queue: &'a wgpu::Queue,
        kernel: &'a ComputeKernel,
        argument: &'a wgpu::BindGroup,
        timer: Option<&'a KernelTimer>,
    ) -> Self {
        Self {
            device,
            queue,
            kernel,
            argument,
            timer,
            encoder: None,
            submission: None,
            host_start: None,
        }
    }

    fn encoder(&mut self, step: &'static str) -> Result<&mut wgpu::CommandEncoder, SyncError> {
        self.encoder.as_mut().ok_or(SyncError::Device {
            step,
            message: "no compute commands are being recorded".into(),
        })
    }

    fn read_device_timing(&self, timer: &KernelTimer) -> Result<KernelTiming, SyncError> {
        let period = self.queue.get_timestamp_period();
        let (start, end) = read_mapped(self.device, &timer.readback, "timestamp readback", |bytes| {
            let start: u64 = bytemuck::pod_read_unaligned(&bytes[0..8]);
            let end: u64 = bytemuck::pod_read_unaligned(&bytes[8..16]);
            (start, end)
        })?;
        Ok(timing_from_ticks(start, end, period))
    }
}

impl HandoffBackend for DeviceHandoff<'_> {
    fn drain_graphics(&mut self) -> Result<(), SyncError> {
        wait_idle(self.device, "graphics drain")
    }

    fn enqueue_acquire(&mut self) -> Result<(), SyncError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel handoff"),
            });
        encoder.push_debug_group("shared texture: compute-owned");
        self.encoder = Some(encoder);
        Ok(())
    }

    fn enqueue_dispatch(&mut self, geometry: &DispatchGeometry) -> Result<(), SyncError> {
        let timer = self.timer;
        let kernel = self.kernel;
        let argument = self.argument;
        let [groups_x, groups_y] = geometry.groups();
        let encoder = self.encoder("dispatch")?;

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry()),
                timestamp_writes: timer.map(|timer| wgpu::ComputePassTimestampWrites {
                    query_set: &timer.query_set,
                    beginning_of_pass_write_index: Some(0),
                    end_of_pass_write_index: Some(1),
                }),
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, argument, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        if let Some(timer) = timer {
            encoder.resolve_query_set(&timer.query_set, 0..2, &timer.resolve, 0);
            encoder.copy_buffer_to_buffer(&timer.resolve, 0, &timer.readback, 0, TIMESTAMP_BYTES);
        }
        tracing::trace!(groups_x, groups_y, "kernel dispatch enqueued");
        Ok(())
    }

    fn enqueue_release(&mut self) -> Result<(), SyncError> {
        let mut encoder = self.encoder.take().ok_or(SyncError::Device {
            step: "release",
            message: "no compute commands are being recorded".into(),
        })?;
        encoder.pop_debug_group();

        // Recording errors surface at `finish`; the scope is popped before returning.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let commands = encoder.finish();
        self.host_start = Some(Instant::now());
        let submission = self.queue.submit(Some(commands));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SyncError::Device {
                step: "kernel pass",
                message: err.to_string(),
            });
        }
        self.submission = Some(submission);
        Ok(())
    }

    fn finish(&mut self) -> Result<KernelTiming, SyncError> {
        let Some(submission) = self.submission.take() else {
            return Err(SyncError::Device {
                step: "finish",
                message: "nothing was submitted".into(),
            });
        };
        self.device
            .poll(wgpu::PollType::WaitForSubmissionIndex(submission))
            .map_err(|err| SyncError::Device {
                step: "finish",
                message: err.to_string(),
            })?;
        let host_elapsed = self.host_start.take().map(|start| start.elapsed());

        match self.timer {
            Some(timer) => self.read_device_timing(timer),
            None => {
                let elapsed = host_elapsed.unwrap_or_default();
                Ok(KernelTiming::new(
                    0,
                    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_stamps_keep_an_exact_delta() {
        let start = 1u64 << 60;
        let timing = timing_from_ticks(start, start + 1000, 1.0);
        assert_eq!(timing.elapsed_ns(), 1000);
    }

    #[test]
    fn ticks_scale_by_the_period() {
        let timing = timing_from_ticks(10, 110, 2.5);
        assert_eq!(timing.start_ns, 25);
        assert_eq!(timing.elapsed_ns(), 250);
    }

    #[test]
    fn reversed_stamps_give_zero_elapsed() {
        let timing = timing_from_ticks(500, 400, 1.0);
        assert_eq!(timing.elapsed_ns(), 0);
    }
}
