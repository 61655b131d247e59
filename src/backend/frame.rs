// Frames in flight
//
// Each in-flight slot owns one command buffer, one acquire semaphore, one
// render-finished semaphore and one fence. Slots are used round-robin, so at
// most MAX_FRAMES_IN_FLIGHT submissions can be outstanding at a time.
//
// The order of operations for one frame lives in `run_frame`; the Vulkan calls
// behind each step are supplied through `FrameOps` (see rhi.rs).

use ash::vk;
use std::sync::Arc;

use super::commands::{allocate_command_buffers, create_command_pool};
use super::error::RhiResult;
use super::swapchain::SwapchainStatus;
use super::sync::FrameSync;
use super::VulkanDevice;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// What happened to a `draw_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the swapchain should be rebuilt
    Suboptimal,
    /// The swapchain must be rebuilt before the next frame
    OutOfDate,
    /// No swapchain (e.g. minimized window)
    Skipped,
}

impl FrameStatus {
    /// Merge the acquire and present results of a submitted frame
    pub fn from_swapchain(acquire: SwapchainStatus, present: SwapchainStatus) -> Self {
        use SwapchainStatus::*;

        match (acquire, present) {
            (OutOfDate, _) | (_, OutOfDate) => FrameStatus::OutOfDate,
            (Suboptimal, _) | (_, Suboptimal) => FrameStatus::Suboptimal,
            (Optimal, Optimal) => FrameStatus::Presented,
        }
    }

    pub fn needs_recreate(self) -> bool {
        matches!(self, FrameStatus::Suboptimal | FrameStatus::OutOfDate)
    }
}

/// Round-robin index over the in-flight slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlots {
    current: usize,
    count: usize,
}

impl FrameSlots {
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "need at least one frame in flight");
        Self { current: 0, count }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

impl Default for FrameSlots {
    fn default() -> Self {
        Self::new(MAX_FRAMES_IN_FLIGHT)
    }
}

/// The GPU work behind each step of a frame, addressed by in-flight slot
pub trait FrameOps {
    /// Block until the slot's previous submission has retired
    fn wait_fence(&mut self, slot: usize) -> RhiResult<()>;
    /// Acquire the next image, signaling the slot's image-available semaphore
    fn acquire(&mut self, slot: usize) -> RhiResult<(u32, SwapchainStatus)>;
    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;
    fn reset_fence(&mut self, slot: usize) -> RhiResult<()>;
    /// Submit the slot's command buffer; the slot's fence signals on completion
    fn submit(&mut self, slot: usize) -> RhiResult<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<SwapchainStatus>;
}

/// Drive one frame through `ops` and advance `slots` if it was submitted.
///
/// The fence is reset right before submit. An out-of-date acquire or a failed
/// recording returns with the fence still signaled and the slot unchanged, so
/// the next call on that slot does not block.
pub fn run_frame<O>(ops: &mut O, slots: &mut FrameSlots) -> RhiResult<FrameStatus>
where
    O: FrameOps + ?Sized,
{
    let slot = slots.current();

    ops.wait_fence(slot)?;

    let (image_index, acquire_status) = ops.acquire(slot)?;
    if acquire_status == SwapchainStatus::OutOfDate {
        return Ok(FrameStatus::OutOfDate);
    }

    ops.record(slot, image_index)?;

    ops.reset_fence(slot)?;
    ops.submit(slot)?;

    // Work is queued from here on; the slot is spent whatever present says
    let present_status = ops.present(slot, image_index);
    slots.advance();

    Ok(FrameStatus::from_swapchain(acquire_status, present_status?))
}

/// Command pool + per-slot command buffers and sync objects
pub struct FrameResources {
    // Sync objects go before the pool (see Drop)
    pub sync: Vec<FrameSync>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub command_pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl FrameResources {
    pub fn new(device: Arc<VulkanDevice>) -> RhiResult<Self> {
        let command_pool = create_command_pool(&device)?;

        let mut this = Self {
            sync: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            command_buffers: Vec::new(),
            command_pool,
            device,
        };

        this.command_buffers =
            allocate_command_buffers(&this.device, command_pool, MAX_FRAMES_IN_FLIGHT as u32)?;
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let sync = FrameSync::new(this.device.clone())?;
            this.sync.push(sync);
        }

        log::info!(
            "Created {} command buffers and sync sets",
            this.command_buffers.len()
        );
        Ok(this)
    }

    /// Command buffer and sync objects for `slot`
    pub fn slot(&self, slot: usize) -> (vk::CommandBuffer, &FrameSync) {
        (self.command_buffers[slot], &self.sync[slot])
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        self.sync.clear();
        // Also frees the command buffers
        unsafe { self.device.device.destroy_command_pool(self.command_pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::RhiError;
    use std::collections::VecDeque;

    /// Stand-in GPU: fences complete as soon as work is submitted, and a wait
    /// on an unsignaled fence is reported as an error instead of hanging.
    struct FakeGpu {
        fence_signaled: Vec<bool>,
        acquires: VecDeque<(u32, SwapchainStatus)>,
        presents: VecDeque<SwapchainStatus>,
        fail_next_record: bool,
        submitted: Vec<(usize, u32)>,
        recording: Option<u32>,
    }

    impl FakeGpu {
        fn new() -> Self {
            Self {
                fence_signaled: vec![true; MAX_FRAMES_IN_FLIGHT],
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                fail_next_record: false,
                submitted: Vec::new(),
                recording: None,
            }
        }
    }

    impl FrameOps for FakeGpu {
        fn wait_fence(&mut self, slot: usize) -> RhiResult<()> {
            if self.fence_signaled[slot] {
                Ok(())
            } else {
                Err(RhiError::backend("fence never signals", vk::Result::TIMEOUT))
            }
        }

        fn acquire(&mut self, _slot: usize) -> RhiResult<(u32, SwapchainStatus)> {
            Ok(self.acquires.pop_front().unwrap_or((0, SwapchainStatus::Optimal)))
        }

        fn record(&mut self, _slot: usize, image_index: u32) -> RhiResult<()> {
            if std::mem::take(&mut self.fail_next_record) {
                return Err(RhiError::backend(
                    "record failed",
                    vk::Result::ERROR_OUT_OF_HOST_MEMORY,
                ));
            }
            self.recording = Some(image_index);
            Ok(())
        }

        fn reset_fence(&mut self, slot: usize) -> RhiResult<()> {
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RhiResult<()> {
            let image_index = self.recording.take().expect("submit without recording");
            self.submitted.push((slot, image_index));
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> RhiResult<SwapchainStatus> {
            Ok(self.presents.pop_front().unwrap_or(SwapchainStatus::Optimal))
        }
    }

    #[test]
    fn slots_cycle_round_robin() {
        let mut slots = FrameSlots::default();
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(slots.current());
            slots.advance();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn image_indices_reach_submission_independent_of_slot() {
        let mut gpu = FakeGpu::new();
        gpu.acquires = VecDeque::from([
            (2, SwapchainStatus::Optimal),
            (0, SwapchainStatus::Optimal),
            (0, SwapchainStatus::Suboptimal),
            (1, SwapchainStatus::Optimal),
            (2, SwapchainStatus::Optimal),
        ]);
        let mut slots = FrameSlots::default();

        let statuses: Vec<FrameStatus> = (0..5)
            .map(|_| run_frame(&mut gpu, &mut slots).unwrap())
            .collect();

        assert_eq!(gpu.submitted, vec![(0, 2), (1, 0), (0, 0), (1, 1), (0, 2)]);
        assert_eq!(
            statuses,
            vec![
                FrameStatus::Presented,
                FrameStatus::Presented,
                FrameStatus::Suboptimal,
                FrameStatus::Presented,
                FrameStatus::Presented,
            ]
        );
        assert_eq!(slots.current(), 1);
    }

    #[test]
    fn out_of_date_acquire_keeps_slot_and_fence() {
        let mut gpu = FakeGpu::new();
        gpu.acquires = VecDeque::from([(0, SwapchainStatus::OutOfDate)]);
        let mut slots = FrameSlots::default();

        let status = run_frame(&mut gpu, &mut slots).unwrap();

        assert_eq!(status, FrameStatus::OutOfDate);
        assert_eq!(slots.current(), 0);
        assert!(gpu.fence_signaled.iter().all(|&s| s));
        assert!(gpu.submitted.is_empty());

        // Same slot is usable right away
        assert_eq!(run_frame(&mut gpu, &mut slots).unwrap(), FrameStatus::Presented);
        assert_eq!(gpu.submitted, vec![(0, 0)]);
    }

    #[test]
    fn out_of_date_present_still_advances() {
        let mut gpu = FakeGpu::new();
        gpu.acquires = VecDeque::from([(1, SwapchainStatus::Optimal)]);
        gpu.presents = VecDeque::from([SwapchainStatus::OutOfDate]);
        let mut slots = FrameSlots::default();

        let status = run_frame(&mut gpu, &mut slots).unwrap();

        assert_eq!(status, FrameStatus::OutOfDate);
        assert_eq!(gpu.submitted, vec![(0, 1)]);
        assert_eq!(slots.current(), 1);
    }

    #[test]
    fn failed_recording_leaves_slot_reusable() {
        let mut gpu = FakeGpu::new();
        gpu.fail_next_record = true;
        let mut slots = FrameSlots::default();

        assert!(run_frame(&mut gpu, &mut slots).is_err());
        assert!(gpu.fence_signaled[0]);
        assert_eq!(slots.current(), 0);

        // The next frame on the same slot must not wait on a fence nobody signals
        assert_eq!(run_frame(&mut gpu, &mut slots).unwrap(), FrameStatus::Presented);
        assert_eq!(gpu.submitted, vec![(0, 0)]);
    }

    #[test]
    fn acquire_and_present_statuses_merge() {
        use SwapchainStatus::*;

        let cases = [
            (Optimal, Optimal, FrameStatus::Presented),
            (Suboptimal, Optimal, FrameStatus::Suboptimal),
            (Optimal, Suboptimal, FrameStatus::Suboptimal),
            (Suboptimal, OutOfDate, FrameStatus::OutOfDate),
            (Optimal, OutOfDate, FrameStatus::OutOfDate),
        ];
        for (acquire, present, expected) in cases {
            assert_eq!(
                FrameStatus::from_swapchain(acquire, present),
                expected,
                "{acquire:?} + {present:?}"
            );
        }
    }

    #[test]
    fn two_frames_in_flight() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
        assert_eq!(FrameSlots::default().count(), 2);
    }

    #[test]
    fn status_flags_recreation() {
        assert!(FrameStatus::OutOfDate.needs_recreate());
        assert!(FrameStatus::Suboptimal.needs_recreate());
        assert!(!FrameStatus::Presented.needs_recreate());
        assert!(!FrameStatus::Skipped.needs_recreate());
    }
}
