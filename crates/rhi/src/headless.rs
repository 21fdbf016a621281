//! A host-simulated device.
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without a GPU. Queue work is
//! kept in submission order and retires when the host blocks on it, which is
//! the latest point a real device could finish it. That makes the simulation
//! strict: anything the frame engine gets away with here, it also gets away
//! with on hardware.
//!
//! Every call is checked against the usage rules the engine depends on.
//! Breaking one does not fail the call; it is recorded in
//! [`violations`](HeadlessDevice::violations) and logged at `warn` level.
//! The device also keeps an event journal and counters for tests and for the
//! `--headless` run mode.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::device::{FrameSubmission, GpuDevice, SwapchainDesc};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Surface the simulated device presents to.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 1280,
                    height: 720,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }
}

impl HeadlessConfig {
    /// Sets the fixed surface extent.
    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.capabilities.current_extent = vk::Extent2D { width, height };
        self
    }

    /// Sets the surface's image count limits. `max == 0` means unbounded.
    pub fn with_image_count_limits(mut self, min: u32, max: u32) -> Self {
        self.capabilities.min_image_count = min;
        self.capabilities.max_image_count = max;
        self
    }

    pub fn with_formats(mut self, formats: Vec<vk::SurfaceFormatKHR>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_present_modes(mut self, present_modes: Vec<vk::PresentModeKHR>) -> Self {
        self.present_modes = present_modes;
        self
    }
}

/// One entry of the device journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        image_count: usize,
        extent: vk::Extent2D,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    Acquire {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    Submit {
        id: u64,
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    WaitIdle,
    /// Free-form label written by a caller through [`HeadlessDevice::mark`].
    Marker(String),
}

/// Counters collected over the device's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: u64,
    pub presents: u64,
    pub acquires: u64,
    pub fence_waits: u64,
    pub idle_waits: u64,
    pub swapchains_created: u64,
    /// Highest number of submissions queued and not yet retired.
    pub max_pending_submissions: usize,
}

/// Number of objects currently alive on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub fences: usize,
    pub semaphores: usize,
    pub swapchains: usize,
    pub image_views: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SemaphoreState {
    Unsignaled,
    /// Will be signaled when the submission with this id retires.
    Pending(u64),
    Signaled,
}

#[derive(Clone, Copy, Debug)]
struct FenceState {
    signaled: bool,
    pending: Option<u64>,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    held: Vec<bool>,
    next: usize,
    out_of_date: bool,
}

#[derive(Debug)]
struct Submission {
    id: u64,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    signal_semaphore: vk::Semaphore,
}

#[derive(Debug)]
struct HeadlessState {
    config: HeadlessConfig,
    next_handle: u64,
    next_submission: u64,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, SemaphoreState>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainState>,
    image_owner: HashMap<vk::Image, vk::SwapchainKHR>,
    views: HashMap<vk::ImageView, vk::Image>,
    queue: VecDeque<Submission>,
    pending_command_buffers: HashSet<vk::CommandBuffer>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    submit_script: VecDeque<vk::Result>,
    view_failure_countdown: Option<usize>,
    journal: Vec<DeviceEvent>,
    violations: Vec<String>,
    stats: HeadlessStats,
}

impl HeadlessState {
    fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            next_handle: 1,
            next_submission: 1,
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            swapchains: HashMap::new(),
            image_owner: HashMap::new(),
            views: HashMap::new(),
            queue: VecDeque::new(),
            pending_command_buffers: HashSet::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            submit_script: VecDeque::new(),
            view_failure_countdown: None,
            journal: Vec::new(),
            violations: Vec::new(),
            stats: HeadlessStats::default(),
        }
    }

    fn next_raw(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn violation(&mut self, message: String) {
        warn!("Headless device usage violation: {}", message);
        self.violations.push(message);
    }

    /// Completes queued submissions in order up to and including `id`.
    fn retire_through(&mut self, id: u64) {
        while self.queue.front().is_some_and(|s| s.id <= id) {
            let Some(submission) = self.queue.pop_front() else {
                break;
            };

            if let Some(fence) = self.fences.get_mut(&submission.fence) {
                fence.signaled = true;
                fence.pending = None;
            }
            // Presentation may already have consumed the signal
            if let Some(state) = self.semaphores.get_mut(&submission.signal_semaphore)
                && *state == SemaphoreState::Pending(submission.id)
            {
                *state = SemaphoreState::Signaled;
            }
            self.pending_command_buffers
                .remove(&submission.command_buffer);

            trace!("Retired submission {}", submission.id);
        }
    }

    fn retire_all(&mut self) {
        if let Some(last) = self.queue.back().map(|s| s.id) {
            self.retire_through(last);
        }
    }

    /// Consumes a semaphore wait. The semaphore must have a signal queued.
    fn consume_wait(&mut self, semaphore: vk::Semaphore, operation: &str) {
        match self.semaphores.get(&semaphore).copied() {
            Some(SemaphoreState::Signaled) | Some(SemaphoreState::Pending(_)) => {
                self.semaphores
                    .insert(semaphore, SemaphoreState::Unsignaled);
            }
            Some(SemaphoreState::Unsignaled) => self.violation(format!(
                "{} waits on semaphore {:?} that nothing will signal",
                operation, semaphore
            )),
            None => self.violation(format!(
                "{} waits on unknown semaphore {:?}",
                operation, semaphore
            )),
        }
    }
}

/// Host-simulated [`GpuDevice`].
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    /// Creates a device presenting to the default 1280x720 surface.
    pub fn new() -> Arc<Self> {
        Self::with_config(HeadlessConfig::default())
    }

    pub fn with_config(config: HeadlessConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HeadlessState::new(config)),
        })
    }

    /// Changes the surface extent. Every live swapchain becomes out of date
    /// if the extent actually changed.
    pub fn resize_surface(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        let extent = vk::Extent2D { width, height };
        if state.config.capabilities.current_extent == extent {
            return;
        }
        state.config.capabilities.current_extent = extent;
        for swapchain in state.swapchains.values_mut() {
            swapchain.out_of_date = true;
        }
        trace!("Headless surface resized to {}x{}", width, height);
    }

    /// Current surface extent.
    pub fn surface_extent(&self) -> vk::Extent2D {
        self.state.lock().config.capabilities.current_extent
    }

    /// Replaces the formats the surface reports.
    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.lock().config.formats = formats;
    }

    /// Replaces the present modes the surface reports.
    pub fn set_present_modes(&self, present_modes: Vec<vk::PresentModeKHR>) {
        self.state.lock().config.present_modes = present_modes;
    }

    /// Makes an upcoming acquire report `result`.
    ///
    /// `SUBOPTIMAL_KHR` acquires an image normally and flags it suboptimal;
    /// any error code fails the acquire without touching the semaphore.
    pub fn inject_acquire_result(&self, result: vk::Result) {
        self.state.lock().acquire_script.push_back(result);
    }

    /// Makes an upcoming present report `result`. The present itself still
    /// takes place.
    pub fn inject_present_result(&self, result: vk::Result) {
        self.state.lock().present_script.push_back(result);
    }

    /// Makes an upcoming graphics submission report `result`. An error code
    /// fails the submit before anything is queued.
    pub fn inject_submit_result(&self, result: vk::Result) {
        self.state.lock().submit_script.push_back(result);
    }

    /// Fails the image view creation `after` calls from now.
    pub fn fail_image_view_creation(&self, after: usize) {
        self.state.lock().view_failure_countdown = Some(after);
    }

    /// Hands out command buffer handles. They need no recording.
    pub fn allocate_command_buffers(&self, count: usize) -> Vec<vk::CommandBuffer> {
        let mut state = self.state.lock();
        (0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.next_raw()))
            .collect()
    }

    /// Writes a label into the journal.
    pub fn mark(&self, label: impl Into<String>) {
        self.state
            .lock()
            .journal
            .push(DeviceEvent::Marker(label.into()));
    }

    pub fn journal(&self) -> Vec<DeviceEvent> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Usage rule violations recorded so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    /// Submissions queued and not yet retired.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state.lock();
        LiveObjects {
            fences: state.fences.len(),
            semaphores: state.semaphores.len(),
            swapchains: state.swapchains.len(),
            image_views: state.views.len(),
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(state.next_raw());
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                pending: None,
            },
        );
        state
            .journal
            .push(DeviceEvent::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        match state.fences.remove(&fence) {
            Some(FenceState {
                pending: Some(id), ..
            }) => state.violation(format!(
                "fence {:?} destroyed while submission {} is pending",
                fence, id
            )),
            Some(_) => {}
            None => state.violation(format!("destroy of unknown fence {:?}", fence)),
        }
        state.journal.push(DeviceEvent::DestroyFence(fence));
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.stats.fence_waits += 1;

        for &fence in fences {
            state.journal.push(DeviceEvent::WaitFence(fence));
            let Some(fence_state) = state.fences.get(&fence).copied() else {
                return Err(RhiError::InvalidHandle(format!("unknown fence {:?}", fence)));
            };

            if fence_state.signaled {
                continue;
            }

            match fence_state.pending {
                Some(_) if timeout == 0 => return Err(RhiError::VulkanError(vk::Result::TIMEOUT)),
                Some(id) => state.retire_through(id),
                None if timeout == u64::MAX => {
                    state.violation(format!(
                        "indefinite wait on fence {:?} that nothing will signal",
                        fence
                    ));
                    return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
                }
                None => return Err(RhiError::VulkanError(vk::Result::TIMEOUT)),
            }
        }

        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()> {
        let mut state = self.state.lock();
        for &fence in fences {
            state.journal.push(DeviceEvent::ResetFence(fence));
            let Some(fence_state) = state.fences.get(&fence).copied() else {
                return Err(RhiError::InvalidHandle(format!("unknown fence {:?}", fence)));
            };

            if let Some(id) = fence_state.pending {
                state.violation(format!(
                    "fence {:?} reset while submission {} is pending",
                    fence, id
                ));
                continue;
            }

            if let Some(fence_state) = state.fences.get_mut(&fence) {
                fence_state.signaled = false;
            }
        }
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        self.state
            .lock()
            .fences
            .get(&fence)
            .map(|f| f.signaled)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {:?}", fence)))
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = vk::Semaphore::from_raw(state.next_raw());
        state
            .semaphores
            .insert(semaphore, SemaphoreState::Unsignaled);
        state.journal.push(DeviceEvent::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        match state.semaphores.remove(&semaphore) {
            Some(SemaphoreState::Pending(id)) => state.violation(format!(
                "semaphore {:?} destroyed while submission {} is pending",
                semaphore, id
            )),
            Some(_) => {}
            None => state.violation(format!("destroy of unknown semaphore {:?}", semaphore)),
        }
        state
            .journal
            .push(DeviceEvent::DestroySemaphore(semaphore));
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        let state = self.state.lock();
        Ok(SwapchainSupportDetails {
            capabilities: state.config.capabilities,
            formats: state.config.formats.clone(),
            present_modes: state.config.present_modes.clone(),
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        let caps = state.config.capabilities;

        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation(format!(
                "swapchain created with zero extent {}x{}",
                desc.extent.width, desc.extent.height
            ));
        }
        if caps.current_extent.width != u32::MAX && desc.extent != caps.current_extent {
            state.violation(format!(
                "swapchain extent {}x{} does not match surface extent {}x{}",
                desc.extent.width,
                desc.extent.height,
                caps.current_extent.width,
                caps.current_extent.height
            ));
        }
        if desc.min_image_count < caps.min_image_count {
            state.violation(format!(
                "swapchain requests {} images, surface minimum is {}",
                desc.min_image_count, caps.min_image_count
            ));
        }

        let swapchain = vk::SwapchainKHR::from_raw(state.next_raw());
        let image_count = (if caps.max_image_count > 0 {
            desc.min_image_count.min(caps.max_image_count)
        } else {
            desc.min_image_count
        }) as usize;

        let mut images = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            let image = vk::Image::from_raw(state.next_raw());
            state.image_owner.insert(image, swapchain);
            images.push(image);
        }

        state.swapchains.insert(
            swapchain,
            SwapchainState {
                images,
                held: vec![false; image_count],
                next: 0,
                out_of_date: false,
            },
        );
        state.stats.swapchains_created += 1;
        state.journal.push(DeviceEvent::CreateSwapchain {
            swapchain,
            image_count,
            extent: desc.extent,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown swapchain {:?}", swapchain)))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let Some(chain) = state.swapchains.remove(&swapchain) else {
            state.violation(format!("destroy of unknown swapchain {:?}", swapchain));
            return;
        };

        let orphaned_views = state
            .views
            .values()
            .filter(|image| chain.images.contains(image))
            .count();
        if orphaned_views > 0 {
            state.violation(format!(
                "swapchain {:?} destroyed before {} of its image views",
                swapchain, orphaned_views
            ));
        }
        let pending = state.queue.len();
        if pending > 0 {
            state.violation(format!(
                "swapchain {:?} destroyed with {} submissions pending",
                swapchain, pending
            ));
        }

        for image in &chain.images {
            state.image_owner.remove(image);
        }
        state
            .journal
            .push(DeviceEvent::DestroySwapchain(swapchain));
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> RhiResult<vk::ImageView> {
        let mut state = self.state.lock();

        match state.view_failure_countdown {
            Some(0) => {
                state.view_failure_countdown = None;
                return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
            }
            Some(n) => state.view_failure_countdown = Some(n - 1),
            None => {}
        }

        if !state.image_owner.contains_key(&image) {
            state.violation(format!("view created for unknown image {:?}", image));
        }

        let view = vk::ImageView::from_raw(state.next_raw());
        state.views.insert(view, image);
        state.journal.push(DeviceEvent::CreateImageView(view));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        if state.views.remove(&view).is_none() {
            state.violation(format!("destroy of unknown image view {:?}", view));
        }
        state.journal.push(DeviceEvent::DestroyImageView(view));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        let mut state = self.state.lock();

        let scripted = state.acquire_script.pop_front();
        let suboptimal = match scripted {
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(vk::Result::SUCCESS) | None => false,
            Some(error) => return Err(error),
        };

        let lookup = state.swapchains.get(&swapchain).map(|chain| {
            let count = chain.images.len();
            let free = (0..count)
                .map(|k| (chain.next + k) % count)
                .find(|&i| !chain.held[i]);
            (chain.out_of_date, count, free)
        });
        let Some((out_of_date, count, free)) = lookup else {
            state.violation(format!("acquire from unknown swapchain {:?}", swapchain));
            return Err(vk::Result::ERROR_DEVICE_LOST);
        };
        if out_of_date {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }

        match state.semaphores.get(&semaphore).copied() {
            Some(SemaphoreState::Unsignaled) => {}
            Some(_) => state.violation(format!(
                "acquire signals semaphore {:?} that already has a signal queued",
                semaphore
            )),
            None => state.violation(format!("acquire signals unknown semaphore {:?}", semaphore)),
        }

        let Some(index) = free else {
            state.violation(format!(
                "acquire with all {} images of {:?} already acquired",
                count, swapchain
            ));
            return Err(vk::Result::NOT_READY);
        };

        if let Some(chain) = state.swapchains.get_mut(&swapchain) {
            chain.held[index] = true;
            chain.next = (index + 1) % count;
        }
        state
            .semaphores
            .insert(semaphore, SemaphoreState::Signaled);
        state.stats.acquires += 1;
        state.journal.push(DeviceEvent::Acquire {
            swapchain,
            image_index: index as u32,
        });

        Ok((index as u32, suboptimal))
    }

    fn submit_graphics(&self, submission: &FrameSubmission) -> RhiResult<()> {
        let mut state = self.state.lock();

        if let Some(result) = state.submit_script.pop_front()
            && result != vk::Result::SUCCESS
        {
            return Err(RhiError::VulkanError(result));
        }

        match state.fences.get(&submission.fence).copied() {
            Some(FenceState {
                pending: Some(id), ..
            }) => state.violation(format!(
                "submit with fence {:?} still pending from submission {}",
                submission.fence, id
            )),
            Some(FenceState { signaled: true, .. }) => state.violation(format!(
                "submit with fence {:?} that was not reset",
                submission.fence
            )),
            Some(_) => {}
            None => {
                return Err(RhiError::InvalidHandle(format!(
                    "unknown fence {:?}",
                    submission.fence
                )));
            }
        }

        if state
            .pending_command_buffers
            .contains(&submission.command_buffer)
        {
            state.violation(format!(
                "command buffer {:?} resubmitted while still pending",
                submission.command_buffer
            ));
        }

        state.consume_wait(submission.wait_semaphore, "submit");

        if state.semaphores.get(&submission.signal_semaphore) != Some(&SemaphoreState::Unsignaled) {
            state.violation(format!(
                "submit signals semaphore {:?} that is unknown or already signaled",
                submission.signal_semaphore
            ));
        }

        let id = state.next_submission;
        state.next_submission += 1;

        state.fences.insert(
            submission.fence,
            FenceState {
                signaled: false,
                pending: Some(id),
            },
        );
        state
            .semaphores
            .insert(submission.signal_semaphore, SemaphoreState::Pending(id));
        state
            .pending_command_buffers
            .insert(submission.command_buffer);
        state.queue.push_back(Submission {
            id,
            command_buffer: submission.command_buffer,
            fence: submission.fence,
            signal_semaphore: submission.signal_semaphore,
        });

        state.stats.submissions += 1;
        state.stats.max_pending_submissions =
            state.stats.max_pending_submissions.max(state.queue.len());
        state.journal.push(DeviceEvent::Submit {
            id,
            command_buffer: submission.command_buffer,
            fence: submission.fence,
        });
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let mut state = self.state.lock();

        let lookup = state
            .swapchains
            .get(&swapchain)
            .map(|chain| (chain.out_of_date, chain.held.get(image_index as usize).copied()));
        let Some((out_of_date, held)) = lookup else {
            state.violation(format!("present to unknown swapchain {:?}", swapchain));
            return Err(vk::Result::ERROR_DEVICE_LOST);
        };

        state.consume_wait(wait_semaphore, "present");

        match held {
            Some(true) => {
                if let Some(chain) = state.swapchains.get_mut(&swapchain) {
                    chain.held[image_index as usize] = false;
                }
            }
            Some(false) => state.violation(format!(
                "present of image {} that was not acquired",
                image_index
            )),
            None => state.violation(format!("present of out-of-range image {}", image_index)),
        }

        let outcome = match state.present_script.pop_front() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(vk::Result::SUCCESS) | None if out_of_date => {
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
            }
            Some(vk::Result::SUCCESS) | None => Ok(false),
            Some(error) => Err(error),
        };

        if outcome.is_ok() {
            state.stats.presents += 1;
            state.journal.push(DeviceEvent::Present {
                swapchain,
                image_index,
            });
        }
        outcome
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.retire_all();
        state.stats.idle_waits += 1;
        state.journal.push(DeviceEvent::WaitIdle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> FrameSubmission {
        FrameSubmission {
            command_buffer,
            wait_semaphore: wait,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: signal,
            fence,
        }
    }

    fn chain(device: &HeadlessDevice) -> vk::SwapchainKHR {
        let support = device.surface_support().unwrap();
        device
            .create_swapchain(&SwapchainDesc {
                surface_format: support.formats[0],
                present_mode: vk::PresentModeKHR::FIFO,
                extent: support.capabilities.current_extent,
                min_image_count: 3,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            })
            .unwrap()
    }

    #[test]
    fn test_submission_retires_on_fence_wait() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let acquired = device.create_semaphore().unwrap();
        let complete = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1)[0];
        let swapchain = chain(&device);

        let (index, suboptimal) = device.acquire_next_image(swapchain, acquired).unwrap();
        assert_eq!(index, 0);
        assert!(!suboptimal);

        device
            .submit_graphics(&submission(cb, acquired, complete, fence))
            .unwrap();
        assert_eq!(device.pending_submissions(), 1);
        assert!(!device.fence_status(fence).unwrap());

        device.wait_for_fences(&[fence], u64::MAX).unwrap();
        assert_eq!(device.pending_submissions(), 0);
        assert!(device.fence_status(fence).unwrap());

        assert_eq!(device.present(swapchain, index, complete), Ok(false));
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_fence_rules_are_enforced() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(true).unwrap();
        let acquired = device.create_semaphore().unwrap();
        let complete = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1)[0];
        let swapchain = chain(&device);
        device.acquire_next_image(swapchain, acquired).unwrap();

        // Submitting with a signaled fence
        device
            .submit_graphics(&submission(cb, acquired, complete, fence))
            .unwrap();
        assert_eq!(device.violations().len(), 1);

        // Resetting it while pending
        device.reset_fences(&[fence]).unwrap();
        assert_eq!(device.violations().len(), 2);
    }

    #[test]
    fn test_indefinite_wait_without_signal_is_device_lost() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();

        let err = device.wait_for_fences(&[fence], u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn test_submit_waiting_on_unsignaled_semaphore() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let never = device.create_semaphore().unwrap();
        let complete = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1)[0];

        device
            .submit_graphics(&submission(cb, never, complete, fence))
            .unwrap();
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn test_resize_makes_chain_out_of_date() {
        let device = HeadlessDevice::new();
        let acquired = device.create_semaphore().unwrap();
        let swapchain = chain(&device);

        device.resize_surface(1280, 720);
        assert!(device.acquire_next_image(swapchain, acquired).is_ok());

        let complete = device.create_semaphore().unwrap();
        let fence = device.create_fence(false).unwrap();
        let cb = device.allocate_command_buffers(1)[0];
        device
            .submit_graphics(&submission(cb, acquired, complete, fence))
            .unwrap();

        device.resize_surface(640, 480);
        assert_eq!(
            device.present(swapchain, 0, complete),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        assert_eq!(
            device.acquire_next_image(swapchain, acquired),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_scripted_results() {
        let device = HeadlessDevice::new();
        let acquired = device.create_semaphore().unwrap();
        let swapchain = chain(&device);

        device.inject_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        device.inject_acquire_result(vk::Result::SUBOPTIMAL_KHR);

        assert_eq!(
            device.acquire_next_image(swapchain, acquired),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        assert_eq!(device.acquire_next_image(swapchain, acquired), Ok((0, true)));
        assert_eq!(device.stats().acquires, 1);
    }

    #[test]
    fn test_destroying_chain_before_views_is_flagged() {
        let device = HeadlessDevice::new();
        let swapchain = chain(&device);
        let image = device.swapchain_images(swapchain).unwrap()[0];
        let view = device
            .create_image_view(image, vk::Format::B8G8R8A8_SRGB)
            .unwrap();

        device.destroy_swapchain(swapchain);
        device.destroy_image_view(view);

        let violations = device.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("before"));
    }

    #[test]
    fn test_journal_and_markers() {
        let device = HeadlessDevice::new();
        device.mark("start");
        let fence = device.create_fence(true).unwrap();
        device.wait_idle().unwrap();

        assert_eq!(
            device.journal(),
            vec![
                DeviceEvent::Marker("start".to_string()),
                DeviceEvent::CreateFence {
                    fence,
                    signaled: true
                },
                DeviceEvent::WaitIdle,
            ]
        );

        device.clear_journal();
        assert!(device.journal().is_empty());
    }

    #[test]
    fn test_destroying_chain_with_pending_work_is_flagged() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let acquired = device.create_semaphore().unwrap();
        let complete = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1)[0];
        let swapchain = chain(&device);

        device.acquire_next_image(swapchain, acquired).unwrap();
        device
            .submit_graphics(&submission(cb, acquired, complete, fence))
            .unwrap();
        device.destroy_swapchain(swapchain);

        let violations = device.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("1 submissions pending"));
        assert_eq!(device.live_objects().swapchains, 0);
    }

    #[test]
    fn test_scripted_submit_failure() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let acquired = device.create_semaphore().unwrap();
        let complete = device.create_semaphore().unwrap();
        let cb = device.allocate_command_buffers(1)[0];
        let swapchain = chain(&device);
        device.acquire_next_image(swapchain, acquired).unwrap();

        device.inject_submit_result(vk::Result::ERROR_DEVICE_LOST);
        let err = device
            .submit_graphics(&submission(cb, acquired, complete, fence))
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        ));
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(device.stats().submissions, 0);

        // Nothing was consumed, so the same submission goes through next
        device
            .submit_graphics(&submission(cb, acquired, complete, fence))
            .unwrap();
        assert_eq!(device.pending_submissions(), 1);
        assert!(device.violations().is_empty());
    }
}
