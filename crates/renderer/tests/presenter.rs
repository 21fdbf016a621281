//! Integration tests for the presenter against the headless device.

use std::collections::VecDeque;
use std::sync::Arc;

use ash::vk;

use swapframe_core::{FrameConfig, PresentModePreference};
use swapframe_platform::DrawableSurface;
use swapframe_renderer::headless::{
    HeadlessChain, MARK_REBUILD, MARK_RECORD, MARK_RELEASE_ATTACHMENTS, MARK_RELEASE_PER_IMAGE,
};
use swapframe_renderer::{FrameOutcome, Presenter, RebuildReason};
use swapframe_rhi::RhiError;
use swapframe_rhi::headless::{DeviceEvent, HeadlessConfig, HeadlessDevice};

/// A window whose size changes only when told to, or when events are
/// waited for and a size is queued.
struct ScriptedWindow {
    device: Arc<HeadlessDevice>,
    size: (u32, u32),
    queued: VecDeque<(u32, u32)>,
    waits: usize,
}

impl ScriptedWindow {
    fn new(device: Arc<HeadlessDevice>) -> Self {
        let extent = device.surface_extent();
        Self {
            device,
            size: (extent.width, extent.height),
            queued: VecDeque::new(),
            waits: 0,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.device.resize_surface(width, height);
    }

    fn queue_sizes(&mut self, sizes: &[(u32, u32)]) {
        self.queued.extend(sizes.iter().copied());
    }
}

impl DrawableSurface for ScriptedWindow {
    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some((width, height)) = self.queued.pop_front() {
            self.resize(width, height);
        }
    }

    // Nothing more will arrive, so a minimized window counts as closed.
    fn close_requested(&self) -> bool {
        self.queued.is_empty() && self.is_minimized()
    }
}

fn config(frames_in_flight: usize) -> FrameConfig {
    FrameConfig {
        frames_in_flight,
        present_mode: PresentModePreference::Vsync,
        ..Default::default()
    }
}

fn presenter(
    device: &Arc<HeadlessDevice>,
    frames_in_flight: usize,
) -> Presenter<HeadlessDevice, HeadlessChain> {
    let chain = HeadlessChain::new(device.clone());
    Presenter::new(
        device.clone(),
        &config(frames_in_flight),
        device.surface_extent(),
        chain,
    )
    .expect("Failed to create presenter")
}

fn slot_fences(presenter: &Presenter<HeadlessDevice, HeadlessChain>) -> Vec<vk::Fence> {
    presenter
        .sync()
        .slots()
        .map(|slot| slot.fence().handle())
        .collect()
}

fn position(journal: &[DeviceEvent], predicate: impl Fn(&DeviceEvent) -> bool) -> usize {
    journal
        .iter()
        .position(predicate)
        .expect("Event missing from journal")
}

fn marker(label: &'static str) -> impl Fn(&DeviceEvent) -> bool {
    move |event| matches!(event, DeviceEvent::Marker(m) if m == label)
}

#[test]
fn test_in_flight_submissions_bounded_by_slot_count() {
    for frames_in_flight in [1, 2, 3] {
        let device = HeadlessDevice::new();
        let mut window = ScriptedWindow::new(device.clone());
        let mut presenter = presenter(&device, frames_in_flight);

        for _ in 0..40 {
            presenter.drive_one_frame(&mut window, false).unwrap();
            assert!(device.pending_submissions() <= frames_in_flight);
        }

        let stats = device.stats();
        assert_eq!(stats.submissions, 40);
        assert_eq!(
            stats.max_pending_submissions, frames_in_flight,
            "{} slot(s) should allow exactly that many queued frames",
            frames_in_flight
        );
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }
}

#[test]
fn test_image_owned_by_another_slot_is_waited_for() {
    // Two images shared by three slots: every image is reused while its
    // previous slot may still be rendering to it.
    let device = HeadlessDevice::with_config(HeadlessConfig::default().with_image_count_limits(1, 2));
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 3);
    assert_eq!(presenter.surface().image_count(), 2);

    let fences = slot_fences(&presenter);

    presenter.drive_one_frame(&mut window, false).unwrap();
    presenter.drive_one_frame(&mut window, false).unwrap();
    device.clear_journal();

    // Slot 2 gets image 0, which slot 0 still owns.
    let outcome = presenter.drive_one_frame(&mut window, false).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            slot: 2,
            image_index: 0,
            rebuild: None
        }
    );

    let journal = device.journal();
    let acquire = position(&journal, |e| matches!(e, DeviceEvent::Acquire { .. }));
    let owner_wait = position(&journal, |e| *e == DeviceEvent::WaitFence(fences[0]));
    let submit = position(&journal, |e| matches!(e, DeviceEvent::Submit { .. }));
    assert!(acquire < owner_wait && owner_wait < submit);

    for _ in 0..20 {
        presenter.drive_one_frame(&mut window, false).unwrap();
    }
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_two_slots_three_images_ten_frames() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);
    assert_eq!(presenter.surface().image_count(), 3);

    let mut slots = Vec::new();
    for _ in 0..10 {
        match presenter.drive_one_frame(&mut window, false).unwrap() {
            FrameOutcome::Presented { slot, rebuild, .. } => {
                assert_eq!(rebuild, None);
                slots.push(slot);
            }
            other => panic!("Unexpected outcome {:?}", other),
        }
    }

    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(presenter.driver().frames_presented(), 10);
    assert_eq!(device.stats().presents, 10);
    assert_eq!(presenter.rebuild_count(), 0);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_rebuild_is_idempotent_and_keeps_slots() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    let format = presenter.surface().surface_format();
    let present_mode = presenter.surface().present_mode();
    let image_count = presenter.surface().image_count();
    let fences = slot_fences(&presenter);
    let live_before = device.live_objects();

    for _ in 0..3 {
        let outcome = presenter.drive_one_frame(&mut window, true).unwrap();
        assert_eq!(outcome.rebuild_reason(), Some(RebuildReason::Resized));
    }

    assert_eq!(presenter.rebuild_count(), 3);
    assert_eq!(presenter.surface().surface_format(), format);
    assert_eq!(presenter.surface().present_mode(), present_mode);
    assert_eq!(presenter.surface().image_count(), image_count);
    assert_eq!(presenter.chain().recorded_images(), image_count);
    assert!(presenter.chain().has_attachments());
    assert_eq!(slot_fences(&presenter), fences);
    assert_eq!(device.live_objects(), live_before);
    assert_eq!(device.stats().swapchains_created, 4);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_resize_rebuilds_at_new_extent() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    presenter.drive_one_frame(&mut window, false).unwrap();
    window.resize(1024, 768);

    let outcome = presenter.drive_one_frame(&mut window, true).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Abandoned {
            reason: RebuildReason::OutOfDate
        }
    );
    assert_eq!(
        presenter.surface().extent(),
        vk::Extent2D {
            width: 1024,
            height: 768
        }
    );
    assert_eq!(presenter.chain().extent(), presenter.surface().extent());
    assert_eq!(presenter.rebuild_count(), 1);

    // The abandoned cycle did not use up its slot.
    assert_eq!(presenter.driver().frame_counter(), 1);
    let outcome = presenter.drive_one_frame(&mut window, false).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented {
            slot: 1,
            rebuild: None,
            ..
        }
    ));
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_zero_extent_stalls_until_restored() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    presenter.drive_one_frame(&mut window, false).unwrap();

    window.resize(0, 0);
    window.queue_sizes(&[(0, 0), (640, 480)]);

    let outcome = presenter.drive_one_frame(&mut window, true).unwrap();
    assert_eq!(outcome.rebuild_reason(), Some(RebuildReason::OutOfDate));
    assert_eq!(window.waits, 2);
    assert_eq!(
        presenter.surface().extent(),
        vk::Extent2D {
            width: 640,
            height: 480
        }
    );

    for _ in 0..5 {
        let outcome = presenter.drive_one_frame(&mut window, false).unwrap();
        assert!(outcome.is_presented());
    }
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_closing_while_minimized_skips_rebuild() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    window.resize(0, 0);
    presenter.drive_one_frame(&mut window, true).unwrap();

    assert_eq!(window.waits, 0);
    assert_eq!(presenter.rebuild_count(), 0);
    assert!(presenter.surface().is_live());
    assert_eq!(device.stats().idle_waits, 0);
}

#[test]
fn test_suboptimal_present_triggers_rebuild() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    device.inject_present_result(vk::Result::SUBOPTIMAL_KHR);
    let outcome = presenter.drive_one_frame(&mut window, false).unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            slot: 0,
            image_index: 0,
            rebuild: Some(RebuildReason::Suboptimal)
        }
    );
    assert_eq!(presenter.rebuild_count(), 1);
    assert_eq!(presenter.driver().frames_presented(), 1);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_suboptimal_acquire_still_presents() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    device.inject_acquire_result(vk::Result::SUBOPTIMAL_KHR);
    let outcome = presenter.drive_one_frame(&mut window, false).unwrap();

    assert!(outcome.is_presented());
    assert_eq!(outcome.rebuild_reason(), Some(RebuildReason::Suboptimal));
    assert_eq!(device.stats().presents, 1);
    assert_eq!(presenter.rebuild_count(), 1);
}

#[test]
fn test_out_of_date_present_advances_counter() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    device.inject_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    let outcome = presenter.drive_one_frame(&mut window, false).unwrap();

    assert_eq!(outcome.rebuild_reason(), Some(RebuildReason::OutOfDate));
    assert_eq!(presenter.driver().frame_counter(), 1);
    assert_eq!(presenter.driver().frames_presented(), 0);
    assert_eq!(presenter.driver().frames_submitted(), 1);
    assert_eq!(presenter.rebuild_count(), 1);

    for _ in 0..4 {
        presenter.drive_one_frame(&mut window, false).unwrap();
    }
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_fatal_present_error_propagates() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    device.inject_present_result(vk::Result::ERROR_SURFACE_LOST_KHR);
    let result = presenter.drive_one_frame(&mut window, false);

    assert!(matches!(
        result,
        Err(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR))
    ));
    assert_eq!(presenter.rebuild_count(), 0);
}

#[test]
fn test_failed_submit_is_fatal() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 2);

    device.inject_submit_result(vk::Result::ERROR_DEVICE_LOST);
    let result = presenter.drive_one_frame(&mut window, false);

    assert!(matches!(
        result,
        Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
    ));
    assert_eq!(device.stats().submissions, 0);
    assert_eq!(device.stats().presents, 0);
    assert!(
        !device
            .journal()
            .iter()
            .any(|e| matches!(e, DeviceEvent::Present { .. }))
    );
    assert_eq!(presenter.rebuild_count(), 0);
    assert_eq!(presenter.driver().frame_counter(), 0);
    assert_eq!(presenter.driver().frames_submitted(), 0);
}

#[test]
fn test_rebuild_teardown_and_build_order() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());

    device.clear_journal();
    let mut presenter = presenter(&device, 2);
    let created_views: Vec<_> = device
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::CreateImageView(view) => Some(view),
            _ => None,
        })
        .collect();
    assert_eq!(created_views.len(), 3);

    presenter.drive_one_frame(&mut window, false).unwrap();
    device.clear_journal();
    presenter.drive_one_frame(&mut window, true).unwrap();
    let journal = device.journal();

    let idle = position(&journal, |e| *e == DeviceEvent::WaitIdle);
    let release_attachments = position(&journal, marker(MARK_RELEASE_ATTACHMENTS));
    let first_view_destroyed = position(&journal, |e| matches!(e, DeviceEvent::DestroyImageView(_)));
    let chain_destroyed = position(&journal, |e| matches!(e, DeviceEvent::DestroySwapchain(_)));
    let release_per_image = position(&journal, marker(MARK_RELEASE_PER_IMAGE));
    let chain_created = position(&journal, |e| matches!(e, DeviceEvent::CreateSwapchain { .. }));
    let rebuild = position(&journal, marker(MARK_REBUILD));
    let record = position(&journal, marker(MARK_RECORD));

    assert!(idle < release_attachments);
    assert!(release_attachments < first_view_destroyed);
    assert!(first_view_destroyed < chain_destroyed);
    assert!(chain_destroyed < release_per_image);
    assert!(release_per_image < chain_created);
    assert!(chain_created < rebuild);
    assert!(rebuild < record);

    // Views go in reverse creation order.
    let destroyed_views: Vec<_> = journal
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::DestroyImageView(view) => Some(*view),
            _ => None,
        })
        .collect();
    let mut expected = created_views;
    expected.reverse();
    assert_eq!(destroyed_views, expected);

    // The slot ring is untouched by a rebuild.
    assert!(!journal.iter().any(|e| matches!(
        e,
        DeviceEvent::CreateFence { .. }
            | DeviceEvent::DestroyFence(_)
            | DeviceEvent::CreateSemaphore(_)
            | DeviceEvent::DestroySemaphore(_)
    )));
}

#[test]
fn test_shutdown_releases_in_order() {
    let device = HeadlessDevice::new();
    let mut window = ScriptedWindow::new(device.clone());
    let mut presenter = presenter(&device, 3);

    for _ in 0..5 {
        presenter.drive_one_frame(&mut window, false).unwrap();
    }
    device.clear_journal();
    presenter.shutdown().unwrap();

    let journal = device.journal();
    let idle = position(&journal, |e| *e == DeviceEvent::WaitIdle);
    let release_attachments = position(&journal, marker(MARK_RELEASE_ATTACHMENTS));
    let first_view_destroyed = position(&journal, |e| matches!(e, DeviceEvent::DestroyImageView(_)));
    let chain_destroyed = position(&journal, |e| matches!(e, DeviceEvent::DestroySwapchain(_)));
    let release_per_image = position(&journal, marker(MARK_RELEASE_PER_IMAGE));
    let first_fence_destroyed = position(&journal, |e| matches!(e, DeviceEvent::DestroyFence(_)));

    assert!(idle < release_attachments);
    assert!(release_attachments < first_view_destroyed);
    assert!(first_view_destroyed < chain_destroyed);
    assert!(chain_destroyed < release_per_image);
    assert!(release_per_image < first_fence_destroyed);

    let live = device.live_objects();
    assert_eq!(live.fences, 0);
    assert_eq!(live.semaphores, 0);
    assert_eq!(live.swapchains, 0);
    assert_eq!(live.image_views, 0);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn test_invalid_config_rejected() {
    let device = HeadlessDevice::new();
    let chain = HeadlessChain::new(device.clone());
    let result = Presenter::new(device.clone(), &config(0), device.surface_extent(), chain);

    assert!(matches!(result, Err(RhiError::InvalidConfig(_))));
    assert_eq!(device.live_objects().swapchains, 0);
}

#[test]
fn test_present_mode_falls_back_to_fifo() {
    let device = HeadlessDevice::with_config(
        HeadlessConfig::default().with_present_modes(vec![vk::PresentModeKHR::FIFO]),
    );
    let chain = HeadlessChain::new(device.clone());
    let config = FrameConfig {
        present_mode: PresentModePreference::LowLatency,
        ..Default::default()
    };
    let presenter = Presenter::new(device.clone(), &config, device.surface_extent(), chain).unwrap();

    assert_eq!(presenter.surface().present_mode(), vk::PresentModeKHR::FIFO);
}

#[test]
fn test_rebuild_follows_changed_surface_support() {
    let unorm = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    let srgb = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    let device = HeadlessDevice::with_config(
        HeadlessConfig::default()
            .with_extent(640, 480)
            .with_formats(vec![unorm]),
    );
    let mut window = ScriptedWindow::new(device.clone());
    let chain = HeadlessChain::new(device.clone());
    let config = FrameConfig {
        present_mode: PresentModePreference::LowLatency,
        ..Default::default()
    };
    let mut presenter =
        Presenter::new(device.clone(), &config, device.surface_extent(), chain).unwrap();

    assert_eq!(
        presenter.surface().extent(),
        vk::Extent2D {
            width: 640,
            height: 480
        }
    );
    assert_eq!(presenter.surface().format(), vk::Format::B8G8R8A8_UNORM);
    assert_eq!(presenter.surface().present_mode(), vk::PresentModeKHR::MAILBOX);

    device.set_surface_formats(vec![unorm, srgb]);
    device.set_present_modes(vec![vk::PresentModeKHR::FIFO]);
    presenter.drive_one_frame(&mut window, true).unwrap();

    assert_eq!(presenter.rebuild_count(), 1);
    assert_eq!(presenter.surface().format(), vk::Format::B8G8R8A8_SRGB);
    assert_eq!(presenter.surface().present_mode(), vk::PresentModeKHR::FIFO);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}
