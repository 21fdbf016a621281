//! `--headless` run mode: the frame engine against the simulated device.
//!
//! Halfway through the run the simulated surface changes size, so every run
//! also exercises a rebuild. The run fails if the device recorded any usage
//! violation.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use swapframe_core::FrameConfig;
use swapframe_platform::DrawableSurface;
use swapframe_renderer::Presenter;
use swapframe_renderer::headless::HeadlessChain;
use swapframe_rhi::headless::HeadlessDevice;

pub const DEFAULT_FRAMES: u64 = 240;

/// A window that always matches the simulated surface.
struct SimulatedWindow {
    device: Arc<HeadlessDevice>,
}

impl DrawableSurface for SimulatedWindow {
    fn drawable_size(&self) -> (u32, u32) {
        let extent = self.device.surface_extent();
        (extent.width, extent.height)
    }

    fn wait_events(&mut self) {}

    // Nothing restores a minimized simulated surface
    fn close_requested(&self) -> bool {
        self.is_minimized()
    }
}

pub fn run(config: &FrameConfig, frames: u64) -> Result<()> {
    let device = HeadlessDevice::new();
    device.resize_surface(config.width, config.height);

    let chain = HeadlessChain::new(device.clone());
    let mut presenter = Presenter::new(device.clone(), config, device.surface_extent(), chain)
        .context("Failed to create presenter")?;
    let mut window = SimulatedWindow {
        device: device.clone(),
    };

    let resize_at = frames / 2;
    for frame in 0..frames {
        let resized = frame == resize_at && frame > 0;
        if resized {
            let (width, height) = window.drawable_size();
            device.resize_surface((width / 2).max(1), (height / 2).max(1));
        }

        let outcome = presenter
            .drive_one_frame(&mut window, resized)
            .with_context(|| format!("Frame {} failed", frame))?;
        if let Some(reason) = outcome.rebuild_reason() {
            info!("Frame {}: rebuilt ({})", frame, reason);
        }
    }

    let presented = presenter.driver().frames_presented();
    let rebuilds = presenter.rebuild_count();
    presenter.shutdown().context("Failed to shut down presenter")?;

    let stats = device.stats();
    info!(
        "Headless run: {} frame(s) presented, {} rebuild(s), {} submission(s), at most {} in flight",
        presented, rebuilds, stats.submissions, stats.max_pending_submissions
    );

    let violations = device.violations();
    if !violations.is_empty() {
        for violation in &violations {
            warn!("{}", violation);
        }
        bail!("{} device usage violation(s)", violations.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_run_is_clean() {
        let config = FrameConfig {
            frames_in_flight: 3,
            ..Default::default()
        };
        assert!(run(&config, 32).is_ok());
    }

    #[test]
    fn test_simulated_window_follows_surface() {
        let device = HeadlessDevice::new();
        let window = SimulatedWindow {
            device: device.clone(),
        };
        device.resize_surface(0, 0);
        assert!(window.is_minimized());
        assert!(window.close_requested());
    }
}
