//! swapframe - Main Entry Point
//!
//! Opens a window and presents a tinted triangle through the frame engine,
//! or runs the same engine against the simulated device with `--headless`.

mod headless;

use std::path::PathBuf;

use anyhow::{Context, Result};
use ash::vk;
use clap::Parser;
use tracing::{info, warn};

use swapframe_core::{FrameConfig, PresentModePreference, Timer};
use swapframe_platform::{DrawableSurface, PlatformWindow};
use swapframe_renderer::Presenter;
use swapframe_renderer::triangle::TrianglePass;
use swapframe_rhi::vulkan::VulkanDevice;

#[derive(Parser, Debug)]
#[command(name = "swapframe", version, about = "Frames-in-flight presentation demo")]
struct Args {
    /// Number of frames the CPU may record ahead of the GPU
    #[arg(long, default_value_t = 2)]
    frames_in_flight: usize,

    /// Initial window width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Present mode: mailbox, fifo or immediate
    #[arg(long, default_value = "mailbox")]
    present_mode: PresentModePreference,

    /// Run against the simulated device instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Directory holding the compiled SPIR-V shaders
    #[arg(long, default_value = "shaders/spirv")]
    shader_dir: PathBuf,

    /// Enable the Vulkan validation layer
    #[arg(long)]
    validation: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            frames_in_flight: self.frames_in_flight,
            width: self.width,
            height: self.height,
            present_mode: self.present_mode,
            validation: self.validation || cfg!(debug_assertions),
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    swapframe_core::init_logging(args.verbose);

    let config = args.frame_config();
    config.validate().context("Invalid frame configuration")?;
    info!(
        "Starting swapframe ({} frame(s) in flight, {:?})",
        config.frames_in_flight, config.present_mode
    );

    if args.headless {
        headless::run(&config, args.frames.unwrap_or(headless::DEFAULT_FRAMES))
    } else {
        run_windowed(&args, &config)
    }
}

fn run_windowed(args: &Args, config: &FrameConfig) -> Result<()> {
    let (mut window, resizes) = PlatformWindow::new(config).context("Failed to open window")?;
    let (display, window_handle) = window.raw_handles()?;

    // SAFETY: the window is declared first, so it outlives the device and
    // every surface object built on it.
    let device = unsafe { VulkanDevice::new(display, window_handle, config.validation) }
        .context("Failed to create Vulkan device")?;

    let pass = TrianglePass::new(device.clone(), &args.shader_dir)
        .context("Failed to create triangle pass")?;
    if !pass.draws_geometry() {
        warn!(
            "No shaders in {}, presenting a clear color only",
            args.shader_dir.display()
        );
    }

    let (width, height) = window.drawable_size();
    let mut presenter = Presenter::new(device, config, vk::Extent2D { width, height }, pass)
        .context("Failed to create presenter")?;

    info!("Initialization complete, entering main loop");
    let mut timer = Timer::new();
    let mut frames = 0u64;

    loop {
        window.poll_events();
        if window.close_requested() {
            info!("Close requested, shutting down");
            break;
        }

        let resized = resizes.take_pending();
        presenter
            .drive_one_frame(&mut window, resized)
            .context("Frame failed")?;
        frames += 1;

        if let Some(fps) = timer.frame() {
            info!("{:.1} fps, {} rebuild(s)", fps, presenter.rebuild_count());
            window.set_title(&format!("{} - {:.0} fps", config.title, fps));
        }

        if args.frames.is_some_and(|limit| frames >= limit) {
            info!("Frame limit reached");
            break;
        }
    }

    presenter.shutdown().context("Failed to shut down presenter")?;
    Ok(())
}
