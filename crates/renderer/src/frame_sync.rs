//! Per-slot synchronization primitives and image ownership.
//!
//! The table holds a fixed ring of [`InFlightSlot`]s, created once and kept
//! across every surface rebuild, plus a map from chain image index to the
//! slot whose submission last used that image. The map stores slot indices;
//! the fence to wait on is always the owning slot's own fence.

use std::sync::Arc;

use tracing::{debug, info};

use swapframe_rhi::device::GpuDevice;
use swapframe_rhi::sync::InFlightSlot;
use swapframe_rhi::{RhiError, RhiResult};

/// Ring of in-flight slots plus the image ownership map.
pub struct FrameSyncTable<D: GpuDevice> {
    slots: Vec<InFlightSlot<D>>,
    image_owners: Vec<Option<usize>>,
}

impl<D: GpuDevice> FrameSyncTable<D> {
    /// Creates `frames_in_flight` slots and an empty ownership map for
    /// `image_count` images.
    ///
    /// Fences start signaled so the first wait on each slot returns at once.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::InvalidConfig` if `frames_in_flight` is zero, or
    /// the device error if a primitive cannot be created.
    pub fn new(device: Arc<D>, frames_in_flight: usize, image_count: usize) -> RhiResult<Self> {
        if frames_in_flight == 0 {
            return Err(RhiError::InvalidConfig(
                "At least one frame in flight is required".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            slots.push(InFlightSlot::new(device.clone())?);
            debug!("Created in-flight slot {}", i);
        }

        info!(
            "Frame sync table created: {} slot(s), {} image(s)",
            frames_in_flight, image_count
        );

        Ok(Self {
            slots,
            image_owners: vec![None; image_count],
        })
    }

    /// Number of slots, the configured frames in flight.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True only after [`teardown`](Self::teardown).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Option<&InFlightSlot<D>> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> impl Iterator<Item = &InFlightSlot<D>> {
        self.slots.iter()
    }

    /// Size of the ownership map.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.image_owners.len()
    }

    /// Slot whose submission last used `image_index`, if any.
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.image_owners
            .get(image_index as usize)
            .copied()
            .flatten()
    }

    /// Records `slot` as the owner of `image_index`, returning the previous
    /// owner.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::InvalidHandle` if either index is out of range.
    pub fn claim_image(&mut self, image_index: u32, slot: usize) -> RhiResult<Option<usize>> {
        if slot >= self.slots.len() {
            return Err(RhiError::InvalidHandle(format!(
                "Slot {} out of range ({} slots)",
                slot,
                self.slots.len()
            )));
        }

        let image_count = self.image_owners.len();
        let owner = self
            .image_owners
            .get_mut(image_index as usize)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "Image {} out of range ({} images)",
                    image_index, image_count
                ))
            })?;

        Ok(owner.replace(slot))
    }

    /// Resets the ownership map for a rebuilt chain. Slots are untouched.
    pub fn resize_ownership_map(&mut self, image_count: usize) {
        self.image_owners.clear();
        self.image_owners.resize(image_count, None);
        debug!("Ownership map reset for {} image(s)", image_count);
    }

    /// Destroys every slot. Only valid once the device is idle.
    pub fn teardown(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let count = self.slots.len();
        self.image_owners.clear();
        self.slots.clear();
        info!("Frame sync table torn down ({} slot(s))", count);
    }
}
