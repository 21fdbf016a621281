/// Something with a drawable area that may shrink to nothing.
///
/// Surface rebuilds cannot proceed while either dimension is zero, which is
/// what a minimized window reports. The rebuild loop polls
/// [`drawable_size`](Self::drawable_size) and parks in
/// [`wait_events`](Self::wait_events) until it changes.
pub trait DrawableSurface {
    /// Current drawable size in physical pixels.
    fn drawable_size(&self) -> (u32, u32);

    /// Blocks until at least one platform event has been processed.
    fn wait_events(&mut self);

    /// Whether the user asked to close. Waiting for a non-zero size gives up
    /// once this is set.
    fn close_requested(&self) -> bool {
        false
    }

    fn is_minimized(&self) -> bool {
        let (width, height) = self.drawable_size();
        width == 0 || height == 0
    }
}
