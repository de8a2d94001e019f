//! Split-view before/after comparison state
//!
//! The reveal position is a percentage of the container width. The cutout is
//! drawn over the source and clipped from the right by `100 - position`.

/// Position the comparator starts at
pub const INITIAL_POSITION: f64 = 50.0;

/// Horizontal extent of the comparison container, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerBounds {
    pub left: f64,
    pub width: f64,
}

impl ContainerBounds {
    #[must_use]
    pub fn new(left: f64, width: f64) -> Self {
        Self { left, width }
    }

    fn is_usable(&self) -> bool {
        self.left.is_finite() && self.width.is_finite() && self.width > 0.0
    }
}

/// Reveal position in `[0, 100]` plus pointer drag state
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    position: f64,
    dragging: bool,
}

impl Default for Comparator {
    fn default() -> Self {
        Self {
            position: INITIAL_POSITION,
            dragging: false,
        }
    }
}

impl Comparator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn begin_drag(&mut self) {
        self.dragging = true;
    }

    /// Also called for a pointer release anywhere outside the container
    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    /// Pointer movement; ignored unless a drag is in progress
    pub fn pointer_move(&mut self, x: f64, bounds: ContainerBounds) -> f64 {
        if self.dragging {
            self.update(x, bounds);
        }
        self.position
    }

    /// Touch movement always moves the handle
    pub fn touch_move(&mut self, x: f64, bounds: ContainerBounds) -> f64 {
        self.update(x, bounds);
        self.position
    }

    /// Handle offset in pixels from the container's left edge, within `[0, width]`
    #[must_use]
    pub fn handle_offset(&self, bounds: ContainerBounds) -> f64 {
        if !bounds.is_usable() {
            return 0.0;
        }
        (self.position / 100.0 * bounds.width).clamp(0.0, bounds.width)
    }

    /// Right clip inset of the cutout layer, in percent
    #[must_use]
    pub fn clip_inset_right(&self) -> f64 {
        100.0 - self.position
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, x: f64, bounds: ContainerBounds) {
        if !bounds.is_usable() || !x.is_finite() {
            return;
        }
        self.position = ((x - bounds.left) / bounds.width * 100.0).clamp(0.0, 100.0);
    }
}
