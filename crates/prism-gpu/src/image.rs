//! Tracked image resource state.

use ash::vk;

/// Host-side state for an image whose layout transitions are recorded through
/// a [`CommandRecorder`](crate::command::CommandRecorder).
///
/// The usage flags and format are fixed at creation. The current layout is
/// the single authoritative copy for this image; only the command module can
/// write it, and only as part of a successfully validated transition.
#[derive(Debug)]
pub struct ImageState {
    image: vk::Image,
    usage: vk::ImageUsageFlags,
    format: vk::Format,
    current_layout: vk::ImageLayout,
}

impl ImageState {
    /// Track an image created with `UNDEFINED` initial layout.
    pub fn new(image: vk::Image, usage: vk::ImageUsageFlags, format: vk::Format) -> Self {
        Self::with_layout(image, usage, format, vk::ImageLayout::UNDEFINED)
    }

    /// Track an image with an explicit initial layout (e.g. `PREINITIALIZED`
    /// for linear staging images).
    pub fn with_layout(
        image: vk::Image,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            image,
            usage,
            format,
            current_layout: layout,
        }
    }

    /// Get the raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Usage flags declared at image creation.
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// The layout the image is currently in, as tracked across recorded
    /// transitions.
    pub fn current_layout(&self) -> vk::ImageLayout {
        self.current_layout
    }

    // Narrow write capability: only the command module transitions layouts.
    pub(crate) fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.current_layout = layout;
    }
}
