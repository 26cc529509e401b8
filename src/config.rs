use std::sync::LazyLock;

use vfw_encoder::frame::FrameRate;

/// Stream shape of the synthetic source.
pub struct DemoConfig {
    width: u32,
    height: u32,
    fps: FrameRate,
}

impl DemoConfig {
    pub fn new(width: u32, height: u32, fps: FrameRate) -> Self {
        Self { width, height, fps }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> FrameRate {
        self.fps
    }
}

pub fn config() -> &'static DemoConfig {
    static CONFIG: LazyLock<DemoConfig> =
        LazyLock::new(|| DemoConfig::new(640, 360, FrameRate::new(30, 1)));
    &CONFIG
}
