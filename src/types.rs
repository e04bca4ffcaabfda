//! Value types shared across the public API and the driver boundary.

/// Lowest tilt angle the motor can reach, in degrees.
pub const TILT_MIN_DEGREES: f64 = -31.0;
/// Highest tilt angle the motor can reach, in degrees.
pub const TILT_MAX_DEGREES: f64 = 31.0;

bitflags::bitflags! {
    /// Independently enabled hardware units within the sensor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Subdevices: u32 {
        const MOTOR  = 0x01;
        const CAMERA = 0x02;
        const AUDIO  = 0x04;
    }
}

impl Default for Subdevices {
    /// Camera plus motor, the combination most applications want.
    fn default() -> Self {
        Subdevices::CAMERA | Subdevices::MOTOR
    }
}

/// Image resolution of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Low,
    Medium,
    High,
}

/// Depth stream sample layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFormat {
    /// 11-bit samples stored one per u16 (little-endian).
    Depth11Bit,
    /// 10-bit samples stored one per u16 (little-endian).
    Depth10Bit,
    /// 11-bit samples bit-packed.
    Depth11BitPacked,
    /// 10-bit samples bit-packed.
    Depth10BitPacked,
}

/// Video stream sample layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    /// Demosaiced RGB, 3 bytes per pixel.
    Rgb,
    /// Raw Bayer pattern straight from the sensor, 1 byte per pixel.
    Bayer,
    /// 8-bit IR.
    Ir8Bit,
    /// 10-bit IR stored one sample per u16.
    Ir10Bit,
    /// 10-bit IR bit-packed.
    Ir10BitPacked,
    /// ISP-processed YUV already converted to RGB, 3 bytes per pixel.
    YuvRgb,
    /// Raw UYVY, 2 bytes per pixel.
    YuvRaw,
}

/// Motor LED states. Discriminants are the wire values; there is no 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Off = 0,
    Green = 1,
    Red = 2,
    Yellow = 3,
    BlinkGreen = 4,
    BlinkRedYellow = 6,
}

/// The two frame-producing streams of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Depth,
    Video,
}

/// Snapshot of the motor joint: current angle, motion status, and the
/// accelerometer reading, polled as one unit from the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltState {
    /// Current tilt angle in degrees.
    pub tilt_degrees: f64,
    /// Accelerometer reading in g, as (x, y, z).
    pub accelerometer: (f64, f64, f64),
    /// Whether the motor was moving when the state was sampled.
    pub moving: bool,
}

/// The negotiated combination of resolution, format, and bit depth that
/// governs a stream's buffer layout.
///
/// Plain value type; copied out to consumers, never shared by reference
/// across the thread boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMode {
    pub resolution: Resolution,
    pub video_format: Option<VideoFormat>,
    pub depth_format: Option<DepthFormat>,
    /// Total frame length in bytes.
    pub length: usize,
    pub width: usize,
    pub height: usize,
    /// Bits of payload per pixel.
    pub bits_per_pixel: u32,
    /// Padding bits per pixel (unpacked layouts).
    pub padding_bits_per_pixel: u32,
    /// Nominal frame rate in Hz.
    pub frame_rate: u32,
}

impl FrameMode {
    fn new(
        resolution: Resolution,
        width: usize,
        height: usize,
        bits_per_pixel: u32,
        padding_bits_per_pixel: u32,
        frame_rate: u32,
    ) -> Self {
        let total_bits = (bits_per_pixel + padding_bits_per_pixel) as usize;
        FrameMode {
            resolution,
            video_format: None,
            depth_format: None,
            length: width * height * total_bits / 8,
            width,
            height,
            bits_per_pixel,
            padding_bits_per_pixel,
            frame_rate,
        }
    }

    /// Look up the depth mode for a format. Depth streams only exist at
    /// medium resolution (640x480).
    pub fn depth(format: DepthFormat) -> FrameMode {
        let mut mode = match format {
            DepthFormat::Depth11Bit => FrameMode::new(Resolution::Medium, 640, 480, 11, 5, 30),
            DepthFormat::Depth10Bit => FrameMode::new(Resolution::Medium, 640, 480, 10, 6, 30),
            DepthFormat::Depth11BitPacked => {
                FrameMode::new(Resolution::Medium, 640, 480, 11, 0, 30)
            }
            DepthFormat::Depth10BitPacked => {
                FrameMode::new(Resolution::Medium, 640, 480, 10, 0, 30)
            }
        };
        mode.depth_format = Some(format);
        mode
    }

    /// Look up the video mode for a resolution/format pair, or `None` if
    /// the sensor has no such mode. IR frames are 488 lines tall at medium
    /// resolution; high-resolution modes run at 10 fps.
    pub fn video(resolution: Resolution, format: VideoFormat) -> Option<FrameMode> {
        let mut mode = match (resolution, format) {
            (Resolution::Medium, VideoFormat::Rgb) => {
                FrameMode::new(resolution, 640, 480, 24, 0, 30)
            }
            (Resolution::High, VideoFormat::Rgb) => {
                FrameMode::new(resolution, 1280, 1024, 24, 0, 10)
            }
            (Resolution::Medium, VideoFormat::Bayer) => {
                FrameMode::new(resolution, 640, 480, 8, 0, 30)
            }
            (Resolution::High, VideoFormat::Bayer) => {
                FrameMode::new(resolution, 1280, 1024, 8, 0, 10)
            }
            (Resolution::Medium, VideoFormat::Ir8Bit) => {
                FrameMode::new(resolution, 640, 488, 8, 0, 30)
            }
            (Resolution::High, VideoFormat::Ir8Bit) => {
                FrameMode::new(resolution, 1280, 1024, 8, 0, 10)
            }
            (Resolution::Medium, VideoFormat::Ir10Bit) => {
                FrameMode::new(resolution, 640, 488, 10, 6, 30)
            }
            (Resolution::High, VideoFormat::Ir10Bit) => {
                FrameMode::new(resolution, 1280, 1024, 10, 6, 10)
            }
            (Resolution::Medium, VideoFormat::Ir10BitPacked) => {
                FrameMode::new(resolution, 640, 488, 10, 0, 30)
            }
            (Resolution::High, VideoFormat::Ir10BitPacked) => {
                FrameMode::new(resolution, 1280, 1024, 10, 0, 10)
            }
            (Resolution::Medium, VideoFormat::YuvRgb) => {
                FrameMode::new(resolution, 640, 480, 24, 0, 15)
            }
            (Resolution::Medium, VideoFormat::YuvRaw) => {
                FrameMode::new(resolution, 640, 480, 16, 0, 15)
            }
            _ => return None,
        };
        mode.video_format = Some(format);
        Some(mode)
    }
}
