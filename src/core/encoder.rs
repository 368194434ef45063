//! Intermediate stream encoder via FFmpeg (ffmpeg-next crate).
//! Writes the inpainted picture track, frame-accurate and audio-free; the
//! original audio is reattached later by the remux stage.

use std::path::PathBuf;

/// Encoder configuration: binds output path, frame rate and resolution.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub output_path: PathBuf,
    /// Key frame interval (GOP size)
    pub keyframe_interval: u32,
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32, frame_rate: u32, output_path: PathBuf) -> Self {
        Self {
            width,
            height,
            frame_rate,
            output_path,
            keyframe_interval: 120,
        }
    }

    /// Reject combinations no container can be opened for.
    pub fn validate(&self) -> Result<(), EncoderError> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::Init(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(EncoderError::Init("frame rate must be positive".into()));
        }
        Ok(())
    }
}

/// A raw video frame to encode
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
}

impl VideoFrame {
    /// Copy the pixel rows into a destination buffer whose rows may be
    /// padded to a larger stride (codec buffers align line sizes).
    pub fn copy_rows_to(&self, dst: &mut [u8], dst_stride: usize) {
        let src_stride = self.stride as usize;
        if dst_stride == src_stride {
            let len = self.data.len().min(dst.len());
            dst[..len].copy_from_slice(&self.data[..len]);
            return;
        }

        let row_bytes = (self.width * 4) as usize;
        for y in 0..self.height as usize {
            let src_offset = y * src_stride;
            let dst_offset = y * dst_stride;
            dst[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&self.data[src_offset..src_offset + row_bytes]);
        }
    }
}

/// Encoder error types
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Encoder already started")]
    AlreadyStarted,
    #[error("Encoder not started")]
    NotStarted,
    #[error("Encoder init failed: {0}")]
    Init(String),
    #[error("Frame write failed: {0}")]
    Write(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Video encoder abstraction trait.
pub trait VideoEncoder: Send {
    /// Open the output container; fails with [`EncoderError::Init`] when the
    /// resolution/frame-rate/container combination cannot be opened, leaving
    /// no file on disk.
    fn start(&mut self) -> Result<(), EncoderError>;

    /// Append a video frame (must be called in source order)
    fn append_frame(&mut self, frame: &VideoFrame) -> Result<(), EncoderError>;

    /// Finalize the container and release the file handle
    fn finish(&mut self) -> Result<PathBuf, EncoderError>;

    /// Check if encoder is actively encoding
    fn is_encoding(&self) -> bool;

    /// Get the number of frames encoded so far
    fn frames_encoded(&self) -> u64;
}

/// Stub encoder for tests and ffmpeg-less builds (writes no actual video)
pub struct StubEncoder {
    config: EncoderConfig,
    encoding: bool,
    frame_count: u64,
    /// When set, the next `append_frame` fails (for abort-path tests)
    pub fail_write_after: Option<u64>,
}

impl StubEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            encoding: false,
            frame_count: 0,
            fail_write_after: None,
        }
    }
}

impl VideoEncoder for StubEncoder {
    fn start(&mut self) -> Result<(), EncoderError> {
        if self.encoding {
            return Err(EncoderError::AlreadyStarted);
        }
        self.config.validate()?;
        self.encoding = true;
        self.frame_count = 0;
        Ok(())
    }

    fn append_frame(&mut self, _frame: &VideoFrame) -> Result<(), EncoderError> {
        if !self.encoding {
            return Err(EncoderError::NotStarted);
        }
        if let Some(limit) = self.fail_write_after {
            if self.frame_count >= limit {
                return Err(EncoderError::Write("stub write failure".into()));
            }
        }
        self.frame_count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf, EncoderError> {
        if !self.encoding {
            return Err(EncoderError::NotStarted);
        }
        self.encoding = false;
        // Placeholder file so downstream stages see output at the path
        std::fs::write(&self.config.output_path, [])?;
        Ok(self.config.output_path.clone())
    }

    fn is_encoding(&self) -> bool {
        self.encoding
    }

    fn frames_encoded(&self) -> u64 {
        self.frame_count
    }
}

/// FFmpeg-based encoder using ffmpeg-next.
/// Encodes BGRA frames to an H.264 MP4 intermediate. The intermediate is
/// near-lossless (ultrafast/CRF 18); the user's bitrate applies at remux.
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_encoder {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg::codec;
    use ffmpeg::format;
    use ffmpeg::software::scaling;
    use ffmpeg::util::frame::video::Video as FfmpegFrame;

    /// Wrapper to make scaling::Context Send-safe.
    /// SwsContext is safe to use from one thread at a time (our usage pattern).
    struct SendScaler(scaling::Context);
    // SAFETY: We only access the scaler from a single thread at a time.
    unsafe impl Send for SendScaler {}

    impl std::ops::Deref for SendScaler {
        type Target = scaling::Context;
        fn deref(&self) -> &Self::Target { &self.0 }
    }
    impl std::ops::DerefMut for SendScaler {
        fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
    }

    pub struct FfmpegEncoder {
        config: EncoderConfig,
        encoding: bool,
        frame_count: u64,
        output_ctx: Option<format::context::Output>,
        encoder: Option<codec::encoder::video::Encoder>,
        scaler: Option<SendScaler>,
        stream_index: usize,
        time_base: ffmpeg::Rational,
    }

    impl FfmpegEncoder {
        pub fn new(config: EncoderConfig) -> Result<Self, EncoderError> {
            ffmpeg::init().map_err(|e| EncoderError::Init(format!("FFmpeg init: {e}")))?;

            Ok(Self {
                config,
                encoding: false,
                frame_count: 0,
                output_ctx: None,
                encoder: None,
                scaler: None,
                stream_index: 0,
                time_base: ffmpeg::Rational::new(1, 30),
            })
        }

        /// A failed open must leave nothing behind on disk.
        fn remove_partial_output(&self) {
            if self.config.output_path.exists() {
                let _ = std::fs::remove_file(&self.config.output_path);
            }
        }

        fn open_output(&mut self) -> Result<(), EncoderError> {
            let path = &self.config.output_path;
            let mut output_ctx = format::output(path)
                .map_err(|e| EncoderError::Init(format!("Open output: {e}")))?;

            let codec = codec::encoder::find(codec::Id::H264)
                .ok_or_else(|| EncoderError::Init("H.264 encoder not found".into()))?;

            // Check global header flag before add_stream borrows output_ctx
            let needs_global_header = output_ctx.format().flags().contains(format::Flags::GLOBAL_HEADER);

            let mut stream = output_ctx.add_stream(codec)
                .map_err(|e| EncoderError::Init(format!("Add stream: {e}")))?;
            self.stream_index = stream.index();

            let time_base = ffmpeg::Rational::new(1, self.config.frame_rate as i32);
            self.time_base = time_base;

            let mut encoder_ctx = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .map_err(|e| EncoderError::Init(format!("Encoder context: {e}")))?;

            encoder_ctx.set_width(self.config.width);
            encoder_ctx.set_height(self.config.height);
            encoder_ctx.set_format(ffmpeg::format::Pixel::YUV420P);
            encoder_ctx.set_time_base(time_base);
            encoder_ctx.set_gop(self.config.keyframe_interval);
            encoder_ctx.set_threading(codec::threading::Config::count(4));

            if needs_global_header {
                encoder_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
            }

            // Near-lossless intermediate: quality is decided at the remux
            // stage where the user's bitrate applies.
            let mut opts = ffmpeg::Dictionary::new();
            opts.set("preset", "ultrafast");
            opts.set("crf", "18");

            let encoder = encoder_ctx.open_as_with(codec, opts)
                .map_err(|e| EncoderError::Init(format!("Open encoder: {e}")))?;

            stream.set_parameters(&encoder);

            output_ctx.write_header()
                .map_err(|e| EncoderError::Init(format!("Write header: {e}")))?;

            // BGRA -> YUV420P scaler
            let scaler = scaling::Context::get(
                ffmpeg::format::Pixel::BGRA,
                self.config.width,
                self.config.height,
                ffmpeg::format::Pixel::YUV420P,
                self.config.width,
                self.config.height,
                scaling::Flags::FAST_BILINEAR,
            ).map_err(|e| EncoderError::Init(format!("Scaler init: {e}")))?;

            self.output_ctx = Some(output_ctx);
            self.encoder = Some(encoder);
            self.scaler = Some(SendScaler(scaler));
            Ok(())
        }
    }

    impl VideoEncoder for FfmpegEncoder {
        fn start(&mut self) -> Result<(), EncoderError> {
            if self.encoding {
                return Err(EncoderError::AlreadyStarted);
            }
            self.config.validate()?;

            if let Err(e) = self.open_output() {
                // format::output may have created an empty file before the
                // codec setup failed
                self.remove_partial_output();
                return Err(e);
            }

            self.encoding = true;
            self.frame_count = 0;
            Ok(())
        }

        fn append_frame(&mut self, frame: &VideoFrame) -> Result<(), EncoderError> {
            if !self.encoding {
                return Err(EncoderError::NotStarted);
            }

            let encoder = self.encoder.as_mut().ok_or(EncoderError::NotStarted)?;
            let scaler = self.scaler.as_mut().ok_or(EncoderError::NotStarted)?;
            let output_ctx = self.output_ctx.as_mut().ok_or(EncoderError::NotStarted)?;

            // Create BGRA input frame. The frame's line size may be padded
            // past width*4, so rows are copied at the frame's own stride.
            let mut bgra_frame = FfmpegFrame::new(
                ffmpeg::format::Pixel::BGRA,
                frame.width,
                frame.height,
            );
            let dst_stride = bgra_frame.stride(0);
            frame.copy_rows_to(bgra_frame.data_mut(0), dst_stride);

            // Convert BGRA -> YUV420P
            let mut yuv_frame = FfmpegFrame::empty();
            scaler.run(&bgra_frame, &mut yuv_frame)
                .map_err(|e| EncoderError::Write(format!("Scale frame: {e}")))?;

            let pts = self.frame_count as i64;
            yuv_frame.set_pts(Some(pts));

            encoder.send_frame(&yuv_frame)
                .map_err(|e| EncoderError::Write(format!("Send frame: {e}")))?;

            // Receive and write encoded packets
            let mut packet = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(self.stream_index);
                let stream_tb = output_ctx
                    .stream(self.stream_index)
                    .map(|s| s.time_base())
                    .unwrap_or(self.time_base);
                packet.rescale_ts(self.time_base, stream_tb);
                packet.write_interleaved(output_ctx)
                    .map_err(|e| EncoderError::Write(format!("Write packet: {e}")))?;
            }

            self.frame_count += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf, EncoderError> {
            if !self.encoding {
                return Err(EncoderError::NotStarted);
            }

            let encoder = self.encoder.as_mut().ok_or(EncoderError::NotStarted)?;
            let output_ctx = self.output_ctx.as_mut().ok_or(EncoderError::NotStarted)?;

            // Flush encoder
            encoder.send_eof()
                .map_err(|e| EncoderError::Write(format!("Send EOF: {e}")))?;

            let mut packet = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(self.stream_index);
                let stream_tb = output_ctx
                    .stream(self.stream_index)
                    .map(|s| s.time_base())
                    .unwrap_or(self.time_base);
                packet.rescale_ts(self.time_base, stream_tb);
                packet.write_interleaved(output_ctx)
                    .map_err(|e| EncoderError::Write(format!("Write packet: {e}")))?;
            }

            output_ctx.write_trailer()
                .map_err(|e| EncoderError::Write(format!("Write trailer: {e}")))?;

            self.output_ctx = None;
            self.encoder = None;
            self.scaler = None;
            self.encoding = false;
            Ok(self.config.output_path.clone())
        }

        fn is_encoding(&self) -> bool {
            self.encoding
        }

        fn frames_encoded(&self) -> u64 {
            self.frame_count
        }
    }
}

/// Create the video encoder.
/// Returns the FFmpeg encoder when the `ffmpeg` feature is enabled,
/// otherwise falls back to the stub encoder.
pub fn create_encoder(config: EncoderConfig) -> Box<dyn VideoEncoder> {
    #[cfg(feature = "ffmpeg")]
    {
        match ffmpeg_encoder::FfmpegEncoder::new(config.clone()) {
            Ok(enc) => return Box::new(enc),
            Err(e) => {
                log::warn!("FFmpeg encoder init failed, falling back to stub: {e}");
            }
        }
    }

    Box::new(StubEncoder::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EncoderConfig {
        EncoderConfig::new(640, 480, 30, PathBuf::from("/tmp/wipeframe_test_intermediate.mp4"))
    }

    fn test_frame() -> VideoFrame {
        VideoFrame {
            data: vec![0u8; 640 * 480 * 4],
            width: 640,
            height: 480,
            stride: 640 * 4,
            pts: 0.0,
        }
    }

    #[test]
    fn test_encoder_config_defaults() {
        let cfg = test_config();
        assert_eq!(cfg.width, 640);
        assert_eq!(cfg.height, 480);
        assert_eq!(cfg.frame_rate, 30);
        assert_eq!(cfg.keyframe_interval, 120);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_resolution() {
        let cfg = EncoderConfig::new(0, 0, 30, PathBuf::from("/tmp/x.mp4"));
        match cfg.validate() {
            Err(EncoderError::Init(_)) => {}
            other => panic!("Expected Init error, got {:?}", other),
        }
    }

    #[test]
    fn test_config_rejects_zero_frame_rate() {
        let cfg = EncoderConfig::new(640, 480, 0, PathBuf::from("/tmp/x.mp4"));
        assert!(matches!(cfg.validate(), Err(EncoderError::Init(_))));
    }

    #[test]
    fn test_stub_encoder_lifecycle() {
        let mut enc = StubEncoder::new(test_config());
        assert!(!enc.is_encoding());
        assert_eq!(enc.frames_encoded(), 0);

        enc.start().unwrap();
        assert!(enc.is_encoding());

        let frame = test_frame();
        enc.append_frame(&frame).unwrap();
        enc.append_frame(&frame).unwrap();
        assert_eq!(enc.frames_encoded(), 2);

        let path = enc.finish().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/wipeframe_test_intermediate.mp4"));
        assert!(!enc.is_encoding());
    }

    #[test]
    fn test_stub_encoder_init_failure_creates_no_file() {
        let path = std::env::temp_dir().join("wipeframe_never_created.mp4");
        let _ = std::fs::remove_file(&path);
        let mut enc = StubEncoder::new(EncoderConfig::new(0, 0, 30, path.clone()));
        assert!(matches!(enc.start(), Err(EncoderError::Init(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_stub_encoder_double_start_errors() {
        let mut enc = StubEncoder::new(test_config());
        enc.start().unwrap();
        match enc.start() {
            Err(EncoderError::AlreadyStarted) => {}
            other => panic!("Expected AlreadyStarted, got {:?}", other),
        }
    }

    #[test]
    fn test_stub_encoder_append_without_start_errors() {
        let mut enc = StubEncoder::new(test_config());
        match enc.append_frame(&test_frame()) {
            Err(EncoderError::NotStarted) => {}
            other => panic!("Expected NotStarted, got {:?}", other),
        }
    }

    #[test]
    fn test_stub_encoder_finish_without_start_errors() {
        let mut enc = StubEncoder::new(test_config());
        assert!(matches!(enc.finish(), Err(EncoderError::NotStarted)));
    }

    #[test]
    fn test_copy_rows_to_padded_stride() {
        // 3px-wide rows (12 bytes) into a buffer padded to 16-byte lines
        let width = 3u32;
        let height = 2u32;
        let src_stride = width * 4;
        let mut data = vec![0u8; (src_stride * height) as usize];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let frame = VideoFrame {
            data: data.clone(),
            width,
            height,
            stride: src_stride,
            pts: 0.0,
        };

        let dst_stride = 16usize;
        let mut dst = vec![0xFFu8; dst_stride * height as usize];
        frame.copy_rows_to(&mut dst, dst_stride);

        // Each row lands at its own padded offset, padding untouched
        assert_eq!(&dst[0..12], &data[0..12]);
        assert_eq!(&dst[12..16], &[0xFF; 4]);
        assert_eq!(&dst[16..28], &data[12..24]);
        assert_eq!(&dst[28..32], &[0xFF; 4]);
    }

    #[test]
    fn test_copy_rows_to_matching_stride() {
        let frame = test_frame();
        let mut dst = vec![0xAAu8; frame.data.len()];
        frame.copy_rows_to(&mut dst, frame.stride as usize);
        assert_eq!(dst, frame.data);
    }

    #[test]
    fn test_stub_encoder_injected_write_failure() {
        let mut enc = StubEncoder::new(test_config());
        enc.fail_write_after = Some(1);
        enc.start().unwrap();
        enc.append_frame(&test_frame()).unwrap();
        match enc.append_frame(&test_frame()) {
            Err(EncoderError::Write(_)) => {}
            other => panic!("Expected Write error, got {:?}", other),
        }
    }
}
