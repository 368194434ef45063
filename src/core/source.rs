//! Video source reader abstraction: sequential frame decode plus the stream
//! properties the pipeline needs (dimensions, frame rate, reported frame
//! count, audio presence).

use std::path::Path;

use super::frame::FrameBuffer;

/// Source reader errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to open source: {0}")]
    Open(String),
    #[error("No video stream in source")]
    NoVideoStream,
    #[error("Frame read failed: {0}")]
    Read(String),
}

/// A decodable video source.
///
/// `read_frame` decodes sequentially; `Ok(None)` marks a clean end of
/// stream. The reported `total_frames` comes from container metadata and may
/// exceed the number of frames that actually decode.
pub trait VideoSource: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn frame_rate(&self) -> f64;
    /// Frame count as reported by the container
    fn total_frames(&self) -> u64;
    fn has_audio(&self) -> bool;

    /// Reposition to the first frame
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// Decode the next frame in order; `Ok(None)` at end of stream
    fn read_frame(&mut self) -> Result<Option<FrameBuffer>, SourceError>;
}

/// Stub source that generates gradient test frames.
///
/// `reported_frames` and `decodable_frames` can differ so callers can
/// exercise sources whose metadata over-reports their length.
pub struct StubVideoSource {
    width: u32,
    height: u32,
    fps: f64,
    reported_frames: u64,
    decodable_frames: u64,
    has_audio: bool,
    cursor: u64,
    /// When set, `read_frame` fails once this frame index is reached
    pub fail_read_at: Option<u64>,
}

impl StubVideoSource {
    pub fn new(width: u32, height: u32, fps: f64, frames: u64) -> Self {
        Self {
            width,
            height,
            fps,
            reported_frames: frames,
            decodable_frames: frames,
            has_audio: false,
            cursor: 0,
            fail_read_at: None,
        }
    }

    /// Report more frames than actually decode (corrupt trailing frames)
    pub fn with_decodable_frames(mut self, decodable: u64) -> Self {
        self.decodable_frames = decodable;
        self
    }

    pub fn with_audio(mut self, has_audio: bool) -> Self {
        self.has_audio = has_audio;
        self
    }
}

impl VideoSource for StubVideoSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> u64 {
        self.reported_frames
    }

    fn has_audio(&self) -> bool {
        self.has_audio
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.cursor = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<FrameBuffer>, SourceError> {
        if let Some(fail_at) = self.fail_read_at {
            if self.cursor == fail_at {
                return Err(SourceError::Read(format!("stub decode failure at frame {fail_at}")));
            }
        }
        if self.cursor >= self.decodable_frames {
            return Ok(None);
        }

        // Gradient pattern that shifts per frame
        let t = self.cursor as f64 / self.reported_frames.max(1) as f64;
        let mut frame = FrameBuffer::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let fx = x as f64 / self.width as f64;
                let fy = y as f64 / self.height as f64;
                let b = (40.0 + t * 60.0) as u8;
                let g = ((fy + t * 0.5) % 1.0 * 80.0 + 20.0) as u8;
                let r = ((fx + t) % 1.0 * 100.0 + 30.0) as u8;
                frame.set_pixel(x, y, [b, g, r, 255]);
            }
        }

        self.cursor += 1;
        Ok(Some(frame))
    }
}

/// FFmpeg-based video source reader.
/// Decodes frames sequentially to BGRA for the processing pipeline.
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_source {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg::format;
    use ffmpeg::media::Type;
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

    pub struct FfmpegVideoSource {
        input_ctx: format::context::Input,
        video_stream_index: usize,
        decoder: ffmpeg::codec::decoder::Video,
        scaler: SendScaler,
        width: u32,
        height: u32,
        total: u64,
        fps: f64,
        has_audio: bool,
        eof_sent: bool,
    }

    impl FfmpegVideoSource {
        pub fn open(path: &Path) -> Result<Self, SourceError> {
            ffmpeg::init().map_err(|e| SourceError::Open(format!("FFmpeg init: {e}")))?;

            let input_ctx = format::input(path)
                .map_err(|e| SourceError::Open(format!("Open input: {e}")))?;

            let stream = input_ctx.streams().best(Type::Video)
                .ok_or(SourceError::NoVideoStream)?;
            let video_stream_index = stream.index();

            let has_audio = input_ctx.streams().best(Type::Audio).is_some();

            let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| SourceError::Open(format!("Decoder context: {e}")))?;
            let decoder = decoder_ctx.decoder().video()
                .map_err(|e| SourceError::Open(format!("Open decoder: {e}")))?;

            let width = decoder.width();
            let height = decoder.height();
            let pixel_format = decoder.format();

            let scaler = scaling::Context::get(
                pixel_format,
                width,
                height,
                ffmpeg::format::Pixel::BGRA,
                width,
                height,
                scaling::Flags::BILINEAR,
            ).map_err(|e| SourceError::Open(format!("Scaler init: {e}")))?;

            let fps = stream.avg_frame_rate();
            let fps_f64 = if fps.1 != 0 { fps.0 as f64 / fps.1 as f64 } else { 30.0 };

            // Prefer the container's own frame count; derive from duration
            // when the container does not carry one
            let total = if stream.frames() > 0 {
                stream.frames() as u64
            } else {
                let dur = input_ctx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
                (dur * fps_f64) as u64
            };

            Ok(Self {
                input_ctx,
                video_stream_index,
                decoder,
                scaler: SendScaler(scaler),
                width,
                height,
                total,
                fps: fps_f64,
                has_audio,
                eof_sent: false,
            })
        }

        fn receive_bgra(&mut self, decoded: &FfmpegFrame) -> Result<FrameBuffer, SourceError> {
            let mut bgra_frame = FfmpegFrame::empty();
            self.scaler.run(decoded, &mut bgra_frame)
                .map_err(|e| SourceError::Read(format!("Scale frame: {e}")))?;

            let stride = self.width * 4;
            let data_size = (stride * self.height) as usize;
            let src_data = bgra_frame.data(0);

            // Handle potential stride mismatch
            let src_stride = bgra_frame.stride(0) as u32;
            let data = if src_stride == stride {
                src_data[..data_size].to_vec()
            } else {
                let mut buf = vec![0u8; data_size];
                for y in 0..self.height {
                    let src_offset = (y * src_stride) as usize;
                    let dst_offset = (y * stride) as usize;
                    let row_bytes = stride as usize;
                    buf[dst_offset..dst_offset + row_bytes]
                        .copy_from_slice(&src_data[src_offset..src_offset + row_bytes]);
                }
                buf
            };

            Ok(FrameBuffer {
                data,
                width: self.width,
                height: self.height,
                stride,
            })
        }
    }

    impl VideoSource for FfmpegVideoSource {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn frame_rate(&self) -> f64 {
            self.fps
        }

        fn total_frames(&self) -> u64 {
            self.total
        }

        fn has_audio(&self) -> bool {
            self.has_audio
        }

        fn rewind(&mut self) -> Result<(), SourceError> {
            self.input_ctx.seek(0, ..0)
                .map_err(|e| SourceError::Read(format!("Seek to start: {e}")))?;
            self.decoder.flush();
            self.eof_sent = false;
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Option<FrameBuffer>, SourceError> {
            // Sequential decode, no per-frame seeking: the pipeline consumes
            // frames strictly in order.
            let mut decoded = FfmpegFrame::empty();

            loop {
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    return Ok(Some(self.receive_bgra(&decoded)?));
                }
                if self.eof_sent {
                    return Ok(None);
                }

                // Feed the decoder the next video packet
                let mut sent_packet = false;
                for (stream, packet) in self.input_ctx.packets() {
                    if stream.index() != self.video_stream_index {
                        continue;
                    }
                    self.decoder.send_packet(&packet)
                        .map_err(|e| SourceError::Read(format!("Send packet: {e}")))?;
                    sent_packet = true;
                    break;
                }

                if !sent_packet {
                    // Demuxer exhausted; drain the decoder
                    self.decoder.send_eof()
                        .map_err(|e| SourceError::Read(format!("Send EOF: {e}")))?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

/// Open a video source from a file path.
/// Uses the FFmpeg backend when the `ffmpeg` feature is enabled; without it
/// the open fails (stub sources are constructed directly by tests).
#[cfg(feature = "ffmpeg")]
pub fn open_video_source(path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
    Ok(Box::new(ffmpeg_source::FfmpegVideoSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
pub fn open_video_source(path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
    Err(SourceError::Open(format!(
        "built without the ffmpeg feature; cannot open {}",
        path.display()
    )))
}
