//! Final remux stage: re-encodes the intermediate picture stream at the
//! requested bitrate and carries the original source's audio track into the
//! deliverable container.
//!
//! The intermediate is a transient artifact: deleted on success, preserved on
//! failure so a remux-only failure does not force a full re-inpaint.

use std::path::{Path, PathBuf};

/// Remux request: where the streams come from and where the result goes.
#[derive(Debug, Clone)]
pub struct RemuxRequest {
    /// Picture-only intermediate produced by the pipeline
    pub intermediate_path: PathBuf,
    /// Original source file whose audio track is carried over
    pub original_path: PathBuf,
    pub output_path: PathBuf,
    /// Target picture bitrate in megabits per second
    pub bitrate_mbps: u32,
    pub frame_rate: f64,
}

/// Remux stage errors
#[derive(Debug, thiserror::Error)]
pub enum RemuxError {
    #[error("Failed to open remux input: {0}")]
    Open(String),
    #[error("Intermediate stream carries no video")]
    NoVideoStream,
    #[error("Codec unavailable: {0}")]
    Codec(String),
    #[error("Remux write failed: {0}")]
    Write(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remux stage abstraction.
pub trait Remuxer: Send {
    /// Combine picture and audio into the final deliverable.
    ///
    /// A source with no audio track yields a picture-only output; that is
    /// not an error. On success the intermediate file is deleted; on failure
    /// it is preserved.
    fn remux(&self, request: &RemuxRequest) -> Result<PathBuf, RemuxError>;
}

/// Stub remuxer for tests and ffmpeg-less builds: copies the intermediate to
/// the destination and honors the delete-on-success contract.
pub struct StubRemuxer {
    /// When true, the remux fails and the intermediate must survive
    pub fail: bool,
}

impl StubRemuxer {
    pub fn new() -> Self {
        Self { fail: false }
    }
}

impl Default for StubRemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Remuxer for StubRemuxer {
    fn remux(&self, request: &RemuxRequest) -> Result<PathBuf, RemuxError> {
        if !request.intermediate_path.exists() {
            return Err(RemuxError::Open(format!(
                "intermediate missing: {}",
                request.intermediate_path.display()
            )));
        }
        if self.fail {
            return Err(RemuxError::Write("stub remux failure".into()));
        }

        std::fs::copy(&request.intermediate_path, &request.output_path)?;
        remove_intermediate(&request.intermediate_path);
        Ok(request.output_path.clone())
    }
}

fn remove_intermediate(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("Failed to remove intermediate {}: {e}", path.display());
    }
}

/// FFmpeg-based remuxer: transcodes the intermediate picture at the requested
/// bitrate and stream-copies the original audio packets (bit-identical audio,
/// no extra lossy generation).
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_remux {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg::codec;
    use ffmpeg::format;
    use ffmpeg::media::Type;
    use ffmpeg::util::frame::video::Video as FfmpegFrame;

    pub struct FfmpegRemuxer;

    impl FfmpegRemuxer {
        pub fn new() -> Result<Self, RemuxError> {
            ffmpeg::init().map_err(|e| RemuxError::Open(format!("FFmpeg init: {e}")))?;
            Ok(Self)
        }

        fn run(&self, request: &RemuxRequest) -> Result<PathBuf, RemuxError> {
            let mut picture_ctx = format::input(&request.intermediate_path)
                .map_err(|e| RemuxError::Open(format!("Open intermediate: {e}")))?;

            let picture_stream = picture_ctx.streams().best(Type::Video)
                .ok_or(RemuxError::NoVideoStream)?;
            let picture_index = picture_stream.index();

            let decoder_ctx = codec::context::Context::from_parameters(picture_stream.parameters())
                .map_err(|e| RemuxError::Codec(format!("Decoder context: {e}")))?;
            let mut decoder = decoder_ctx.decoder().video()
                .map_err(|e| RemuxError::Codec(format!("Open decoder: {e}")))?;

            // Original source opened only for its audio track; a picture-only
            // source is fine
            let mut audio_ctx = format::input(&request.original_path)
                .map_err(|e| RemuxError::Open(format!("Open original: {e}")))?;
            let audio_index = audio_ctx.streams().best(Type::Audio).map(|s| s.index());

            let mut output_ctx = format::output(&request.output_path)
                .map_err(|e| RemuxError::Open(format!("Open output: {e}")))?;
            let needs_global_header =
                output_ctx.format().flags().contains(format::Flags::GLOBAL_HEADER);

            // Video stream: H.264 at the requested bitrate
            let video_codec = codec::encoder::find(codec::Id::H264)
                .ok_or_else(|| RemuxError::Codec("H.264 encoder not found".into()))?;
            let mut video_ost = output_ctx.add_stream(video_codec)
                .map_err(|e| RemuxError::Codec(format!("Add video stream: {e}")))?;
            let video_ost_index = video_ost.index();

            let fps = if request.frame_rate > 0.0 { request.frame_rate } else { 30.0 };
            let enc_tb = ffmpeg::Rational::new(1, fps.round() as i32);

            let mut encoder_ctx = codec::context::Context::new_with_codec(video_codec)
                .encoder()
                .video()
                .map_err(|e| RemuxError::Codec(format!("Encoder context: {e}")))?;
            encoder_ctx.set_width(decoder.width());
            encoder_ctx.set_height(decoder.height());
            encoder_ctx.set_format(ffmpeg::format::Pixel::YUV420P);
            encoder_ctx.set_time_base(enc_tb);
            encoder_ctx.set_bit_rate(request.bitrate_mbps as usize * 1_000_000);
            encoder_ctx.set_gop(120);
            encoder_ctx.set_threading(codec::threading::Config::count(4));
            if needs_global_header {
                encoder_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
            }

            let mut opts = ffmpeg::Dictionary::new();
            opts.set("preset", "medium");

            let mut encoder = encoder_ctx.open_as_with(video_codec, opts)
                .map_err(|e| RemuxError::Codec(format!("Open encoder: {e}")))?;
            video_ost.set_parameters(&encoder);

            // Audio stream: packet copy with the original's parameters
            let audio_ost_index = if let Some(ist_index) = audio_index {
                let ist = audio_ctx.stream(ist_index)
                    .ok_or_else(|| RemuxError::Open("audio stream vanished".into()))?;
                let mut ost = output_ctx.add_stream(codec::encoder::find(codec::Id::None))
                    .map_err(|e| RemuxError::Codec(format!("Add audio stream: {e}")))?;
                ost.set_parameters(ist.parameters());
                // SAFETY: copied parameters keep the source's codec_tag,
                // which may be invalid for the output container; zero it so
                // the muxer picks its own.
                unsafe {
                    (*ost.parameters().as_mut_ptr()).codec_tag = 0;
                }
                Some(ost.index())
            } else {
                log::info!("Original source has no audio track; output is picture-only");
                None
            };

            output_ctx.write_header()
                .map_err(|e| RemuxError::Write(format!("Write header: {e}")))?;

            // Pre-read the audio packets so they can be interleaved with the
            // transcoded picture by presentation order
            let mut audio_packets: Vec<ffmpeg::Packet> = Vec::new();
            if let (Some(ist_index), Some(ost_index)) = (audio_index, audio_ost_index) {
                let ost_tb = output_ctx
                    .stream(ost_index)
                    .map(|s| s.time_base())
                    .unwrap_or(enc_tb);
                for (stream, mut packet) in audio_ctx.packets() {
                    if stream.index() != ist_index {
                        continue;
                    }
                    packet.rescale_ts(stream.time_base(), ost_tb);
                    packet.set_stream(ost_index);
                    packet.set_position(-1);
                    audio_packets.push(packet);
                }
            }
            let mut audio_cursor = 0usize;

            let video_ost_tb = output_ctx
                .stream(video_ost_index)
                .map(|s| s.time_base())
                .unwrap_or(enc_tb);
            let audio_ost_tb = audio_ost_index
                .and_then(|i| output_ctx.stream(i))
                .map(|s| s.time_base())
                .unwrap_or(enc_tb);

            let mut out_frame_count = 0i64;

            // Transcode the picture, draining audio packets that precede
            // each written video packet
            let mut receive_and_write =
                |encoder: &mut codec::encoder::video::Encoder,
                 output_ctx: &mut format::context::Output,
                 audio_cursor: &mut usize|
                 -> Result<(), RemuxError> {
                    let mut packet = ffmpeg::Packet::empty();
                    while encoder.receive_packet(&mut packet).is_ok() {
                        packet.set_stream(video_ost_index);
                        packet.rescale_ts(enc_tb, video_ost_tb);
                        let video_dts = packet.dts().unwrap_or(0);
                        packet.write_interleaved(output_ctx)
                            .map_err(|e| RemuxError::Write(format!("Write video packet: {e}")))?;

                        // Audio packets up to this picture timestamp
                        let cutoff = rescale_to(video_dts, video_ost_tb, audio_ost_tb);
                        while *audio_cursor < audio_packets.len() {
                            let dts = audio_packets[*audio_cursor].dts().unwrap_or(0);
                            if dts > cutoff {
                                break;
                            }
                            let mut audio_packet = audio_packets[*audio_cursor].clone();
                            audio_packet.write_interleaved(output_ctx)
                                .map_err(|e| RemuxError::Write(format!("Write audio packet: {e}")))?;
                            *audio_cursor += 1;
                        }
                    }
                    Ok(())
                };

            let mut decoded = FfmpegFrame::empty();
            for (stream, packet) in picture_ctx.packets() {
                if stream.index() != picture_index {
                    continue;
                }
                decoder.send_packet(&packet)
                    .map_err(|e| RemuxError::Write(format!("Send packet: {e}")))?;
                while decoder.receive_frame(&mut decoded).is_ok() {
                    // pts re-stamped on the encoder clock
                    decoded.set_pts(Some(out_frame_count));
                    out_frame_count += 1;
                    encoder.send_frame(&decoded)
                        .map_err(|e| RemuxError::Write(format!("Send frame: {e}")))?;
                    receive_and_write(&mut encoder, &mut output_ctx, &mut audio_cursor)?;
                }
            }

            // Drain decoder and encoder
            decoder.send_eof().ok();
            while decoder.receive_frame(&mut decoded).is_ok() {
                decoded.set_pts(Some(out_frame_count));
                out_frame_count += 1;
                encoder.send_frame(&decoded)
                    .map_err(|e| RemuxError::Write(format!("Send frame: {e}")))?;
                receive_and_write(&mut encoder, &mut output_ctx, &mut audio_cursor)?;
            }
            encoder.send_eof()
                .map_err(|e| RemuxError::Write(format!("Send EOF: {e}")))?;
            receive_and_write(&mut encoder, &mut output_ctx, &mut audio_cursor)?;

            // Remaining audio (the audio track may outlast the last frame by
            // less than one frame interval)
            while audio_cursor < audio_packets.len() {
                let mut audio_packet = audio_packets[audio_cursor].clone();
                audio_packet.write_interleaved(&mut output_ctx)
                    .map_err(|e| RemuxError::Write(format!("Write audio packet: {e}")))?;
                audio_cursor += 1;
            }

            output_ctx.write_trailer()
                .map_err(|e| RemuxError::Write(format!("Write trailer: {e}")))?;

            Ok(request.output_path.clone())
        }
    }

    /// Rescale a timestamp between two time bases with exact rational math,
    /// so the audio/video interleave cutoff never drifts on long streams.
    fn rescale_to(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
        let num = from.0 as i128 * to.1 as i128;
        let den = from.1 as i128 * to.0 as i128;
        if den == 0 {
            return ts;
        }
        (ts as i128 * num / den) as i64
    }

    impl Remuxer for FfmpegRemuxer {
        fn remux(&self, request: &RemuxRequest) -> Result<PathBuf, RemuxError> {
            match self.run(request) {
                Ok(path) => {
                    log::info!("Remux complete: {}", path.display());
                    remove_intermediate(&request.intermediate_path);
                    Ok(path)
                }
                Err(e) => {
                    // Preserve the intermediate so the inpaint work survives
                    // a remux-only failure; drop any partial deliverable
                    if request.output_path.exists() {
                        let _ = std::fs::remove_file(&request.output_path);
                    }
                    Err(e)
                }
            }
        }
    }

}

/// Create the remux stage.
/// Returns the FFmpeg remuxer when the `ffmpeg` feature is enabled,
/// otherwise falls back to the stub.
pub fn create_remuxer() -> Box<dyn Remuxer> {
    #[cfg(feature = "ffmpeg")]
    {
        match ffmpeg_remux::FfmpegRemuxer::new() {
            Ok(remuxer) => return Box::new(remuxer),
            Err(e) => {
                log::warn!("FFmpeg remuxer init failed, falling back to stub: {e}");
            }
        }
    }

    Box::new(StubRemuxer::new())
}
