//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a container and converts every frame to
//! packed RGB24 in memory. A packet or frame the decoder rejects is reported
//! as a corrupt position; the stream keeps going.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use crate::frame::{Frame, SourceItem, VideoInfo};

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
    next_index: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            f64::from(rate)
        } else {
            0.0
        };
        let declared = input_stream.frames();
        let frame_count = if declared > 0 {
            declared as u64
        } else if input.duration() > 0 && fps > 0.0 {
            // Container duration is in AV_TIME_BASE (microsecond) units.
            (input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE) * fps).round() as u64
        } else {
            0
        };

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_count,
        };

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info,
            next_index: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn info(&self) -> VideoInfo {
        self.info
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<SourceItem>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.convert(&decoded).map(Some),
                Err(e) => match classify_receive_error(&e, self.eof_sent) {
                    Receive::NeedInput => {}
                    Receive::Finished => return Ok(None),
                    Receive::Failed => {
                        let index = self.next_index;
                        self.next_index += 1;
                        log::warn!("decoder failed on frame {}: {}", index, e);
                        return Ok(Some(SourceItem::Corrupt {
                            index,
                            reason: format!("decode frame: {}", e),
                        }));
                    }
                },
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        let index = self.next_index;
                        self.next_index += 1;
                        return Ok(Some(SourceItem::Corrupt {
                            index,
                            reason: format!("decoder rejected packet: {}", e),
                        }));
                    }
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<SourceItem> {
        let index = self.next_index;
        self.next_index += 1;

        let mut rgb_frame = ffmpeg::frame::Video::empty();
        if let Err(e) = self.scaler.run(decoded, &mut rgb_frame) {
            return Ok(SourceItem::Corrupt {
                index,
                reason: format!("scale frame to RGB: {}", e),
            });
        }
        match frame_to_image(&rgb_frame) {
            Ok(image) => Ok(SourceItem::Frame(Frame::new(index, image))),
            Err(e) => Ok(SourceItem::Corrupt {
                index,
                reason: format!("{:#}", e),
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Receive {
    NeedInput,
    Finished,
    Failed,
}

/// EAGAIN means feed more packets; EOF ends the stream. Anything else is a
/// frame the decoder could not produce.
fn classify_receive_error(err: &ffmpeg::Error, eof_sent: bool) -> Receive {
    match err {
        ffmpeg::Error::Eof => Receive::Finished,
        ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN => {
            if eof_sent {
                Receive::Finished
            } else {
                Receive::NeedInput
            }
        }
        _ => Receive::Failed,
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels).context("RGB buffer does not match frame size")
}
