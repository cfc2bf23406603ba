//! FFmpeg encoder behind `FileSink`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;
use image::RgbImage;

use crate::frame::VideoInfo;

pub(crate) struct FfmpegEncoder {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    codec_name: String,
    width: u32,
    height: u32,
}

impl FfmpegEncoder {
    pub(crate) fn create(path: &Path, info: &VideoInfo) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        if info.width == 0 || info.height == 0 {
            return Err(anyhow!("cannot encode empty resolution"));
        }
        // Encoders only accept positive rates; a still source is written at 1 fps.
        let fps = if info.fps > 0.0 { info.fps } else { 1.0 };

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create output container {}", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .or_else(|| {
                log::warn!("no H.264 encoder available, falling back to MPEG-4");
                ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            })
            .ok_or_else(|| anyhow!("no usable video encoder (tried H.264, MPEG-4)"))?;
        let codec_name = codec.name().to_string();

        let mut stream = output.add_stream(codec).context("add output video stream")?;
        let frame_rate = ffmpeg::Rational::from(fps);
        let encoder_time_base = frame_rate.invert();

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        context.set_width(info.width);
        context.set_height(info.height);
        context.set_format(Pixel::YUV420P);
        context.set_time_base(encoder_time_base);
        context.set_frame_rate(Some(frame_rate));
        if global_header {
            context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context
            .open_as(codec)
            .with_context(|| format!("open {} encoder", codec_name))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);
        let stream_index = stream.index();

        output
            .write_header()
            .with_context(|| format!("write container header to {}", path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("output stream vanished after header"))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            info.width,
            info.height,
            Pixel::YUV420P,
            info.width,
            info.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            encoder_time_base,
            stream_time_base,
            codec_name,
            width: info.width,
            height: info.height,
        })
    }

    pub(crate) fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub(crate) fn write(&mut self, frame: &RgbImage, index: u64) -> Result<()> {
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let src = frame.as_raw();
        let dst = rgb.data_mut(0);
        for row in 0..self.height as usize {
            let from = &src[row * row_bytes..(row + 1) * row_bytes];
            dst[row * stride..row * stride + row_bytes].copy_from_slice(from);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV420P")?;
        yuv.set_pts(Some(index as i64));
        self.encoder
            .send_frame(&yuv)
            .with_context(|| format!("encode frame {}", index))?;
        self.drain()
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain()?;
        self.output
            .write_trailer()
            .context("write container trailer")?;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}
