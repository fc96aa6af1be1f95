//! Lossless WebP through libwebp.
//!
//! Encoding happens in memory on a helper thread so the conversion timeout can
//! be enforced; the file is written only after the encoder returns in time.
//! libwebp cannot be interrupted, so a timed-out encode keeps its thread until
//! it finishes and its result is dropped. Each timeout leaves at most one such
//! thread behind.

use super::gif::{collect_frames, is_animated_gif};
use super::{CodecError, ConversionParams, FormatConverter, FormatTag};
use crossbeam_channel::RecvTimeoutError;
use image::DynamicImage;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, warn};
use webp::{AnimEncoder, AnimFrame, Encoder, WebPConfig};

#[derive(Debug, Clone, Default)]
pub struct WebpConverter;

impl WebpConverter {
    pub fn new() -> Self {
        Self
    }
}

fn lossless_config(method: u8) -> Result<WebPConfig, CodecError> {
    let mut config = WebPConfig::new()
        .map_err(|_| CodecError::Encode("libwebp rejected default config".to_string()))?;
    config.lossless = 1;
    config.quality = 100.0;
    config.method = i32::from(method);
    // keep RGB under fully transparent pixels
    config.exact = 1;
    Ok(config)
}

/// Encode a single still image. 16-bit and float sources are refused since
/// WebP stores 8 bits per channel and the result would not be lossless.
fn encode_static(source: &Path, method: u8) -> Result<Vec<u8>, CodecError> {
    let image = image::open(source)?;
    let color = image.color();
    if color.bytes_per_pixel() / color.channel_count() > 1 {
        return Err(CodecError::Unsupported(format!(
            "{:?} has more than 8 bits per channel",
            color
        )));
    }

    let config = lossless_config(method)?;
    let (width, height) = (image.width(), image.height());
    let memory = if color.has_alpha() {
        let rgba = image.to_rgba8();
        Encoder::from_rgba(rgba.as_raw(), width, height).encode_advanced(&config)
    } else {
        let rgb = match image {
            DynamicImage::ImageRgb8(rgb) => rgb,
            other => other.to_rgb8(),
        };
        Encoder::from_rgb(rgb.as_raw(), width, height).encode_advanced(&config)
    }
    .map_err(|e| CodecError::Encode(format!("{:?}", e)))?;

    Ok(memory.to_vec())
}

fn encode_animated(source: &Path, method: u8, max_frames: usize) -> Result<Vec<u8>, CodecError> {
    let anim = collect_frames(source, max_frames)?;
    let config = lossless_config(method)?;

    let mut encoder = AnimEncoder::new(anim.width, anim.height, &config);
    encoder.set_loop_count(i32::from(anim.loop_count));

    let mut timestamp_ms: i32 = 0;
    for frame in &anim.frames {
        encoder.add_frame(AnimFrame::from_rgba(
            frame.image.as_raw(),
            anim.width,
            anim.height,
            timestamp_ms,
        ));
        timestamp_ms = timestamp_ms.saturating_add(frame.delay_ms as i32);
    }

    debug!(
        frames = anim.frames.len(),
        loop_count = anim.loop_count,
        "Encoding animated WebP"
    );

    let memory = encoder
        .try_encode()
        .map_err(|e| CodecError::Encode(format!("{:?}", e)))?;
    let mut bytes = memory.to_vec();
    // the encoder is finished without an end timestamp, so libwebp guesses
    // the last frame's duration
    set_animation_end(&mut bytes, timestamp_ms.max(0) as u32)?;
    Ok(bytes)
}

const ANMF_DURATION_OFFSET: usize = 12;
const MAX_FRAME_DURATION_MS: u32 = 0x00FF_FFFF;

/// Top-level RIFF chunks of a WebP file as `(fourcc, payload range)`.
fn riff_chunks(data: &[u8]) -> Result<Vec<([u8; 4], Range<usize>)>, CodecError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return Err(CodecError::Encode("encoder output is not a WebP file".to_string()));
    }

    let mut chunks = Vec::new();
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let header = &data[pos..pos + 8];
        let fourcc = [header[0], header[1], header[2], header[3]];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let start = pos + 8;
        let end = start + size;
        if end > data.len() {
            return Err(CodecError::Encode(format!(
                "truncated {} chunk in encoder output",
                String::from_utf8_lossy(&fourcc)
            )));
        }
        chunks.push((fourcc, start..end));
        // payloads are padded to even length
        pos = end + (size & 1);
    }
    Ok(chunks)
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

/// Stretch the final frame so the animation ends at `end_ms`. Earlier frames
/// may have been merged by the encoder, so the last frame starts at the sum of
/// the preceding durations rather than at a known source timestamp.
fn set_animation_end(data: &mut [u8], end_ms: u32) -> Result<(), CodecError> {
    let frames: Vec<Range<usize>> = riff_chunks(data)?
        .into_iter()
        .filter(|(fourcc, range)| fourcc == b"ANMF" && range.len() >= 16)
        .map(|(_, range)| range)
        .collect();
    let Some((last, earlier)) = frames.split_last() else {
        return Err(CodecError::Encode("animated output has no frames".to_string()));
    };

    let start: u32 = earlier
        .iter()
        .map(|r| read_u24(&data[r.start + ANMF_DURATION_OFFSET..]))
        .fold(0u32, u32::saturating_add);
    let duration = end_ms.saturating_sub(start).clamp(1, MAX_FRAME_DURATION_MS);

    let at = last.start + ANMF_DURATION_OFFSET;
    data[at..at + 3].copy_from_slice(&duration.to_le_bytes()[..3]);
    Ok(())
}

impl FormatConverter for WebpConverter {
    fn format(&self) -> FormatTag {
        FormatTag::Webp
    }

    fn convert(
        &self,
        source: &Path,
        destination: &Path,
        params: &ConversionParams,
    ) -> Result<u64, CodecError> {
        let source_owned: PathBuf = source.to_path_buf();
        let method = params.webp_method;
        let max_frames = params.max_animated_frames;

        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name("webp-encode".to_string())
            .spawn(move || {
                let encoded = if is_animated_gif(&source_owned) {
                    encode_animated(&source_owned, method, max_frames)
                } else {
                    encode_static(&source_owned, method)
                };
                // receiver is gone after a timeout
                if tx.send(encoded).is_err() {
                    warn!(
                        source = %source_owned.display(),
                        "WebP encode finished after its timeout, result discarded"
                    );
                }
            })?;

        let bytes = match rx.recv_timeout(params.timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CodecError::TimedOut {
                    codec: "libwebp".to_string(),
                    timeout: params.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CodecError::Encode("WebP encoder thread panicked".to_string()))
            }
        };

        fs::write(destination, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::super::gif::test_support::{frame_delay, write_animated_gif};
    use super::super::run_converter;
    use super::*;
    use image::codecs::gif::Repeat;
    use image::codecs::webp::WebPDecoder;
    use image::{AnimationDecoder, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::time::Duration;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]))
    }

    #[test]
    fn test_static_png_is_lossless() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("g.png");
        let dst = temp.path().join("g.png.tmp.webp");
        let original = gradient(32, 24);
        original.save(&src).unwrap();

        let size = WebpConverter::new()
            .convert(&src, &dst, &ConversionParams::default())
            .unwrap();
        assert_eq!(size, fs::metadata(&dst).unwrap().len());

        let decoded = image::open(&dst).unwrap().to_rgb8();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_alpha_is_preserved() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.png");
        let dst = temp.path().join("a.png.tmp.webp");
        let original =
            RgbaImage::from_fn(16, 16, |x, y| Rgba([x as u8 * 8, y as u8 * 8, 0, (x * 16) as u8]));
        original.save(&src).unwrap();

        WebpConverter::new()
            .convert(&src, &dst, &ConversionParams::default())
            .unwrap();
        assert_eq!(image::open(&dst).unwrap().to_rgba8(), original);
    }

    #[test]
    fn test_sixteen_bit_source_is_refused() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("deep.png");
        let dst = temp.path().join("deep.png.tmp.webp");
        let deep: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(8, 8, |x, y| Luma([(x * 1000 + y) as u16]));
        deep.save(&src).unwrap();

        let result = run_converter(&WebpConverter::new(), &src, &dst, &ConversionParams::default());
        assert!(result.candidate_size().is_none());
        assert!(!dst.exists());
    }

    fn decoded_delays(path: &Path) -> Vec<u32> {
        let reader = std::io::BufReader::new(fs::File::open(path).unwrap());
        WebPDecoder::new(reader)
            .unwrap()
            .into_frames()
            .map(|frame| {
                let (numer, denom) = frame.unwrap().delay().numer_denom_ms();
                numer / denom
            })
            .collect()
    }

    fn loop_count(data: &[u8]) -> Option<u16> {
        riff_chunks(data)
            .unwrap()
            .into_iter()
            .find(|(fourcc, range)| fourcc == b"ANIM" && range.len() >= 6)
            .map(|(_, r)| u16::from_le_bytes([data[r.start + 4], data[r.start + 5]]))
    }

    #[test]
    fn test_animated_gif_keeps_frames_and_durations() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("anim.gif");
        let dst = temp.path().join("anim.gif.tmp.webp");
        write_animated_gif(&src, 50, Repeat::Infinite);

        let params = ConversionParams {
            max_animated_frames: 20,
            ..ConversionParams::default()
        };
        let result = run_converter(&WebpConverter::new(), &src, &dst, &params);
        assert!(result.candidate_size().unwrap() > 0);

        let expected: Vec<u32> = (0..20).map(frame_delay).collect();
        assert_eq!(decoded_delays(&dst), expected);
        assert_eq!(loop_count(&fs::read(&dst).unwrap()), Some(0));
    }

    #[test]
    fn test_finite_loop_count_is_carried() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("thrice.gif");
        let dst = temp.path().join("thrice.gif.tmp.webp");
        write_animated_gif(&src, 4, Repeat::Finite(3));

        WebpConverter::new()
            .convert(&src, &dst, &ConversionParams::default())
            .unwrap();
        let data = fs::read(&dst).unwrap();
        assert_eq!(loop_count(&data), Some(3));
        assert_eq!(decoded_delays(&dst), vec![20, 30, 40, 50]);
    }

    fn chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = fourcc.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn anmf(duration: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 16];
        payload[12..15].copy_from_slice(&duration.to_le_bytes()[..3]);
        chunk(b"ANMF", &payload)
    }

    #[test]
    fn test_last_frame_is_stretched_to_end() {
        let mut body = b"WEBP".to_vec();
        body.extend(chunk(b"ANIM", &[0, 0, 0, 0, 0, 0]));
        // odd-sized chunk exercises padding
        body.extend(chunk(b"XTRA", &[1, 2, 3]));
        body.extend(anmf(40));
        body.extend(anmf(60));
        body.extend(anmf(7));
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend(body);

        set_animation_end(&mut data, 250).unwrap();
        let durations: Vec<u32> = riff_chunks(&data)
            .unwrap()
            .into_iter()
            .filter(|(fourcc, _)| fourcc == b"ANMF")
            .map(|(_, r)| read_u24(&data[r.start + ANMF_DURATION_OFFSET..]))
            .collect();
        assert_eq!(durations, vec![40, 60, 150]);
    }

    #[test]
    fn test_stretching_requires_frames() {
        let mut data = b"RIFF\x04\x00\x00\x00WEBP".to_vec();
        assert!(set_animation_end(&mut data, 100).is_err());
        assert!(riff_chunks(b"RIFF\x00\x00\x00\x00WEBPANMF\xff\x00\x00\x00").is_err());
    }

    #[test]
    fn test_undecodable_source_fails_without_output() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("junk.png");
        let dst = temp.path().join("junk.png.tmp.webp");
        fs::write(&src, b"not an image at all").unwrap();

        let result = run_converter(&WebpConverter::new(), &src, &dst, &ConversionParams::default());
        assert!(result.output.is_none());
        assert!(!dst.exists());
    }

    #[test]
    fn test_timeout_leaves_no_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("big.png");
        let dst = temp.path().join("big.png.tmp.webp");
        gradient(1024, 1024).save(&src).unwrap();

        let params = ConversionParams {
            timeout: Duration::from_nanos(1),
            ..ConversionParams::default()
        };
        let err = WebpConverter::new().convert(&src, &dst, &params).unwrap_err();
        assert!(matches!(err, CodecError::TimedOut { .. }));
        assert!(!dst.exists());
    }
}
