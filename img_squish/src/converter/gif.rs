//! GIF animation helpers
//!
//! Frame extraction for animated re-encoding plus the loop count, which the
//! decoder does not expose and is read from the NETSCAPE2.0 application
//! extension directly.

use super::CodecError;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageDecoder, RgbaImage};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

/// Delay used when a frame declares none.
pub const DEFAULT_FRAME_DELAY_MS: u32 = 100;

const NETSCAPE_ID: &[u8] = b"NETSCAPE2.0";

#[derive(Debug, Clone)]
pub struct AnimationFrame {
    /// Full-canvas RGBA pixels; palette and transparency are already resolved
    pub image: RgbaImage,
    pub delay_ms: u32,
}

#[derive(Debug, Clone)]
pub struct AnimatedFrames {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<AnimationFrame>,
    /// 0 means loop forever
    pub loop_count: u16,
}

fn has_gif_signature(path: &Path) -> bool {
    let mut magic = [0u8; 6];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"GIF87a" || &magic == b"GIF89a")
        .unwrap_or(false)
}

/// True for GIF files with more than one frame. Unreadable files are not animated.
pub fn is_animated_gif(path: &Path) -> bool {
    if !has_gif_signature(path) {
        return false;
    }
    let Ok(file) = File::open(path) else {
        return false;
    };
    match GifDecoder::new(BufReader::new(file)) {
        Ok(decoder) => decoder.into_frames().take(2).filter(|f| f.is_ok()).count() > 1,
        Err(_) => false,
    }
}

/// Loop count from the NETSCAPE2.0 extension, `None` when the file has none.
/// Callers treat a missing extension as 0, loop forever.
pub fn parse_loop_count(bytes: &[u8]) -> Option<u16> {
    let pos = bytes
        .windows(NETSCAPE_ID.len())
        .position(|w| w == NETSCAPE_ID)?;
    // sub-block: size 3, id 1, little-endian count
    let block = bytes.get(pos + NETSCAPE_ID.len()..pos + NETSCAPE_ID.len() + 4)?;
    if block[0] == 3 && block[1] == 1 {
        Some(u16::from_le_bytes([block[2], block[3]]))
    } else {
        None
    }
}

/// Decode up to `max_frames` frames with their delays.
pub fn collect_frames(path: &Path, max_frames: usize) -> Result<AnimatedFrames, CodecError> {
    let bytes = fs::read(path)?;
    let loop_count = parse_loop_count(&bytes).unwrap_or(0);

    let decoder = GifDecoder::new(std::io::Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions();

    let mut frames = Vec::new();
    for frame in decoder.into_frames().take(max_frames) {
        let frame = frame?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay_ms = if denom == 0 { 0 } else { numer / denom };
        frames.push(AnimationFrame {
            image: frame.into_buffer(),
            delay_ms: if delay_ms == 0 {
                DEFAULT_FRAME_DELAY_MS
            } else {
                delay_ms
            },
        });
    }

    if frames.is_empty() {
        return Err(CodecError::Unsupported(format!(
            "{} contains no frames",
            path.display()
        )));
    }

    Ok(AnimatedFrames {
        width,
        height,
        frames,
        loop_count,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, Rgba, RgbaImage};
    use std::fs::File;
    use std::path::Path;

    /// Write an animated GIF whose frame `i` is a solid distinct colour shown
    /// for `20 + 10 * i` ms.
    pub fn write_animated_gif(path: &Path, frame_count: usize, repeat: Repeat) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        encoder.set_repeat(repeat).unwrap();
        let frames = (0..frame_count).map(|i| {
            let color = Rgba([(i * 5) as u8, 255 - (i * 5) as u8, (i * 13 % 256) as u8, 255]);
            let image = RgbaImage::from_pixel(8, 6, color);
            Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(20 + 10 * i as u32, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }

    pub fn frame_delay(i: usize) -> u32 {
        20 + 10 * i as u32
    }
}
