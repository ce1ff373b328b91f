//! Raw capture buffer to RGB conversion.

use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; U and V are shared by
/// the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::BufferTooShort {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for pair in yuyv[..expected].chunks_exact(4) {
        let [y0, u, y1, v] = [pair[0], pair[1], pair[2], pair[3]];
        for y in [y0, y1] {
            rgb.extend_from_slice(&ycbcr_to_rgb(y, u, v));
        }
    }

    // chunks_exact(4) cannot produce a short image for even widths; the
    // constructor still guards width*height*3.
    RgbImage::from_raw(width, height, rgb).ok_or(ConvertError::BufferTooShort {
        expected: pixels * 3,
        actual: 0,
    })
}

/// Wrap a packed 24-bit RGB buffer.
pub fn rgb24_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(ConvertError::BufferTooShort {
            expected,
            actual: buf.len(),
        });
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(
        ConvertError::BufferTooShort {
            expected,
            actual: buf.len(),
        },
    )
}

/// Replicate an 8-bit grayscale buffer into RGB.
pub fn grey_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let pixels = (width * height) as usize;
    if buf.len() < pixels {
        return Err(ConvertError::BufferTooShort {
            expected: pixels,
            actual: buf.len(),
        });
    }
    let mut rgb = Vec::with_capacity(pixels * 3);
    for &g in &buf[..pixels] {
        rgb.extend_from_slice(&[g, g, g]);
    }
    RgbImage::from_raw(width, height, rgb).ok_or(ConvertError::BufferTooShort {
        expected: pixels * 3,
        actual: 0,
    })
}

/// BT.601 YCbCr to RGB for one pixel.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}
