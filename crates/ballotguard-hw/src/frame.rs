//! Frame type and pixel-format conversion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8-bit.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }

    let mut gray = Vec::with_capacity(pixels);
    for idx in 0..pixels {
        let value = u16::from_le_bytes([buf[idx * 2], buf[idx * 2 + 1]]);
        gray.push((value >> 8) as u8);
    }
    Ok(gray)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_extracts_luma_channel() {
        // Two pixels: Y0=10 U=20 Y1=30 V=40
        let yuyv = [10u8, 20, 30, 40];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![10, 30]);
    }

    #[test]
    fn yuyv_rejects_short_buffer() {
        let err = yuyv_to_grayscale(&[0u8; 3], 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 3 }));
    }

    #[test]
    fn y16_downscales_to_high_byte() {
        // 0x8000 little-endian → 0x80
        let buf = [0x00u8, 0x80];
        let gray = y16_to_grayscale(&buf, 1, 1).unwrap();
        assert_eq!(gray, vec![0x80]);
    }

    #[test]
    fn y16_rejects_short_buffer() {
        assert!(y16_to_grayscale(&[0u8; 1], 1, 1).is_err());
    }

    #[test]
    fn avg_brightness_of_uniform_frame() {
        let frame = Frame {
            data: vec![100u8; 16],
            width: 4,
            height: 4,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn avg_brightness_of_empty_frame_is_zero() {
        let frame = Frame {
            data: vec![],
            width: 0,
            height: 0,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert_eq!(frame.avg_brightness(), 0.0);
    }
}
