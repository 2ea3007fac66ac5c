//! Video and audio format negotiation
//!
//! Translates engine format proposals into the formats the grabber actually
//! uses: 24/32-bit RGB rows for video, with the row stride padded to 32-bit
//! word alignment, and a bits-per-sample lookup for the PCM sample tags the
//! engine can announce.

use crate::engine::{FourCc, VideoFormatRequest};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Row stride in bytes for a row of `width` pixels at `bits` per pixel,
/// padded to 32-bit word alignment.
pub fn stride(width: i32, bits: i32) -> i32 {
    (width * bits + 31) / 32 * 4
}

/// Bits per sample for a PCM sample-format tag, 0 if the tag is unknown.
pub fn sample_bits(tag: FourCc) -> u32 {
    match &tag.bytes() {
        b"s8  " | b"u8  " => 8,
        b"s16l" | b"s1lp" | b"s16b" | b"u16l" | b"u16b" => 16,
        b"s20b" => 20,
        b"s24l" | b"s24b" | b"u24l" | b"u24b" | b"s244" | b"S244" => 24,
        b"s32l" | b"s32b" | b"u32l" | b"u32b" | b"f32l" | b"f32b" => 32,
        b"f64l" | b"f64b" => 64,
        // native endian aliases
        b"S16N" | b"U16N" => 16,
        b"S24N" | b"U24N" => 24,
        b"S32N" | b"U32N" | b"FL32" => 32,
        b"FL64" => 64,
        // inverted endian aliases
        b"S16I" | b"U16I" => 16,
        b"S24I" | b"U24I" => 24,
        b"S32I" | b"U32I" => 32,
        _ => 0,
    }
}

/// A negotiated video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: i32,
    pub height: i32,
    pub bits: i32,
    pub stride: i32,
}

/// Resolves the video format for one session.
///
/// The container-declared intrinsic size is consumed at most once per
/// session, on the first proposal. When it is present it pins the frame
/// size for the rest of the session; otherwise every proposal from the
/// decoder is adopted as it arrives. The consumer gets a chance to rewrite
/// the resolved format before it is adopted (see the bridge), after which
/// [`FormatNegotiator::adopt`] re-validates it.
#[derive(Debug)]
pub struct FormatNegotiator {
    probed: AtomicBool,
    intrinsic: AtomicBool,
    width: AtomicI32,
    height: AtomicI32,
    bits: AtomicI32,
    stride: AtomicI32,
}

impl FormatNegotiator {
    pub fn new() -> FormatNegotiator {
        FormatNegotiator {
            probed: AtomicBool::new(false),
            intrinsic: AtomicBool::new(false),
            width: AtomicI32::new(0),
            height: AtomicI32::new(0),
            bits: AtomicI32::new(32),
            stride: AtomicI32::new(0),
        }
    }

    /// Resolve a format proposal into a candidate format.
    ///
    /// The candidate still has to pass through the consumer override and
    /// [`FormatNegotiator::adopt`] before it is final.
    pub fn propose(&self, request: &VideoFormatRequest) -> VideoFormat {
        if !self.probed.swap(true, Ordering::Relaxed) {
            if let Some((w, h)) = request.intrinsic_size {
                // A negative height marks bottom-up row order; only the
                // magnitude matters here.
                let h = h.abs();
                if w > 0 && h > 0 {
                    self.width.store(w, Ordering::Relaxed);
                    self.height.store(h, Ordering::Relaxed);
                    self.intrinsic.store(true, Ordering::Relaxed);
                }
            }
        }

        if !self.intrinsic.load(Ordering::Relaxed) {
            self.width.store(request.width as i32, Ordering::Relaxed);
            self.height.store(request.height as i32, Ordering::Relaxed);
        }

        let width = self.width.load(Ordering::Relaxed);
        let height = self.height.load(Ordering::Relaxed);
        let bits = self.bits.load(Ordering::Relaxed);
        let row = stride(width, bits);
        self.stride.store(row, Ordering::Relaxed);

        VideoFormat { width, height, bits, stride: row }
    }

    /// Adopt a format, possibly rewritten by the consumer.
    ///
    /// A format that fails validation here means the override callback broke
    /// the negotiation contract, which is not recoverable.
    pub fn adopt(&self, format: &VideoFormat) {
        assert!(
            format.bits == 24 || format.bits == 32,
            "unsupported pixel depth {}",
            format.bits
        );
        assert!(
            format.width > 0 && format.height > 0 && format.stride > 0,
            "degenerate video format {}x{} stride {}",
            format.width,
            format.height,
            format.stride
        );
        assert!(
            format.stride >= stride(format.width, format.bits),
            "stride {} below row minimum {}",
            format.stride,
            stride(format.width, format.bits)
        );

        self.width.store(format.width, Ordering::Relaxed);
        self.height.store(format.height, Ordering::Relaxed);
        self.bits.store(format.bits, Ordering::Relaxed);
        self.stride.store(format.stride, Ordering::Relaxed);
    }

    /// Chroma tag matching the negotiated pixel depth.
    pub fn chroma(&self) -> FourCc {
        if self.bits.load(Ordering::Relaxed) == 32 {
            FourCc::RV32
        } else {
            FourCc::RV24
        }
    }

    pub fn current(&self) -> VideoFormat {
        VideoFormat {
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            bits: self.bits.load(Ordering::Relaxed),
            stride: self.stride.load(Ordering::Relaxed),
        }
    }

    /// Back to the defaults of a fresh session.
    pub fn reset(&self) {
        self.probed.store(false, Ordering::Relaxed);
        self.intrinsic.store(false, Ordering::Relaxed);
        self.width.store(0, Ordering::Relaxed);
        self.height.store(0, Ordering::Relaxed);
        self.bits.store(32, Ordering::Relaxed);
        self.stride.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32, height: u32, intrinsic: Option<(i32, i32)>) -> VideoFormatRequest {
        VideoFormatRequest {
            chroma: FourCc::new("J420"),
            width,
            height,
            intrinsic_size: intrinsic,
        }
    }

    #[test]
    fn test_stride_word_alignment() {
        assert_eq!(stride(100, 32), 400);
        assert_eq!(stride(100, 24), 300);
        assert_eq!(stride(1, 32), 4);
        assert_eq!(stride(1, 24), 4);
        assert_eq!(stride(2, 24), 8);
        assert_eq!(stride(3, 24), 12);
        assert_eq!(stride(1920, 32), 7680);
    }

    #[test]
    fn test_sample_bits_table() {
        assert_eq!(sample_bits(FourCc::new("s8")), 8);
        assert_eq!(sample_bits(FourCc::new("u8")), 8);
        assert_eq!(sample_bits(FourCc::new("s16l")), 16);
        assert_eq!(sample_bits(FourCc::new("s1lp")), 16);
        assert_eq!(sample_bits(FourCc::new("s20b")), 20);
        assert_eq!(sample_bits(FourCc::new("S244")), 24);
        assert_eq!(sample_bits(FourCc::new("u24b")), 24);
        assert_eq!(sample_bits(FourCc::new("f32l")), 32);
        assert_eq!(sample_bits(FourCc::new("FL32")), 32);
        assert_eq!(sample_bits(FourCc::new("f64b")), 64);
        assert_eq!(sample_bits(FourCc::new("FL64")), 64);
        assert_eq!(sample_bits(FourCc::new("S16N")), 16);
        assert_eq!(sample_bits(FourCc::new("U32I")), 32);
        assert_eq!(sample_bits(FourCc::new("mp3 ")), 0);
        assert_eq!(sample_bits(FourCc::new("xxxx")), 0);
    }

    #[test]
    fn test_propose_adopts_decoder_size() {
        let negotiator = FormatNegotiator::new();

        let format = negotiator.propose(&request(640, 360, None));
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 360);
        assert_eq!(format.bits, 32);
        assert_eq!(format.stride, 2560);

        // Without an intrinsic size, each proposal is adopted.
        let format = negotiator.propose(&request(1280, 720, None));
        assert_eq!(format.width, 1280);
        assert_eq!(format.height, 720);
    }

    #[test]
    fn test_intrinsic_size_pins_format() {
        let negotiator = FormatNegotiator::new();

        let format = negotiator.propose(&request(640, 360, Some((1920, 1080))));
        assert_eq!(format.width, 1920);
        assert_eq!(format.height, 1080);

        // Later proposals do not displace the pinned size.
        let format = negotiator.propose(&request(1280, 720, Some((640, 480))));
        assert_eq!(format.width, 1920);
        assert_eq!(format.height, 1080);
    }

    #[test]
    fn test_intrinsic_size_consumed_once() {
        let negotiator = FormatNegotiator::new();

        // First proposal carries no intrinsic size; the later one is ignored
        // because the lookup already happened.
        negotiator.propose(&request(640, 360, None));
        let format = negotiator.propose(&request(800, 600, Some((1920, 1080))));
        assert_eq!(format.width, 800);
        assert_eq!(format.height, 600);
    }

    #[test]
    fn test_negative_intrinsic_height_uses_magnitude() {
        let negotiator = FormatNegotiator::new();

        let format = negotiator.propose(&request(640, 360, Some((1920, -1080))));
        assert_eq!(format.width, 1920);
        assert_eq!(format.height, 1080);
    }

    #[test]
    fn test_adopt_override_echoes_back() {
        let negotiator = FormatNegotiator::new();
        negotiator.propose(&request(640, 360, None));

        let over = VideoFormat { width: 640, height: 392, bits: 24, stride: stride(640, 24) };
        negotiator.adopt(&over);

        assert_eq!(negotiator.current(), over);
        assert_eq!(negotiator.chroma(), FourCc::RV24);
    }

    #[test]
    #[should_panic(expected = "stride")]
    fn test_adopt_rejects_narrow_stride() {
        let negotiator = FormatNegotiator::new();
        negotiator.propose(&request(640, 360, None));

        let bad = VideoFormat { width: 1920, height: 1080, bits: 32, stride: 640 };
        negotiator.adopt(&bad);
    }

    #[test]
    #[should_panic(expected = "pixel depth")]
    fn test_adopt_rejects_odd_depth() {
        let negotiator = FormatNegotiator::new();
        negotiator.propose(&request(640, 360, None));

        let bad = VideoFormat { width: 640, height: 360, bits: 16, stride: stride(640, 16) };
        negotiator.adopt(&bad);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let negotiator = FormatNegotiator::new();
        negotiator.propose(&request(640, 360, Some((1920, 1080))));
        negotiator.reset();

        assert_eq!(negotiator.chroma(), FourCc::RV32);
        let format = negotiator.propose(&request(320, 240, None));
        assert_eq!(format.width, 320);
        assert_eq!(format.height, 240);
        assert_eq!(format.bits, 32);
    }
}
