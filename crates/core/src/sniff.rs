//! Image dimension extraction from raw container bytes.
//!
//! Parses just enough of each header to recover the pixel dimensions. No pixel
//! data is decoded and no external image library is involved. Every parser is
//! total: truncated or foreign input yields `None`, never a panic.

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The shorter of the two sides.
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Container formats the sniffer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    WebP,
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

impl ImageFormat {
    /// Map a declared mime type to a parser.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match crate::media::essence(mime).as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/bmp" | "image/x-ms-bmp" | "image/x-bmp" => Some(Self::Bmp),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Guess the format from leading magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&PNG_SIGNATURE) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
            Some(Self::WebP)
        } else {
            None
        }
    }

    fn parse(self, bytes: &[u8]) -> Option<Dimensions> {
        match self {
            Self::Png => png_dimensions(bytes),
            Self::Jpeg => jpeg_dimensions(bytes),
            Self::Gif => gif_dimensions(bytes),
            Self::Bmp => bmp_dimensions(bytes),
            Self::WebP => webp_dimensions(bytes),
        }
    }
}

/// Determine the dimensions of an encoded image.
///
/// The declared mime picks the parser; when it names no known image format the
/// leading signature is used instead. A declared format that disagrees with the
/// bytes is reported as unrecognized.
pub fn sniff(bytes: &[u8], declared_mime: &str) -> Option<Dimensions> {
    let format = ImageFormat::from_mime(declared_mime).or_else(|| ImageFormat::detect(bytes))?;
    format
        .parse(bytes)
        .filter(|dims| dims.width > 0 && dims.height > 0)
}

fn be_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]))
}

fn be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn le_u24(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 3)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], 0]))
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn le_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    le_u32(bytes, offset).map(|v| v as i32)
}

fn png_dimensions(bytes: &[u8]) -> Option<Dimensions> {
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return None;
    }
    // IHDR is always the first chunk: length(4) type(4) width(4) height(4).
    Some(Dimensions::new(be_u32(bytes, 16)?, be_u32(bytes, 20)?))
}

fn is_start_of_frame(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF)
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<Dimensions> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let mut offset = 2;
    loop {
        if *bytes.get(offset)? != 0xFF {
            return None;
        }
        let marker = *bytes.get(offset + 1)?;
        match marker {
            // Fill byte before the real marker.
            0xFF => {
                offset += 1;
                continue;
            }
            // Standalone markers carry no length field.
            0x01 | 0xD0..=0xD7 => {
                offset += 2;
                continue;
            }
            // Entropy-coded data or end of image before any frame header.
            0xD9 | 0xDA => return None,
            _ => {}
        }

        if is_start_of_frame(marker) {
            // FF Cx | length(2) | precision(1) | height(2) | width(2)
            let height = be_u16(bytes, offset + 5)?;
            let width = be_u16(bytes, offset + 7)?;
            return Some(Dimensions::new(u32::from(width), u32::from(height)));
        }

        let length = usize::from(be_u16(bytes, offset + 2)?);
        if length < 2 {
            return None;
        }
        offset = offset.checked_add(2 + length)?;
    }
}

fn gif_dimensions(bytes: &[u8]) -> Option<Dimensions> {
    if !(bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")) {
        return None;
    }
    Some(Dimensions::new(
        u32::from(le_u16(bytes, 6)?),
        u32::from(le_u16(bytes, 8)?),
    ))
}

fn bmp_dimensions(bytes: &[u8]) -> Option<Dimensions> {
    if !bytes.starts_with(b"BM") {
        return None;
    }
    let dib_size = le_u32(bytes, 14)?;
    if dib_size < 12 {
        return None;
    }
    if dib_size == 12 {
        // OS/2 BITMAPCOREHEADER keeps 16-bit unsigned dimensions.
        return Some(Dimensions::new(
            u32::from(le_u16(bytes, 18)?),
            u32::from(le_u16(bytes, 20)?),
        ));
    }

    let width = le_i32(bytes, 18)?;
    if width <= 0 {
        return None;
    }
    // Negative height marks top-down row order.
    let height = le_i32(bytes, 22)?.unsigned_abs();
    Some(Dimensions::new(width as u32, height))
}

fn webp_dimensions(bytes: &[u8]) -> Option<Dimensions> {
    if bytes.get(0..4)? != b"RIFF" || bytes.get(8..12)? != b"WEBP" {
        return None;
    }
    if bytes.get(12..16)? != b"VP8X" {
        return None;
    }
    // Chunk header(8) + flags(4), then 24-bit canvas width-1 and height-1.
    let width = le_u24(bytes, 24)? + 1;
    let height = le_u24(bytes, 27)? + 1;
    Some(Dimensions::new(width, height))
}
