use std::str::FromStr;

use crate::error::MergeError;
use crate::layout::PageSpec;

/// ISO A-series page sizes, rounded to whole points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    A0,
    A1,
    A2,
    A3,
    A4,
}

impl PageSize {
    pub fn dimensions_pt(self) -> (f64, f64) {
        match self {
            PageSize::A0 => (2384.0, 3371.0),
            PageSize::A1 => (1685.0, 2384.0),
            PageSize::A2 => (1190.0, 1684.0),
            PageSize::A3 => (842.0, 1190.0),
            PageSize::A4 => (595.0, 842.0),
        }
    }

    pub fn page_spec(self) -> PageSpec {
        let (w, h) = self.dimensions_pt();
        PageSpec::new(w, h)
    }
}

impl FromStr for PageSize {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A0" => Ok(PageSize::A0),
            "A1" => Ok(PageSize::A1),
            "A2" => Ok(PageSize::A2),
            "A3" => Ok(PageSize::A3),
            "A4" => Ok(PageSize::A4),
            other => Err(MergeError::UnsupportedPageSize(other.to_string())),
        }
    }
}

pub const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    /// transform flag of the Adobe APP14 segment, if present
    pub adobe_color_transform: Option<u8>,
}

/// parse a JPEG file's markers up to the SOF segment
pub fn parse_jpeg_header(data: &[u8]) -> Result<JpegInfo, String> {
    if data.len() < 2 || data[..2] != JPEG_MAGIC {
        return Err("not a valid JPEG file".into());
    }
    let mut adobe_color_transform = None;
    let mut pos = 2;
    while pos + 4 < data.len() {
        if data[pos] != 0xFF {
            return Err(format!("invalid JPEG marker at offset {}", pos));
        }
        let marker = data[pos + 1];
        // fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // standalone markers carry no length
        if marker == 0x00 || marker == 0x01 || (0xD0..=0xD9).contains(&marker) {
            pos += 2;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > data.len() {
            return Err(format!("truncated JPEG segment at offset {}", pos));
        }
        let payload = &data[pos + 4..pos + 2 + len];

        if marker == 0xEE && payload.len() >= 12 && payload.starts_with(b"Adobe") {
            adobe_color_transform = Some(payload[11]);
        }
        // SOF0-SOF15, excluding DHT (C4), JPG (C8) and DAC (CC)
        if matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF) {
            if payload.len() < 6 {
                return Err("truncated SOF segment".into());
            }
            let height = u16::from_be_bytes([payload[1], payload[2]]) as u32;
            let width = u16::from_be_bytes([payload[3], payload[4]]) as u32;
            return Ok(JpegInfo {
                width,
                height,
                components: payload[5],
                adobe_color_transform,
            });
        }
        // start of scan without a frame header
        if marker == 0xDA {
            break;
        }
        pos += 2 + len;
    }
    Err("no SOF marker found in JPEG".into())
}

#[derive(Debug, Clone)]
pub struct PngInfo {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlace: u8,
    pub has_trns: bool,
    pub idat_data: Vec<u8>,
    pub plte_data: Vec<u8>,
}

impl PngInfo {
    /// samples per pixel for the PNG color type
    pub fn channels(&self) -> u8 {
        match self.color_type {
            2 => 3,
            4 => 2,
            6 => 4,
            _ => 1,
        }
    }

    /// IDAT data can be embedded as-is with PNG predictors
    pub fn is_passthrough(&self) -> bool {
        self.interlace == 0 && !self.has_trns && matches!(self.color_type, 0 | 2 | 3)
    }
}

/// parse a PNG file's IHDR and collect PLTE and concatenated IDAT data
pub fn parse_png_header(data: &[u8]) -> Result<PngInfo, String> {
    if data.len() < 8 || data[..8] != PNG_SIGNATURE {
        return Err("not a valid PNG file".into());
    }

    let mut pos = 8;
    let mut ihdr: Option<(u32, u32, u8, u8, u8)> = None;
    let mut has_trns = false;
    let mut idat_data = Vec::new();
    let mut plte_data = Vec::new();

    while pos + 8 <= data.len() {
        let chunk_len =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let chunk_type = &data[pos + 4..pos + 8];
        let start = pos + 8;
        // length + type + data + CRC
        let chunk_end = start
            .checked_add(chunk_len)
            .and_then(|n| n.checked_add(4))
            .filter(|&n| n <= data.len())
            .ok_or_else(|| "truncated PNG chunk".to_string())?;
        let chunk = &data[start..start + chunk_len];

        match chunk_type {
            b"IHDR" => {
                if chunk_len < 13 {
                    return Err("truncated IHDR".into());
                }
                let width = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let height = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                ihdr = Some((width, height, chunk[8], chunk[9], chunk[12]));
            }
            b"PLTE" => plte_data.extend_from_slice(chunk),
            b"tRNS" => has_trns = true,
            b"IDAT" => idat_data.extend_from_slice(chunk),
            b"IEND" => break,
            _ => {}
        }
        pos = chunk_end;
    }

    let (width, height, bit_depth, color_type, interlace) =
        ihdr.ok_or_else(|| "no IHDR chunk found in PNG".to_string())?;
    if idat_data.is_empty() {
        return Err("no IDAT chunks found in PNG".into());
    }

    Ok(PngInfo {
        width,
        height,
        bit_depth,
        color_type,
        interlace,
        has_trns,
        idat_data,
        plte_data,
    })
}
