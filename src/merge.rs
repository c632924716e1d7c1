use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use crate::layout::{ImageSpec, PagePolicy, PageSpec, Placement};
use crate::parse::{parse_jpeg_header, parse_png_header, PngInfo, JPEG_MAGIC, PNG_SIGNATURE};
use crate::walk::{batch_dirs, collect_job, MergeJob};

/// image data ready for PDF insertion
pub enum PreparedImage {
    Jpeg {
        width: u32,
        height: u32,
        components: u8,
        /// true if CMYK values need inversion
        invert_cmyk: bool,
        data: Vec<u8>,
    },
    PngPassthrough {
        info: PngInfo,
    },
    /// decoded pixel data compressed with deflate
    Compressed {
        width: u32,
        height: u32,
        color_channels: u8,
        color_compressed: Vec<u8>,
        alpha_compressed: Option<Vec<u8>>,
    },
}

impl PreparedImage {
    pub fn spec(&self) -> ImageSpec {
        match self {
            PreparedImage::Jpeg { width, height, .. }
            | PreparedImage::Compressed { width, height, .. } => ImageSpec::new(*width, *height),
            PreparedImage::PngPassthrough { info } => ImageSpec::new(info.width, info.height),
        }
    }
}

/// Read an image file and report its pixel size.
///
/// The format is detected from the file content, not the extension.
pub fn prepare_image(path: &Path) -> Result<PreparedImage> {
    let data = std::fs::read(path).map_err(|e| MergeError::decode(path, e))?;
    if data.len() < 4 {
        return Err(MergeError::decode(path, "file too small"));
    }

    if data[..2] == JPEG_MAGIC {
        prepare_jpeg(data, path)
    } else if data.len() >= 8 && data[..8] == PNG_SIGNATURE {
        prepare_png(&data, path)
    } else {
        decode_generic_image(&data, path)
    }
}

fn check_dimensions(width: u32, height: u32, path: &Path) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(MergeError::decode(path, "image has zero width or height"));
    }
    Ok(())
}

/// Decode the whole body of a file that will be embedded as-is.
///
/// Headers alone do not catch truncated or corrupt pixel data.
fn verify_body(data: &[u8], format: image::ImageFormat, path: &Path) -> Result<()> {
    image::load_from_memory_with_format(data, format)
        .map(drop)
        .map_err(|e| MergeError::decode(path, e))
}

fn prepare_jpeg(data: Vec<u8>, path: &Path) -> Result<PreparedImage> {
    let info = parse_jpeg_header(&data).map_err(|e| MergeError::decode(path, e))?;
    check_dimensions(info.width, info.height, path)?;
    if !matches!(info.components, 1 | 3 | 4) {
        return decode_generic_image(&data, path);
    }
    verify_body(&data, image::ImageFormat::Jpeg, path)?;
    // YCCK (transform 2) and Adobe CMYK without a marker are stored inverted
    let invert_cmyk = info.components == 4 && info.adobe_color_transform != Some(0);
    Ok(PreparedImage::Jpeg {
        width: info.width,
        height: info.height,
        components: info.components,
        invert_cmyk,
        data,
    })
}

fn prepare_png(data: &[u8], path: &Path) -> Result<PreparedImage> {
    let info = parse_png_header(data).map_err(|e| MergeError::decode(path, e))?;
    check_dimensions(info.width, info.height, path)?;
    if !info.is_passthrough() {
        return decode_png(data, path);
    }
    if info.color_type == 3 && info.plte_data.is_empty() {
        return Err(MergeError::decode(path, "palette image missing PLTE chunk"));
    }
    verify_body(data, image::ImageFormat::Png, path)?;
    Ok(PreparedImage::PngPassthrough { info })
}

/// split interleaved pixels into deflated color and alpha planes
fn compress_planes(
    pixels: &[u8],
    width: u32,
    height: u32,
    color_channels: usize,
    has_alpha: bool,
) -> std::io::Result<PreparedImage> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let pixel_count = (width as usize) * (height as usize);
    let mut color_enc = ZlibEncoder::new(
        Vec::with_capacity(pixel_count * color_channels / 2),
        Compression::fast(),
    );

    let alpha_compressed = if has_alpha {
        let total_channels = color_channels + 1;
        let mut alpha_enc =
            ZlibEncoder::new(Vec::with_capacity(pixel_count / 2), Compression::fast());
        let row_bytes = width as usize * total_channels;
        let mut color_row = Vec::with_capacity(width as usize * color_channels);
        let mut alpha_row = Vec::with_capacity(width as usize);
        for row in pixels.chunks_exact(row_bytes) {
            color_row.clear();
            alpha_row.clear();
            for px in row.chunks_exact(total_channels) {
                color_row.extend_from_slice(&px[..color_channels]);
                alpha_row.push(px[color_channels]);
            }
            color_enc.write_all(&color_row)?;
            alpha_enc.write_all(&alpha_row)?;
        }
        Some(alpha_enc.finish()?)
    } else {
        color_enc.write_all(pixels)?;
        None
    };

    Ok(PreparedImage::Compressed {
        width,
        height,
        color_channels: color_channels as u8,
        color_compressed: color_enc.finish()?,
        alpha_compressed,
    })
}

/// decode a PNG that cannot be passed through (alpha, tRNS, interlaced)
fn decode_png(data: &[u8], path: &Path) -> Result<PreparedImage> {
    let mut decoder = png::Decoder::new(std::io::Cursor::new(data));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|e| MergeError::decode(path, e))?;
    let buf_size = reader
        .output_buffer_size()
        .ok_or_else(|| MergeError::decode(path, "PNG output buffer size unknown"))?;
    let mut buf = vec![0u8; buf_size];
    let frame = reader
        .next_frame(&mut buf)
        .map_err(|e| MergeError::decode(path, e))?;

    let (color_channels, has_alpha) = match reader.output_color_type().0 {
        png::ColorType::Grayscale => (1, false),
        png::ColorType::GrayscaleAlpha => (1, true),
        png::ColorType::Rgb => (3, false),
        png::ColorType::Rgba => (3, true),
        png::ColorType::Indexed => {
            return Err(MergeError::decode(path, "palette was not expanded"));
        }
    };
    compress_planes(
        &buf[..frame.buffer_size()],
        frame.width,
        frame.height,
        color_channels,
        has_alpha,
    )
    .map_err(|e| MergeError::decode(path, e))
}

/// decode via the image crate and compress for PDF embedding
fn decode_generic_image(data: &[u8], path: &Path) -> Result<PreparedImage> {
    use image::GenericImageView;

    let img = image::load_from_memory(data).map_err(|e| MergeError::decode(path, e))?;
    let (width, height) = img.dimensions();
    let color = img.color();

    let prepared = if color.has_alpha() {
        compress_planes(img.into_rgba8().as_raw(), width, height, 3, true)
    } else if color.channel_count() == 1 {
        compress_planes(img.into_luma8().as_raw(), width, height, 1, false)
    } else {
        compress_planes(img.into_rgb8().as_raw(), width, height, 3, false)
    };
    prepared.map_err(|e| MergeError::decode(path, e))
}

fn device_color_space(channels: u8) -> Object {
    match channels {
        1 => Object::Name(b"DeviceGray".to_vec()),
        4 => Object::Name(b"DeviceCMYK".to_vec()),
        _ => Object::Name(b"DeviceRGB".to_vec()),
    }
}

/// PDF text string, UTF-16BE with BOM when not plain ASCII
fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        return Object::String(s.as_bytes().to_vec(), lopdf::StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, lopdf::StringFormat::Hexadecimal)
}

/// Accumulates pages of a PDF document in memory.
pub struct PdfWriter {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<Object>,
}

impl PdfWriter {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        PdfWriter {
            doc,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// embed an image as an XObject
    fn add_image(&mut self, img: PreparedImage) -> ObjectId {
        let doc = &mut self.doc;
        match img {
            PreparedImage::Jpeg {
                width,
                height,
                components,
                invert_cmyk,
                data,
            } => {
                let mut dict = dictionary! {
                    "Type" => Object::Name(b"XObject".to_vec()),
                    "Subtype" => Object::Name(b"Image".to_vec()),
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => device_color_space(components),
                    "BitsPerComponent" => 8,
                    "Filter" => Object::Name(b"DCTDecode".to_vec()),
                    "Length" => data.len() as i64,
                };
                if invert_cmyk {
                    dict.set(
                        "Decode",
                        Object::Array(
                            [1, 0, 1, 0, 1, 0, 1, 0]
                                .into_iter()
                                .map(Object::Integer)
                                .collect(),
                        ),
                    );
                }
                doc.add_object(Stream::new(dict, data))
            }
            PreparedImage::PngPassthrough { info } => {
                let channels = info.channels();
                let color_space = if info.color_type == 3 {
                    let num_entries = info.plte_data.len() / 3;
                    Object::Array(vec![
                        Object::Name(b"Indexed".to_vec()),
                        Object::Name(b"DeviceRGB".to_vec()),
                        Object::Integer(num_entries as i64 - 1),
                        Object::String(info.plte_data, lopdf::StringFormat::Hexadecimal),
                    ])
                } else {
                    device_color_space(channels)
                };
                let decode_parms = dictionary! {
                    "Predictor" => 15,
                    "Colors" => channels as i64,
                    "BitsPerComponent" => info.bit_depth as i64,
                    "Columns" => info.width as i64,
                };
                doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => Object::Name(b"XObject".to_vec()),
                        "Subtype" => Object::Name(b"Image".to_vec()),
                        "Width" => info.width as i64,
                        "Height" => info.height as i64,
                        "ColorSpace" => color_space,
                        "BitsPerComponent" => info.bit_depth as i64,
                        "Filter" => Object::Name(b"FlateDecode".to_vec()),
                        "DecodeParms" => Object::Dictionary(decode_parms),
                        "Length" => info.idat_data.len() as i64,
                    },
                    info.idat_data,
                ))
            }
            PreparedImage::Compressed {
                width,
                height,
                color_channels,
                color_compressed,
                alpha_compressed,
            } => {
                let mut dict = dictionary! {
                    "Type" => Object::Name(b"XObject".to_vec()),
                    "Subtype" => Object::Name(b"Image".to_vec()),
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => device_color_space(color_channels),
                    "BitsPerComponent" => 8,
                    "Filter" => Object::Name(b"FlateDecode".to_vec()),
                    "Length" => color_compressed.len() as i64,
                };
                if let Some(alpha_data) = alpha_compressed {
                    let smask_id = doc.add_object(Stream::new(
                        dictionary! {
                            "Type" => Object::Name(b"XObject".to_vec()),
                            "Subtype" => Object::Name(b"Image".to_vec()),
                            "Width" => width as i64,
                            "Height" => height as i64,
                            "ColorSpace" => Object::Name(b"DeviceGray".to_vec()),
                            "BitsPerComponent" => 8,
                            "Filter" => Object::Name(b"FlateDecode".to_vec()),
                            "Length" => alpha_data.len() as i64,
                        },
                        alpha_data,
                    ));
                    dict.set("SMask", smask_id);
                }
                doc.add_object(Stream::new(dict, color_compressed))
            }
        }
    }

    /// Append a page of size `page` showing `img` at `placement`.
    pub fn add_page(
        &mut self,
        page: PageSpec,
        img: PreparedImage,
        placement: Placement,
    ) -> std::result::Result<(), lopdf::Error> {
        let image_id = self.add_image(img);
        let (x, y) = placement.pdf_origin(page);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(placement.draw_width as f32),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(placement.draw_height as f32),
                        Object::Real(x as f32),
                        Object::Real(y as f32),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let resources_id = self.doc.add_object(dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        });

        let page_id = self.doc.add_object(dictionary! {
            "Type" => Object::Name(b"Page".to_vec()),
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(page.width as f32),
                Object::Real(page.height as f32),
            ],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        self.page_ids.push(page_id.into());
        Ok(())
    }

    /// Close the page tree and attach catalog and metadata.
    pub fn finish(mut self, title: &str) -> Document {
        let count = self.page_ids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => Object::Name(b"Pages".to_vec()),
                "Kids" => self.page_ids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => Object::Name(b"Catalog".to_vec()),
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let created = chrono::Utc::now().format("D:%Y%m%d%H%M%SZ").to_string();
        let info_id = self.doc.add_object(dictionary! {
            "Producer" => text_string(&format!("img2pdf {}", env!("CARGO_PKG_VERSION"))),
            "Title" => text_string(title),
            "CreationDate" => Object::String(created.into_bytes(), lopdf::StringFormat::Literal),
        });
        self.doc.trailer.set("Info", info_id);
        self.doc
    }
}

fn temp_path(output: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(output.file_name().unwrap_or(output.as_os_str()));
    name.push(".tmp");
    output.with_file_name(name)
}

/// write to a sibling temp file, then rename over `output`
fn save_atomic(doc: &mut Document, output: &Path) -> Result<()> {
    let tmp = temp_path(output);
    let written = doc
        .save(&tmp)
        .map(drop)
        .map_err(|e| MergeError::write(output, e))
        .and_then(|()| std::fs::rename(&tmp, output).map_err(|e| MergeError::write(output, e)));
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

/// Assemble one job into its output document. Returns the page count.
pub fn merge_job(job: &MergeJob, policy: PagePolicy) -> Result<usize> {
    if job.images.is_empty() {
        tracing::warn!("no images found in {}, writing an empty document", job.source.display());
    }
    tracing::info!("merging into {}", job.output.display());
    let start = std::time::Instant::now();

    let mut writer = PdfWriter::new();
    for (i, path) in job.images.iter().enumerate() {
        tracing::info!("page {}: {}", i + 1, path.display());
        let img = prepare_image(path)?;
        let spec = img.spec();
        let (page, placement) = policy.layout(spec);
        tracing::debug!(
            "{}x{} px on {}x{} pt, drawn {:.2}x{:.2} at ({:.2}, {:.2})",
            spec.width,
            spec.height,
            page.width,
            page.height,
            placement.draw_width,
            placement.draw_height,
            placement.offset_x,
            placement.offset_y
        );
        writer
            .add_page(page, img, placement)
            .map_err(|e| MergeError::write(&job.output, e))?;
    }

    let pages = writer.page_count();
    let mut doc = writer.finish(&job.name());
    save_atomic(&mut doc, &job.output)?;

    tracing::info!(
        "merged {} page(s) into {} in {:.2}s",
        pages,
        job.output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(pages)
}

fn merge_with_policy(dir: &Path, policy: PagePolicy) -> Result<usize> {
    let span = tracing::info_span!("merge", dir = %dir.display());
    let _enter = span.enter();
    let job = collect_job(dir)?;
    merge_job(&job, policy)
}

/// Merge the images directly inside `dir` into `<dir>.pdf`.
pub fn merge_dir(dir: &Path, config: &MergeConfig) -> Result<usize> {
    let policy = PagePolicy::from_config(config)?;
    merge_with_policy(dir, policy)
}

/// Merge every immediate sub-directory of `dir` into its own document.
///
/// The first failing sub-directory aborts the batch. With more than one
/// thread, sub-directories run concurrently but each job stays sequential.
pub fn merge_batch(dir: &Path, config: &MergeConfig) -> Result<usize> {
    let policy = PagePolicy::from_config(config)?;
    let dirs = batch_dirs(dir)?;
    if config.threads > 1 {
        dirs.par_iter()
            .map(|sub| merge_with_policy(sub, policy))
            .try_reduce(|| 0, |a, b| Ok(a + b))
    } else {
        dirs.iter()
            .map(|sub| merge_with_policy(sub, policy))
            .sum()
    }
}
