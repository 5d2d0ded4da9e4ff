/// WebP rendition of a source photo
///
/// RAW files are rendered from their largest decodable embedded JPEG
/// preview rather than the sensor data. Raster files go straight through
/// the `image` decoders. Both paths apply the EXIF orientation, downscale to
/// the configured long edge and optionally stamp a watermark.
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use std::io::{BufRead, BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use super::ArtifactError;

/// RAW formats rendered through their embedded preview
pub const RAW_EXTENSIONS: [&str; 7] = ["arw", "cr2", "nef", "dng", "raf", "orf", "rw2"];

/// Default long edge of a rendition, in pixels
pub const DEFAULT_MAX_EDGE: u32 = 2560;

/// Watermark offset from the left edge
const WATERMARK_LEFT: i64 = 15;
/// Watermark offset from the bottom edge
const WATERMARK_BOTTOM: i64 = 20;

/// Produces the derived artifact for one source file
pub trait Transcoder {
    fn transcode(&self, source: &Path, dest: &Path) -> Result<(), ArtifactError>;
}

/// Overlay stamped onto every rendition
#[derive(Debug, Clone)]
pub struct Watermark {
    image: RgbaImage,
}

impl Watermark {
    /// Load a watermark and scale its alpha channel by `opacity` (0.0 - 1.0)
    pub fn load(path: &Path, opacity: f32) -> Result<Self, ArtifactError> {
        let mut image = image::open(path)
            .map_err(|source| ArtifactError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();

        let opacity = opacity.clamp(0.0, 1.0);
        for pixel in image.pixels_mut() {
            pixel.0[3] = (pixel.0[3] as f32 * opacity).round() as u8;
        }
        Ok(Self { image })
    }

    fn stamp(&self, base: &mut RgbaImage) {
        let y = base.height() as i64 - self.image.height() as i64 - WATERMARK_BOTTOM;
        imageops::overlay(base, &self.image, WATERMARK_LEFT, y.max(0));
    }
}

/// Default transcoder built on the `image` crate
#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    max_edge: u32,
    watermark: Option<Watermark>,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EDGE)
    }
}

impl ImageTranscoder {
    pub fn new(max_edge: u32) -> Self {
        Self {
            max_edge: max_edge.max(1),
            watermark: None,
        }
    }

    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Some(watermark);
        self
    }

    fn decode(&self, source: &Path) -> Result<DynamicImage, ArtifactError> {
        if is_raw(source) {
            return decode_raw_preview(source);
        }
        let reader = ImageReader::open(source)
            .map_err(|e| ArtifactError::io(source, e))?
            .with_guessed_format()
            .map_err(|e| ArtifactError::io(source, e))?;
        decode_oriented(reader, source)
    }
}

impl Transcoder for ImageTranscoder {
    fn transcode(&self, source: &Path, dest: &Path) -> Result<(), ArtifactError> {
        let mut img = self.decode(source)?;

        if img.width() > self.max_edge || img.height() > self.max_edge {
            img = img.resize(self.max_edge, self.max_edge, FilterType::Lanczos3);
        }

        let rendition = match &self.watermark {
            Some(watermark) => {
                let mut canvas = img.to_rgba8();
                watermark.stamp(&mut canvas);
                DynamicImage::ImageRgba8(canvas)
            }
            None if img.color().has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
            None => DynamicImage::ImageRgb8(img.to_rgb8()),
        };

        write_atomically(dest, |out| {
            rendition
                .write_to(out, ImageFormat::WebP)
                .map_err(|source| ArtifactError::Encode {
                    path: dest.to_path_buf(),
                    source,
                })
        })?;

        debug!(
            source = %source.display(),
            dest = %dest.display(),
            width = rendition.width(),
            height = rendition.height(),
            "transcoded"
        );
        Ok(())
    }
}

/// Whether a path carries one of the RAW extensions
pub fn is_raw(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RAW_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn decode_oriented<R: BufRead + Seek>(
    reader: ImageReader<R>,
    path: &Path,
) -> Result<DynamicImage, ArtifactError> {
    let decode_err = |source: image::ImageError| ArtifactError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Decode the largest embedded JPEG that actually decodes. Orientation comes
/// from the preview's own EXIF, else from the RAW container's.
fn decode_raw_preview(source: &Path) -> Result<DynamicImage, ArtifactError> {
    let data = std::fs::read(source).map_err(|e| ArtifactError::io(source, e))?;

    let mut candidates = embedded_jpegs(&data);
    candidates.sort_by(|a, b| b.len().cmp(&a.len()));

    for jpeg in candidates {
        let reader = ImageReader::with_format(Cursor::new(jpeg), ImageFormat::Jpeg);
        let Ok(mut decoder) = reader.into_decoder() else {
            continue;
        };
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let Ok(mut img) = DynamicImage::from_decoder(decoder) else {
            continue;
        };

        let orientation = if orientation == Orientation::NoTransforms {
            super::exif::read_orientation(source)
                .and_then(Orientation::from_exif)
                .unwrap_or(orientation)
        } else {
            orientation
        };
        img.apply_orientation(orientation);

        debug!(
            source = %source.display(),
            bytes = jpeg.len(),
            "decoded embedded preview"
        );
        return Ok(img);
    }

    Err(ArtifactError::NoPreview(source.to_path_buf()))
}

/// Every SOI..EOI span in a RAW file
fn embedded_jpegs(data: &[u8]) -> Vec<&[u8]> {
    const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
    const EOI: [u8; 2] = [0xFF, 0xD9];

    let mut spans = Vec::new();
    let mut pos = 0;
    while pos + SOI.len() <= data.len() {
        if data[pos..].starts_with(&SOI) {
            if let Some(end) = data[pos..].windows(2).position(|w| w == EOI) {
                let end = pos + end + EOI.len();
                spans.push(&data[pos..end]);
                pos = end;
                continue;
            }
            break;
        }
        pos += 1;
    }
    spans
}

/// Write through a temp file in the destination directory, then rename, so
/// a crash never leaves a truncated artifact behind.
pub(crate) fn write_atomically<F>(dest: &Path, write: F) -> Result<(), ArtifactError>
where
    F: FnOnce(&mut BufWriter<&mut std::fs::File>) -> Result<(), ArtifactError>,
{
    let parent: PathBuf = dest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent).map_err(|e| ArtifactError::io(&parent, e))?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| ArtifactError::io(&parent, e))?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush().map_err(|e| ArtifactError::io(dest, e))?;
    }
    tmp.persist(dest)
        .map_err(|e| ArtifactError::io(dest, e.error))?;
    Ok(())
}
