//! Image decoding and conversion to network inputs.

use std::{ops::RangeInclusive, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, ImageFormat as CodecFormat, Rgb};

use crate::nn::tensor::Tensor;

pub use image::RgbImage;

/// Enumeration of image formats supported by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ImageFormat {
    /// JFIF JPEG or Motion JPEG.
    Jpeg,
    /// Portable Network Graphics.
    Png,
}

impl ImageFormat {
    pub fn from_extension(path: &Path) -> anyhow::Result<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg" | "jpeg") => Ok(Self::Jpeg),
            Some("png") => Ok(Self::Png),
            _ => anyhow::bail!(
                "invalid image path '{}' (must have one of the supported extensions)",
                path.display()
            ),
        }
    }

    fn codec(self) -> CodecFormat {
        match self {
            Self::Jpeg => CodecFormat::Jpeg,
            Self::Png => CodecFormat::Png,
        }
    }
}

/// Returns whether `path` has an extension of a supported image format.
pub fn is_image_path(path: &Path) -> bool {
    ImageFormat::from_extension(path).is_ok()
}

/// Loads an image from the filesystem.
///
/// The path must have a supported file extension (`jpeg`, `jpg` or `png`).
pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<RgbImage> {
    let path = path.as_ref();
    let format = ImageFormat::from_extension(path)?;
    let data = std::fs::read(path)?;
    let image = image::load_from_memory_with_format(&data, format.codec())?;
    Ok(image.to_rgb8())
}

/// Decodes a JPEG or PNG image from a byte slice, guessing the format from its contents.
pub fn decode(data: &[u8]) -> anyhow::Result<RgbImage> {
    let format = image::guess_format(data)?;
    if !matches!(format, CodecFormat::Jpeg | CodecFormat::Png) {
        anyhow::bail!("unsupported image format {:?}", format);
    }
    Ok(image::load_from_memory_with_format(data, format)?.to_rgb8())
}

/// Decodes a base64 image payload.
///
/// Browser clients usually send `data:image/jpeg;base64,...` URLs; everything up to and including
/// the first `,` is stripped before decoding.
pub fn decode_base64(payload: &str) -> anyhow::Result<RgbImage> {
    let encoded = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };
    let bytes = STANDARD.decode(encoded.trim())?;
    decode(&bytes)
}

/// Maps 8-bit color channels into the range a network expects.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());
        Self { target_range }
    }

    fn map(&self, color: Rgb<u8>) -> [f32; 3] {
        let start = *self.target_range.start();
        let end = *self.target_range.end();

        let adjust_range = (end - start) / 255.0;
        color.0.map(|col| col as f32 * adjust_range + start)
    }
}

/// Resizes `image` to `width`x`height` (stretching it if the aspect ratios differ) and converts it
/// to an `[1, 3, H, W]` tensor.
pub fn to_nchw_tensor(image: &RgbImage, width: u32, height: u32, mapper: &ColorMapper) -> Tensor {
    let resized = if image.dimensions() == (width, height) {
        image.clone()
    } else {
        image::imageops::resize(image, width, height, FilterType::Triangle)
    };
    let (w, h) = (width as usize, height as usize);

    Tensor::from_array_shape_fn([1, 3, h, w], |[_, c, y, x]| {
        mapper.map(*resized.get_pixel(x as u32, y as u32))[c]
    })
}
