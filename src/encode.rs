//! Flat file encoders for composites.
//!
//! - PNG: streamed row by row through the `png` crate, the composite is
//!   never held in memory. Opaque sources are written as RGB.
//! - JPEG / WebP: the `image` crate needs the whole buffer, so the source is
//!   materialized first. Both formats have hard size limits that are checked
//!   before anything is allocated.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::{DynamicImage, RgbaImage};
use log::{debug, info};

use crate::entities::{Encoder, PixelSource};
use crate::error::{Result, StitchError};

/// Largest JPEG side in pixels
pub const JPEG_MAX_SIDE: u32 = 65_535;
/// Largest lossless WebP side in pixels
pub const WEBP_MAX_SIDE: u32 = 16_383;

/// Output file formats understood by the flat exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatFormat {
    Png,
    Jpeg,
    Webp,
}

impl FlatFormat {
    /// Infer from a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

/// PNG compression preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PngCompression {
    Fast,
    #[default]
    Default,
    Best,
}

impl From<PngCompression> for png::Compression {
    fn from(c: PngCompression) -> Self {
        match c {
            PngCompression::Fast => png::Compression::Fast,
            PngCompression::Default => png::Compression::Default,
            PngCompression::Best => png::Compression::Best,
        }
    }
}

/// Encoder knobs shared by the flat exporter and the pyramid
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    pub png_compression: PngCompression,
    pub jpeg_quality: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            png_compression: PngCompression::Default,
            jpeg_quality: 80,
        }
    }
}

/// Encoder for `format` configured from `options`
pub fn encoder_for(format: FlatFormat, options: &EncodeOptions) -> Box<dyn Encoder> {
    match format {
        FlatFormat::Png => Box::new(PngEncoder {
            compression: options.png_compression,
        }),
        FlatFormat::Jpeg => Box::new(JpegEncoder {
            quality: options.jpeg_quality,
        }),
        FlatFormat::Webp => Box::new(WebpEncoder),
    }
}

/// Streaming PNG writer
#[derive(Debug, Clone, Copy, Default)]
pub struct PngEncoder {
    pub compression: PngCompression,
}

impl Encoder for PngEncoder {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn encode(&self, image: &dyn PixelSource, path: &Path) -> Result<()> {
        let b = image.bounds();
        let (width, height) = (b.width(), b.height());
        let opaque = image.is_opaque();

        let file = File::create(path).map_err(|e| StitchError::export(path, e))?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(if opaque {
            png::ColorType::Rgb
        } else {
            png::ColorType::Rgba
        });
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(self.compression.into());

        let mut stream = encoder
            .write_header()
            .and_then(|w| w.into_stream_writer())
            .map_err(|e| StitchError::export(path, e))?;

        let mut row = Vec::with_capacity(width as usize * 4);
        let mut rgb = Vec::with_capacity(if opaque { width as usize * 3 } else { 0 });
        for y in b.min.y..b.max.y {
            image.read_row(y, &mut row)?;
            let bytes = if opaque {
                rgb.clear();
                rgb.extend(row.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]));
                &rgb
            } else {
                &row
            };
            stream
                .write_all(bytes)
                .map_err(|e| StitchError::export(path, e))?;
        }
        stream.finish().map_err(|e| StitchError::export(path, e))?;
        Ok(())
    }
}

/// Baseline JPEG writer (materializes the image)
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    pub quality: u8,
}

impl Encoder for JpegEncoder {
    fn extension(&self) -> &'static str {
        "jpg"
    }

    fn encode(&self, image: &dyn PixelSource, path: &Path) -> Result<()> {
        check_limit(image, "JPEG", JPEG_MAX_SIDE)?;
        let rgb = DynamicImage::ImageRgba8(materialize(image)?).to_rgb8();

        let mut out = BufWriter::new(File::create(path).map_err(|e| StitchError::export(path, e))?);
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(|e| StitchError::export(path, e))?;
        out.flush().map_err(|e| StitchError::export(path, e))?;
        Ok(())
    }
}

/// Lossless WebP writer (materializes the image)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpEncoder;

impl Encoder for WebpEncoder {
    fn extension(&self) -> &'static str {
        "webp"
    }

    fn encode(&self, image: &dyn PixelSource, path: &Path) -> Result<()> {
        check_limit(image, "WebP", WEBP_MAX_SIDE)?;
        let rgba = materialize(image)?;

        let mut out = BufWriter::new(File::create(path).map_err(|e| StitchError::export(path, e))?);
        image::codecs::webp::WebPEncoder::new_lossless(&mut out)
            .encode(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| StitchError::export(path, e))?;
        out.flush().map_err(|e| StitchError::export(path, e))?;
        Ok(())
    }
}

fn check_limit(image: &dyn PixelSource, format: &'static str, limit: u32) -> Result<()> {
    let b = image.bounds();
    if b.width() > limit || b.height() > limit {
        return Err(StitchError::ImageTooLarge {
            format,
            width: b.width(),
            height: b.height(),
            limit,
        });
    }
    Ok(())
}

/// Read a whole pixel source into memory, top to bottom
pub fn materialize(image: &dyn PixelSource) -> Result<RgbaImage> {
    let b = image.bounds();
    debug!("Materializing {}x{} image", b.width(), b.height());

    let mut raw = Vec::with_capacity(b.area() as usize * 4);
    let mut row = Vec::with_capacity(b.width() as usize * 4);
    for y in b.min.y..b.max.y {
        image.read_row(y, &mut row)?;
        raw.extend_from_slice(&row);
    }
    RgbaImage::from_raw(b.width(), b.height(), raw)
        .ok_or_else(|| StitchError::config("pixel source returned short rows"))
}

/// Write `image` to `path` in the format named by its extension.
pub fn export_flat(image: &dyn PixelSource, path: &Path, options: &EncodeOptions) -> Result<()> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FlatFormat::from_extension)
        .ok_or_else(|| StitchError::export(path, "unsupported output extension"))?;

    let b = image.bounds();
    info!(
        "Creating output file {:?} ({}x{} {})",
        path,
        b.width(),
        b.height(),
        format.extension()
    );
    encoder_for(format, options).encode(image, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geom::Rect;
    use crate::entities::Canvas;
    use image::Rgba;

    /// In-memory source for encoder tests
    struct Solid(Canvas);

    impl PixelSource for Solid {
        fn bounds(&self) -> Rect {
            self.0.rect()
        }
        fn rgba_at(&self, x: i32, y: i32) -> Rgba<u8> {
            self.0.get(x, y)
        }
        fn is_opaque(&self) -> bool {
            self.0.image().pixels().all(|p| p[3] == 255)
        }
    }

    fn gradient(rect: Rect, alpha: u8) -> Solid {
        let mut c = Canvas::new(rect, Rgba([0, 0, 0, alpha]));
        for y in rect.min.y..rect.max.y {
            for x in rect.min.x..rect.max.x {
                c.put(x, y, Rgba([(x * 7) as u8, (y * 3) as u8, 99, alpha]));
            }
        }
        Solid(c)
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FlatFormat::from_extension("PNG"), Some(FlatFormat::Png));
        assert_eq!(FlatFormat::from_extension("jpeg"), Some(FlatFormat::Jpeg));
        assert_eq!(FlatFormat::from_extension("jpg"), Some(FlatFormat::Jpeg));
        assert_eq!(FlatFormat::from_extension("webp"), Some(FlatFormat::Webp));
        assert_eq!(FlatFormat::from_extension("dzi"), None);
    }

    /// Test: streamed PNG decodes to the same pixels
    /// Validates: opaque sources are written as RGB, world offset dropped
    #[test]
    fn test_png_streams_opaque_as_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let src = gradient(Rect::new(-3, 10, 17, 25), 255);

        export_flat(&src, &path, &EncodeOptions::default()).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        let decoded = decoded.to_rgba8();
        assert_eq!(decoded.dimensions(), (20, 15));
        assert_eq!(decoded.get_pixel(0, 0), &src.rgba_at(-3, 10));
        assert_eq!(decoded.get_pixel(19, 14), &src.rgba_at(16, 24));
    }

    #[test]
    fn test_png_keeps_alpha_when_translucent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let src = gradient(Rect::new(0, 0, 4, 4), 128);

        PngEncoder::default().encode(&src, &path).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgba8);
        assert_eq!(decoded.to_rgba8().get_pixel(2, 1)[3], 128);
    }

    #[test]
    fn test_jpeg_and_webp_write() {
        let dir = tempfile::tempdir().unwrap();
        let src = gradient(Rect::new(0, 0, 16, 8), 255);

        let jpg = dir.path().join("out.jpg");
        export_flat(&src, &jpg, &EncodeOptions::default()).unwrap();
        assert_eq!(image::image_dimensions(&jpg).unwrap(), (16, 8));

        let webp = dir.path().join("out.webp");
        export_flat(&src, &webp, &EncodeOptions::default()).unwrap();
        let back = image::open(&webp).unwrap().to_rgba8();
        assert_eq!(back.get_pixel(5, 5), &src.rgba_at(5, 5));
    }

    #[test]
    fn test_webp_limit() {
        // Bounds only; no pixel is ever read
        let src = Solid(Canvas::new(Rect::new(0, 0, 1, 1), Rgba([0, 0, 0, 255])));
        struct Huge(Solid);
        impl PixelSource for Huge {
            fn bounds(&self) -> Rect {
                Rect::new(0, 0, WEBP_MAX_SIDE as i32 + 1, 1)
            }
            fn rgba_at(&self, x: i32, y: i32) -> Rgba<u8> {
                self.0.rgba_at(x, y)
            }
            fn is_opaque(&self) -> bool {
                true
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let err = WebpEncoder
            .encode(&Huge(src), &dir.path().join("x.webp"))
            .unwrap_err();
        assert!(matches!(err, StitchError::ImageTooLarge { limit: WEBP_MAX_SIDE, .. }));
    }

    #[test]
    fn test_unknown_extension() {
        let src = gradient(Rect::new(0, 0, 1, 1), 255);
        assert!(matches!(
            export_flat(&src, Path::new("out.bmp"), &EncodeOptions::default()),
            Err(StitchError::Export { .. })
        ));
    }
}
