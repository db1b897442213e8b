//! Source page rendering: one PDF page → base64 JPEG via pdfium.
//!
//! The table substituter reaches the source PDF only through
//! [`PageRenderer`], so tests can count and fake renders and the pdfium
//! binding stays out of the core stages.
//!
//! ## Why scale by DPI here?
//!
//! Rendered table pages sit next to images cropped by the OCR service at
//! 200 DPI. Rendering at the same density keeps the substituted tables as
//! legible as the figures around them. PDF user space is 72 units per inch,
//! so the scale factor is `dpi / 72`.

use crate::error::{RenderError, ZoneDocError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// A rendered page ready to become an [`crate::document::Image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub image_base64: String,
    pub width: u32,
    pub height: u32,
}

/// Renders pages of the original paginated source.
pub trait PageRenderer {
    /// Render the 0-based `page` of `source`.
    ///
    /// Fails with [`RenderError::NotFound`] when `source` does not exist and
    /// [`RenderError::OutOfRange`] when `page` is past the last page.
    fn render_page(&self, source: &Path, page: usize) -> Result<RenderedPage, RenderError>;
}

/// [`PageRenderer`] backed by the pdfium library.
pub struct PdfiumRenderer {
    pdfium: Pdfium,
    dpi: u32,
    jpeg_quality: u8,
}

impl PdfiumRenderer {
    /// Bind to pdfium: a `libpdfium` next to the working directory first,
    /// then the system library.
    pub fn new(dpi: u32, jpeg_quality: u8) -> Result<Self, ZoneDocError> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| ZoneDocError::PdfiumBindingFailed(format!("{:?}", e)))?;
        info!("pdfium bound; rendering tables at {} DPI", dpi);
        Ok(Self {
            pdfium: Pdfium::new(bindings),
            dpi,
            jpeg_quality,
        })
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render_page(&self, source: &Path, page: usize) -> Result<RenderedPage, RenderError> {
        if !source.exists() {
            return Err(RenderError::NotFound {
                path: source.to_path_buf(),
            });
        }

        let document = self
            .pdfium
            .load_pdf_from_file(source, None)
            .map_err(|e| RenderError::Rasterisation {
                page,
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if page >= total {
            return Err(RenderError::OutOfRange { page, total });
        }

        let pdf_page = pages
            .get(page as u16)
            .map_err(|e| RenderError::Rasterisation {
                page,
                detail: format!("{:?}", e),
            })?;

        let render_config =
            PdfRenderConfig::new().scale_page_by_factor(self.dpi as f32 / 72.0);
        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Rasterisation {
                page,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        let (width, height) = (image.width(), image.height());
        debug!("Rendered source page {} → {}x{} px", page + 1, width, height);

        let image_base64 =
            encode_jpeg(&image, self.jpeg_quality).map_err(|e| RenderError::Encoding {
                page,
                detail: e.to_string(),
            })?;

        Ok(RenderedPage {
            image_base64,
            width,
            height,
        })
    }
}

/// Encode an image as a base64 JPEG.
///
/// Rendered pages are photographs of text; at quality 85 JPEG keeps them
/// readable at a fraction of PNG's size, which matters because every
/// substituted table is embedded in the document JSON.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page → {} bytes base64", b64.len());
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 12, Rgba([255, 0, 0, 255])));
        let b64 = encode_jpeg(&img, 85).expect("encode should succeed");
        let decoded = STANDARD.decode(&b64).expect("valid base64");
        // JPEG SOI marker
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
        let back = image::load_from_memory(&decoded).expect("valid jpeg");
        assert_eq!((back.width(), back.height()), (10, 12));
    }

    #[test]
    fn missing_source_is_not_found() {
        // Needs a pdfium library; skip quietly when none is installed.
        let Ok(renderer) = PdfiumRenderer::new(200, 85) else {
            println!("SKIP: pdfium not available");
            return;
        };
        let err = renderer
            .render_page(Path::new("/nonexistent/source.pdf"), 0)
            .unwrap_err();
        assert!(matches!(err, RenderError::NotFound { .. }));
    }
}
