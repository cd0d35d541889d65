//! Scanned pages to one paginated PDF
//!
//! Every page is scaled to fit the printable area (aspect ratio kept),
//! centred on a white page, JPEG-encoded and placed full-page.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};

use super::pdf::{write_pdf, PdfDocument, PdfPage};
use crate::config::ScanSettings;
use crate::error::{VaultError, VaultResult};

/// Composes scanner output into a PDF with fixed page geometry
#[derive(Debug, Clone)]
pub struct ScanComposer {
    settings: ScanSettings,
}

impl ScanComposer {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }

    /// Compose encoded page images (any format `image` decodes) into a PDF
    pub fn compose(&self, title: &str, pages: &[Vec<u8>]) -> VaultResult<Vec<u8>> {
        if pages.is_empty() {
            return Err(VaultError::invalid("scan has no pages"));
        }

        let rendered = pages
            .iter()
            .enumerate()
            .map(|(index, data)| {
                let img = image::load_from_memory(data).map_err(|e| {
                    VaultError::invalid(format!("scan page {}: {e}", index + 1))
                })?;
                self.render_page(&img)
            })
            .collect::<VaultResult<Vec<_>>>()?;

        let dpi = f64::from(self.settings.dpi);
        Ok(write_pdf(&PdfDocument {
            title,
            page_width_pt: f64::from(self.settings.page_width_px) * 72.0 / dpi,
            page_height_pt: f64::from(self.settings.page_height_px) * 72.0 / dpi,
            pages: &rendered,
        }))
    }

    fn render_page(&self, img: &DynamicImage) -> VaultResult<PdfPage> {
        let s = &self.settings;
        let (fit_w, fit_h) = self.fit(img.dimensions());

        let scaled = imageops::resize(&img.to_rgb8(), fit_w, fit_h, FilterType::Lanczos3);
        let mut canvas = RgbImage::from_pixel(s.page_width_px, s.page_height_px, Rgb([255, 255, 255]));
        let x = (s.page_width_px - fit_w) / 2;
        let y = (s.page_height_px - fit_h) / 2;
        imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, s.jpeg_quality);
        DynamicImage::ImageRgb8(canvas).write_with_encoder(encoder)?;

        Ok(PdfPage {
            jpeg,
            width_px: s.page_width_px,
            height_px: s.page_height_px,
        })
    }

    /// Largest size inside the margins with the source aspect ratio
    fn fit(&self, (width, height): (u32, u32)) -> (u32, u32) {
        let s = &self.settings;
        let avail_w = s.page_width_px - 2 * s.margin_px;
        let avail_h = s.page_height_px - 2 * s.margin_px;

        let scale = (f64::from(avail_w) / f64::from(width.max(1)))
            .min(f64::from(avail_h) / f64::from(height.max(1)));
        let fit_w = ((f64::from(width) * scale).round() as u32).clamp(1, avail_w);
        let fit_h = ((f64::from(height) * scale).round() as u32).clamp(1, avail_h);
        (fit_w, fit_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([shade, 0, 0])));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png).unwrap();
        buffer
    }

    #[test]
    fn test_fit_keeps_aspect_ratio() {
        let composer = ScanComposer::new(ScanSettings::default());
        // 1160 x 1674 printable area at the default 40px margin
        assert_eq!(composer.fit((580, 400)), (1160, 800));
        assert_eq!(composer.fit((1000, 3000)), (558, 1674));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let composer = ScanComposer::new(ScanSettings::default());
        let pages = vec![png(800, 600, 10), png(600, 800, 200)];

        let first = composer.compose("Lease", &pages).unwrap();
        let second = composer.compose("Lease", &pages).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(b"%PDF-1.4"));
        assert!(String::from_utf8_lossy(&first).contains("/Count 2"));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        let composer = ScanComposer::new(ScanSettings::default());
        assert!(matches!(composer.compose("x", &[]), Err(VaultError::InvalidData(_))));
        assert!(matches!(
            composer.compose("x", &[b"not an image".to_vec()]),
            Err(VaultError::InvalidData(_))
        ));
    }
}
