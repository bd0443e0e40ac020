use anyhow::{Context, Result};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Renders each page of a PDF to a PNG at 2x zoom (§4.2, C2). Images are
/// written to a per-document temp directory keyed by a millisecond
/// timestamp so concurrent documents never collide (§5 "Temp image
/// directory").
pub struct PdfRasterizer {
    pdfium: Pdfium,
}

const ZOOM: f32 = 2.0;
const BASE_DPI: f32 = 72.0;

impl PdfRasterizer {
    /// Binds against the system's libpdfium (or a path supplied via the
    /// `PDFIUM_DYNAMIC_LIB_PATH` environment variable).
    pub fn new() -> Result<Self> {
        let bindings = Pdfium::bind_to_system_library()
            .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")))
            .context("failed to bind to a pdfium library")?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    pub fn rasterize(&self, pdf_path: &Path, temp_root: &Path) -> Result<Vec<PathBuf>> {
        let document = self
            .pdfium
            .load_pdf_from_file(pdf_path, None)
            .context("failed to open PDF")?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let doc_dir = temp_root.join(format!("{millis}"));
        std::fs::create_dir_all(&doc_dir)?;

        let render_config = PdfRenderConfig::new()
            .set_target_width((BASE_DPI * ZOOM * 8.27) as i32)
            .use_print_quality(true);

        let mut paths = Vec::with_capacity(document.pages().len() as usize);
        for (index, page) in document.pages().iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .context("failed to render PDF page")?;
            let image = bitmap.as_image();

            let page_num = index + 1;
            let image_path = doc_dir.join(format!("page_{page_num}.png"));
            image
                .save_with_format(&image_path, image::ImageFormat::Png)
                .context("failed to save rasterized page")?;
            paths.push(image_path);
        }

        Ok(paths)
    }

    /// Best-effort cleanup of a document's temp image directory, called by
    /// the orchestrator once OCR for all pages has completed or failed.
    pub fn cleanup(&self, image_paths: &[PathBuf]) {
        let mut dirs = std::collections::HashSet::new();
        for path in image_paths {
            let _ = std::fs::remove_file(path);
            if let Some(parent) = path.parent() {
                dirs.insert(parent.to_path_buf());
            }
        }
        for dir in dirs {
            let _ = std::fs::remove_dir(dir);
        }
    }
}
