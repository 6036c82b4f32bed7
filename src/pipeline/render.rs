//! PDF rasterisation: turn a drill-log PDF into encoded page images.
//!
//! [`PageRenderer`] is the seam the driver depends on; [`PdfiumRenderer`] is
//! the production implementation. Tests substitute an in-process double so the
//! suite never needs a pdfium shared library.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which uses thread-local state
//! and is not safe to call from async contexts. Rendering and encoding both
//! run on the blocking pool so Tokio workers never stall on a 40-page scan.
//!
//! ## Why cap pixels, not DPI?
//!
//! Drill logs come as A4, B4 and A3 sheets. `max_rendered_pixels` caps the
//! longest edge regardless of physical size, keeping memory bounded.

use crate::config::{ExtractionConfig, ImageFormat, PageSelection};
use crate::error::DrillLogError;
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rendered page, ready to attach to a model request.
#[derive(Clone)]
pub struct PageImage {
    /// 1-indexed page number within the document.
    pub page_num: usize,
    pub image: ImageData,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_num", &self.page_num)
            .field("mime_type", &self.image.mime_type)
            .field("bytes", &self.image.data.len())
            .finish()
    }
}

/// Converts a PDF on disk into an ordered list of page images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Pages are returned in document order.
    ///
    /// Fails with [`DrillLogError::EmptyDocument`] when nothing is left to
    /// render, and with one of the other render-class errors
    /// ([`DrillLogError::is_render_error`]) when the file cannot be read.
    async fn render(&self, pdf_path: &Path) -> Result<Vec<PageImage>, DrillLogError>;
}

/// pdfium-backed renderer.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_pixels: u32,
    format: ImageFormat,
    password: Option<String>,
    pages: PageSelection,
}

impl PdfiumRenderer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            max_pixels: config.max_rendered_pixels,
            format: config.image_format,
            password: config.password.clone(),
            pages: config.pages.clone(),
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(&self, pdf_path: &Path) -> Result<Vec<PageImage>, DrillLogError> {
        let path = pdf_path.to_path_buf();
        let renderer = self.clone();

        tokio::task::spawn_blocking(move || renderer.render_blocking(&path))
            .await
            .map_err(|e| DrillLogError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind to libpdfium: `PDFIUM_LIB_PATH` (a file or its directory) first,
/// then the system library search path.
fn bind_pdfium() -> Result<Pdfium, DrillLogError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(path) => {
            let path = Path::new(&path);
            let lib = if path.is_dir() {
                PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(
                    path.to_string_lossy().as_ref(),
                ))
            } else {
                path.to_path_buf()
            };
            debug!("Binding to pdfium at {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DrillLogError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

impl PdfiumRenderer {
    fn render_blocking(&self, pdf_path: &Path) -> Result<Vec<PageImage>, DrillLogError> {
        let pdfium = bind_pdfium()?;
        let password = self.password.as_deref();

        let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    DrillLogError::WrongPassword {
                        path: pdf_path.to_path_buf(),
                    }
                } else {
                    DrillLogError::PasswordRequired {
                        path: pdf_path.to_path_buf(),
                    }
                }
            } else {
                DrillLogError::CorruptPdf {
                    path: pdf_path.to_path_buf(),
                    detail: err_str,
                }
            }
        })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let indices = self.pages.to_indices(total_pages);
        info!(
            "PDF loaded: {} pages, {} selected",
            total_pages,
            indices.len()
        );
        if indices.is_empty() {
            return Err(DrillLogError::EmptyDocument {
                path: pdf_path.to_path_buf(),
            });
        }

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut results = Vec::with_capacity(indices.len());

        for idx in indices {
            let page_num = idx + 1;
            let page = pages
                .get(idx as u16)
                .map_err(|e| DrillLogError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                DrillLogError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );

            let encoded = encode::encode_page(&image, self.format).map_err(|e| {
                DrillLogError::RasterisationFailed {
                    page: page_num,
                    detail: format!("Image encoding failed: {}", e),
                }
            })?;

            results.push(PageImage {
                page_num,
                image: encoded,
            });
        }

        Ok(results)
    }
}
