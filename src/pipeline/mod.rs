//! Pipeline stages for drill-log extraction.
//!
//! Each submodule implements one step. The two stages that touch the outside
//! world (rendering and the model call) sit behind traits so the driver and
//! reconciliation can be tested without pdfium or a provider.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render+encode ──▶ driver ──(llm, postprocess)──▶ reconcile
//! (URL/path)   (pdfium)      (batches)    (VLM, JSON cleanup)   (per borehole)
//! ```
//!
//! 1. [`input`]: resolve the path or URL to a local file
//! 2. [`render`]: [`render::PageRenderer`]; pdfium rasterises inside
//!    `spawn_blocking`, [`encode`] turns each page into base64 `ImageData`
//! 3. [`driver`]: two passes per batch with per-call retry and timeout
//! 4. [`llm`]: [`llm::PageExtractor`]; one VLM request per call, answer
//!    cleaned by [`postprocess`]
//! 5. [`reconcile`]: group fragments by borehole and attach samples to layers

pub mod driver;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod reconcile;
pub mod render;
