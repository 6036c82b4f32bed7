//! Streaming API: emit documents as they complete.
//!
//! A batch of drill logs takes minutes. [`process_stream`] yields each
//! [`DocumentOutput`] as soon as its document is reconciled, so callers can
//! persist or display results incrementally. Documents arrive in completion
//! order, not input order; at most `document_concurrency` run at once.

use crate::output::{DocumentOutput, FailureRecord};
use crate::process::DrillLogPipeline;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of per-document results.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<DocumentOutput, FailureRecord>> + Send>>;

/// Process `inputs`, yielding each document as it finishes.
///
/// Fatal document errors are yielded as `Err(FailureRecord)`; the stream
/// continues with the remaining inputs.
///
/// # Example
/// ```rust,no_run
/// use edgequake_drilllog::{process_stream, DrillLogPipeline, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = DrillLogPipeline::from_config(ExtractionConfig::default())?;
/// let mut docs = process_stream(&pipeline, vec!["a.pdf", "b.pdf"]);
/// while let Some(doc) = docs.next().await {
///     match doc {
///         Ok(d) => println!("{}: {} boreholes", d.source, d.boreholes.len()),
///         Err(f) => eprintln!("{}: {}", f.source, f.reason),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn process_stream<I, S>(pipeline: &DrillLogPipeline, inputs: I) -> DocumentStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
    info!("Starting streaming extraction of {} documents", inputs.len());

    let concurrency = pipeline.config().document_concurrency.max(1);
    let pipeline = pipeline.clone();

    let s = stream::iter(inputs)
        .map(move |input| {
            let pipeline = pipeline.clone();
            async move {
                pipeline.process_document(&input).await.map_err(|e| {
                    warn!("{}: {}", input, e);
                    FailureRecord::document(input.as_str(), &e)
                })
            }
        })
        .buffer_unordered(concurrency);

    Box::pin(s)
}
