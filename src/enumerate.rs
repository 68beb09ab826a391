//! Candidate discovery — on-page images that might be mail pieces.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::capability::{AutomationCapability, ElementHandle};
use crate::error::CapabilityError;

/// A candidate mail-piece image.
///
/// The handle is owned by the active session and invalid once it ends.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ordinal: usize,
    pub src: String,
    pub alt: String,
    pub handle: ElementHandle,
}

/// List candidate images in page order, deduplicated by source locator
/// (first occurrence wins). An empty list is a valid outcome — a day with
/// no mail, not an error.
pub async fn enumerate_candidates(
    capability: &dyn AutomationCapability,
) -> Result<Vec<Candidate>, CapabilityError> {
    let images = capability.list_images().await?;
    let found = images.len();

    let mut seen_srcs: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();
    for image in images {
        if image.src.is_empty() || !seen_srcs.insert(image.src.clone()) {
            debug!(src = %image.src, "Skipping duplicate or empty-src image");
            continue;
        }
        candidates.push(Candidate {
            ordinal: candidates.len(),
            src: image.src,
            alt: image.alt,
            handle: image.handle,
        });
    }

    info!(found, unique = candidates.len(), "Enumerated candidate images");
    Ok(candidates)
}
