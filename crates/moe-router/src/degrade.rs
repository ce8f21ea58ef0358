//! Graceful degradation for vision requests with no reachable vision expert.
//!
//! Triggered only when the resolved chain for a vision-classified request is
//! exhausted. Strips image content from the payload, appends a caller-visible
//! warning, and clears any explicit override so re-classification lands on
//! the text tiers. This path never fails; it always yields a usable
//! lower-fidelity context.

use tracing::warn;

use crate::types::{ContentPart, MessageContent, RequestContext};

/// Warning appended to the degraded request, surfaced to the caller.
pub const IMAGE_DROPPED_WARNING: &str =
    "image content was ignored: no vision-capable expert was reachable";

/// Produce a text-only copy of the request.
pub fn degrade_to_text(ctx: &RequestContext) -> RequestContext {
    let mut degraded = ctx.clone();

    for msg in &mut degraded.messages {
        if let MessageContent::Parts(parts) = &msg.content {
            let texts: Vec<String> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect();
            msg.content = MessageContent::Text(texts.join("\n"));
        }
    }

    // An override pinned to a vision expert would defeat re-classification.
    degraded.model_override = None;
    degraded.warnings.push(IMAGE_DROPPED_WARNING.to_string());

    // Warning-level, not error: the request is still served.
    warn!(
        request_id = %ctx.request_id,
        "degrading vision request to text-only"
    );

    degraded
}
