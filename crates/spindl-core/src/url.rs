//! Download-link rewriting.

/// Marker inserted into CDN links to force a file download instead of
/// inline playback.
const ATTACHMENT_SEGMENT: &str = "fl_attachment";

/// Rewrite a CDN link so the browser downloads it as an attachment.
///
/// Inserts [`ATTACHMENT_SEGMENT`] immediately after the first `/upload/`
/// path segment. Links without that segment are returned unchanged.
#[must_use]
pub fn force_attachment(url: &str) -> String {
    match url.split_once("/upload/") {
        Some((before, after)) => format!("{before}/upload/{ATTACHMENT_SEGMENT}/{after}"),
        None => url.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
