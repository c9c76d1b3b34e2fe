//! CLI output formatting for uploads, listings and draft migration.
//!
//! # Information-First Display
//!
//! Every image is shown by its positional index and original file name, with
//! storage details as indented context lines. The primary image carries a
//! `★` marker so it stands out in listings and batch results alike.
//!
//! # Output Format
//!
//! ## Upload
//!
//! ```text
//! 001 front.jpg
//!     ✓ 1920x1280 image/avif (183.2 KB) ★
//! 002 manual.pdf
//!     ✗ 'application/pdf' is not an image
//!
//! 1 of 2 images uploaded
//! ```
//!
//! ## List
//!
//! ```text
//! product P-1042 (2 images)
//! 001 front.jpg ★
//!     Id: 0d9c…
//!     Url: https://cdn.example.com/product-images/products/P-1042/0d9c….avif
//! 002 back.jpg
//!     Id: 77ab…
//!     Url: https://cdn.example.com/product-images/products/P-1042/77ab….avif
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::registry::{RekeyReport, resolve_display_url};
use crate::types::{ProductId, ProductImage};
use crate::upload::UploadEvent;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte size.
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

fn primary_marker(image: &ProductImage) -> &'static str {
    if image.is_primary { " \u{2605}" } else { "" }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// The `✓ …` detail line for a stored image.
fn stored_line(image: &ProductImage) -> String {
    format!(
        "{}\u{2713} {}x{} {} ({}){}",
        indent(1),
        image.width,
        image.height,
        image.stored_format,
        format_size(image.stored_size),
        primary_marker(image)
    )
}

// ============================================================================
// Upload
// ============================================================================

/// Format a single upload progress event as display lines.
///
/// `FileStarted` prints nothing: the outcome line carries the header so a
/// finished batch reads as one block per file.
pub fn format_upload_event(event: &UploadEvent) -> Vec<String> {
    match event {
        UploadEvent::FileStarted { .. } => Vec::new(),
        UploadEvent::FileSucceeded { index, image } => vec![
            format!("{} {}", format_index(*index), image.file_name),
            stored_line(image),
        ],
        UploadEvent::FileFailed { index, failure } => vec![
            format!("{} {}", format_index(*index), failure.file_name),
            format!("{}\u{2717} {}", indent(1), failure.reason),
        ],
        UploadEvent::BatchFinished(result) => {
            let mut lines = vec![String::new(), result.summary()];
            if let Some(primary) = result.succeeded.iter().find(|img| img.is_primary) {
                lines.push(format!("Primary: {}", primary.file_name));
            }
            lines
        }
    }
}

pub fn print_upload_event(event: &UploadEvent) {
    for line in format_upload_event(event) {
        println!("{}", line);
    }
}

// ============================================================================
// List
// ============================================================================

/// Format a product's images, primary first.
pub fn format_image_list(product: &ProductId, images: &[ProductImage]) -> Vec<String> {
    let mut lines = vec![format!("{} ({})", product, plural(images.len(), "image"))];
    for (pos, image) in images.iter().enumerate() {
        lines.push(format!(
            "{} {}{}",
            format_index(pos + 1),
            image.file_name,
            primary_marker(image)
        ));
        lines.push(format!("{}Id: {}", indent(1), image.id));
        lines.push(format!("{}Url: {}", indent(1), resolve_display_url(image)));
        if let Some(thumb) = &image.thumbnail_url {
            lines.push(format!("{}Thumbnail: {}", indent(1), thumb));
        }
    }
    lines
}

pub fn print_image_list(product: &ProductId, images: &[ProductImage]) {
    for line in format_image_list(product, images) {
        println!("{}", line);
    }
}

// ============================================================================
// Rekey
// ============================================================================

/// Format the outcome of moving a draft onto its persisted product.
pub fn format_rekey_report(target: &ProductId, report: &RekeyReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Moved {} to {}",
        plural(report.moved_count(), "image"),
        target
    )];
    for failure in &report.failed {
        lines.push(format!(
            "{}\u{2717} {} stayed on the draft: {}",
            indent(1),
            failure.file_name,
            failure.error
        ));
    }
    lines
}

pub fn print_rekey_report(target: &ProductId, report: &RekeyReport) {
    for line in format_rekey_report(target, report) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RekeyFailure;
    use crate::storage::StorageError;
    use crate::types::ImageId;
    use crate::upload::{BatchResult, FailedFile, FileFailure};
    use chrono::Utc;

    fn image(name: &str, primary: bool) -> ProductImage {
        let id = ImageId::generate();
        ProductImage {
            id,
            product_id: ProductId::persisted("P-1").unwrap(),
            url: format!("https://cdn.example.com/products/P-1/{id}.avif"),
            local_path: None,
            file_name: name.to_string(),
            file_size: 400_000,
            mime_type: "image/jpeg".into(),
            uploaded_at: Utc::now(),
            is_primary: primary,
            storage_key: format!("products/P-1/{id}.avif"),
            stored_format: "image/avif".into(),
            stored_size: 187_600,
            width: 1920,
            height: 1280,
            content_hash: "abc".into(),
            thumbnail_url: None,
            thumbnail_key: None,
        }
    }

    #[test]
    fn format_index_pads_to_three_digits() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(187_600), "183.2 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn succeeded_event_shows_dimensions_and_primary() {
        let event = UploadEvent::FileSucceeded {
            index: 1,
            image: image("front.jpg", true),
        };
        let lines = format_upload_event(&event);
        assert_eq!(lines[0], "001 front.jpg");
        assert_eq!(lines[1], "    \u{2713} 1920x1280 image/avif (183.2 KB) \u{2605}");
    }

    #[test]
    fn failed_event_shows_reason() {
        let event = UploadEvent::FileFailed {
            index: 2,
            failure: FailedFile {
                file_name: "manual.pdf".into(),
                reason: FileFailure::NotAnImage {
                    mime_type: "application/pdf".into(),
                },
            },
        };
        let lines = format_upload_event(&event);
        assert_eq!(lines[0], "002 manual.pdf");
        assert_eq!(lines[1], "    \u{2717} 'application/pdf' is not an image");
    }

    #[test]
    fn started_event_prints_nothing() {
        let event = UploadEvent::FileStarted {
            index: 1,
            file_name: "a.jpg".into(),
        };
        assert!(format_upload_event(&event).is_empty());
    }

    #[test]
    fn finished_batch_prints_summary_and_primary() {
        let result = BatchResult {
            succeeded: vec![image("a.jpg", true)],
            failed: vec![FailedFile {
                file_name: "b.jpg".into(),
                reason: FileFailure::Cancelled,
            }],
        };
        let lines = format_upload_event(&UploadEvent::BatchFinished(result));
        assert_eq!(lines, vec!["", "1 of 2 images uploaded", "Primary: a.jpg"]);
    }

    #[test]
    fn image_list_marks_primary() {
        let product = ProductId::persisted("P-1").unwrap();
        let images = vec![image("front.jpg", true), image("back.jpg", false)];
        let lines = format_image_list(&product, &images);
        assert_eq!(lines[0], "product P-1 (2 images)");
        assert_eq!(lines[1], "001 front.jpg \u{2605}");
        assert!(lines[2].starts_with("    Id: "));
        assert_eq!(lines[4], "002 back.jpg");
    }

    #[test]
    fn empty_list_says_so() {
        let product = ProductId::persisted("P-1").unwrap();
        assert_eq!(
            format_image_list(&product, &[]),
            vec!["product P-1 (0 images)".to_string()]
        );
    }

    #[test]
    fn rekey_report_lists_stragglers() {
        let target = ProductId::persisted("P-9").unwrap();
        let report = RekeyReport {
            moved: vec![image("a.jpg", true)],
            failed: vec![RekeyFailure {
                image_id: ImageId::generate(),
                file_name: "b.jpg".into(),
                error: StorageError::Transport("timeout".into()),
            }],
        };
        let lines = format_rekey_report(&target, &report);
        assert_eq!(lines[0], "Moved 1 image to product P-9");
        assert_eq!(
            lines[1],
            "    \u{2717} b.jpg stayed on the draft: transport error: timeout"
        );
    }
}
