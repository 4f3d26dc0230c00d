//! CLI output formatting for the admin commands.
//!
//! # Information-First Display
//!
//! Gallery rows are shown by their identity first (id and title) with the
//! rest of the row as indented context lines, so a listing reads as an
//! inventory of published work while still exposing the digests needed to
//! fetch documents and screenshots.
//!
//! # Output Format
//!
//! ## List
//!
//! ```text
//! Gallery (page 1, newest first)
//! 012 Plasma (42 views)
//!     By: Ana, CC BY
//!     Description: Animated plasma on a full-screen quad
//!     Document: q3Zk9a0PbX
//!     Screenshot: 7hYtR2mWcQ
//!     Updated: 2024-05-01 10:22:03 UTC
//!     Revision of: 007
//! ```
//!
//! ## Lineage
//!
//! ```text
//! Lineage of 007
//! 007 Plasma [revision]
//! 012 Plasma [published]
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::types::{EntryState, GalleryEntry, SortKey};

// ============================================================================
// Shared entity display helpers
// ============================================================================

/// Format an id as 3-digit zero-padded.
fn format_id(id: i64) -> String {
    format!("{:0>3}", id)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate_desc(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

fn state_label(state: EntryState) -> &'static str {
    match state {
        EntryState::New => "new",
        EntryState::Published => "published",
        EntryState::Revision => "revision",
        EntryState::Deleted => "deleted",
    }
}

fn views_label(views: i64) -> String {
    if views == 1 {
        "1 view".to_string()
    } else {
        format!("{} views", views)
    }
}

// ============================================================================
// list
// ============================================================================

/// Format one page of the gallery.
///
/// `page` is zero-based as in the query; it is shown one-based.
pub fn format_gallery(
    entries: &[GalleryEntry],
    page: u32,
    sort: SortKey,
    reversed: bool,
) -> Vec<String> {
    let order = match (sort, reversed) {
        (SortKey::Newest, false) => "newest first",
        (SortKey::Newest, true) => "oldest first",
        (SortKey::Views, false) => "most viewed first",
        (SortKey::Views, true) => "least viewed first",
    };
    let mut lines = vec![format!("Gallery (page {}, {})", page + 1, order)];

    if entries.is_empty() {
        lines.push(format!("{}(no entries)", indent(1)));
        return lines;
    }

    for entry in entries {
        lines.push(format!(
            "{} {} ({})",
            format_id(entry.id),
            entry.title,
            views_label(entry.views)
        ));
        let by = if entry.author.is_empty() {
            entry.license.clone()
        } else {
            format!("{}, {}", entry.author, entry.license)
        };
        lines.push(format!("{}By: {}", indent(1), by));
        if !entry.description.is_empty() {
            lines.push(format!(
                "{}Description: {}",
                indent(1),
                truncate_desc(&entry.description, 60)
            ));
        }
        lines.push(format!("{}Document: {}", indent(1), entry.document));
        lines.push(format!("{}Screenshot: {}", indent(1), entry.screenshot));
        lines.push(format!(
            "{}Updated: {}",
            indent(1),
            entry.modification_date.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if entry.parent > 0 {
            lines.push(format!("{}Revision of: {}", indent(1), format_id(entry.parent)));
        }
    }
    lines
}

pub fn print_gallery(entries: &[GalleryEntry], page: u32, sort: SortKey, reversed: bool) {
    for line in format_gallery(entries, page, sort, reversed) {
        println!("{}", line);
    }
}

// ============================================================================
// lineage
// ============================================================================

/// Format every version of a lineage, oldest first.
pub fn format_lineage(root: i64, entries: &[GalleryEntry]) -> Vec<String> {
    let mut lines = vec![format!("Lineage of {}", format_id(root))];
    if entries.is_empty() {
        lines.push(format!("{}(no such entry)", indent(1)));
        return lines;
    }
    for entry in entries {
        lines.push(format!(
            "{} {} [{}]",
            format_id(entry.id),
            entry.title,
            state_label(entry.state)
        ));
    }
    lines
}

pub fn print_lineage(root: i64, entries: &[GalleryEntry]) {
    for line in format_lineage(root, entries) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(id: i64, parent: i64, title: &str) -> GalleryEntry {
        GalleryEntry {
            id,
            parent,
            document: "aaaaaaaaaa".into(),
            title: title.into(),
            description: "Shader toy".into(),
            screenshot: "bbbbbbbbbb".into(),
            author: "Ana".into(),
            license: "CC BY".into(),
            views: 3,
            modification_date: Utc.with_ymd_and_hms(2024, 5, 1, 10, 22, 3).unwrap(),
            state: EntryState::Published,
            ..Default::default()
        }
    }

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn truncate_desc_short() {
        assert_eq!(truncate_desc("Short text", 40), "Short text");
    }

    #[test]
    fn truncate_desc_long() {
        let text = "a".repeat(50);
        assert_eq!(truncate_desc(&text, 40), format!("{}...", "a".repeat(40)));
    }

    #[test]
    fn truncate_desc_counts_characters() {
        assert_eq!(truncate_desc("ééééé", 3), "ééé...");
    }

    #[test]
    fn views_label_singular() {
        assert_eq!(views_label(1), "1 view");
        assert_eq!(views_label(0), "0 views");
    }

    // =========================================================================
    // list
    // =========================================================================

    #[test]
    fn gallery_listing_shows_identity_then_context() {
        let lines = format_gallery(&[entry(12, 7, "Plasma")], 0, SortKey::Newest, false);
        assert_eq!(
            lines,
            vec![
                "Gallery (page 1, newest first)",
                "012 Plasma (3 views)",
                "    By: Ana, CC BY",
                "    Description: Shader toy",
                "    Document: aaaaaaaaaa",
                "    Screenshot: bbbbbbbbbb",
                "    Updated: 2024-05-01 10:22:03 UTC",
                "    Revision of: 007",
            ]
        );
    }

    #[test]
    fn root_entry_has_no_revision_line() {
        let lines = format_gallery(&[entry(3, 0, "Waves")], 0, SortKey::Views, true);
        assert_eq!(lines[0], "Gallery (page 1, least viewed first)");
        assert!(!lines.iter().any(|l| l.contains("Revision of")));
    }

    #[test]
    fn anonymous_entry_shows_license_only() {
        let mut e = entry(3, 0, "Waves");
        e.author.clear();
        e.license = "CC 0".into();
        let lines = format_gallery(&[e], 2, SortKey::Newest, false);
        assert_eq!(lines[0], "Gallery (page 3, newest first)");
        assert!(lines.contains(&"    By: CC 0".to_string()));
    }

    #[test]
    fn empty_page() {
        let lines = format_gallery(&[], 0, SortKey::Newest, false);
        assert_eq!(lines, vec!["Gallery (page 1, newest first)", "    (no entries)"]);
    }

    // =========================================================================
    // lineage
    // =========================================================================

    #[test]
    fn lineage_lists_states() {
        let mut old = entry(7, 0, "Plasma");
        old.state = EntryState::Revision;
        let lines = format_lineage(7, &[old, entry(12, 7, "Plasma")]);
        assert_eq!(
            lines,
            vec!["Lineage of 007", "007 Plasma [revision]", "012 Plasma [published]"]
        );
    }

    #[test]
    fn unknown_lineage() {
        assert_eq!(
            format_lineage(99, &[]),
            vec!["Lineage of 099", "    (no such entry)"]
        );
    }
}
