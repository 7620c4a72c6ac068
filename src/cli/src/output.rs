//! Table and size formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Shorten a `sha256:<hex>` digest to its first 12 hex characters.
pub fn short_digest(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    match hex.char_indices().nth(12) {
        Some((end, _)) => &hex[..end],
        None => hex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_small() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576 + 524288), "1.5 MB");
        assert_eq!(format_bytes(10 * 1073741824), "10.0 GB");
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(
            short_digest("sha256:0123456789abcdef0123456789abcdef"),
            "0123456789ab"
        );
        assert_eq!(short_digest("sha256:abc"), "abc");
        assert_eq!(short_digest("b111"), "b111");
    }

    #[test]
    fn test_new_table_headers() {
        let mut table = new_table(&["NAME", "SIZE"]);
        table.add_row(vec!["model.bin", "1.0 GB"]);
        let rendered = table.to_string();
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("model.bin"));
    }
}
