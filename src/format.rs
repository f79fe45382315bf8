const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

pub fn format_bytes(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Whole mebibytes, rounded down.
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(300 * KB), "300 KB");
        assert_eq!(format_bytes(3 * MB / 2), "1.5 MB");
        assert_eq!(format_bytes(2 * GB), "2.0 GB");
    }

    #[test]
    fn mb_rounds_down() {
        assert_eq!(bytes_to_mb(MB - 1), 0);
        assert_eq!(bytes_to_mb(512 * MB + 7), 512);
    }
}
