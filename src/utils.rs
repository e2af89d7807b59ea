use colored::Colorize;

/// Format a boost balance with color
pub fn format_boosts(count: u32) -> String {
    let label = if count == 1 { "boost" } else { "boosts" };
    format!("{} {}", count, label).yellow().to_string()
}

/// Format account id truncated for display
pub fn format_id(id: &str) -> String {
    if id.chars().count() <= 16 {
        id.to_string()
    } else {
        let head: String = id.chars().take(8).collect();
        let tail: String = id.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
        format!("{}...{}", head, tail)
    }
}

/// Format timestamp in human-readable format
pub fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_optional_timestamp(timestamp: Option<&chrono::DateTime<chrono::Utc>>) -> String {
    timestamp.map(format_timestamp).unwrap_or_else(|| "never".to_string())
}

/// Print a formatted table border
pub fn print_table_border(width: usize) {
    println!("{}", "=".repeat(width));
}

/// Print a table row with columns
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    let mut row = String::new();
    for (col, width) in columns.iter().zip(widths) {
        row.push_str(&format!("{:<width$}  ", col, width = width));
    }
    println!("{}", row.trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_id() {
        assert_eq!(format_id("short-id"), "short-id");
        assert_eq!(
            format_id("4f9c2d1e-8a7b-4c3d-9e2f-1a2b3c4d5e6f"),
            "4f9c2d1e...4d5e6f"
        );
    }

    #[test]
    fn test_format_optional_timestamp() {
        let ts: chrono::DateTime<chrono::Utc> = "2026-10-18T00:00:00Z".parse().unwrap();
        assert_eq!(format_optional_timestamp(Some(&ts)), "2026-10-18 00:00:00 UTC");
        assert_eq!(format_optional_timestamp(None), "never");
    }
}
