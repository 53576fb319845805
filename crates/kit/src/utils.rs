use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Parse size string (e.g., "10G", "5120M", "1T") to bytes
pub(crate) fn parse_size(size_str: &str) -> Result<u64> {
    let size_str = size_str.trim().to_uppercase();

    if size_str.is_empty() {
        return Err(eyre!("Empty size string"));
    }

    let (number_part, unit_part) = if let Some(pos) = size_str.rfind(|c: char| c.is_ascii_digit()) {
        size_str.split_at(pos + 1)
    } else {
        return Err(eyre!("Invalid size format: {}", size_str));
    };

    let number: u64 = number_part
        .parse()
        .map_err(|_| eyre!("Invalid number in size: {}", number_part))?;

    let multiplier: u64 = match unit_part {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024_u64.pow(4),
        _ => return Err(eyre!("Unknown size unit: {}", unit_part)),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| eyre!("Size too large: {}", size_str))
}

/// Format size in bytes to human-readable format
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{}B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    format!("{:.1}{}", size, UNITS[unit_index])
}

/// Render an error and all of its sources on one line
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10G").unwrap(), 10737418240);
        assert_eq!(parse_size("5120M").unwrap(), 5368709120);
        assert!(parse_size("12.5G").is_err());
        assert_eq!(parse_size(" 1tib ").unwrap(), 1 << 40);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("").is_err());
        assert!(parse_size("G").is_err());
        assert!(parse_size("10Q").is_err());
        assert!(parse_size("99999999999T").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(10737418240), "10.0GB");
        assert_eq!(format_size(13421772800), "12.5GB");
    }

    #[test]
    fn test_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        assert_eq!(error_chain(&err), "outer: inner");
    }
}
