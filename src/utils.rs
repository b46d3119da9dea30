use indicatif::{ProgressBar, ProgressStyle};

/// Quote a value for safe interpolation into an `sh -c` command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// First whitespace-separated token of `output` parsed as a number.
/// Empty or garbage output is `None`.
pub fn parse_number(output: &str) -> Option<f64> {
    output
        .split_whitespace()
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// curl reports transfer speed in bytes per second
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1_000_000.0
}

/// Progress bar used by the CLI for the probing and testing phases
pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    // Template is static; a bad one only costs us the styling
    if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("|| "));
    }
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("http://a/b"), "'http://a/b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("12500000.000"), Some(12_500_000.0));
        assert_eq!(parse_number("0.042\n"), Some(0.042));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("curl: (7) failed"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_bytes_per_sec_to_mbps() {
        assert!((bytes_per_sec_to_mbps(12_500_000.0) - 100.0).abs() < 1e-9);
    }
}
