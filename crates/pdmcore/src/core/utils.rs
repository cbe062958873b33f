//! Formatting and text helpers shared by the CLI, web API and uploader.

use lazy_regex::regex;

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

/// Human readable size with one decimal, e.g. `1.5 MB`.
///
/// Bytes are printed without a decimal part.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, SIZE_UNITS[unit])
}

/// Human readable speed, e.g. `2.0 MB/s`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec <= 0.0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_size(bytes_per_sec as u64))
}

/// Escapes characters that are invalid in file names.
///
/// Path separators and Windows reserved characters become `_`, double quotes
/// become single quotes, control characters are dropped to `_`. Leading and
/// trailing whitespace and dots are stripped.
///
/// # Example
///
/// ```
/// use pdmcore::core::utils::escape_filename;
/// assert_eq!(escape_filename("a/b:c?.mp4"), "a_b_c_.mp4");
/// ```
pub fn escape_filename(filename: &str) -> String {
    let mut result = String::with_capacity(filename.len());

    for c in filename.chars() {
        match c {
            '/' | '\\' => result.push('_'),
            ':' | '*' | '?' | '<' | '>' | '|' => result.push('_'),
            '"' => result.push('\''),
            c if c.is_control() => result.push('_'),
            _ => result.push(c),
        }
    }

    let result = result.trim_matches(|c: char| c.is_whitespace() || c == '.');

    if result.is_empty() {
        "unnamed".to_string()
    } else {
        result.to_string()
    }
}

/// Escapes special characters for Telegram MarkdownV2.
///
/// The backslash is escaped first so already inserted escapes are not doubled.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut result = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            '\\' | '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|' | '{' | '}'
            | '.' | '!' => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }
    result
}

/// `1h 02m 03s`, `4m 05s` or `9s`.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Text progress bar like `[█████░░░░░] 50.0%`.
pub fn progress_bar(percent: f64, width: usize) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(width - filled),
        percent
    )
}

/// Truncate to at most `max_chars`, preferring a word boundary, and append `…`.
pub fn truncate_smart(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => cut[..idx].trim_end().to_string(),
        _ => cut,
    };
    format!("{}…", trimmed)
}

/// All http(s) URLs contained in free text, in order of appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    let re = regex!(r#"https?://[^\s<>"']+"#);
    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')', ';']).to_string())
        .collect()
}

/// Percentage of `done` over `total`, capped at 100.
pub fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0)
}
