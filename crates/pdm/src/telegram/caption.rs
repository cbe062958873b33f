//! Channel post captions.

use chrono::{DateTime, Local};
use pdmcore::core::utils::{escape_markdown_v2, format_size, truncate_smart};
use pdmcore::core::FileType;

/// Telegram rejects longer captions.
const CAPTION_LIMIT: usize = 1024;
/// Room left for the description after the fixed lines.
const DESCRIPTION_LIMIT: usize = 600;
const TAGS_LIMIT: usize = 200;

/// What a caption describes.
#[derive(Debug, Clone)]
pub struct CaptionInput<'a> {
    pub filename: &'a str,
    pub description: &'a str,
    pub tags: &'a str,
    pub size: u64,
    pub file_type: FileType,
    pub timestamp: DateTime<Local>,
}

fn type_label(file_type: FileType) -> String {
    let raw = file_type.to_string();
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => raw,
    }
}

fn lines(input: &CaptionInput<'_>, escape: fn(&str) -> String) -> Vec<String> {
    let mut lines = vec![format!("{} {}", input.file_type.emoji(), escape(input.filename))];
    let description = input.description.trim();
    if !description.is_empty() {
        lines.push(format!("📝 {}", escape(&truncate_smart(description, DESCRIPTION_LIMIT))));
    }
    let tags = input.tags.trim();
    if !tags.is_empty() {
        lines.push(format!("🏷 {}", escape(&truncate_smart(tags, TAGS_LIMIT))));
    }
    lines.push(format!("📊 Size: {}", escape(&format_size(input.size))));
    lines.push(format!("📂 Type: {}", escape(&type_label(input.file_type))));
    lines.push(format!(
        "📅 {}",
        escape(&input.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
    ));
    lines
}

fn join(lines: Vec<String>) -> String {
    truncate_smart(&lines.join("\n\n"), CAPTION_LIMIT)
}

/// MarkdownV2 caption.
pub fn markdown_caption(input: &CaptionInput<'_>) -> String {
    join(lines(input, escape_markdown_v2))
}

/// Same content without markup, for when Telegram refuses the entities.
pub fn plain_caption(input: &CaptionInput<'_>) -> String {
    join(lines(input, str::to_string))
}
