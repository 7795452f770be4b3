//! User-input preprocessing.
//!
//! Before a prompt reaches the model it is scanned for image file paths
//! (which become `image` content blocks) and `@file` references (which are
//! expanded inline as tagged file snippets).

use crate::types::ContentBlock;
use base64::Engine;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

fn image_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:~?/)?[\w./_-]+\.(?:png|jpg|jpeg|gif|webp)\b").unwrap())
}

fn at_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(~?[\w./_-]+\.\w+)").unwrap())
}

fn media_type_for(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Extract image file paths from `input`.
///
/// Returns the image blocks for every readable candidate plus the remaining
/// text with those paths removed. Candidates directly preceded by `:` are
/// URL remainders, not local paths, and are skipped.
pub fn parse_image_blocks(input: &str) -> (Vec<ContentBlock>, String) {
    let mut blocks = Vec::new();
    let mut remaining = input.to_string();

    for m in image_path_re().find_iter(input) {
        if m.start() > 0 && input.as_bytes()[m.start() - 1] == b':' {
            continue;
        }
        let candidate = m.as_str();
        let path = expand_home(candidate);
        let Ok(data) = std::fs::read(&path) else {
            continue;
        };
        let Some(media_type) = media_type_for(candidate) else {
            continue;
        };
        blocks.push(ContentBlock::image(
            media_type,
            base64::engine::general_purpose::STANDARD.encode(&data),
        ));
        remaining = remaining.replacen(candidate, "", 1);
    }

    (blocks, remaining.trim().to_string())
}

/// Replace `@path` references with the referenced file's contents, wrapped
/// in a `<file path="...">` tag. Unreadable paths are left untouched.
pub fn expand_at_files(input: &str) -> String {
    let mut result = input.to_string();
    for caps in at_file_re().captures_iter(input) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let path_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let Ok(data) = std::fs::read_to_string(expand_home(path_str)) else {
            continue;
        };
        let replacement = format!(
            "\n<file path=\"{}\">\n{}\n</file>",
            path_str,
            data.trim_end_matches('\n')
        );
        result = result.replacen(whole, &replacement, 1);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_text_passes_through() {
        let (blocks, rest) = parse_image_blocks("fix the login bug");
        assert!(blocks.is_empty());
        assert_eq!(rest, "fix the login bug");
    }

    #[test]
    fn extracts_existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, b"\x89PNG fake").unwrap();

        let input = format!("what is wrong in {} here?", path.display());
        let (blocks, rest) = parse_image_blocks(&input);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, "image");
        let source = blocks[0].source.as_ref().unwrap();
        assert_eq!(source.media_type, "image/png");
        assert_eq!(source.source_type, "base64");
        assert_eq!(rest, "what is wrong in  here?".trim());
    }

    #[test]
    fn skips_url_image_paths() {
        let (blocks, rest) = parse_image_blocks("see https://example.com/pic.png for context");
        assert!(blocks.is_empty());
        assert_eq!(rest, "see https://example.com/pic.png for context");
    }

    #[test]
    fn missing_image_file_is_ignored() {
        let (blocks, rest) = parse_image_blocks("look at /nonexistent/dir/pic.jpg please");
        assert!(blocks.is_empty());
        assert!(rest.contains("/nonexistent/dir/pic.jpg"));
    }

    #[test]
    fn at_file_expansion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "remember the milk").unwrap();

        let input = format!("summarize @{}", path.display());
        let out = expand_at_files(&input);
        assert!(out.contains("<file path="));
        assert!(out.contains("remember the milk"));
        assert!(!out.contains('@'));
    }

    #[test]
    fn at_file_missing_left_alone() {
        let out = expand_at_files("see @/no/such/file.txt");
        assert_eq!(out, "see @/no/such/file.txt");
    }
}
