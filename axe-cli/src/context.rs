//! Project context collected into the system prompt: a shallow file tree
//! plus the head of a few key files.

use axe_tools::skip_dir;
use std::fmt::Write as _;
use std::path::Path;
use walkdir::WalkDir;

const TREE_DEPTH: usize = 2;
const KEY_FILE_BYTES: usize = 2000;
const KEY_FILES: [&str; 6] = [
    "Cargo.toml",
    "go.mod",
    "package.json",
    "pyproject.toml",
    "README.md",
    "Makefile",
];

pub fn collect(dir: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Project directory: {}\n", dir.display());

    out.push_str("File tree:\n");
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(TREE_DEPTH + 1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skip_dir(&e.file_name().to_string_lossy()));
    for entry in walker.flatten() {
        let indent = "  ".repeat(entry.depth() - 1);
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            let _ = writeln!(out, "{indent}{name}/");
        } else {
            let _ = writeln!(out, "{indent}{name}");
        }
    }

    for name in KEY_FILES {
        let Ok(content) = std::fs::read_to_string(dir.join(name)) else {
            continue;
        };
        let head = match content.char_indices().nth(KEY_FILE_BYTES) {
            None => content,
            Some((idx, _)) => format!("{}\n... (truncated)", &content[..idx]),
        };
        let _ = write!(out, "\n--- {name} ---\n{head}\n");
    }

    out
}
