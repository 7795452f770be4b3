//! Shared deny-lists for directory walks and shell commands.

/// Command prefixes blocked before any confirmation is asked.
pub const DANGEROUS_PREFIXES: [&str; 5] = ["rm -rf /", "sudo rm", "mkfs", "dd if=", "> /dev/"];

/// True for directories excluded from traversal.
pub fn skip_dir(name: &str) -> bool {
    matches!(
        name,
        ".git" | ".svn" | ".hg" | "node_modules" | "vendor" | "__pycache__" | ".next" | "dist"
            | "build"
    ) || name.starts_with('.')
}

/// True when the command's leading text matches the deny-list.
pub fn is_dangerous(command: &str) -> bool {
    let trimmed = command.trim_start();
    DANGEROUS_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}
