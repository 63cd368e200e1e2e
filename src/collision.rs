//! Pre-flight check for output files left over from earlier runs.

use std::path::Path;

/// File name of the `index`-th variation in the single-prompt flow.
pub fn sequential_filename(index: u32) -> String {
    format!("imggen_{:03}.png", index)
}

/// Reports which of `imggen_001.png ..= imggen_{variations}.png` already
/// exist in `output_dir`.
///
/// Returns `(has_collision, existing_filenames)`, in index order.
pub fn check_collisions(output_dir: impl AsRef<Path>, variations: u32) -> (bool, Vec<String>) {
    let output_dir = output_dir.as_ref();
    let collisions: Vec<String> = (1..=variations)
        .map(sequential_filename)
        .filter(|name| output_dir.join(name).exists())
        .collect();
    (!collisions.is_empty(), collisions)
}

/// Builds the user-facing message for a detected collision.
pub fn format_collision_error(collisions: &[String], output_dir: impl AsRef<Path>) -> String {
    let mut lines = vec![
        "Error: File collision detected".to_string(),
        String::new(),
        format!(
            "The following files already exist in {}:",
            output_dir.as_ref().display()
        ),
    ];
    lines.extend(collisions.iter().map(|name| format!("  - {}", name)));
    lines.extend(
        [
            "",
            "Please:",
            "  1. Delete or rename these files, OR",
            "  2. Use a different --output directory",
            "",
            "No API calls were made (no charges incurred).",
        ]
        .map(String::from),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_filename_is_zero_padded() {
        assert_eq!(sequential_filename(1), "imggen_001.png");
        assert_eq!(sequential_filename(12), "imggen_012.png");
    }

    #[test]
    fn test_no_collision_in_empty_dir() {
        let temp = tempfile::tempdir().unwrap();
        let (has_collision, collisions) = check_collisions(temp.path(), 4);
        assert!(!has_collision);
        assert!(collisions.is_empty());
    }

    #[test]
    fn test_leading_files_collide() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("imggen_001.png"), b"").unwrap();
        std::fs::write(temp.path().join("imggen_002.png"), b"").unwrap();

        let (has_collision, collisions) = check_collisions(temp.path(), 4);
        assert!(has_collision);
        assert_eq!(collisions, vec!["imggen_001.png", "imggen_002.png"]);
    }

    #[test]
    fn test_partial_collision() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("imggen_003.png"), b"").unwrap();

        let (has_collision, collisions) = check_collisions(temp.path(), 4);
        assert!(has_collision);
        assert_eq!(collisions, vec!["imggen_003.png"]);
    }

    #[test]
    fn test_files_beyond_range_are_ignored() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("imggen_004.png"), b"").unwrap();
        std::fs::write(temp.path().join("other.png"), b"").unwrap();

        let (has_collision, collisions) = check_collisions(temp.path(), 3);
        assert!(!has_collision);
        assert!(collisions.is_empty());
    }

    #[test]
    fn test_format_collision_error() {
        let collisions = vec!["imggen_001.png".to_string(), "imggen_002.png".to_string()];
        let message = format_collision_error(&collisions, "./output");

        assert!(message.starts_with("Error: File collision detected"));
        assert!(message.contains("already exist in ./output"));
        assert!(message.contains("  - imggen_001.png"));
        assert!(message.contains("  - imggen_002.png"));
        assert!(message.contains("No API calls were made"));
    }
}
