//! Prompt and reference loading for the command line.

use crate::error::{ImgGenError, Result};
use std::path::{Path, PathBuf};

/// Largest variation count a single run accepts.
pub const MAX_VARIATIONS: u32 = 4;

/// Returns the prompt from `text` or, failing that, from `file`.
pub fn load_prompt(text: Option<&str>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text.to_string());
    }

    let file = file.ok_or_else(|| {
        ImgGenError::Validation("Must provide either --prompt or --prompt-file".into())
    })?;

    let contents = read_input_file(file, "Prompt")?;
    let prompt = contents.trim();
    if prompt.is_empty() {
        return Err(ImgGenError::Validation(format!(
            "Prompt file is empty: {}",
            file.display()
        )));
    }
    Ok(prompt.to_string())
}

/// Collects reference image paths from positional arguments or a list file.
///
/// The list file holds one path per line; blank lines are skipped.
pub fn load_references(paths: &[PathBuf], file: Option<&Path>) -> Result<Vec<PathBuf>> {
    let Some(file) = file else {
        return Ok(paths.to_vec());
    };

    if !paths.is_empty() {
        return Err(ImgGenError::Validation(
            "Cannot specify both positional reference images and --references-file".into(),
        ));
    }

    let contents = read_input_file(file, "References")?;
    let references: Vec<PathBuf> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();

    if references.is_empty() {
        return Err(ImgGenError::Validation(format!(
            "References file is empty: {}",
            file.display()
        )));
    }
    Ok(references)
}

/// Accepts 1 to [`MAX_VARIATIONS`].
pub fn validate_variations(variations: u32) -> Result<()> {
    if (1..=MAX_VARIATIONS).contains(&variations) {
        Ok(())
    } else {
        Err(ImgGenError::Validation(format!(
            "Variations must be between 1 and {}, got {}",
            MAX_VARIATIONS, variations
        )))
    }
}

fn read_input_file(path: &Path, label: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImgGenError::Validation(format!("{} file not found: {}", label, path.display()))
        } else {
            ImgGenError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_from_text() {
        assert_eq!(
            load_prompt(Some("a beautiful landscape"), None).unwrap(),
            "a beautiful landscape"
        );
    }

    #[test]
    fn test_prompt_from_file_is_trimmed() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("prompt.txt");
        std::fs::write(&path, "\n  serene mountain at sunset  \n\n").unwrap();

        assert_eq!(
            load_prompt(None, Some(&path)).unwrap(),
            "serene mountain at sunset"
        );
    }

    #[test]
    fn test_prompt_text_wins_over_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("prompt.txt");
        std::fs::write(&path, "file prompt").unwrap();

        assert_eq!(
            load_prompt(Some("text prompt"), Some(&path)).unwrap(),
            "text prompt"
        );
    }

    #[test]
    fn test_prompt_errors() {
        let temp = tempfile::tempdir().unwrap();

        let err = load_prompt(None, None).unwrap_err();
        assert!(err.to_string().contains("Must provide either --prompt"));

        let err = load_prompt(None, Some(&temp.path().join("missing.txt"))).unwrap_err();
        assert!(err.to_string().contains("Prompt file not found"));

        let empty = temp.path().join("empty.txt");
        std::fs::write(&empty, "   \n").unwrap();
        let err = load_prompt(None, Some(&empty)).unwrap_err();
        assert!(err.to_string().contains("Prompt file is empty"));
    }

    #[test]
    fn test_references_positional() {
        let paths = vec![PathBuf::from("ref1.jpg"), PathBuf::from("ref2.jpg")];
        assert_eq!(load_references(&paths, None).unwrap(), paths);
        assert!(load_references(&[], None).unwrap().is_empty());
    }

    #[test]
    fn test_references_file_skips_blank_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("refs.txt");
        std::fs::write(&path, "ref1.jpg\n\n  ref2.jpg\n\nref3.jpg\n").unwrap();

        let refs = load_references(&[], Some(&path)).unwrap();
        assert_eq!(
            refs,
            vec![
                PathBuf::from("ref1.jpg"),
                PathBuf::from("ref2.jpg"),
                PathBuf::from("ref3.jpg")
            ]
        );
    }

    #[test]
    fn test_references_errors() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("refs.txt");
        std::fs::write(&path, "ref1.jpg\n").unwrap();

        let err = load_references(&[PathBuf::from("a.png")], Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Cannot specify both"));

        let err = load_references(&[], Some(&temp.path().join("nope.txt"))).unwrap_err();
        assert!(err.to_string().contains("References file not found"));

        std::fs::write(&path, "\n\n").unwrap();
        let err = load_references(&[], Some(&path)).unwrap_err();
        assert!(err.to_string().contains("References file is empty"));
    }

    #[test]
    fn test_variation_bounds() {
        for ok in 1..=4 {
            assert!(validate_variations(ok).is_ok());
        }
        for bad in [0, 5, 10] {
            let err = validate_variations(bad).unwrap_err();
            assert!(err.to_string().contains("Variations must be between 1 and 4"));
        }
    }
}
