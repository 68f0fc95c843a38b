//! Artifact naming and input discovery
//!
//! Discovery order is the chapter order of the final audiobook, so the scan
//! must be stable and reproducible: files are sorted lexicographically by
//! path within each folder, and folders are flattened in submission order.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Fallback name used whenever no meaningful name can be derived
pub const FALLBACK_NAME: &str = "converted";

/// Folder names shorter than this are treated as non-meaningful (root-like
/// or degenerate paths) when deriving output names.
const MIN_MEANINGFUL_NAME_LEN: usize = 2;

/// Summary of a source folder for the listing endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct FolderStats {
    pub path: String,
    pub file_count: usize,
    pub total_size_mb: f64,
    pub last_modified: DateTime<Utc>,
}

/// Recursively find all eligible audio files in a folder, sorted by path.
///
/// A missing or non-directory path yields an empty list; the caller decides
/// whether that is a validation error.
pub fn find_eligible_files(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if !folder.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let path = entry.into_path();
                has_eligible_extension(&path, extensions).then_some(path)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Error accessing entry during scan: {}", e);
                None
            }
        })
        .collect();

    files.sort();
    files
}

fn has_eligible_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

/// Gather file count, total size and newest modification time for a folder
pub fn folder_stats(folder: &Path, extensions: &[String]) -> Option<FolderStats> {
    let files = find_eligible_files(folder, extensions);
    if files.is_empty() {
        return None;
    }

    let mut total_size = 0u64;
    let mut last_modified = std::time::SystemTime::UNIX_EPOCH;
    for file in &files {
        if let Ok(meta) = std::fs::metadata(file) {
            total_size += meta.len();
            if let Ok(modified) = meta.modified() {
                last_modified = last_modified.max(modified);
            }
        }
    }

    Some(FolderStats {
        path: folder.to_string_lossy().to_string(),
        file_count: files.len(),
        total_size_mb: total_size as f64 / (1024.0 * 1024.0),
        last_modified: DateTime::<Utc>::from(last_modified),
    })
}

/// Sanitize a file name for filesystem safety.
///
/// Strips filesystem-hostile characters, collapses whitespace/underscore runs
/// to a single underscore, trims the edges, and never returns an empty string.
pub fn sanitize_file_name(name: &str) -> String {
    let mut replaced = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            replaced.push('_');
        } else if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.') {
            replaced.push(c);
        } else {
            replaced.push('_');
        }
    }

    // Collapse runs of underscores and whitespace
    let mut collapsed = String::with_capacity(replaced.len());
    let mut in_separator = false;
    for c in replaced.chars() {
        if c == '_' || c.is_whitespace() {
            if !in_separator {
                collapsed.push('_');
            }
            in_separator = true;
        } else {
            collapsed.push(c);
            in_separator = false;
        }
    }

    let trimmed = collapsed.trim_matches(|c: char| c == '_' || c.is_whitespace());
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derive a deterministic output name from source folder names.
///
/// One folder uses its sanitized basename; multiple folders join their
/// sanitized basenames with `_and_`; degenerate inputs fall back to
/// [`FALLBACK_NAME`].
pub fn output_name_from_folders(source_folders: &[String]) -> String {
    if source_folders.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    if source_folders.len() == 1 {
        return match meaningful_basename(&source_folders[0]) {
            Some(name) => sanitize_file_name(&name),
            None => FALLBACK_NAME.to_string(),
        };
    }

    let names: Vec<String> = source_folders
        .iter()
        .filter_map(|folder| meaningful_basename(folder))
        .map(|name| sanitize_file_name(&name))
        .filter(|name| name != FALLBACK_NAME)
        .collect();

    if names.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    sanitize_file_name(&names.join("_and_"))
}

/// Extract a folder basename worth using as an output name
fn meaningful_basename(folder: &str) -> Option<String> {
    let name = Path::new(folder).file_name()?.to_string_lossy().to_string();
    if name.chars().count() < MIN_MEANINGFUL_NAME_LEN {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sanitize_strips_hostile_characters() {
        assert_eq!(sanitize_file_name("a<b>c:d\"e/f\\g|h?i*j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_file_name("My Book  Vol. 1"), "My_Book_Vol._1");
        assert_eq!(sanitize_file_name("__edge case__ "), "edge_case");
    }

    #[test]
    fn test_sanitize_never_empty() {
        assert_eq!(sanitize_file_name(""), FALLBACK_NAME);
        assert_eq!(sanitize_file_name("___"), FALLBACK_NAME);
        assert_eq!(sanitize_file_name("   "), FALLBACK_NAME);
    }

    #[test]
    fn test_sanitize_is_deterministic() {
        let input = "Dune: Messiah / Part 2?";
        assert_eq!(sanitize_file_name(input), sanitize_file_name(input));
    }

    #[test]
    fn test_output_name_single_folder() {
        assert_eq!(
            output_name_from_folders(&["/data/source/The Hobbit".to_string()]),
            "The_Hobbit"
        );
    }

    #[test]
    fn test_output_name_multiple_folders() {
        assert_eq!(
            output_name_from_folders(&[
                "/data/source/Book One".to_string(),
                "/data/source/Book Two".to_string(),
            ]),
            "Book_One_and_Book_Two"
        );
    }

    #[test]
    fn test_output_name_degenerate_inputs() {
        assert_eq!(output_name_from_folders(&[]), FALLBACK_NAME);
        assert_eq!(output_name_from_folders(&["/".to_string()]), FALLBACK_NAME);
        // Single-character folder names are non-meaningful
        assert_eq!(output_name_from_folders(&["/data/a".to_string()]), FALLBACK_NAME);
        // Mixed: degenerate names dropped from the join
        assert_eq!(
            output_name_from_folders(&["/data/a".to_string(), "/data/Real Book".to_string()]),
            "Real_Book"
        );
    }

    #[test]
    fn test_find_eligible_files_sorted_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("disc2");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("02 - second.mp3"), b"").unwrap();
        fs::write(dir.path().join("01 - first.mp3"), b"").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"").unwrap();
        fs::write(sub.join("03 - third.MP3"), b"").unwrap();

        let extensions = vec!["mp3".to_string()];
        let files = find_eligible_files(dir.path(), &extensions);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["01 - first.mp3", "02 - second.mp3", "03 - third.MP3"]);
    }

    #[test]
    fn test_find_eligible_files_missing_folder() {
        let extensions = vec!["mp3".to_string()];
        assert!(find_eligible_files(Path::new("/nonexistent/folder"), &extensions).is_empty());
    }

    #[test]
    fn test_chapter_order_across_two_folders() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("A");
        let b = root.path().join("B");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("ch2.mp3"), b"").unwrap();
        fs::write(a.join("ch1.mp3"), b"").unwrap();
        fs::write(b.join("ch2.mp3"), b"").unwrap();
        fs::write(b.join("ch1.mp3"), b"").unwrap();

        let extensions = vec!["mp3".to_string()];
        let mut all = Vec::new();
        for folder in [&a, &b] {
            all.extend(find_eligible_files(folder, &extensions));
        }

        // A's files (sorted) then B's files (sorted)
        assert_eq!(
            all,
            vec![
                a.join("ch1.mp3"),
                a.join("ch2.mp3"),
                b.join("ch1.mp3"),
                b.join("ch2.mp3")
            ]
        );
    }
}
