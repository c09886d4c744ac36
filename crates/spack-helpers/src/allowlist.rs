use crate::config::ConfigError;
use std::path::Path;

/// Parses a newline-delimited name list; `#` lines and blank lines are skipped.
pub fn parse_name_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn read_name_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadPackageList {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_name_list(&raw))
}

/// Names given inline, or the contents of `from_file` when set.
pub fn resolve_names(inline: &[String], from_file: Option<&Path>) -> Result<Vec<String>, ConfigError> {
    match from_file {
        Some(path) => read_name_list(path),
        None => Ok(inline.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let names = parse_name_list("# approved\nzlib\n\n  cmake  \n   # indented comment\nhdf5\n");
        assert_eq!(names, vec!["zlib", "cmake", "hdf5"]);
    }

    #[test]
    fn file_wins_over_inline_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("pkgs.txt");
        std::fs::write(&path, "zlib\n").expect("write list");
        let names = resolve_names(&["cmake".to_string()], Some(&path)).expect("names");
        assert_eq!(names, vec!["zlib"]);

        let err = read_name_list(&dir.path().join("missing.txt")).unwrap_err();
        assert_eq!(err.code(), "config.package_list_read_failed");
    }
}
