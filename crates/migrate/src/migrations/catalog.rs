//! Migration Catalog - discovers migration files on disk
//!
//! Walks the migration directory, keeps the files whose relative path matches
//! the include pattern, and orders them by name. Sequence numbers come from the
//! leading digits of each name. The catalog does not check that names and
//! sequence numbers agree or that numbers are unique; the runner does that
//! against the ledger watermark.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use super::definitions::MigrationFile;
use crate::error::{MigrateError, MigrateResult};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Discover migration files under `directory` matching `include_pattern`
///
/// A missing directory yields an empty catalog.
pub fn discover(directory: &Path, include_pattern: &str) -> MigrateResult<Vec<MigrationFile>> {
    let pattern = Pattern::new(include_pattern)?;

    if !directory.exists() {
        tracing::debug!("Migration directory {} does not exist", directory.display());
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    collect_files(directory, "", &mut names)?;

    let mut matched: Vec<(String, PathBuf)> = names
        .into_iter()
        .filter(|(name, _)| pattern.matches_with(name, MATCH_OPTIONS))
        .collect();
    matched.sort_by(|a, b| a.0.cmp(&b.0));

    matched
        .into_iter()
        .map(|(name, path)| {
            let sequence_id = parse_sequence_id(&name)?;
            Ok(MigrationFile {
                sequence_id,
                name,
                path,
            })
        })
        .collect()
}

/// Recursively list regular files as (relative `/`-joined name, full path)
///
/// Symlinked directories are not descended into; symlinks to files are kept.
fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) -> MigrateResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let name = if prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", prefix, file_name)
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&path, &name, out)?;
        } else if file_type.is_file() {
            out.push((name, path));
        } else if file_type.is_symlink() {
            let target_is_file = fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
            if target_is_file {
                out.push((name, path));
            }
        }
    }
    Ok(())
}

/// Parse the leading run of digits of a migration name
///
/// The ledger stores ids in an `INTEGER` column, so numbers past
/// `i32::MAX` are rejected along with names that have no digits.
pub fn parse_sequence_id(name: &str) -> MigrateResult<i64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();

    digits
        .parse::<i64>()
        .ok()
        .filter(|id| *id <= i32::MAX as i64)
        .ok_or_else(|| MigrateError::InvalidFileName {
            file: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_sequence_id() {
        assert_eq!(parse_sequence_id("1-init.sql").unwrap(), 1);
        assert_eq!(parse_sequence_id("0001_users.sql").unwrap(), 1);
        assert_eq!(parse_sequence_id("42 seed.sql").unwrap(), 42);
        assert_eq!(parse_sequence_id("7.sql").unwrap(), 7);
    }

    #[test]
    fn test_parse_sequence_id_rejects_bad_names() {
        for name in ["init.sql", "v1_init.sql", "-1-init.sql", "99999999999-huge.sql"] {
            let err = parse_sequence_id(name).unwrap_err();
            assert!(
                matches!(err, MigrateError::InvalidFileName { ref file } if file == name),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_discover_orders_by_name() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "002-seed.sql", "INSERT INTO t VALUES (1);");
        write(dir.path(), "001-init.sql", "CREATE TABLE t(x int);");
        write(dir.path(), "010-later.sql", "SELECT 1;");
        write(dir.path(), "README.md", "not a migration");

        let files = discover(dir.path(), "**/*.sql").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["001-init.sql", "002-seed.sql", "010-later.sql"]);

        let ids: Vec<_> = files.iter().map(|f| f.sequence_id).collect();
        assert_eq!(ids, vec![1, 2, 10]);
        assert_eq!(files[0].load_content().unwrap(), "CREATE TABLE t(x int);");
    }

    #[test]
    fn test_discover_keeps_name_order_over_id_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "10-b.sql", "");
        write(dir.path(), "9-a.sql", "");

        let files = discover(dir.path(), "*.sql").unwrap();
        let ids: Vec<_> = files.iter().map(|f| f.sequence_id).collect();
        assert_eq!(ids, vec![10, 9]);
    }

    #[test]
    fn test_discover_nested_and_pattern() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-top.sql", "");
        write(dir.path(), "2-nested/3-inner.sql", "");

        let all = discover(dir.path(), "**/*.sql").unwrap();
        let names: Vec<_> = all.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["1-top.sql", "2-nested/3-inner.sql"]);
        assert_eq!(all[1].sequence_id, 2);

        let top_only = discover(dir.path(), "*.sql").unwrap();
        assert_eq!(top_only.len(), 1);
    }

    #[test]
    fn test_discover_rejects_unnumbered_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-init.sql", "");
        write(dir.path(), "cleanup.sql", "");

        let err = discover(dir.path(), "**/*.sql").unwrap_err();
        assert!(matches!(err, MigrateError::InvalidFileName { file } if file == "cleanup.sql"));
    }

    #[test]
    fn test_discover_keeps_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1-a.sql", "");
        write(dir.path(), "1-b.sql", "");

        let files = discover(dir.path(), "**/*.sql").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.sequence_id == 1));
    }

    #[test]
    fn test_discover_missing_directory() {
        let dir = TempDir::new().unwrap();
        let files = discover(&dir.path().join("absent"), "**/*.sql").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        let err = discover(dir.path(), "[").unwrap_err();
        assert!(matches!(err, MigrateError::Pattern(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_skips_symlinked_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001-a.sql", "SELECT 1;");
        write(dir.path(), "002-nested/b.sql", "SELECT 2;");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("002-nested"), dir.path().join("004-linked")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("001-a.sql"), dir.path().join("003-c.sql")).unwrap();

        let files = discover(dir.path(), "**/*.sql").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["001-a.sql", "002-nested/b.sql", "003-c.sql"]);
    }
}
