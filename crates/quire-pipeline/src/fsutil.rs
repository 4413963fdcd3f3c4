//! Directory helpers shared by the clean, vendor, and publish steps.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Make `dir` an empty directory.
///
/// Creates it when missing, otherwise removes everything inside it while
/// keeping the directory itself.
pub fn empty_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }

    Ok(())
}

/// Remove `path` if it exists, whether file or directory.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursively copy `src` into `dest`, creating `dest` as needed.
///
/// Returns the number of files copied.
pub fn copy_dir(src: &Path, dest: &Path) -> io::Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empties_existing_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("docs");
        fs::create_dir_all(dir.join("css/nested")).unwrap();
        fs::write(dir.join("index.html"), "old").unwrap();
        fs::write(dir.join("css/nested/app.css"), "old").unwrap();

        empty_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn creates_missing_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("a/b");

        empty_dir(&dir).unwrap();

        assert!(dir.is_dir());
    }

    #[test]
    fn copies_tree() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("js")).unwrap();
        fs::write(src.join("a.css"), "a").unwrap();
        fs::write(src.join("js/b.js"), "b").unwrap();

        let dest = temp.path().join("out/vendor");
        let copied = copy_dir(&src, &dest).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dest.join("js/b.js")).unwrap(), "b");
    }

    #[test]
    fn removing_missing_path_is_fine() {
        let temp = tempdir().unwrap();
        remove_path(&temp.path().join("nothing")).unwrap();
    }
}
