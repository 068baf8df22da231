//! In-memory tar archives for the Docker archive and build APIs.

use std::io;
use std::path::Path;

use tar::{Builder as TarBuilder, Header};
use walkdir::WalkDir;

/// Directory names never sent as part of an image build context.
const CONTEXT_EXCLUDES: &[&str] = &[".git", "target", "node_modules"];

/// Packs a single text file into a tar archive meant to be extracted at `/`.
///
/// `abs_path` must be absolute; the entry is stored relative to the root so
/// Docker recreates any missing parent directory on extraction.
pub fn single_file_archive(abs_path: &str, content: &str, mode: u32) -> io::Result<Vec<u8>> {
    let relative = abs_path.trim_start_matches('/');
    if relative.is_empty() || !abs_path.starts_with('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("expected an absolute file path, got '{abs_path}'"),
        ));
    }

    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);

    let mut tar = TarBuilder::new(Vec::new());
    tar.append_data(&mut header, relative, content.as_bytes())?;
    tar.into_inner()
}

/// Packs a Docker build context directory into a tar archive.
pub fn build_context_archive(context_dir: &Path) -> io::Result<Vec<u8>> {
    let mut tar = TarBuilder::new(Vec::new());
    tar.follow_symlinks(false);

    let walker = WalkDir::new(context_dir).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !CONTEXT_EXCLUDES
                .iter()
                .any(|excluded| entry.file_name() == *excluded)
    });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(context_dir)
            .map_err(io::Error::other)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            tar.append_dir(relative, entry.path())?;
        } else {
            tar.append_path_with_name(entry.path(), relative)?;
        }
    }

    tar.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entries(archive: &[u8]) -> Vec<(String, String)> {
        let mut reader = tar::Archive::new(archive);
        let mut out = Vec::new();
        for entry in reader.entries().expect("entries") {
            let mut entry = entry.expect("entry");
            let path = entry.path().expect("path").to_string_lossy().to_string();
            let mut content = String::new();
            entry.read_to_string(&mut content).expect("read");
            out.push((path, content));
        }
        out
    }

    #[test]
    fn test_single_file_archive_is_relative_to_root() {
        let archive = single_file_archive("/tmp/redcode/script.py", "print('x')\n", 0o644)
            .expect("archive");
        let entries = entries(&archive);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "tmp/redcode/script.py");
        assert_eq!(entries[0].1, "print('x')\n");
    }

    #[test]
    fn test_single_file_archive_rejects_relative_path() {
        assert!(single_file_archive("script.py", "", 0o644).is_err());
        assert!(single_file_archive("/", "", 0o644).is_err());
    }

    #[test]
    fn test_build_context_skips_git_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Dockerfile"), "FROM ubuntu:22.04\n").expect("write");
        std::fs::write(dir.path().join("init.sh"), "echo ready\n").expect("write");
        std::fs::create_dir(dir.path().join(".git")).expect("mkdir");
        std::fs::write(dir.path().join(".git").join("HEAD"), "ref").expect("write");

        let archive = build_context_archive(dir.path()).expect("archive");
        let names: Vec<String> = entries(&archive).into_iter().map(|(p, _)| p).collect();

        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"init.sh".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
    }
}
