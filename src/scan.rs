//! Local document discovery.
//!
//! Walks the documents directory, keeps files matching the include globs, and
//! hashes each one. Scan errors are fatal: a directory that cannot be read
//! means the sync has nothing trustworthy to compare against.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::error::{DocqError, Result};
use crate::models::{Document, UploadStatus};

/// Create the documents directory if it is missing.
///
/// Returns `true` when the directory was created. An existing path that is
/// not a directory is a configuration error.
pub fn ensure_documents_dir(dir: &Path) -> Result<bool> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(DocqError::Config(format!(
                "documents.dir is not a directory: {}",
                dir.display()
            )));
        }
        return Ok(false);
    }
    std::fs::create_dir_all(dir).map_err(|e| {
        DocqError::Config(format!(
            "Failed to create documents directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(true)
}

/// Scan `config.dir` and return every matching document, sorted by name.
pub fn scan_documents(config: &DocumentsConfig) -> Result<Vec<Document>> {
    let root = &config.dir;
    if !root.is_dir() {
        return Err(DocqError::Config(format!(
            "Documents directory does not exist or is not a directory: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            DocqError::Config(format!("Failed to read {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let (content_hash, size_bytes) = hash_file(path)?;
        docs.push(Document {
            path: path.to_path_buf(),
            file_name: rel_str,
            content_hash,
            size_bytes,
            status: UploadStatus::Pending,
        });
    }

    docs.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(docs)
}

/// SHA-256 of the file contents as lowercase hex, plus the byte count.
///
/// Streams the file through the hasher; the contents are never held in
/// memory at once.
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// SHA-256 of an in-memory buffer, same encoding as [`hash_file`].
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Split documents into the first occurrence of each content hash and the
/// later duplicates. Input order decides which copy wins.
pub fn dedupe_by_hash(docs: Vec<Document>) -> (Vec<Document>, Vec<Document>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();
    for doc in docs {
        if seen.insert(doc.content_hash.clone()) {
            unique.push(doc);
        } else {
            duplicates.push(doc);
        }
    }
    (unique, duplicates)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| DocqError::Config(format!("Invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DocqError::Config(format!("Invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn docs_config(dir: &Path) -> DocumentsConfig {
        DocumentsConfig {
            dir: dir.to_path_buf(),
            ..DocumentsConfig::default()
        }
    }

    #[test]
    fn finds_pdfs_sorted_and_ignores_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.pdf"), b"%PDF-1.4 b").unwrap();
        fs::write(tmp.path().join("a.pdf"), b"%PDF-1.4 a").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"ignore me").unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.PDF"), b"%PDF-1.4 c").unwrap();

        let docs = scan_documents(&docs_config(tmp.path())).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "sub/c.PDF"]);
        assert!(docs.iter().all(|d| d.status == UploadStatus::Pending));
        assert_eq!(docs[0].size_bytes, 10);
    }

    #[test]
    fn exclude_globs_apply() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("keep.pdf"), b"%PDF-1.4 k").unwrap();
        fs::write(tmp.path().join("drafts/skip.pdf"), b"%PDF-1.4 s").unwrap();

        let mut cfg = docs_config(tmp.path());
        cfg.exclude_globs = vec!["drafts/**".to_string()];
        let docs = scan_documents(&cfg).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "keep.pdf");
    }

    #[test]
    fn missing_directory_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = scan_documents(&docs_config(&tmp.path().join("absent"))).unwrap_err();
        assert!(matches!(err, DocqError::Config(_)));
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_content_is_deduped_first_wins() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.pdf"), b"%PDF-1.4 same").unwrap();
        fs::write(tmp.path().join("copy-of-a.pdf"), b"%PDF-1.4 same").unwrap();
        fs::write(tmp.path().join("b.pdf"), b"%PDF-1.4 other").unwrap();

        let docs = scan_documents(&docs_config(tmp.path())).unwrap();
        let (unique, dupes) = dedupe_by_hash(docs);
        let unique_names: Vec<&str> = unique.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(unique_names, vec!["a.pdf", "b.pdf"]);
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].file_name, "copy-of-a.pdf");
    }

    #[test]
    fn ensure_creates_then_reports_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("assets");
        assert!(ensure_documents_dir(&dir).unwrap());
        assert!(!ensure_documents_dir(&dir).unwrap());

        let file = tmp.path().join("file.pdf");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ensure_documents_dir(&file),
            Err(DocqError::Config(_))
        ));
    }
}
