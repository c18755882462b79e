//! Filesystem helpers shared by the command steps

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use multipress_engine::{StepResult, StepStatus};
use std::fs;
use std::os::unix::fs::{lchown, symlink};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Creates `path` owned by `uid:gid`, skipping when it already exists
pub async fn ensure_dir(path: &Path, uid: u32, gid: u32) -> StepResult {
    if tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to check {}", path.display()))?
    {
        return Ok(StepStatus::skip(format!(
            "{} already exists",
            path.display()
        )));
    }

    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    lchown(path, Some(uid), Some(gid))
        .with_context(|| format!("Failed to change ownership of {}", path.display()))?;

    debug!("Created directory {}", path.display());
    Ok(StepStatus::Done)
}

/// Recursively copies `source` into `target`, giving every entry to `uid:gid`
///
/// The tree is assembled in a sibling staging directory and renamed into
/// place once complete, so a failed copy never leaves a partial `target`.
pub async fn copy_tree(source: &Path, target: &Path, uid: u32, gid: u32) -> Result<()> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || copy_tree_blocking(&source, &target, uid, gid))
        .await
        .context("Copy task failed")?
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn copy_tree_blocking(source: &Path, target: &Path, uid: u32, gid: u32) -> Result<()> {
    let staging = staging_path(target);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to remove {}", staging.display()))?;
    }

    let result = copy_entries(source, &staging, uid, gid).and_then(|()| {
        fs::rename(&staging, target).with_context(|| {
            format!("Failed to move {} to {}", staging.display(), target.display())
        })
    });

    if result.is_err() && staging.exists() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            debug!("Failed to clean up {}: {}", staging.display(), e);
        }
    }
    result
}

fn copy_entries(source: &Path, target: &Path, uid: u32, gid: u32) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("Failed to read {}", source.display()))?;
        let from = entry.path();
        let to = target.join(from.strip_prefix(source)?);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&to)
                .with_context(|| format!("Failed to create {}", to.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(from)
                .with_context(|| format!("Failed to read link {}", from.display()))?;
            symlink(&link, &to)
                .with_context(|| format!("Failed to create link {}", to.display()))?;
        } else {
            fs::copy(from, &to).with_context(|| {
                format!("Failed to copy {} to {}", from.display(), to.display())
            })?;
        }
        lchown(&to, Some(uid), Some(gid))
            .with_context(|| format!("Failed to change ownership of {}", to.display()))?;
    }

    Ok(())
}

pub async fn copy_file(source: &Path, target: &Path) -> Result<()> {
    tokio::fs::copy(source, target)
        .await
        .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
    Ok(())
}

pub async fn remove_dir(path: &Path) -> Result<()> {
    tokio::fs::remove_dir_all(path)
        .await
        .with_context(|| format!("Failed to remove {}", path.display()))
}

/// Packs the content of `dir` into the gzip-compressed tarball `archive`
pub async fn archive(dir: &Path, archive: &Path) -> Result<()> {
    let dir = dir.to_path_buf();
    let archive = archive.to_path_buf();

    tokio::task::spawn_blocking(move || archive_blocking(&dir, &archive))
        .await
        .context("Archive task failed")?
}

fn archive_blocking(dir: &Path, archive: &Path) -> Result<()> {
    let file = fs::File::create(archive)
        .with_context(|| format!("Failed to create {}", archive.display()))?;

    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .with_context(|| format!("Failed to archive {}", dir.display()))?;

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .with_context(|| format!("Failed to write {}", archive.display()))?;

    debug!("Archived {} into {}", dir.display(), archive.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    fn owner(path: &Path) -> (u32, u32) {
        let meta = fs::metadata(path).unwrap();
        (meta.uid(), meta.gid())
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_then_skips() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("volumes");
        let (uid, gid) = owner(dir.path());

        let first = ensure_dir(&target, uid, gid).await.unwrap();
        assert_eq!(first, StepStatus::Done);
        assert!(target.is_dir());

        let second = ensure_dir(&target, uid, gid).await.unwrap();
        assert!(matches!(second, StepStatus::Skipped(reason) if reason.contains("already exists")));
    }

    #[tokio::test]
    async fn test_copy_tree_copies_nested_entries() {
        let dir = tempdir().unwrap();
        let (uid, gid) = owner(dir.path());
        let source = dir.path().join("model");
        fs::create_dir_all(source.join("wp-content/uploads")).unwrap();
        fs::write(source.join("index.php"), "<?php").unwrap();
        fs::write(source.join("wp-content/uploads/a.txt"), "a").unwrap();
        symlink("index.php", source.join("link.php")).unwrap();

        let target = dir.path().join("user1");
        copy_tree(&source, &target, uid, gid).await.unwrap();

        assert_eq!(fs::read_to_string(target.join("index.php")).unwrap(), "<?php");
        assert_eq!(
            fs::read_to_string(target.join("wp-content/uploads/a.txt")).unwrap(),
            "a"
        );
        assert_eq!(
            fs::read_link(target.join("link.php")).unwrap(),
            PathBuf::from("index.php")
        );
        assert_eq!(owner(&target), (uid, gid));
    }

    #[tokio::test]
    async fn test_copy_tree_missing_source_fails() {
        let dir = tempdir().unwrap();
        let (uid, gid) = owner(dir.path());
        let err = copy_tree(&dir.path().join("missing"), &dir.path().join("out"), uid, gid)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read"));
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_partial_tree() {
        let dir = tempdir().unwrap();
        let (uid, gid) = owner(dir.path());
        let source = dir.path().join("model");
        fs::create_dir_all(source.join("wp-content")).unwrap();
        fs::write(source.join("index.php"), "<?php").unwrap();

        let target = dir.path().join("user1");
        copy_tree(&dir.path().join("absent"), &target, uid, gid)
            .await
            .unwrap_err();
        assert!(!target.exists());

        // The final move fails on a non-empty target; the staged copy goes away
        let occupied = dir.path().join("user2");
        fs::create_dir_all(&occupied).unwrap();
        fs::write(occupied.join("custom.php"), "keep").unwrap();
        copy_tree(&source, &occupied, uid, gid).await.unwrap_err();
        assert!(!staging_path(&occupied).exists());
        assert!(!occupied.join("index.php").exists());

        copy_tree(&source, &target, uid, gid).await.unwrap();
        assert!(target.join("index.php").is_file());
        assert!(target.join("wp-content").is_dir());
        assert!(!staging_path(&target).exists());
    }

    #[tokio::test]
    async fn test_archive_packs_directory_content() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("user1");
        fs::create_dir_all(work.join("sources/wp-content")).unwrap();
        fs::write(work.join("dump.sql"), "-- dump").unwrap();
        fs::write(work.join("sources/wp-content/index.php"), "<?php").unwrap();

        let tarball = dir.path().join("user1.tar.gz");
        archive(&work, &tarball).await.unwrap();

        let file = fs::File::open(&tarball).unwrap();
        let mut unpacked = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut names: Vec<String> = unpacked
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().to_string();
                path.trim_start_matches("./").trim_end_matches('/').to_string()
            })
            .collect();
        names.sort();

        assert!(names.contains(&"dump.sql".to_string()));
        assert!(names.contains(&"sources/wp-content/index.php".to_string()));
        assert!(names.iter().all(|name| !name.starts_with('/')));
    }

    #[tokio::test]
    async fn test_remove_dir() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("user1");
        fs::create_dir_all(target.join("sources")).unwrap();

        remove_dir(&target).await.unwrap();
        assert!(!target.exists());
    }
}
