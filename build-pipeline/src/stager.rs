use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use common::{error::AppError, utils::upload_limits::validate_archive_name};
use tracing::debug;
use zip::ZipArchive;

/// Unpacks uploaded archives into per-job workspaces.
#[derive(Debug, Clone)]
pub struct ArchiveStager {
    max_extracted_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub root: PathBuf,
    pub entries: usize,
    pub bytes: u64,
}

impl ArchiveStager {
    pub fn new(max_extracted_bytes: u64) -> Self {
        Self {
            max_extracted_bytes,
        }
    }

    /// Validates `declared_name`, then extracts `archive` into `workspace`.
    ///
    /// The workspace must not already exist; every job gets a fresh one.
    pub async fn stage(
        &self,
        archive: &Path,
        declared_name: &str,
        workspace: &Path,
    ) -> Result<StagedArchive, AppError> {
        validate_archive_name(declared_name)?;

        let archive = archive.to_path_buf();
        let workspace = workspace.to_path_buf();
        let limit = self.max_extracted_bytes;

        tokio::task::spawn_blocking(move || extract_archive(&archive, &workspace, limit)).await?
    }
}

fn extraction_error(context: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Extraction(format!("{context}: {err}"))
}

fn extract_archive(archive: &Path, workspace: &Path, limit: u64) -> Result<StagedArchive, AppError> {
    let file = File::open(archive).map_err(|err| extraction_error("failed to open archive", err))?;
    let mut zip =
        ZipArchive::new(file).map_err(|err| extraction_error("failed to read archive", err))?;

    if zip.len() == 0 {
        return Err(AppError::Extraction("archive contains no entries".into()));
    }

    if let Some(parent) = workspace.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| extraction_error("failed to prepare workspace root", err))?;
    }
    fs::create_dir(workspace).map_err(|err| extraction_error("failed to create workspace", err))?;

    let mut written: u64 = 0;
    let mut files = 0_usize;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| extraction_error("failed to read archive entry", err))?;
        let name = entry.name().to_owned();

        // Some archivers record the root itself as `./`.
        if entry.is_dir() && names_root(&name) {
            continue;
        }

        let out_path = contained_path(workspace, &name).ok_or_else(|| {
            AppError::Extraction(format!("entry '{name}' escapes the extraction directory"))
        })?;

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|err| extraction_error(&format!("failed to create {name}"), err))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| extraction_error(&format!("failed to create parent of {name}"), err))?;
        }

        let remaining = limit.saturating_sub(written);
        let mut out_file = File::create(&out_path)
            .map_err(|err| extraction_error(&format!("failed to create {name}"), err))?;
        // Read one byte past the budget so an overrun is detectable.
        let copied = io::copy(
            &mut (&mut entry).take(remaining.saturating_add(1)),
            &mut out_file,
        )
        .map_err(|err| extraction_error(&format!("failed to extract {name}"), err))?;

        if copied > remaining {
            return Err(AppError::Extraction(format!(
                "archive expands beyond the {limit} byte limit"
            )));
        }

        written = written.saturating_add(copied);
        files = files.saturating_add(1);
    }

    debug!(
        workspace = %workspace.display(),
        files,
        bytes = written,
        "archive extracted"
    );

    Ok(StagedArchive {
        root: workspace.to_path_buf(),
        entries: files,
        bytes: written,
    })
}

fn names_root(entry_name: &str) -> bool {
    let normalized = entry_name.replace('\\', "/");
    Path::new(&normalized)
        .components()
        .all(|component| component == Component::CurDir)
}

/// Joins an archive entry name onto `root`, refusing names that are absolute
/// or climb out of it.
fn contained_path(root: &Path, entry_name: &str) -> Option<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let relative = Path::new(&normalized);
    let mut out = root.to_path_buf();
    let mut depth = 0_usize;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth = depth.saturating_add(1);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    (depth > 0).then_some(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{write::FileOptions, ZipWriter};

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut writer = ZipWriter::new(file);
        for (name, body) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, FileOptions::default())
                    .expect("add dir");
            } else {
                writer
                    .start_file(*name, FileOptions::default())
                    .expect("start file");
                writer.write_all(body).expect("write body");
            }
        }
        writer.finish().expect("finish zip");
    }

    #[tokio::test]
    async fn stage_extracts_nested_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("upload.zip");
        write_zip(
            &archive,
            &[
                ("index.html", &b"<html></html>"[..]),
                ("assets/", &b""[..]),
                ("assets/sprite.png", &b"png"[..]),
            ],
        );
        let workspace = dir.path().join("workspaces").join("job-1");

        let staged = ArchiveStager::new(1024)
            .stage(&archive, "game.zip", &workspace)
            .await
            .expect("staged");

        assert_eq!(staged.root, workspace);
        assert_eq!(staged.entries, 2);
        assert_eq!(staged.bytes, 16);
        assert!(workspace.join("index.html").is_file());
        assert!(workspace.join("assets/sprite.png").is_file());
    }

    #[tokio::test]
    async fn stage_rejects_wrong_extension_before_touching_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("job-2");

        let err = ArchiveStager::new(1024)
            .stage(&dir.path().join("missing.zip"), "notes.txt", &workspace)
            .await
            .expect_err("invalid name");

        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn stage_refuses_path_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("evil.zip");
        write_zip(
            &archive,
            &[("ok.txt", &b"fine"[..]), ("../escape.txt", &b"bad"[..])],
        );
        let workspace = dir.path().join("ws").join("job-3");

        let err = ArchiveStager::new(1024)
            .stage(&archive, "evil.zip", &workspace)
            .await
            .expect_err("traversal rejected");

        assert!(matches!(err, AppError::Extraction(ref msg) if msg.contains("escapes")));
        assert!(!dir.path().join("ws").join("escape.txt").exists());
    }

    #[tokio::test]
    async fn stage_rejects_corrupt_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("corrupt.zip");
        std::fs::write(&archive, b"this is not a zip").expect("write");

        let err = ArchiveStager::new(1024)
            .stage(&archive, "corrupt.zip", &dir.path().join("job-4"))
            .await
            .expect_err("corrupt");

        assert!(matches!(err, AppError::Extraction(_)));
    }

    #[tokio::test]
    async fn stage_enforces_extracted_size_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("big.zip");
        write_zip(
            &archive,
            &[("a.bin", &[0_u8; 64][..]), ("b.bin", &[0_u8; 64][..])],
        );

        let err = ArchiveStager::new(100)
            .stage(&archive, "big.zip", &dir.path().join("job-5"))
            .await
            .expect_err("too large");

        assert!(matches!(err, AppError::Extraction(ref msg) if msg.contains("limit")));
    }

    #[tokio::test]
    async fn stage_refuses_existing_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("game.zip");
        write_zip(&archive, &[("index.html", &b"hi"[..])]);
        let workspace = dir.path().join("job-6");
        std::fs::create_dir(&workspace).expect("pre-existing");

        let err = ArchiveStager::new(1024)
            .stage(&archive, "game.zip", &workspace)
            .await
            .expect_err("workspace reused");

        assert!(matches!(err, AppError::Extraction(_)));
    }

    #[tokio::test]
    async fn stage_skips_root_directory_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("upload.zip");
        write_zip(
            &archive,
            &[
                ("./", &b""[..]),
                ("./index.html", &b"<html></html>"[..]),
            ],
        );
        let workspace = dir.path().join("job-root");

        let staged = ArchiveStager::new(1024)
            .stage(&archive, "game.zip", &workspace)
            .await
            .expect("root entry is not an escape");

        assert_eq!(staged.entries, 1);
        assert!(workspace.join("index.html").is_file());
    }

    #[tokio::test]
    async fn stage_still_refuses_parent_directory_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("upload.zip");
        write_zip(
            &archive,
            &[("./", &b""[..]), ("../", &b""[..]), ("index.html", &b"x"[..])],
        );
        let workspace = dir.path().join("job-parent");

        let err = ArchiveStager::new(1024)
            .stage(&archive, "game.zip", &workspace)
            .await
            .expect_err("parent entry");

        assert!(matches!(err, AppError::Extraction(msg) if msg.contains("../")));
    }

    #[test]
    fn root_entry_detection() {
        assert!(names_root("./"));
        assert!(names_root(".\\"));
        assert!(!names_root("../"));
        assert!(!names_root("/"));
        assert!(!names_root("assets/"));
    }

    #[test]
    fn contained_path_rules() {
        let root = Path::new("/ws");

        assert_eq!(
            contained_path(root, "a/b.txt"),
            Some(PathBuf::from("/ws/a/b.txt"))
        );
        assert_eq!(
            contained_path(root, "./a.txt"),
            Some(PathBuf::from("/ws/a.txt"))
        );
        assert!(contained_path(root, "/etc/passwd").is_none());
        assert!(contained_path(root, "a/../../b").is_none());
        assert!(contained_path(root, "..\\win.ini").is_none());
        assert!(contained_path(root, "").is_none());
    }
}
