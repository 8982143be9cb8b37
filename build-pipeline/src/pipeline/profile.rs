use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use common::error::AppError;
use serde::Serialize;
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use super::config::MobileProfile;
use crate::toolchain::CommandStep;

pub const PACKAGING_CONFIG_FILE: &str = "capacitor.config.json";
pub const NATIVE_PLATFORM: &str = "android";
pub const NATIVE_PROJECT_DIR: &str = "android";
pub const DEBUG_PACKAGE_PATH: &str = "android/app/build/outputs/apk/debug/app-debug.apk";
pub const NATIVE_BUILD_STEP: &str = "gradle-assemble-debug";
const SCAFFOLD_APP_NAME: &str = "Game App";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackagingDocument<'a> {
    app_id: &'a str,
    app_name: &'a str,
    web_dir: &'a str,
    server: ServerSection,
    android: AndroidSection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerSection {
    android_scheme: &'static str,
    cleartext: bool,
    allow_navigation: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AndroidSection {
    build_options: BuildOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildOptions {
    min_sdk_version: u32,
    target_sdk_version: u32,
}

/// Writes the mobile wrapper's configuration document into `root`.
pub fn write_packaging_config(profile: &MobileProfile, root: &Path) -> Result<PathBuf, AppError> {
    let document = PackagingDocument {
        app_id: &profile.app_id,
        app_name: &profile.app_name,
        web_dir: &profile.web_dir,
        server: ServerSection {
            android_scheme: "file",
            cleartext: true,
            allow_navigation: vec!["*"],
        },
        android: AndroidSection {
            build_options: BuildOptions {
                min_sdk_version: profile.min_sdk,
                target_sdk_version: profile.target_sdk,
            },
        },
    };

    let path = root.join(PACKAGING_CONFIG_FILE);
    fs::write(&path, serde_json::to_vec_pretty(&document)?)?;
    Ok(path)
}

/// Copies the game's files into `root/<web_dir>`, leaving out the web
/// directory itself and the packaging document.
pub fn mirror_web_assets(profile: &MobileProfile, root: &Path) -> Result<usize, AppError> {
    let web_root = root.join(&profile.web_dir);
    fs::create_dir_all(&web_root)?;

    let mut copied = 0_usize;
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() != 1
                || (entry.file_name() != profile.web_dir.as_str()
                    && entry.file_name() != PACKAGING_CONFIG_FILE)
        });

    for entry in walker {
        let entry = entry.map_err(|err| AppError::Io(io::Error::other(err)))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| AppError::InternalError(err.to_string()))?;
        let target = web_root.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied = copied.saturating_add(1);
        }
    }

    Ok(copied)
}

/// The ordered native toolchain steps for the mobile profile.
pub fn mobile_toolchain_steps(profile: &MobileProfile, root: &Path) -> Vec<CommandStep> {
    vec![
        CommandStep::new("npm-init", &profile.npm_command, root).args(["init", "-y"]),
        CommandStep::new("npm-install", &profile.npm_command, root).args([
            "install",
            "@capacitor/core",
            "@capacitor/cli",
            "@capacitor/android",
        ]),
        CommandStep::new("cap-init", &profile.npx_command, root).args([
            "cap",
            "init",
            SCAFFOLD_APP_NAME,
            profile.app_id.as_str(),
            "--web-dir",
            profile.web_dir.as_str(),
        ]),
        CommandStep::new("cap-add-android", &profile.npx_command, root)
            .args(["cap", "add", NATIVE_PLATFORM]),
        CommandStep::new("cap-sync-android", &profile.npx_command, root)
            .args(["cap", "sync", NATIVE_PLATFORM]),
        CommandStep::new(
            NATIVE_BUILD_STEP,
            &profile.gradle_command,
            root.join(NATIVE_PROJECT_DIR),
        )
        .args(["assembleDebug"]),
    ]
}

/// Packs `root` into a single deflated archive at `destination`, keeping the
/// top-level files and folders as they are.
///
/// Directories are implied by their files; only empty ones get an entry.
/// Returns the number of files written.
pub fn repack_directory(root: &Path, destination: &Path) -> Result<usize, AppError> {
    let file = File::create(destination)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0_usize;
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|err| AppError::Io(io::Error::other(err)))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| AppError::InternalError(err.to_string()))?;
        let name = archive_name(relative);

        if entry.file_type().is_dir() {
            if fs::read_dir(entry.path())?.next().is_some() {
                continue;
            }
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| AppError::InternalError(format!("failed to add {name}: {err}")))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name.as_str(), options)
                .map_err(|err| AppError::InternalError(format!("failed to add {name}: {err}")))?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut writer)?;
            entries = entries.saturating_add(1);
        }
    }

    writer
        .finish()
        .map_err(|err| AppError::InternalError(format!("failed to finish archive: {err}")))?;
    Ok(entries)
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
