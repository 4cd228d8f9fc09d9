//! Disk-backed frame cache.
//!
//! Each render job owns one cache directory. Finished artifacts are stored
//! under a name derived from their [`CacheStage`] and frame index:
//!
//! ```text
//! <cache_dir>/frame-<index>.png              extraction results
//! <cache_dir>/encoded/encoded-<index>.png    encode results
//! ```
//!
//! There is no manifest. A file being present is the only signal that the
//! `(stage, index)` pair is complete, which is why writes go to a temporary
//! sibling first and are renamed into place.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::RenderError;

const ENCODED_DIRECTORY: &str = "encoded";

/// Pipeline stage used to namespace cache files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStage {
    /// Source frame decoded and fitted to the canvas.
    Extract,
    /// Extracted frame composited and recompressed for delivery.
    Encode,
}

impl CacheStage {
    /// Every stage, in pipeline order.
    pub const ALL: [CacheStage; 2] = [CacheStage::Extract, CacheStage::Encode];

    /// The tag used on the command line and in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStage::Extract => "extract",
            CacheStage::Encode => "encode",
        }
    }

    fn file_prefix(self) -> &'static str {
        match self {
            CacheStage::Extract => "frame-",
            CacheStage::Encode => "encoded-",
        }
    }
}

impl Display for CacheStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStage {
    type Err = RenderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "extract" => Ok(CacheStage::Extract),
            "encode" => Ok(CacheStage::Encode),
            _ => Err(RenderError::UnknownStage(value.to_string())),
        }
    }
}

/// Handle to one job's cache directory.
///
/// Cheap to clone; every worker task gets its own copy of the path.
#[derive(Debug, Clone)]
pub struct FrameCache {
    root: PathBuf,
}

impl FrameCache {
    /// Open (creating if needed) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CacheIo`] when the directory tree cannot be
    /// created or is not writable. This is fatal for a render job.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, RenderError> {
        let root = root.as_ref().to_path_buf();
        let encoded = root.join(ENCODED_DIRECTORY);
        fs::create_dir_all(&encoded).map_err(|error| cache_io(&encoded, error))?;

        let probe = root.join(format!(".write-probe-{}", std::process::id()));
        fs::write(&probe, b"").map_err(|error| cache_io(&probe, error))?;
        fs::remove_file(&probe).map_err(|error| cache_io(&probe, error))?;

        log::debug!("Opened frame cache at {:?}", root);
        Ok(Self { root })
    }

    /// Attach to an existing cache without creating or writing anything.
    ///
    /// Use this for inspection; a render job goes through [`FrameCache::open`].
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CacheIo`] when `root` is not a directory.
    pub fn open_existing<P: AsRef<Path>>(root: P) -> Result<Self, RenderError> {
        let root = root.as_ref().to_path_buf();
        let metadata = fs::metadata(&root).map_err(|error| cache_io(&root, error))?;
        if !metadata.is_dir() {
            return Err(RenderError::CacheIo {
                path: root,
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self { root })
    }

    /// The cache's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stage_directory(&self, stage: CacheStage) -> PathBuf {
        match stage {
            CacheStage::Extract => self.root.clone(),
            CacheStage::Encode => self.root.join(ENCODED_DIRECTORY),
        }
    }

    /// Deterministic location of the `(stage, index)` artifact.
    pub fn path_for(&self, stage: CacheStage, index: u64) -> PathBuf {
        self.stage_directory(stage)
            .join(format!("{}{index}.png", stage.file_prefix()))
    }

    /// Whether the `(stage, index)` artifact exists.
    pub fn contains(&self, stage: CacheStage, index: u64) -> bool {
        self.path_for(stage, index).is_file()
    }

    /// Read the `(stage, index)` artifact, or `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CacheIo`] if the file exists but cannot be read.
    pub fn read(&self, stage: CacheStage, index: u64) -> Result<Option<Vec<u8>>, RenderError> {
        let path = self.path_for(stage, index);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(cache_io(&path, error)),
        }
    }

    /// Persist the `(stage, index)` artifact.
    ///
    /// Returns `Ok(false)` without touching the file if another writer got
    /// there first. Artifacts are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CacheIo`] when the temporary file cannot be
    /// written or renamed.
    pub fn write(&self, stage: CacheStage, index: u64, bytes: &[u8]) -> Result<bool, RenderError> {
        let path = self.path_for(stage, index);
        if path.exists() {
            return Ok(false);
        }

        let temporary = temporary_sibling(&path);
        if let Err(error) = fs::write(&temporary, bytes) {
            let _ = fs::remove_file(&temporary);
            return Err(cache_io(&temporary, error));
        }
        if let Err(error) = fs::rename(&temporary, &path) {
            let _ = fs::remove_file(&temporary);
            return Err(cache_io(&path, error));
        }
        Ok(true)
    }

    /// Sorted indices with a completed artifact for `stage`. A stage
    /// directory that does not exist yet holds nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CacheIo`] if the stage directory cannot be listed.
    pub fn cached_indices(&self, stage: CacheStage) -> Result<Vec<u64>, RenderError> {
        let directory = self.stage_directory(stage);
        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(cache_io(&directory, error)),
        };

        let mut indices: Vec<u64> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                name.to_str()?
                    .strip_prefix(stage.file_prefix())?
                    .strip_suffix(".png")?
                    .parse()
                    .ok()
            })
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    /// Remove the cache directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::CacheIo`] if removal fails.
    pub fn clear(self) -> Result<(), RenderError> {
        log::debug!("Clearing frame cache at {:?}", self.root);
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(cache_io(&self.root, error)),
        }
    }
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let thread = format!("{:?}", std::thread::current().id());
    let thread: String = thread.chars().filter(char::is_ascii_digit).collect();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}-{thread}.tmp", std::process::id()))
}

fn cache_io(path: &Path, error: std::io::Error) -> RenderError {
    RenderError::CacheIo {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in CacheStage::ALL {
            assert_eq!(stage.as_str().parse::<CacheStage>().unwrap(), stage);
        }
        assert_eq!("ENCODE".parse::<CacheStage>().unwrap(), CacheStage::Encode);
    }

    #[test]
    fn unknown_stage_is_a_typed_error() {
        match "resize".parse::<CacheStage>() {
            Err(RenderError::UnknownStage(name)) => assert_eq!(name, "resize"),
            other => panic!("Expected UnknownStage, got: {other:?}"),
        }
    }

    #[test]
    fn file_layout() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).expect("Failed to open cache");

        assert_eq!(
            cache.path_for(CacheStage::Extract, 7),
            directory.path().join("frame-7.png")
        );
        assert_eq!(
            cache.path_for(CacheStage::Encode, 7),
            directory.path().join("encoded").join("encoded-7.png")
        );
    }

    #[test]
    fn write_once_then_read() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).expect("Failed to open cache");

        assert_eq!(cache.read(CacheStage::Extract, 3).unwrap(), None);
        assert!(cache.write(CacheStage::Extract, 3, b"first").unwrap());
        assert!(!cache.write(CacheStage::Extract, 3, b"second").unwrap());
        assert_eq!(
            cache.read(CacheStage::Extract, 3).unwrap().as_deref(),
            Some(&b"first"[..])
        );
        assert!(!cache.contains(CacheStage::Encode, 3));
    }

    #[test]
    fn cached_indices_ignores_other_files() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let cache = FrameCache::open(directory.path()).expect("Failed to open cache");

        for index in [10, 2, 5] {
            cache.write(CacheStage::Extract, index, b"x").unwrap();
        }
        cache.write(CacheStage::Encode, 2, b"x").unwrap();
        fs::write(directory.path().join("notes.txt"), b"").unwrap();
        fs::write(directory.path().join(".frame-4.png.1-1.tmp"), b"").unwrap();

        assert_eq!(cache.cached_indices(CacheStage::Extract).unwrap(), vec![2, 5, 10]);
        assert_eq!(cache.cached_indices(CacheStage::Encode).unwrap(), vec![2]);
    }

    #[test]
    fn clear_removes_directory() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let root = directory.path().join("job");
        let cache = FrameCache::open(&root).expect("Failed to open cache");
        cache.write(CacheStage::Encode, 0, b"x").unwrap();

        cache.clear().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn open_existing_creates_nothing() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(directory.path().join("frame-2.png"), b"x").unwrap();

        let cache = FrameCache::open_existing(directory.path()).expect("Failed to open cache");
        assert_eq!(cache.cached_indices(CacheStage::Extract).unwrap(), vec![2]);
        assert!(cache.cached_indices(CacheStage::Encode).unwrap().is_empty());

        let entries: Vec<_> = std::fs::read_dir(directory.path())
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("frame-2.png")]);
    }

    #[test]
    fn open_existing_rejects_missing_or_file_root() {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let missing = directory.path().join("missing");
        assert!(matches!(
            FrameCache::open_existing(&missing),
            Err(RenderError::CacheIo { .. })
        ));
        assert!(!missing.exists());

        let file = directory.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            FrameCache::open_existing(&file),
            Err(RenderError::CacheIo { .. })
        ));
    }
}
