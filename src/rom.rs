use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::HostResult;

/// Where game ROMs come from, keyed by title. A title that isn't there is
/// `None`, not an error.
pub trait ProgramSource {
    fn fetch(&self, title: &str) -> HostResult<Option<Vec<u8>>>;
}

/// titles are plain file names; anything that could walk out of the store is
/// treated as absent
fn is_plain_title(title: &str) -> bool {
    !title.is_empty()
        && title != "."
        && title != ".."
        && !title.contains(['/', '\\'])
        && !title.contains('\0')
}

/// one file per title in a directory
pub struct RomDirectory {
    root: PathBuf,
}

impl RomDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RomDirectory { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// every title in the directory, sorted
    pub fn titles(&self) -> HostResult<Vec<String>> {
        let mut titles = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    titles.push(name.to_string());
                }
            }
        }
        titles.sort();
        Ok(titles)
    }
}

impl ProgramSource for RomDirectory {
    fn fetch(&self, title: &str) -> HostResult<Option<Vec<u8>>> {
        if !is_plain_title(title) {
            debug!(title, "refusing non-plain rom title");
            return Ok(None);
        }
        match fs::read(self.root.join(title)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// titles held in memory
#[derive(Default)]
pub struct RomTable {
    roms: HashMap<String, Vec<u8>>,
}

impl RomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, title: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.roms.insert(title.into(), bytes.into());
    }

    /// copy every ROM in a directory into the table
    pub fn seed_from(&mut self, dir: &RomDirectory) -> HostResult<usize> {
        let titles = dir.titles()?;
        for title in &titles {
            if let Some(bytes) = dir.fetch(title)? {
                debug!(title = title.as_str(), len = bytes.len(), "seeded rom");
                self.put(title.clone(), bytes);
            }
        }
        Ok(titles.len())
    }
}

impl ProgramSource for RomTable {
    fn fetch(&self, title: &str) -> HostResult<Option<Vec<u8>>> {
        Ok(self.roms.get(title).cloned())
    }
}
