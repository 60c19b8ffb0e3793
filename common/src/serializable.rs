use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

/// JSON persistence for pipeline documents.
///
/// Writes go through a sibling temporary file and a rename, so a reader never observes a
/// half-written document and an interrupted run never leaves one behind to be mistaken
/// for a finished artifact. A write whose bytes equal the existing file is skipped, which
/// keeps reruns byte-identical and leaves modification times alone.
pub trait Serializable {
    /// Returns `true` if the file was (re)written.
    fn serialize_to_file(&self, path: &Path) -> Result<bool, std::io::Error>;
    fn deserialize_from_file(path: &Path) -> Result<Self, std::io::Error>
    where
        Self: Sized;
}

impl<T> Serializable for T
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn serialize_to_file(&self, path: &Path) -> Result<bool, std::io::Error> {
        let mut serialized = serde_json::to_string_pretty(self)?;
        serialized.push('\n');
        write_if_changed(path, serialized.as_bytes())
    }

    fn deserialize_from_file(path: &Path) -> Result<Self, std::io::Error>
    where
        Self: Sized,
    {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let value: T = serde_json::from_str(&contents)?;
        Ok(value)
    }
}

/// Atomically replaces `path` with `bytes` unless it already holds exactly those bytes.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<bool, std::io::Error> {
    if let Ok(existing) = fs::read(path) {
        if existing == bytes {
            return Ok(false);
        }
    }
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);
    {
        let mut file = File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)?;
    Ok(true)
}
