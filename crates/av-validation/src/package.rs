//! Package identity and payload classification.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::ValidationError;
use crate::policy::PolicyId;

/// Kind of digitized material a package carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }

    /// Format of the preservation master files for this media type.
    pub fn master_format(&self) -> FileFormat {
        match self {
            MediaType::Audio => FileFormat::Wav,
            MediaType::Video => FileFormat::Mkv,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            other => Err(ConfigError::UnknownMediaType(other.to_string())),
        }
    }
}

/// Archival object reference id: exactly 32 ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct RefId(String);

impl RefId {
    /// Package identifier as written in a source key: the file-name stem
    /// before the first `.` (`<refid>.tar.gz` -> `<refid>`). Not validated.
    pub fn stem_of(source_key: &str) -> &str {
        let name = source_key.rsplit('/').next().unwrap_or(source_key);
        name.split('.').next().unwrap_or(name)
    }

    /// Derive and validate the refid for a source object key.
    pub fn from_source_key(source_key: &str) -> Result<Self, ValidationError> {
        Self::try_from(Self::stem_of(source_key).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::RefId { refid: s });
        }
        Ok(RefId(s))
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a payload file plays in the package, read from its name suffix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    /// `<refid>_a.<ext>`
    Access,
    /// `<refid>_ma.<ext>` or `<refid>_ma_NN.<ext>`
    PreservationMaster,
    /// `<refid>_me.<ext>`
    Mezzanine,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Access => "access",
            FileRole::PreservationMaster => "preservation_master",
            FileRole::Mezzanine => "mezzanine",
        }
    }

    /// Infer the role from a file name such as `abc_ma_02.wav`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
        let mut parts = stem.split('_');
        parts.next()?;
        let suffix: Vec<&str> = parts.collect();
        match suffix.as_slice() {
            ["a"] => Some(FileRole::Access),
            ["ma"] => Some(FileRole::PreservationMaster),
            ["ma", n] if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
                Some(FileRole::PreservationMaster)
            }
            ["me"] => Some(FileRole::Mezzanine),
            _ => None,
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container/codec family inferred from the file extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Mp3,
    Wav,
    Mp4,
    Mkv,
    Mov,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Mp3 => "mp3",
            FileFormat::Wav => "wav",
            FileFormat::Mp4 => "mp4",
            FileFormat::Mkv => "mkv",
            FileFormat::Mov => "mov",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(FileFormat::Mp3),
            "wav" => Some(FileFormat::Wav),
            "mp4" => Some(FileFormat::Mp4),
            "mkv" => Some(FileFormat::Mkv),
            "mov" => Some(FileFormat::Mov),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A payload file with its resolved conformance policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadFile {
    /// Path relative to the package root (`data/<name>`).
    pub path: PathBuf,
    pub role: FileRole,
    pub format: FileFormat,
    pub policy: PolicyId,
}

impl PayloadFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An extracted bag awaiting validation.
///
/// Lives for one pipeline run; `root` sits inside the run's scratch space and
/// disappears with it.
#[derive(Debug, Clone)]
pub struct Package {
    pub refid: RefId,
    pub media_type: MediaType,
    /// Extracted bag root (`<scratch>/<refid>`).
    pub root: PathBuf,
    /// Payload paths relative to `root`, sorted.
    pub payload: Vec<PathBuf>,
}

impl Package {
    /// Payload file names with the leading `data/` stripped.
    pub fn payload_names(&self) -> Vec<String> {
        self.payload
            .iter()
            .map(|p| {
                p.strip_prefix("data")
                    .unwrap_or(p.as_path())
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }
}
