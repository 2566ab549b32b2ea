//! Format policy resolution.
//!
//! Maps (media type, file role) to the conformance policy a payload file is
//! checked against. The table is fixed; only the directory holding the policy
//! files is configurable.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::package::{FileFormat, FileRole, MediaType, Package, PayloadFile};

/// Policy file name, e.g. `RAC_Audio_A_MP3.xml`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Policy and expected format for a (media, role) pair, if one exists.
pub fn policy_for(media: MediaType, role: FileRole) -> Option<(PolicyId, FileFormat)> {
    let (name, format) = match (media, role) {
        (MediaType::Audio, FileRole::Access) => ("RAC_Audio_A_MP3.xml", FileFormat::Mp3),
        (MediaType::Audio, FileRole::PreservationMaster) => {
            ("RAC_Audio_MA_WAV.xml", FileFormat::Wav)
        }
        (MediaType::Video, FileRole::Access) => ("RAC_Video_A_MP4.xml", FileFormat::Mp4),
        (MediaType::Video, FileRole::PreservationMaster) => {
            ("RAC_Video_MA_FFV1MKV.xml", FileFormat::Mkv)
        }
        (MediaType::Video, FileRole::Mezzanine) => ("RAC_Video_MEZZ_ProRes.xml", FileFormat::Mov),
        (MediaType::Audio, FileRole::Mezzanine) => return None,
    };
    Some((PolicyId::new(name), format))
}

#[derive(Debug, Clone)]
pub struct PolicyResolver {
    policy_dir: PathBuf,
}

impl PolicyResolver {
    pub fn new(policy_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy_dir: policy_dir.into(),
        }
    }

    /// Location of a policy file on disk.
    pub fn policy_path(&self, policy: &PolicyId) -> PathBuf {
        self.policy_dir.join(policy.as_str())
    }

    /// Classify one payload file and attach its policy.
    ///
    /// `path` is relative to the package root.
    pub fn resolve_file(
        &self,
        media: MediaType,
        path: &Path,
    ) -> Result<PayloadFile, ValidationError> {
        let display = path.to_string_lossy().into_owned();
        let unsupported = |reason: String| ValidationError::UnsupportedFormat {
            file: display.clone(),
            reason,
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| unsupported("path has no file name".to_string()))?;
        let role = FileRole::from_file_name(&name)
            .ok_or_else(|| unsupported("unrecognised role suffix".to_string()))?;
        let format = FileFormat::from_path(path)
            .ok_or_else(|| unsupported("unrecognised file extension".to_string()))?;
        let (policy, expected) = policy_for(media, role)
            .ok_or_else(|| unsupported(format!("no policy for {media} {role} files")))?;

        if format != expected {
            return Err(unsupported(format!(
                "{media} {role} files must be {expected}, found {format}"
            )));
        }

        Ok(PayloadFile {
            path: path.to_path_buf(),
            role,
            format,
            policy,
        })
    }

    /// Resolve every payload file, failing on the first unsupported one.
    pub fn resolve_package(&self, package: &Package) -> Result<Vec<PayloadFile>, ValidationError> {
        package
            .payload
            .iter()
            .map(|p| self.resolve_file(package.media_type, p))
            .collect()
    }
}
