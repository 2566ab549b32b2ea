//! BagIt integrity verification.
//!
//! Recomputes payload digests for every supported payload manifest
//! (`manifest-sha256.txt`, `manifest-sha512.txt`) and compares them with the
//! declared values, checks tag manifests, and checks `Payload-Oxum` when the
//! bag declares one. The check only reads the bag and never aborts early: it
//! returns every problem found, sorted by path.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

/// Checksum algorithms accepted for manifests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub const SUPPORTED: [DigestAlgorithm; 2] = [DigestAlgorithm::Sha256, DigestAlgorithm::Sha512];

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn manifest_name(&self) -> String {
        format!("manifest-{}.txt", self.name())
    }

    pub fn tag_manifest_name(&self) -> String {
        format!("tagmanifest-{}.txt", self.name())
    }

    /// Hex digest of a file's contents, streamed in 64 KiB chunks.
    pub fn hash_file(&self, path: &Path) -> io::Result<String> {
        match self {
            DigestAlgorithm::Sha256 => hash_with::<Sha256>(path),
            DigestAlgorithm::Sha512 => hash_with::<Sha512>(path),
        }
    }
}

fn hash_with<D: Digest>(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A single integrity violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum BagProblem {
    /// A required tag file (`bagit.txt`) is absent.
    MissingTagFile { path: String },
    /// No `manifest-sha256.txt` or `manifest-sha512.txt` present.
    NoSupportedManifest,
    MalformedManifestLine { manifest: String, line: usize },
    /// Manifest entry pointing outside the bag or outside `data/`.
    UnsafeManifestPath { manifest: String, path: String },
    ChecksumMismatch {
        path: String,
        algorithm: DigestAlgorithm,
        expected: String,
        actual: String,
    },
    /// Listed in a manifest but not present on disk.
    MissingFile { path: String, manifest: String },
    /// Present in the payload but not listed in a manifest.
    UnlistedFile { path: String, manifest: String },
    Unreadable { path: String, reason: String },
    OxumMismatch { declared: String, actual: String },
}

impl BagProblem {
    fn sort_key(&self) -> (&str, String) {
        let path = match self {
            BagProblem::MissingTagFile { path }
            | BagProblem::UnsafeManifestPath { path, .. }
            | BagProblem::ChecksumMismatch { path, .. }
            | BagProblem::MissingFile { path, .. }
            | BagProblem::UnlistedFile { path, .. }
            | BagProblem::Unreadable { path, .. } => path.as_str(),
            BagProblem::MalformedManifestLine { manifest, .. } => manifest.as_str(),
            BagProblem::NoSupportedManifest | BagProblem::OxumMismatch { .. } => "",
        };
        (path, self.to_string())
    }
}

impl fmt::Display for BagProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagProblem::MissingTagFile { path } => write!(f, "{path} is missing"),
            BagProblem::NoSupportedManifest => {
                write!(f, "no sha256 or sha512 payload manifest found")
            }
            BagProblem::MalformedManifestLine { manifest, line } => {
                write!(f, "{manifest} line {line} is malformed")
            }
            BagProblem::UnsafeManifestPath { manifest, path } => {
                write!(f, "{manifest} lists unsafe path {path}")
            }
            BagProblem::ChecksumMismatch {
                path,
                algorithm,
                expected,
                actual,
            } => write!(
                f,
                "{path} {} checksum mismatch: expected {expected}, found {actual}",
                algorithm.name()
            ),
            BagProblem::MissingFile { path, manifest } => {
                write!(f, "{path} is listed in {manifest} but missing")
            }
            BagProblem::UnlistedFile { path, manifest } => {
                write!(f, "{path} is present but not listed in {manifest}")
            }
            BagProblem::Unreadable { path, reason } => write!(f, "{path} is unreadable: {reason}"),
            BagProblem::OxumMismatch { declared, actual } => {
                write!(f, "Payload-Oxum declared {declared} but payload is {actual}")
            }
        }
    }
}

/// Outcome of verifying one bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagReport {
    pub valid: bool,
    pub algorithms: Vec<DigestAlgorithm>,
    pub payload_files: usize,
    pub problems: Vec<BagProblem>,
}

/// Verify the bag rooted at `root`.
pub fn verify_bag(root: &Path) -> BagReport {
    let mut problems = Vec::new();

    if !root.join("bagit.txt").is_file() {
        problems.push(BagProblem::MissingTagFile {
            path: "bagit.txt".to_string(),
        });
    }

    let payload = match list_payload(root) {
        Ok(files) => files,
        Err(e) => {
            problems.push(BagProblem::Unreadable {
                path: "data".to_string(),
                reason: e.to_string(),
            });
            BTreeMap::new()
        }
    };

    let mut algorithms = Vec::new();
    for algorithm in DigestAlgorithm::SUPPORTED {
        let manifest = algorithm.manifest_name();
        let manifest_path = root.join(&manifest);
        if !manifest_path.is_file() {
            continue;
        }
        algorithms.push(algorithm);

        let entries = match read_manifest(&manifest_path, &manifest, true, &mut problems) {
            Ok(entries) => entries,
            Err(e) => {
                problems.push(BagProblem::Unreadable {
                    path: manifest.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for (path, expected) in &entries {
            if !payload.contains_key(path) {
                problems.push(BagProblem::MissingFile {
                    path: path.clone(),
                    manifest: manifest.clone(),
                });
                continue;
            }
            compare_digest(root, path, algorithm, expected, &mut problems);
        }

        for path in payload.keys() {
            if !entries.contains_key(path) {
                problems.push(BagProblem::UnlistedFile {
                    path: path.clone(),
                    manifest: manifest.clone(),
                });
            }
        }

        let tag_manifest = algorithm.tag_manifest_name();
        let tag_manifest_path = root.join(&tag_manifest);
        if tag_manifest_path.is_file() {
            match read_manifest(&tag_manifest_path, &tag_manifest, false, &mut problems) {
                Ok(tag_entries) => {
                    for (path, expected) in &tag_entries {
                        if !root.join(path).is_file() {
                            problems.push(BagProblem::MissingFile {
                                path: path.clone(),
                                manifest: tag_manifest.clone(),
                            });
                            continue;
                        }
                        compare_digest(root, path, algorithm, expected, &mut problems);
                    }
                }
                Err(e) => problems.push(BagProblem::Unreadable {
                    path: tag_manifest.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    if algorithms.is_empty() {
        problems.push(BagProblem::NoSupportedManifest);
    }

    if let Some(declared) = read_payload_oxum(root) {
        let octets: u64 = payload.values().sum();
        let actual = format!("{}.{}", octets, payload.len());
        if declared != actual {
            problems.push(BagProblem::OxumMismatch { declared, actual });
        }
    }

    problems.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    problems.dedup();

    debug!(
        root = %root.display(),
        payload_files = payload.len(),
        problems = problems.len(),
        "bag verified"
    );

    BagReport {
        valid: problems.is_empty(),
        algorithms,
        payload_files: payload.len(),
        problems,
    }
}

fn compare_digest(
    root: &Path,
    path: &str,
    algorithm: DigestAlgorithm,
    expected: &str,
    problems: &mut Vec<BagProblem>,
) {
    match algorithm.hash_file(&root.join(path)) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
        Ok(actual) => problems.push(BagProblem::ChecksumMismatch {
            path: path.to_string(),
            algorithm,
            expected: expected.to_ascii_lowercase(),
            actual,
        }),
        Err(e) => problems.push(BagProblem::Unreadable {
            path: path.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Payload files under `data/`, keyed by bag-relative path (`data/...`), with sizes.
pub fn list_payload(root: &Path) -> io::Result<BTreeMap<String, u64>> {
    let mut files = BTreeMap::new();
    let data = root.join("data");
    if !data.is_dir() {
        return Ok(files);
    }
    walk(&data, "data", &mut files)?;
    Ok(files)
}

fn walk(dir: &Path, prefix: &str, out: &mut BTreeMap<String, u64>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = format!("{prefix}/{name}");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&entry.path(), &rel, out)?;
        } else if file_type.is_file() {
            out.insert(rel, entry.metadata()?.len());
        }
    }
    Ok(())
}

/// Parse `<digest> <path>` lines. Payload manifests must only reference `data/`.
fn read_manifest(
    path: &Path,
    manifest: &str,
    payload: bool,
    problems: &mut Vec<BagProblem>,
) -> io::Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    let mut entries = BTreeMap::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let Some((digest, file)) = line.trim_start().split_once(char::is_whitespace) else {
            problems.push(BagProblem::MalformedManifestLine {
                manifest: manifest.to_string(),
                line: idx + 1,
            });
            continue;
        };
        let file = decode_manifest_path(file.trim_start());
        if digest.is_empty()
            || !digest.chars().all(|c| c.is_ascii_hexdigit())
            || file.is_empty()
        {
            problems.push(BagProblem::MalformedManifestLine {
                manifest: manifest.to_string(),
                line: idx + 1,
            });
            continue;
        }
        if !is_safe_bag_path(&file) || (payload && !file.starts_with("data/")) {
            problems.push(BagProblem::UnsafeManifestPath {
                manifest: manifest.to_string(),
                path: file,
            });
            continue;
        }
        entries.insert(file, digest.to_string());
    }

    Ok(entries)
}

/// Undo BagIt's percent-encoding of CR, LF and `%` in manifest paths.
fn decode_manifest_path(raw: &str) -> String {
    raw.replace("%0D", "\r")
        .replace("%0d", "\r")
        .replace("%0A", "\n")
        .replace("%0a", "\n")
        .replace("%25", "%")
        .replace('\\', "/")
}

fn is_safe_bag_path(path: &str) -> bool {
    !path.starts_with('/')
        && !path.contains('\0')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

fn read_payload_oxum(root: &Path) -> Option<String> {
    let text = fs::read_to_string(root.join("bag-info.txt")).ok()?;
    text.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        label
            .trim()
            .eq_ignore_ascii_case("Payload-Oxum")
            .then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn write_bag(files: &[(&str, &[u8])]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bag");
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(
            root.join("bagit.txt"),
            "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
        )
        .unwrap();
        let mut manifest = String::new();
        let mut octets = 0;
        for (name, data) in files {
            fs::write(root.join("data").join(name), data).unwrap();
            manifest.push_str(&format!("{}  data/{}\n", sha256_hex(data), name));
            octets += data.len();
        }
        fs::write(root.join("manifest-sha256.txt"), manifest).unwrap();
        fs::write(
            root.join("bag-info.txt"),
            format!("Payload-Oxum: {}.{}\n", octets, files.len()),
        )
        .unwrap();
        (dir, root)
    }

    #[test]
    fn valid_bag_passes() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..]), ("a.mp3", &b"access"[..])]);
        let report = verify_bag(&root);
        assert!(report.valid, "problems: {:?}", report.problems);
        assert_eq!(report.algorithms, vec![DigestAlgorithm::Sha256]);
        assert_eq!(report.payload_files, 2);
    }

    #[test]
    fn digest_mismatch_is_reported_with_both_digests() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..])]);
        fs::write(root.join("data/a.wav"), b"tampered").unwrap();
        fs::write(root.join("bag-info.txt"), "").unwrap();

        let report = verify_bag(&root);
        assert!(!report.valid);
        match &report.problems[..] {
            [BagProblem::ChecksumMismatch {
                path,
                expected,
                actual,
                ..
            }] => {
                assert_eq!(path, "data/a.wav");
                assert_eq!(expected, &sha256_hex(b"master"));
                assert_eq!(actual, &sha256_hex(b"tampered"));
            }
            other => panic!("unexpected problems: {other:?}"),
        }
    }

    #[test]
    fn extra_and_missing_files_fail() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..]), ("b.wav", &b"second"[..])]);
        fs::remove_file(root.join("data/b.wav")).unwrap();
        fs::write(root.join("data/c.wav"), b"extra").unwrap();
        fs::write(root.join("bag-info.txt"), "").unwrap();

        let report = verify_bag(&root);
        assert!(!report.valid);
        assert!(report
            .problems
            .contains(&BagProblem::MissingFile {
                path: "data/b.wav".to_string(),
                manifest: "manifest-sha256.txt".to_string(),
            }));
        assert!(report
            .problems
            .contains(&BagProblem::UnlistedFile {
                path: "data/c.wav".to_string(),
                manifest: "manifest-sha256.txt".to_string(),
            }));
    }

    #[test]
    fn missing_manifest_and_declaration() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..])]);
        fs::remove_file(root.join("manifest-sha256.txt")).unwrap();
        fs::remove_file(root.join("bagit.txt")).unwrap();

        let report = verify_bag(&root);
        assert!(report.problems.contains(&BagProblem::NoSupportedManifest));
        assert!(report.problems.contains(&BagProblem::MissingTagFile {
            path: "bagit.txt".to_string()
        }));
    }

    #[test]
    fn traversal_in_manifest_rejected() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..])]);
        let mut manifest = fs::read_to_string(root.join("manifest-sha256.txt")).unwrap();
        manifest.push_str(&format!("{}  data/../../etc/passwd\n", sha256_hex(b"x")));
        fs::write(root.join("manifest-sha256.txt"), manifest).unwrap();

        let report = verify_bag(&root);
        assert!(report
            .problems
            .iter()
            .any(|p| matches!(p, BagProblem::UnsafeManifestPath { .. })));
    }

    #[test]
    fn oxum_mismatch_detected() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..])]);
        fs::write(root.join("bag-info.txt"), "Payload-Oxum: 999.1\n").unwrap();

        let report = verify_bag(&root);
        assert_eq!(
            report.problems,
            vec![BagProblem::OxumMismatch {
                declared: "999.1".to_string(),
                actual: "6.1".to_string(),
            }]
        );
    }

    #[test]
    fn sha512_manifest_supported() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..])]);
        fs::remove_file(root.join("manifest-sha256.txt")).unwrap();
        let digest = hex::encode(Sha512::digest(b"master"));
        fs::write(root.join("manifest-sha512.txt"), format!("{digest} data/a.wav\n")).unwrap();

        let report = verify_bag(&root);
        assert!(report.valid, "problems: {:?}", report.problems);
        assert_eq!(report.algorithms, vec![DigestAlgorithm::Sha512]);
    }

    #[test]
    fn tag_manifest_checked() {
        let (_dir, root) = write_bag(&[("a.wav", &b"master"[..])]);
        fs::write(
            root.join("tagmanifest-sha256.txt"),
            format!("{}  bagit.txt\n", sha256_hex(b"not the real content")),
        )
        .unwrap();

        let report = verify_bag(&root);
        assert!(report.problems.iter().any(|p| matches!(
            p,
            BagProblem::ChecksumMismatch { path, .. } if path == "bagit.txt"
        )));
    }
}
