//! Expected payload layout for a package.

use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::package::{MediaType, Package, RefId};

/// File names a package of `media` with `master_count` preservation masters
/// must carry in `data/`.
pub fn expected_files(refid: &RefId, media: MediaType, master_count: usize) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    match media {
        MediaType::Audio => {
            names.insert(format!("{refid}_a.mp3"));
            if master_count > 1 {
                for n in 1..=master_count {
                    names.insert(format!("{refid}_ma_{n:02}.wav"));
                }
            } else {
                names.insert(format!("{refid}_ma.wav"));
            }
        }
        MediaType::Video => {
            names.insert(format!("{refid}_ma.mkv"));
            names.insert(format!("{refid}_me.mov"));
            names.insert(format!("{refid}_a.mp4"));
        }
    }
    names
}

/// Check the payload file set against the expected layout.
///
/// An empty payload never matches.
pub fn check_structure(package: &Package) -> Result<(), ValidationError> {
    let actual: BTreeSet<String> = package.payload_names().into_iter().collect();
    let master_ext = package.media_type.master_format().extension();
    let master_count = actual
        .iter()
        .filter(|name| {
            name.rsplit_once('.')
                .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(master_ext))
        })
        .count();

    let expected = expected_files(&package.refid, package.media_type, master_count);
    if actual.is_empty() || actual != expected {
        return Err(ValidationError::AssetStructure {
            expected: expected.into_iter().collect(),
            actual: actual.into_iter().collect(),
        });
    }
    Ok(())
}
