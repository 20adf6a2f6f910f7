use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use mcs_archive::container::{Array, StoreFormat};
use mcs_archive::error::ArchiveError;
use mcs_archive::store::Archive;
use mcs_archive::variables::{LEVELS, PRESSURE, VariableKind, pressure_grid};

fn temp_archive() -> (tempfile::TempDir, Archive) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("mcs")).unwrap();
    (temp, Archive::new(root))
}

#[test]
fn layout_paths() {
    let archive = Archive::new(Utf8PathBuf::from("/srv/mcs"));
    assert_eq!(
        archive.metadata_container_path(2007),
        Utf8PathBuf::from("/srv/mcs/DATA/2007/indexdata/2007_mixvars.bin.gz")
    );
    assert_eq!(
        archive.metadata_ids_path(2007),
        Utf8PathBuf::from("/srv/mcs/DATA/2007/indexdata/2007_profids.csv.gz")
    );
    assert_eq!(
        archive.variable_path(2007, "dust", VariableKind::Profile),
        Utf8PathBuf::from("/srv/mcs/DATA/2007/profdata/2007_dust_profiles.bin.gz")
    );
    assert_eq!(
        archive.lock_path(2007),
        Utf8PathBuf::from("/srv/mcs/DATA/2007/.lock")
    );
}

#[test]
fn writes_leave_no_temporary_files() {
    let (_temp, archive) = temp_archive();
    let store = archive.variable(2008, "temperature", VariableKind::Profile);
    store.append(&Array::Float(vec![200.0; LEVELS])).unwrap();
    store.append(&Array::Float(vec![210.0; LEVELS])).unwrap();

    let dir = archive.year_dir(2008).join("profdata");
    let names: Vec<String> = fs::read_dir(dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["2008_temperature_profiles.bin.gz"]);
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn foreign_files_are_unsupported() {
    let (_temp, archive) = temp_archive();
    let store = archive.variable(2008, "lat", VariableKind::Metadata);
    fs::create_dir_all(store.path().parent().unwrap().as_std_path()).unwrap();
    fs::write(store.path().as_std_path(), b"not a container").unwrap();
    assert_matches!(store.read(), Err(ArchiveError::UnsupportedFormat { .. }));
    assert_eq!(StoreFormat::from_tag(StoreFormat::CURRENT.tag()), Some(StoreFormat::V1));
}

#[test]
fn pressure_is_never_stored() {
    let (_temp, archive) = temp_archive();
    let store = archive.variable(2008, PRESSURE, VariableKind::Profile);
    assert!(store.exists());
    assert_eq!(store.read().unwrap().values, Array::Float(pressure_grid()));
    assert_matches!(
        store.overwrite(&Array::Float(vec![1.0; LEVELS])),
        Err(ArchiveError::SchemaMismatch { .. })
    );
}

#[test]
fn metadata_width_mismatch_is_detected() {
    let (_temp, archive) = temp_archive();
    archive
        .variable(2008, "temperature", VariableKind::Profile)
        .overwrite(&Array::Float(vec![1.0; LEVELS]))
        .unwrap();
    let profile_path = archive.variable_path(2008, "temperature", VariableKind::Profile);
    let metadata_path = archive.variable_path(2008, "temperature", VariableKind::Metadata);
    fs::create_dir_all(metadata_path.parent().unwrap().as_std_path()).unwrap();
    fs::copy(profile_path.as_std_path(), metadata_path.as_std_path()).unwrap();
    assert_matches!(
        archive.variable(2008, "temperature", VariableKind::Metadata).read(),
        Err(ArchiveError::ShapeMismatch { .. })
    );
}
