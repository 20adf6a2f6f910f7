use std::collections::BTreeMap;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use mcs_archive::check::{check_year, summarize_year};
use mcs_archive::container::Array;
use mcs_archive::error::ArchiveError;
use mcs_archive::keys;
use mcs_archive::store::Archive;
use mcs_archive::table::{Column, MetadataStore, MetadataTable};
use mcs_archive::variables::{LEVELS, ROWIDINT, VariableKind};

const PROFILES: [i64; 2] = [2009061512_0000, 2009061512_0001];

fn temp_archive() -> (tempfile::TempDir, Archive) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("mcs")).unwrap();
    (temp, Archive::new(root))
}

fn store_profiles(archive: &Archive, profiles: &[i64]) {
    let ids = profiles
        .iter()
        .map(|key| keys::decode_profile_key(*key).unwrap())
        .collect();
    let mut columns = BTreeMap::new();
    columns.insert(
        "lat".to_string(),
        Column::Float(profiles.iter().map(|_| 10.0).collect()),
    );
    let table = MetadataTable::from_parts(ids, profiles.to_vec(), columns).unwrap();
    MetadataStore::new(archive.clone()).save(&table).unwrap();
}

fn store_rows(archive: &Archive, rows: Vec<i64>) {
    let temperature = vec![180.0; rows.len()];
    archive
        .variable(2009, ROWIDINT, VariableKind::Profile)
        .overwrite(&Array::Int(rows))
        .unwrap();
    archive
        .variable(2009, "temperature", VariableKind::Profile)
        .overwrite(&Array::Float(temperature))
        .unwrap();
}

fn rows_for(profiles: &[i64]) -> Vec<i64> {
    profiles
        .iter()
        .flat_map(|p| (0..LEVELS as u32).map(move |level| keys::row_key(*p, level)))
        .collect()
}

#[test]
fn never_written_year_is_empty_and_consistent() {
    let (_temp, archive) = temp_archive();
    let report = check_year(&archive, 2009).unwrap();
    assert_eq!((report.profile_count, report.row_count), (0, 0));
}

#[test]
fn consistent_year_passes() {
    let (_temp, archive) = temp_archive();
    store_profiles(&archive, &PROFILES);
    store_rows(&archive, rows_for(&PROFILES));
    let report = check_year(&archive, 2009).unwrap();
    assert_eq!(report.profile_count, 2);
    assert_eq!(report.row_count, 2 * LEVELS);

    let summary = summarize_year(&archive, 2009).unwrap();
    assert_eq!(summary.first_profile.as_deref(), Some("2009061512_DDR.TAB:0"));
    assert_eq!(summary.profile_variables, vec!["rowidint", "temperature"]);
}

#[test]
fn missing_level_rows_are_a_shape_mismatch() {
    let (_temp, archive) = temp_archive();
    store_profiles(&archive, &PROFILES);
    store_rows(&archive, rows_for(&PROFILES[..1]));
    assert_matches!(
        check_year(&archive, 2009),
        Err(ArchiveError::ShapeMismatch { year: 2009, .. })
    );
}

#[test]
fn short_profile_variable_is_a_shape_mismatch() {
    let (_temp, archive) = temp_archive();
    store_profiles(&archive, &PROFILES);
    store_rows(&archive, rows_for(&PROFILES));
    archive
        .variable(2009, "dust", VariableKind::Profile)
        .overwrite(&Array::Float(vec![0.0; LEVELS]))
        .unwrap();
    assert_matches!(
        check_year(&archive, 2009),
        Err(ArchiveError::ShapeMismatch { .. })
    );
}

#[test]
fn rows_of_another_profile_are_a_key_mismatch() {
    let (_temp, archive) = temp_archive();
    store_profiles(&archive, &PROFILES);
    store_rows(&archive, rows_for(&[PROFILES[0], 2009061512_0007]));
    assert_matches!(
        check_year(&archive, 2009),
        Err(ArchiveError::KeyMismatch {
            profile_key: 2009061512_0001,
            row_key: 2009061512_0007_000,
            ..
        })
    );
}

#[test]
fn repeated_rows_are_duplicates() {
    let (_temp, archive) = temp_archive();
    store_profiles(&archive, &PROFILES);
    let mut rows = rows_for(&PROFILES);
    rows[1] = rows[0];
    store_rows(&archive, rows);
    assert_matches!(
        check_year(&archive, 2009),
        Err(ArchiveError::DuplicateKey { series: "rowidint", .. })
    );
}

#[test]
fn unsorted_profiles_are_reported_with_both_keys() {
    let (_temp, archive) = temp_archive();
    let reversed = [PROFILES[1], PROFILES[0]];
    store_profiles(&archive, &reversed);
    store_rows(&archive, rows_for(&reversed));
    assert_matches!(
        check_year(&archive, 2009),
        Err(ArchiveError::NotSorted {
            series: "profidint",
            previous: 2009061512_0001,
            next: 2009061512_0000,
            ..
        })
    );
}
