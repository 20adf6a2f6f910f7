//! Read-only verification of one year of the archive.

use serde::Serialize;
use tracing::info;

use crate::error::ArchiveError;
use crate::keys;
use crate::store::Archive;
use crate::table::MetadataStore;
use crate::variables::{LEVELS, PROFIDINT, ROWIDINT, VariableKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub year: i32,
    pub profile_count: usize,
    pub row_count: usize,
}

/// What is stored for one year, for display.
#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub profile_count: usize,
    pub first_profile: Option<String>,
    pub last_profile: Option<String>,
    pub metadata_columns: Vec<String>,
    pub profile_variables: Vec<String>,
}

pub fn summarize_year(archive: &Archive, year: i32) -> Result<YearSummary, ArchiveError> {
    let table = MetadataStore::new(archive.clone()).load_or_empty(year)?;
    Ok(YearSummary {
        year,
        profile_count: table.len(),
        first_profile: table.ids().first().cloned(),
        last_profile: table.ids().last().cloned(),
        metadata_columns: table.column_names().map(str::to_string).collect(),
        profile_variables: archive.profile_variables(year)?,
    })
}

/// Verifies the year's global invariants and stops at the first violation.
/// A year with nothing stored passes with zero counts.
pub fn check_year(archive: &Archive, year: i32) -> Result<CheckReport, ArchiveError> {
    let table = MetadataStore::new(archive.clone()).load_or_empty(year)?;
    let profiles = table.keys();
    let rows = match archive
        .variable(year, ROWIDINT, VariableKind::Profile)
        .read_or_empty()?
    {
        Some(data) => data
            .values
            .as_int()
            .map(<[i64]>::to_vec)
            .ok_or_else(|| ArchiveError::SchemaMismatch {
                year,
                detail: format!("{ROWIDINT} is not stored as integers"),
            })?,
        None => Vec::new(),
    };

    check_shape(archive, year, profiles.len(), rows.len())?;
    check_ownership(year, profiles, &rows)?;
    table.verify_ids()?;
    check_strictly_increasing(year, PROFIDINT, profiles)?;
    check_strictly_increasing(year, ROWIDINT, &rows)?;

    info!(year, profiles = profiles.len(), rows = rows.len(), "year is consistent");
    Ok(CheckReport {
        year,
        profile_count: profiles.len(),
        row_count: rows.len(),
    })
}

fn check_shape(
    archive: &Archive,
    year: i32,
    profile_count: usize,
    row_count: usize,
) -> Result<(), ArchiveError> {
    if row_count != LEVELS * profile_count {
        return Err(ArchiveError::ShapeMismatch {
            year,
            detail: format!(
                "{row_count} level rows for {profile_count} profiles, expected {}",
                LEVELS * profile_count
            ),
        });
    }
    for name in archive.profile_variables(year)? {
        let len = archive
            .variable(year, &name, VariableKind::Profile)
            .read()?
            .values
            .len();
        if len != row_count {
            return Err(ArchiveError::ShapeMismatch {
                year,
                detail: format!("profile variable {name} has {len} rows, {ROWIDINT} has {row_count}"),
            });
        }
    }
    Ok(())
}

/// Row `i` belongs to profile `i / 105`.
fn check_ownership(year: i32, profiles: &[i64], rows: &[i64]) -> Result<(), ArchiveError> {
    for (index, &row) in rows.iter().enumerate() {
        let profile = profiles[index / LEVELS];
        if keys::profile_of_row(row) != profile {
            return Err(ArchiveError::KeyMismatch {
                year,
                profile_key: profile,
                row_key: row,
            });
        }
    }
    Ok(())
}

fn check_strictly_increasing(
    year: i32,
    series: &'static str,
    values: &[i64],
) -> Result<(), ArchiveError> {
    for pair in values.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if previous == next {
            return Err(ArchiveError::DuplicateKey {
                year,
                series,
                key: next,
            });
        }
        if previous > next {
            return Err(ArchiveError::NotSorted {
                year,
                series,
                previous,
                next,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn strictly_increasing_reports_first_violation() {
        assert!(check_strictly_increasing(2007, PROFIDINT, &[1, 2, 3]).is_ok());
        assert_matches!(
            check_strictly_increasing(2007, PROFIDINT, &[1, 3, 3, 2]),
            Err(ArchiveError::DuplicateKey { key: 3, .. })
        );
        assert_matches!(
            check_strictly_increasing(2007, ROWIDINT, &[1, 3, 2]),
            Err(ArchiveError::NotSorted { previous: 3, next: 2, series: "rowidint", .. })
        );
    }

    #[test]
    fn ownership_follows_level_blocks() {
        let profiles = [2007030106_0000, 2007030106_0001];
        let rows: Vec<i64> = profiles
            .iter()
            .flat_map(|p| (0..LEVELS as u32).map(move |level| keys::row_key(*p, level)))
            .collect();
        assert!(check_ownership(2007, &profiles, &rows).is_ok());

        let mut swapped = rows.clone();
        swapped.swap(0, LEVELS);
        assert_matches!(
            check_ownership(2007, &profiles, &swapped),
            Err(ArchiveError::KeyMismatch { profile_key: 2007030106_0000, .. })
        );
    }
}
