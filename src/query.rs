//! Row masks over a loaded [`MetadataTable`], combined with
//! [`MetadataTable::select`].

use crate::error::ArchiveError;
use crate::keys;
use crate::marsdate::ls2;
use crate::table::MetadataTable;
use crate::variables::MARS_YEAR;

pub type Mask = Vec<bool>;

/// Applies `pred` to every value of a numeric column. NaN values go through
/// `pred` unchanged, so comparisons against them are false.
pub fn column_mask(
    table: &MetadataTable,
    name: &str,
    pred: impl Fn(f64) -> bool,
) -> Result<Mask, ArchiveError> {
    let column = table.column(name).ok_or_else(|| ArchiveError::NotFound {
        year: table_year(table),
        what: format!("metadata column {name}"),
    })?;
    Ok((0..table.len())
        .map(|i| column.value_f64(i).is_some_and(&pred))
        .collect())
}

/// `min < lat < max`.
pub fn lat_range(table: &MetadataTable, min: f64, max: f64) -> Result<Mask, ArchiveError> {
    column_mask(table, "lat", |lat| lat > min && lat < max)
}

/// `min < lon < max`; when `min > max` the window wraps across ±180.
pub fn lon_range(table: &MetadataTable, min: f64, max: f64) -> Result<Mask, ArchiveError> {
    if min <= max {
        column_mask(table, "lon", |lon| lon > min && lon < max)
    } else {
        column_mask(table, "lon", |lon| lon > min || lon < max)
    }
}

pub fn region(
    table: &MetadataTable,
    (min_lat, max_lat): (f64, f64),
    (min_lon, max_lon): (f64, f64),
) -> Result<Mask, ArchiveError> {
    and(
        &lat_range(table, min_lat, max_lat)?,
        &lon_range(table, min_lon, max_lon)?,
    )
}

pub fn day_side(table: &MetadataTable) -> Result<Mask, ArchiveError> {
    column_mask(table, "solar_zen", |zen| zen < 90.0)
}

pub fn night_side(table: &MetadataTable) -> Result<Mask, ArchiveError> {
    column_mask(table, "LST", |lst| lst <= 0.4)
}

/// `start < Ls < start + width`, on the instrument's Ls column.
pub fn ls_window(table: &MetadataTable, start: f64, width: f64) -> Result<Mask, ArchiveError> {
    column_mask(table, "Ls", |ls| ls > start && ls < start + width)
}

pub fn mars_year(table: &MetadataTable, year: f64) -> Result<Mask, ArchiveError> {
    column_mask(table, MARS_YEAR, |my| my == year)
}

/// Same Ls window as [`ls_window`] but pinned to one Mars Year, using the
/// continuous `Ls2` axis.
pub fn seasonal_window(
    table: &MetadataTable,
    year: f64,
    start: f64,
    end: f64,
) -> Result<Mask, ArchiveError> {
    let ls = table.float("Ls");
    let my = table.float(MARS_YEAR);
    let (Some(ls), Some(my)) = (ls, my) else {
        return Err(ArchiveError::NotFound {
            year: table_year(table),
            what: "metadata columns Ls and MY".to_string(),
        });
    };
    let lo = ls2(start, year);
    let hi = ls2(end, year);
    Ok(ls
        .iter()
        .zip(my)
        .map(|(ls, my)| {
            let value = ls2(*ls, *my);
            value > lo && value < hi
        })
        .collect())
}

fn table_year(table: &MetadataTable) -> i32 {
    table
        .keys()
        .first()
        .map(|k| keys::year_of_profile(*k))
        .unwrap_or(0)
}

/// Element-wise conjunction of two masks over the same table.
pub fn and(left: &[bool], right: &[bool]) -> Result<Mask, ArchiveError> {
    if left.len() != right.len() {
        return Err(ArchiveError::LengthMismatch {
            what: "masks",
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(left.iter().zip(right).map(|(a, b)| *a && *b).collect())
}
