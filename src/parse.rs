//! Reading DDR `.TAB` products into metadata and profile rows.
//!
//! A product is a comma separated text file: optional `#` comment lines, two
//! header lines, then one 106-line block per retrieval. The first line of a
//! block carries the retrieval's metadata, the other 105 its levels.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;

use camino::Utf8Path;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{ArchiveError, fs_err};
use crate::keys::{self, ProductId, RowKey};
use crate::marsdate::{KeplerCalendar, MarsCalendar};
use crate::table::{Column, MetadataTable};
use crate::variables::{
    COMPUTED_LS, DATETIME, HEADER_COLUMNS, INTEGER_COLUMNS, LEVEL_COLUMNS, LEVELS, MARS_YEAR,
    METADATA_DATA_COLUMNS, PRODID, PROFILE_VARIABLES, fill_to_nan,
};

const BLOCK_LINES: usize = LEVELS + 1;
const HEADER_LINES: usize = 2;
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d-%b-%Y"];
const GQUAL_FIELD: usize = 7;
const GOOD_GQUAL: [f64; 2] = [0.0, 6.0];

/// Level rows of one or more products, keyed by `rowidint`. Every column is a
/// float series aligned with `keys`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileRows {
    keys: Vec<RowKey>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl ProfileRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        keys: Vec<RowKey>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self, ArchiveError> {
        if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != keys.len()) {
            return Err(ArchiveError::ShapeMismatch {
                year: keys
                    .first()
                    .map(|k| keys::year_of_profile(keys::profile_of_row(*k)))
                    .unwrap_or(0),
                detail: format!("level column {name} has {} rows, expected {}", values.len(), keys.len()),
            });
        }
        Ok(Self { keys, columns })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn concat(&mut self, other: &ProfileRows) -> Result<(), ArchiveError> {
        if self.keys.is_empty() && self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if other.keys.is_empty() && other.columns.is_empty() {
            return Ok(());
        }
        let ours: Vec<&String> = self.columns.keys().collect();
        let theirs: Vec<&String> = other.columns.keys().collect();
        if ours != theirs {
            return Err(ArchiveError::SchemaMismatch {
                year: other
                    .keys
                    .first()
                    .map(|k| keys::year_of_profile(keys::profile_of_row(*k)))
                    .unwrap_or(0),
                detail: format!("level columns {ours:?} vs {theirs:?}"),
            });
        }
        for (name, values) in self.columns.iter_mut() {
            values.extend_from_slice(&other.columns[name]);
        }
        self.keys.extend_from_slice(&other.keys);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedProduct {
    pub metadata: MetadataTable,
    pub profiles: ProfileRows,
}

/// Turns a raw product file into table rows.
pub trait ProductParser {
    fn parse(&self, path: &Utf8Path) -> Result<ParsedProduct, ArchiveError>;
}

#[derive(Debug, Clone, Default)]
pub struct TabParser<C: MarsCalendar = KeplerCalendar> {
    calendar: C,
}

impl<C: MarsCalendar> TabParser<C> {
    pub fn new(calendar: C) -> Self {
        Self { calendar }
    }
}

impl<C: MarsCalendar> ProductParser for TabParser<C> {
    fn parse(&self, path: &Utf8Path) -> Result<ParsedProduct, ArchiveError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| parse_err(path, 0, "path has no file name"))?;
        let product: ProductId = file_name.trim_end_matches(".gz").parse()?;

        let text = read_text(path)?.replace('"', "");
        let all: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
        let comments = all.iter().take_while(|l| l.starts_with('#')).count();
        let offset = (comments + HEADER_LINES).min(all.len());
        let lines = &all[offset..];

        let mut builder = ProductBuilder::new(&product);
        for (n, block) in lines.chunks_exact(BLOCK_LINES).enumerate() {
            let line_no = offset + n * BLOCK_LINES + 1;
            let header = split_fields(path, line_no, block[0], HEADER_COLUMNS.len())?;
            if !is_good_retrieval(path, line_no, &header)? {
                continue;
            }
            let profile = product.profile(n as u32)?;
            let datetime = parse_datetime(path, line_no, header[1], header[2])?;
            let (mars_year, ls) = self.calendar.mars_year_ls(datetime);
            builder.push_metadata(path, line_no, &profile, &header, datetime, mars_year, ls)?;

            for (level, line) in block[1..].iter().enumerate() {
                let fields = split_fields(path, line_no + 1 + level, line, LEVEL_COLUMNS.len())?;
                builder.push_level(path, line_no + 1 + level, profile.row(level as u32)?.key(), &fields)?;
            }
        }

        let parsed = builder.finish()?;
        debug!(
            product = %product,
            profiles = parsed.metadata.len(),
            rows = parsed.profiles.len(),
            "parsed product"
        );
        Ok(parsed)
    }
}

struct ProductBuilder {
    product_key: i64,
    ids: Vec<String>,
    keys: Vec<i64>,
    datetimes: Vec<NaiveDateTime>,
    floats: BTreeMap<&'static str, Vec<f64>>,
    ints: BTreeMap<&'static str, Vec<i64>>,
    row_keys: Vec<RowKey>,
    levels: BTreeMap<&'static str, Vec<f64>>,
}

impl ProductBuilder {
    fn new(product: &ProductId) -> Self {
        let mut floats = BTreeMap::new();
        let mut ints = BTreeMap::new();
        for name in METADATA_DATA_COLUMNS {
            if INTEGER_COLUMNS.contains(&name) {
                ints.insert(name, Vec::new());
            } else {
                floats.insert(name, Vec::new());
            }
        }
        floats.insert(MARS_YEAR, Vec::new());
        floats.insert(COMPUTED_LS, Vec::new());
        Self {
            product_key: product.key(),
            ids: Vec::new(),
            keys: Vec::new(),
            datetimes: Vec::new(),
            floats,
            ints,
            row_keys: Vec::new(),
            levels: PROFILE_VARIABLES.iter().map(|name| (*name, Vec::new())).collect(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_metadata(
        &mut self,
        path: &Utf8Path,
        line_no: usize,
        profile: &keys::ProfileId,
        header: &[&str],
        datetime: NaiveDateTime,
        mars_year: f64,
        ls: f64,
    ) -> Result<(), ArchiveError> {
        for (index, name) in HEADER_COLUMNS.iter().enumerate() {
            if let Some(values) = self.floats.get_mut(name) {
                values.push(parse_number(path, line_no, name, header[index])?);
            } else if let Some(values) = self.ints.get_mut(name) {
                let value = parse_number(path, line_no, name, header[index])?;
                // missing integer fields keep the fill value
                values.push(if value.is_nan() { -9999 } else { value as i64 });
            }
        }
        if let Some(values) = self.floats.get_mut(MARS_YEAR) {
            values.push(mars_year);
        }
        if let Some(values) = self.floats.get_mut(COMPUTED_LS) {
            values.push(ls);
        }
        self.datetimes.push(datetime);
        self.ids.push(profile.as_str().to_string());
        self.keys.push(profile.key());
        Ok(())
    }

    fn push_level(
        &mut self,
        path: &Utf8Path,
        line_no: usize,
        row: RowKey,
        fields: &[&str],
    ) -> Result<(), ArchiveError> {
        for (index, name) in LEVEL_COLUMNS.iter().enumerate() {
            if let Some(values) = self.levels.get_mut(name) {
                values.push(parse_number(path, line_no, name, fields[index])?);
            }
        }
        self.row_keys.push(row);
        Ok(())
    }

    fn finish(self) -> Result<ParsedProduct, ArchiveError> {
        if self.keys.is_empty() {
            return Ok(ParsedProduct::default());
        }
        let count = self.keys.len();
        let mut columns: BTreeMap<String, Column> = BTreeMap::new();
        for (name, values) in self.floats {
            columns.insert(name.to_string(), Column::Float(values));
        }
        for (name, values) in self.ints {
            columns.insert(name.to_string(), Column::Int(values));
        }
        columns.insert(DATETIME.to_string(), Column::Timestamp(self.datetimes));
        columns.insert(PRODID.to_string(), Column::Int(vec![self.product_key; count]));

        let metadata = MetadataTable::from_parts(self.ids, self.keys, columns)?;
        let profiles = ProfileRows::from_parts(
            self.row_keys,
            self.levels
                .into_iter()
                .map(|(name, values)| (name.to_string(), values))
                .collect(),
        )?;
        Ok(ParsedProduct { metadata, profiles })
    }
}

fn read_text(path: &Utf8Path) -> Result<String, ArchiveError> {
    let bytes = fs::read(path.as_std_path()).map_err(fs_err)?;
    if path.as_str().ends_with(".gz") {
        let mut text = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut text)
            .map_err(|err| parse_err(path, 0, format!("cannot decompress: {err}")))?;
        Ok(text)
    } else {
        String::from_utf8(bytes).map_err(|err| parse_err(path, 0, err.to_string()))
    }
}

fn split_fields<'a>(
    path: &Utf8Path,
    line_no: usize,
    line: &'a str,
    expected: usize,
) -> Result<Vec<&'a str>, ArchiveError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != expected {
        return Err(parse_err(
            path,
            line_no,
            format!("expected {expected} fields, found {}", fields.len()),
        ));
    }
    Ok(fields)
}

/// The leading flag is non-zero for failed retrievals; `Gqual` outside
/// {0, 6} marks unusable geometry.
fn is_good_retrieval(path: &Utf8Path, line_no: usize, header: &[&str]) -> Result<bool, ArchiveError> {
    let flag = parse_number(path, line_no, HEADER_COLUMNS[0], header[0])?;
    let gqual = parse_number(path, line_no, "Gqual", header[GQUAL_FIELD])?;
    Ok(flag == 0.0 && GOOD_GQUAL.contains(&gqual))
}

fn parse_number(path: &Utf8Path, line_no: usize, name: &str, field: &str) -> Result<f64, ArchiveError> {
    field
        .parse::<f64>()
        .map(fill_to_nan)
        .map_err(|_| parse_err(path, line_no, format!("{name}: not a number: {field:?}")))
}

fn parse_datetime(
    path: &Utf8Path,
    line_no: usize,
    date: &str,
    utc: &str,
) -> Result<NaiveDateTime, ArchiveError> {
    let day = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date, format).ok())
        .ok_or_else(|| parse_err(path, line_no, format!("date: unrecognised {date:?}")))?;
    let time = NaiveTime::parse_from_str(utc, "%H:%M:%S%.f")
        .map_err(|_| parse_err(path, line_no, format!("UTC: unrecognised {utc:?}")))?;
    Ok(day.and_time(time))
}

fn parse_err(path: &Utf8Path, line: usize, detail: impl Into<String>) -> ArchiveError {
    ArchiveError::Parse {
        path: path.to_owned(),
        line,
        detail: detail.into(),
    }
}
