//! Composite identifiers for products, profiles and rows.
//!
//! String form:
//!
//! ```text
//! prodid = DDDDDDDDDD_DDR.TAB
//! profid = prodid ":" profile_number
//! rowid  = profid ":" level_number
//! ```
//!
//! Packed form: `profidint = date * 10^4 + profile_number` and
//! `rowidint = profidint * 10^3 + level_number`.
//!
//! Numbers are written in canonical decimal (no leading zeros, `0` for zero),
//! which is what the DDR products themselves produce. Any other spelling is
//! rejected so that every packed key has exactly one string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

pub const PRODUCT_SUFFIX: &str = "_DDR.TAB";
pub const DATE_DIGITS: usize = 10;
pub const PROFILE_DIGITS: usize = 4;
pub const LEVEL_DIGITS: usize = 3;
pub const PROFILE_RADIX: i64 = 10_000;
pub const ROW_RADIX: i64 = 1_000;
pub const MAX_LEVEL: u32 = 104;

const PRODUCT_KEY_LIMIT: i64 = 10_000_000_000;
const PROFILE_KEY_LIMIT: i64 = PRODUCT_KEY_LIMIT * PROFILE_RADIX;
const ROW_KEY_LIMIT: i64 = PROFILE_KEY_LIMIT * ROW_RADIX;

pub type ProductKey = i64;
pub type ProfileKey = i64;
pub type RowKey = i64;

pub fn encode_product_key(prodid: &str) -> Result<ProductKey, ArchiveError> {
    let date = prodid
        .strip_suffix(PRODUCT_SUFFIX)
        .ok_or_else(|| ArchiveError::malformed(prodid, format!("missing {PRODUCT_SUFFIX} suffix")))?;
    if date.len() != DATE_DIGITS || !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ArchiveError::malformed(
            prodid,
            "date prefix must be exactly 10 digits",
        ));
    }
    date.parse::<i64>()
        .map_err(|err| ArchiveError::malformed(prodid, err.to_string()))
}

pub fn decode_product_key(key: ProductKey) -> Result<String, ArchiveError> {
    if !(0..PRODUCT_KEY_LIMIT).contains(&key) {
        return Err(ArchiveError::malformed(
            &key.to_string(),
            "product key out of range",
        ));
    }
    Ok(format!("{key:010}{PRODUCT_SUFFIX}"))
}

pub fn encode_profile_key(profid: &str) -> Result<ProfileKey, ArchiveError> {
    let (prodid, number) = profid
        .split_once(':')
        .ok_or_else(|| ArchiveError::malformed(profid, "missing profile number"))?;
    let product = encode_product_key(prodid)
        .map_err(|_| ArchiveError::malformed(profid, "invalid product id"))?;
    let number = parse_canonical(profid, number, PROFILE_DIGITS)?;
    Ok(product * PROFILE_RADIX + i64::from(number))
}

pub fn decode_profile_key(key: ProfileKey) -> Result<String, ArchiveError> {
    if !(0..PROFILE_KEY_LIMIT).contains(&key) {
        return Err(ArchiveError::malformed(
            &key.to_string(),
            "profile key out of range",
        ));
    }
    let product = decode_product_key(key / PROFILE_RADIX)?;
    Ok(format!("{product}:{}", key % PROFILE_RADIX))
}

pub fn encode_row_key(rowid: &str) -> Result<RowKey, ArchiveError> {
    let (profid, level) = rowid
        .rsplit_once(':')
        .ok_or_else(|| ArchiveError::malformed(rowid, "missing level number"))?;
    if !profid.contains(':') {
        return Err(ArchiveError::malformed(rowid, "missing profile number"));
    }
    let profile = encode_profile_key(profid)
        .map_err(|_| ArchiveError::malformed(rowid, "invalid profile id"))?;
    let level = parse_canonical(rowid, level, LEVEL_DIGITS)?;
    if level > MAX_LEVEL {
        return Err(ArchiveError::malformed(
            rowid,
            format!("level {level} exceeds {MAX_LEVEL}"),
        ));
    }
    Ok(profile * ROW_RADIX + i64::from(level))
}

pub fn decode_row_key(key: RowKey) -> Result<String, ArchiveError> {
    if !(0..ROW_KEY_LIMIT).contains(&key) {
        return Err(ArchiveError::malformed(&key.to_string(), "row key out of range"));
    }
    let level = key % ROW_RADIX;
    if level > i64::from(MAX_LEVEL) {
        return Err(ArchiveError::malformed(
            &key.to_string(),
            format!("level {level} exceeds {MAX_LEVEL}"),
        ));
    }
    let profile = decode_profile_key(key / ROW_RADIX)?;
    Ok(format!("{profile}:{level}"))
}

pub fn profile_of_row(row: RowKey) -> ProfileKey {
    row / ROW_RADIX
}

pub fn product_of_profile(profile: ProfileKey) -> ProductKey {
    profile / PROFILE_RADIX
}

pub fn row_key(profile: ProfileKey, level: u32) -> RowKey {
    profile * ROW_RADIX + i64::from(level)
}

/// Calendar year encoded in the leading digits of a profile key.
pub fn year_of_profile(profile: ProfileKey) -> i32 {
    (product_of_profile(profile) / 1_000_000) as i32
}

/// Day-decile bucket (`YYYYMMD`) of a product key.
pub fn day_decile(product: ProductKey) -> i64 {
    product / 1_000
}

fn parse_canonical(key: &str, digits: &str, max_width: usize) -> Result<u32, ArchiveError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ArchiveError::malformed(key, "expected an unsigned decimal"));
    }
    if digits.len() > max_width {
        return Err(ArchiveError::malformed(
            key,
            format!("number wider than {max_width} digits"),
        ));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(ArchiveError::malformed(key, "leading zeros are not canonical"));
    }
    digits
        .parse::<u32>()
        .map_err(|err| ArchiveError::malformed(key, err.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(String);

impl ProductId {
    pub fn from_key(key: ProductKey) -> Result<Self, ArchiveError> {
        decode_product_key(key).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self) -> ProductKey {
        // validated on construction
        self.0[..DATE_DIGITS].parse().unwrap_or_default()
    }

    pub fn year(&self) -> i32 {
        (self.key() / 1_000_000) as i32
    }

    pub fn profile(&self, number: u32) -> Result<ProfileId, ArchiveError> {
        format!("{}:{number}", self.0).parse()
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProductId {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        encode_product_key(value)?;
        Ok(Self(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId {
    text: String,
    key: ProfileKey,
}

impl ProfileId {
    pub fn from_key(key: ProfileKey) -> Result<Self, ArchiveError> {
        Ok(Self {
            text: decode_profile_key(key)?,
            key,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn key(&self) -> ProfileKey {
        self.key
    }

    pub fn row(&self, level: u32) -> Result<RowId, ArchiveError> {
        format!("{}:{level}", self.text).parse()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl FromStr for ProfileId {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = encode_profile_key(value)?;
        Ok(Self {
            text: value.to_string(),
            key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    text: String,
    key: RowKey,
}

impl RowId {
    pub fn from_key(key: RowKey) -> Result<Self, ArchiveError> {
        Ok(Self {
            text: decode_row_key(key)?,
            key,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn key(&self) -> RowKey {
        self.key
    }

    pub fn profile_key(&self) -> ProfileKey {
        profile_of_row(self.key)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl FromStr for RowId {
    type Err = ArchiveError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = encode_row_key(value)?;
        Ok(Self {
            text: value.to_string(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn encode_profile_key_packs_date_and_number() {
        let key = encode_profile_key("2006121500_DDR.TAB:17").unwrap();
        assert_eq!(key, 2006121500 * 10_000 + 17);
    }

    #[test]
    fn profile_key_round_trip() {
        for profid in [
            "2006121500_DDR.TAB:0",
            "2006121500_DDR.TAB:9",
            "2010010112_DDR.TAB:450",
            "2019123123_DDR.TAB:9999",
        ] {
            let key = encode_profile_key(profid).unwrap();
            assert_eq!(decode_profile_key(key).unwrap(), profid);
        }
    }

    #[test]
    fn row_key_round_trip() {
        for rowid in [
            "2006121500_DDR.TAB:0:0",
            "2006121500_DDR.TAB:10:104",
            "2012070704_DDR.TAB:3201:57",
        ] {
            let key = encode_row_key(rowid).unwrap();
            assert_eq!(decode_row_key(key).unwrap(), rowid);
        }
    }

    #[test]
    fn row_key_derives_profile_key() {
        let profile = encode_profile_key("2008030806_DDR.TAB:12").unwrap();
        for level in [0, 52, 104] {
            let row = encode_row_key(&format!("2008030806_DDR.TAB:12:{level}")).unwrap();
            assert_eq!(profile_of_row(row), profile);
            assert_eq!(row, row_key(profile, level));
        }
    }

    #[test]
    fn rejects_short_date_prefix() {
        let err = encode_profile_key("200612150_DDR.TAB:1").unwrap_err();
        assert_matches!(err, ArchiveError::MalformedKey { .. });
    }

    #[test]
    fn rejects_non_numeric_suffix() {
        let err = encode_profile_key("2006121500_DDR.TAB:x1").unwrap_err();
        assert_matches!(err, ArchiveError::MalformedKey { .. });
        let err = encode_profile_key("2006121500_DDR.TAB:-1").unwrap_err();
        assert_matches!(err, ArchiveError::MalformedKey { .. });
    }

    #[test]
    fn rejects_non_canonical_numbers() {
        assert_matches!(
            encode_profile_key("2006121500_DDR.TAB:007"),
            Err(ArchiveError::MalformedKey { .. })
        );
        assert_matches!(
            encode_row_key("2006121500_DDR.TAB:7:05"),
            Err(ArchiveError::MalformedKey { .. })
        );
    }

    #[test]
    fn rejects_out_of_width_numbers() {
        assert_matches!(
            encode_profile_key("2006121500_DDR.TAB:10000"),
            Err(ArchiveError::MalformedKey { .. })
        );
        assert_matches!(
            encode_row_key("2006121500_DDR.TAB:1:105"),
            Err(ArchiveError::MalformedKey { .. })
        );
        assert_matches!(
            decode_row_key(2006121500_0001_105),
            Err(ArchiveError::MalformedKey { .. })
        );
    }

    #[test]
    fn rejects_wrong_suffix() {
        assert_matches!(
            "2006121500_EDR.TAB".parse::<ProductId>(),
            Err(ArchiveError::MalformedKey { .. })
        );
    }

    #[test]
    fn rejects_negative_keys() {
        assert_matches!(decode_profile_key(-1), Err(ArchiveError::MalformedKey { .. }));
        assert_matches!(decode_row_key(-1), Err(ArchiveError::MalformedKey { .. }));
    }

    #[test]
    fn typed_ids_carry_keys() {
        let product: ProductId = "2007052918_DDR.TAB".parse().unwrap();
        assert_eq!(product.key(), 2007052918);
        assert_eq!(product.year(), 2007);
        let profile = product.profile(3).unwrap();
        assert_eq!(profile.as_str(), "2007052918_DDR.TAB:3");
        let row = profile.row(104).unwrap();
        assert_eq!(row.profile_key(), profile.key());
        assert_eq!(RowId::from_key(row.key()).unwrap(), row);
        assert_eq!(year_of_profile(profile.key()), 2007);
        assert_eq!(day_decile(product.key()), 2007052);
    }
}
