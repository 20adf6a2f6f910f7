//! Column catalog of the DDR products and the archive's variable kinds.

use std::fmt;

use serde::Serialize;

/// Levels in every retrieved profile.
pub const LEVELS: usize = 105;

/// Sentinel used by the text products for missing values.
pub const FILL_VALUE: f64 = -9999.0;

pub const PRESSURE: &str = "pressure";
pub const PROFIDINT: &str = "profidint";
pub const ROWIDINT: &str = "rowidint";
pub const DATETIME: &str = "datetime";
pub const MARS_YEAR: &str = "MY";
pub const COMPUTED_LS: &str = "cLs";

/// Transient column carrying the product key; never persisted.
pub const PRODID: &str = "prodid";

/// Fields of a metadata line, in file order. The leading `"1"` is the
/// retrieval flag.
pub const HEADER_COLUMNS: [&str; 77] = [
    "1",
    "date",
    "UTC",
    "SCLK",
    "Ls",
    "solar_dist",
    "orb_num",
    "Gqual",
    "solar_lat",
    "solar_lon",
    "solar_zen",
    "LST",
    "lat",
    "lon",
    "profile_rad",
    "profile_alt",
    "limb_ang",
    "are_rad",
    "surf_lat",
    "surf_lon",
    "surf_rad",
    "T_surf",
    "T_surf_err",
    "T_near_surf",
    "T_near_surf_err",
    "dust_column",
    "Dust_column_err",
    "H2Ovap_column",
    "H2Ovap_column_err",
    "H2Oice_column",
    "H2Oice_column_err",
    "CO2ice_column",
    "CO2ice_column_err",
    "p_surf",
    "p_surf_err",
    "p_ret_alt",
    "p_ret",
    "p_ret_err",
    "Rqual",
    "P_qual",
    "T_qual",
    "dust_qual",
    "H2Ovap_qual",
    "H2Oice_qual",
    "CO2ice_qual",
    "surf_qual",
    "obs_qual",
    "ref_sclk_0",
    "ref_sclk_1",
    "ref_sclk_2",
    "ref_sclk_3",
    "ref_sclk_4",
    "ref_sclk_5",
    "ref_sclk_6",
    "ref_sclk_7",
    "ref_sclk_8",
    "ref_sclk_9",
    "ref_date_0",
    "ref_utc_0",
    "ref_date_1",
    "ref_utc_1",
    "ref_date_2",
    "ref_utc_2",
    "ref_date_3",
    "ref_utc_3",
    "ref_date_4",
    "ref_utc_4",
    "ref_date_5",
    "ref_utc_5",
    "ref_date_6",
    "ref_utc_6",
    "ref_date_7",
    "ref_utc_7",
    "ref_date_8",
    "ref_utc_8",
    "ref_date_9",
    "ref_utc_9",
];

/// Fields of a level line, in file order.
pub const LEVEL_COLUMNS: [&str; 15] = [
    "1",
    "pressure",
    "temperature",
    "T_err",
    "dust",
    "dust_err",
    "H2Ovap",
    "H2Ovap_err",
    "H2Oice",
    "H2Oice_err",
    "CO2ice",
    "CO2ice_err",
    "altitude",
    "lat",
    "lon",
];

/// Numeric header fields copied into the metadata table.
pub const METADATA_DATA_COLUMNS: [&str; 44] = [
    "SCLK",
    "Ls",
    "solar_dist",
    "orb_num",
    "solar_lat",
    "solar_lon",
    "solar_zen",
    "LST",
    "lat",
    "lon",
    "profile_rad",
    "profile_alt",
    "limb_ang",
    "are_rad",
    "surf_lat",
    "surf_lon",
    "surf_rad",
    "T_surf",
    "T_surf_err",
    "T_near_surf",
    "T_near_surf_err",
    "dust_column",
    "Dust_column_err",
    "H2Ovap_column",
    "H2Ovap_column_err",
    "H2Oice_column",
    "H2Oice_column_err",
    "CO2ice_column",
    "CO2ice_column_err",
    "p_surf",
    "p_surf_err",
    "p_ret_alt",
    "p_ret",
    "p_ret_err",
    "Rqual",
    "P_qual",
    "T_qual",
    "dust_qual",
    "H2Ovap_qual",
    "H2Oice_qual",
    "CO2ice_qual",
    "surf_qual",
    "obs_qual",
    "Gqual",
];

/// Metadata fields stored as integers; all other numeric fields are floats.
pub const INTEGER_COLUMNS: [&str; 11] = [
    "orb_num",
    "Gqual",
    "Rqual",
    "P_qual",
    "T_qual",
    "dust_qual",
    "H2Ovap_qual",
    "H2Oice_qual",
    "CO2ice_qual",
    "surf_qual",
    "obs_qual",
];

/// Level fields persisted as profile variables (besides `rowidint`).
pub const PROFILE_VARIABLES: [&str; 11] = [
    "temperature",
    "T_err",
    "dust",
    "dust_err",
    "H2Ovap",
    "H2Ovap_err",
    "H2Oice",
    "H2Oice_err",
    "altitude",
    "lat",
    "lon",
];

/// Fixed vertical grid shared by every profile, in Pa.
pub fn pressure_grid() -> Vec<f64> {
    (0..LEVELS)
        .map(|level| 610.0 * (-0.125 * (level as f64 - 9.0)).exp())
        .collect()
}

/// Replaces the text sentinel with NaN.
pub fn fill_to_nan(value: f64) -> f64 {
    if value == FILL_VALUE { f64::NAN } else { value }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// One scalar per profile.
    Metadata,
    /// One value per level, stored with a fixed width of [`LEVELS`].
    Profile,
}

impl VariableKind {
    pub fn width(self) -> usize {
        match self {
            VariableKind::Metadata => 1,
            VariableKind::Profile => LEVELS,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            VariableKind::Metadata => "indexdata",
            VariableKind::Profile => "profdata",
        }
    }

    pub fn file_suffix(self) -> &'static str {
        match self {
            VariableKind::Metadata => "index",
            VariableKind::Profile => "profiles",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Metadata => write!(f, "metadata"),
            VariableKind::Profile => write!(f, "profile"),
        }
    }
}
