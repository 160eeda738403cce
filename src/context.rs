//! Session context and product metadata that drive output paths.
//!
//! These are the inputs the construction-mode builder needs; loading the full
//! session configuration is someone else's job, so the types only carry the
//! handful of fields path derivation reads.

use clap::builder::PossibleValue;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Where a session runs.
pub enum VenueType {
    /// Flight software test set.
    Testset,
    /// Hardware testbed.
    Testbed,
    /// Assembly, test and launch operations.
    Atlo,
    /// Flight operations during cruise.
    Cruise,
    /// Flight operations on the surface.
    Surface,
    /// Flight operations in orbit.
    Orbit,
    /// Generic flight operations.
    Ops,
    /// Not configured.
    Unknown,
}

impl VenueType {
    /// Whether products from this venue go to the operational product store.
    #[must_use]
    pub const fn is_ops_venue(self) -> bool {
        matches!(self, Self::Cruise | Self::Surface | Self::Orbit | Self::Ops)
    }
}

impl ValueEnum for VenueType {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self::Testset,
            Self::Testbed,
            Self::Atlo,
            Self::Cruise,
            Self::Surface,
            Self::Orbit,
            Self::Ops,
            Self::Unknown,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        let pv = match self {
            Self::Testset => PossibleValue::new("TESTSET").help("Flight software test set"),
            Self::Testbed => PossibleValue::new("TESTBED").help("Hardware testbed"),
            Self::Atlo => PossibleValue::new("ATLO").help("Assembly, test and launch"),
            Self::Cruise => PossibleValue::new("CRUISE").help("Operations: cruise"),
            Self::Surface => PossibleValue::new("SURFACE").help("Operations: surface"),
            Self::Orbit => PossibleValue::new("ORBIT").help("Operations: orbit"),
            Self::Ops => PossibleValue::new("OPS").help("Operations"),
            Self::Unknown => PossibleValue::new("UNKNOWN").help("Venue not configured"),
        };
        Some(pv)
    }
}

impl std::str::FromStr for VenueType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::value_variants()
            .iter()
            .copied()
            .find(|v| {
                v.to_possible_value()
                    .is_some_and(|pv| pv.get_name().eq_ignore_ascii_case(s))
            })
            .ok_or_else(|| anyhow::anyhow!("invalid VenueType: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The parts of a session configuration that shape output directories.
pub struct ContextConfig {
    /// Venue the session runs in.
    pub venue: VenueType,
    /// Session output directory (may already contain a date segment).
    pub output_dir: PathBuf,
    /// Host the session runs on.
    pub host: String,
    /// User that started the session.
    pub user: String,
    /// Session name.
    pub session_name: String,
    /// Session start time.
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Product metadata consumed by path construction.
pub struct ProductMetadata {
    /// Product type name from the dictionary.
    pub product_type: String,
    /// Application process identifier.
    pub apid: u16,
    /// Spacecraft event time of the product.
    #[serde(with = "time::serde::rfc3339")]
    pub scet: OffsetDateTime,
    /// Data validity time, coarse ticks.
    pub dvt_coarse: u64,
    /// Data validity time, fine ticks.
    pub dvt_fine: u32,
    /// Whether the product is missing parts.
    #[serde(default)]
    pub partial: bool,
    /// Whether the product payload is compressed.
    #[serde(default)]
    pub compressed: bool,
}

impl ProductMetadata {
    /// Data validity time as `<coarse>-<fine>`, zero padded.
    #[must_use]
    pub fn dvt_string(&self) -> String {
        format!("{:010}-{:05}", self.dvt_coarse, self.dvt_fine)
    }

    /// Product base name: `<product_type>_<dvt>`.
    #[must_use]
    pub fn base_name(&self) -> String {
        format!("{}_{}", self.product_type, self.dvt_string())
    }
}
