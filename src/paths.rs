//! Output directory layout for newly constructed products.
//!
//! Products land under
//! `<root>/<YYYY>/<DOY | MM/DD>/<product line>/.../products/<type or APID>`.
//! The root comes from the venue: operational venues write to the configured
//! product store, everything else writes under the session output directory.
//! Either root is cut at its first date-shaped segment so that re-rooting a
//! session directory never repeats the date.

use crate::context::{ContextConfig, ProductMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How the per-product directory under `products/` is named.
pub enum DirNaming {
    /// Use the product type name.
    #[default]
    ProductType,
    /// Use the APID, zero padded to four digits.
    Apid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Mission settings for construction-mode paths.
pub struct OutputLayout {
    /// Product store for operational venues. Falls back to the session output
    /// directory when unset.
    pub override_product_dir: Option<PathBuf>,
    /// `YYYY/DOY` when true, `YYYY/MM/DD` otherwise.
    pub use_doy_directory: bool,
    /// Product line name; lowercased in paths.
    pub product_line: String,
    /// Naming of the per-product directory.
    pub dir_naming: DirNaming,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            override_product_dir: None,
            use_doy_directory: true,
            product_line: "ampcs".to_string(),
            dir_naming: DirNaming::ProductType,
        }
    }
}

/// Date directories for `at`, in UTC.
#[must_use]
pub fn date_segments(at: OffsetDateTime, use_doy: bool) -> Vec<String> {
    let at = at.to_offset(UtcOffset::UTC);
    let year = format!("{:04}", at.year());
    if use_doy {
        vec![year, format!("{:03}", at.ordinal())]
    } else {
        vec![
            year,
            format!("{:02}", u8::from(at.month())),
            format!("{:02}", at.day()),
        ]
    }
}

fn is_digits(s: &str, start: usize, len: usize) -> bool {
    s.get(start..start + len)
        .is_some_and(|d| d.bytes().all(|b| b.is_ascii_digit()))
}

fn date_element_at(s: &str, at: usize, widths: &[usize]) -> bool {
    let mut pos = at;
    for width in widths {
        if s.get(pos..=pos) != Some("/") || !is_digits(s, pos + 1, *width) {
            return false;
        }
        pos += 1 + width;
    }
    true
}

fn find_date_element(s: &str) -> Option<usize> {
    // `/YYYY/DOY` anywhere wins over `/YYYY/MM/DD`.
    [&[4_usize, 3][..], &[4, 2, 2][..]].iter().find_map(|widths| {
        s.match_indices('/')
            .map(|(idx, _)| idx)
            .find(|idx| date_element_at(s, *idx, widths))
    })
}

/// Cut `dir` just before its first `/YYYY/DOY` (or, failing that,
/// `/YYYY/MM/DD`) segment. Paths without a date come back unchanged.
#[must_use]
pub fn truncate_before_date_element(dir: &Path) -> PathBuf {
    let raw = dir.to_string_lossy();
    match find_date_element(&raw).and_then(|idx| raw.get(..idx)) {
        Some("") => PathBuf::from("/"),
        Some(head) => PathBuf::from(head),
        None => dir.to_path_buf(),
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
#[must_use]
pub fn sanitize_word_chars(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn start_time_string(at: OffsetDateTime, use_doy: bool) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    let date = if use_doy {
        format!("{:04}-{:03}", at.year(), at.ordinal())
    } else {
        format!(
            "{:04}-{:02}-{:02}",
            at.year(),
            u8::from(at.month()),
            at.day()
        )
    };
    format!(
        "{date}T{:02}:{:02}:{:02}.{:03}",
        at.hour(),
        at.minute(),
        at.second(),
        at.millisecond()
    )
}

fn push_all(path: &mut PathBuf, segments: impl IntoIterator<Item = String>) {
    for segment in segments {
        path.push(segment);
    }
}

/// Session-unique directories below the root:
/// `<date>/<line>/<host>/<user>_<session>_<start>`.
#[must_use]
pub fn context_specific_segments(ctx: &ContextConfig, layout: &OutputLayout) -> Vec<String> {
    let mut segments = date_segments(ctx.start_time, layout.use_doy_directory);
    segments.push(layout.product_line.to_lowercase());
    segments.push(ctx.host.clone());
    segments.push(format!(
        "{}_{}_{}",
        ctx.user,
        sanitize_word_chars(&ctx.session_name),
        sanitize_word_chars(&start_time_string(ctx.start_time, layout.use_doy_directory))
    ));
    segments
}

/// Session output directory with the date re-derived from the session start.
#[must_use]
pub fn context_output_directory(ctx: &ContextConfig, layout: &OutputLayout) -> PathBuf {
    let mut dir = truncate_before_date_element(&ctx.output_dir);
    push_all(&mut dir, context_specific_segments(ctx, layout));
    dir
}

/// Root of the product tree for this venue, before any date directories.
#[must_use]
pub fn root_product_directory(ctx: &ContextConfig, layout: &OutputLayout) -> PathBuf {
    let root = if ctx.venue.is_ops_venue() {
        layout
            .override_product_dir
            .as_deref()
            .unwrap_or(ctx.output_dir.as_path())
    } else {
        ctx.output_dir.as_path()
    };
    truncate_before_date_element(root)
}

fn venue_specific_segments(
    ctx: &ContextConfig,
    md: &ProductMetadata,
    layout: &OutputLayout,
) -> Vec<String> {
    if ctx.venue.is_ops_venue() {
        let mut segments = date_segments(md.scet, layout.use_doy_directory);
        segments.push(layout.product_line.to_lowercase());
        segments
    } else {
        context_specific_segments(ctx, layout)
    }
}

/// Name of the directory holding all versions of this product.
#[must_use]
pub fn product_subdirectory(md: &ProductMetadata, layout: &OutputLayout) -> String {
    match layout.dir_naming {
        DirNaming::ProductType => md.product_type.clone(),
        DirNaming::Apid => format!("{:04}", md.apid),
    }
}

/// Full directory a new product is written to.
#[must_use]
pub fn product_directory(
    ctx: &ContextConfig,
    md: &ProductMetadata,
    layout: &OutputLayout,
) -> PathBuf {
    let mut dir = root_product_directory(ctx, layout);
    push_all(&mut dir, venue_specific_segments(ctx, md, layout));
    dir.push("products");
    dir.push(product_subdirectory(md, layout));
    dir
}
