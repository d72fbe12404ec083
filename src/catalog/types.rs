use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File categories published by chain portals.
///
/// `PriceFull`/`PromoFull` are complete snapshots; `Price`/`Promo` are
/// incremental deltas against them. Selection always prefers the Full
/// variant when both exist for the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileCategory {
    Stores,
    Price,
    PriceFull,
    Promo,
    PromoFull,
}

impl FileCategory {
    /// Whether this is a complete-snapshot variant.
    pub fn is_full(&self) -> bool {
        matches!(self, FileCategory::PriceFull | FileCategory::PromoFull)
    }

    /// The delta category this variant belongs to (`PriceFull` -> `Price`).
    /// Selection groups Full and non-Full candidates into the same bucket.
    pub fn base(&self) -> FileCategory {
        match self {
            FileCategory::PriceFull => FileCategory::Price,
            FileCategory::PromoFull => FileCategory::Promo,
            other => *other,
        }
    }

    /// Leaf folder name in the output tree.
    pub fn dir_name(&self) -> &'static str {
        match self {
            FileCategory::Stores => "Stores",
            FileCategory::Price => "Price",
            FileCategory::PriceFull => "PriceFull",
            FileCategory::Promo => "Promo",
            FileCategory::PromoFull => "PromoFull",
        }
    }

    /// Parse a category from a type label or file-name prefix.
    /// Longest match first: "PriceFull..." must not classify as `Price`.
    pub fn from_label(label: &str) -> Option<FileCategory> {
        let lowered = label.to_ascii_lowercase();
        for cat in [
            FileCategory::PriceFull,
            FileCategory::PromoFull,
            FileCategory::Stores,
            FileCategory::Price,
            FileCategory::Promo,
        ] {
            if lowered.starts_with(&cat.dir_name().to_ascii_lowercase()) {
                return Some(cat);
            }
        }
        None
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// How the payload behind a descriptor is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadRef {
    /// Direct URL, absolute or site-relative (joined against the chain base).
    Url(String),
    /// Opaque token the owning downloader resolves into a URL (polling chains
    /// resolve by file name through a second request).
    Token(String),
}

/// One file record discovered on a chain portal.
///
/// Produced by a downloader's discovery step, consumed by selection.
/// Never mutated after creation.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    /// Owning store id; `None` for chain-wide files (the Stores catalog).
    pub store: Option<String>,
    pub category: FileCategory,
    /// Date/time string as published by the portal, kept for diagnostics.
    pub raw_date: String,
    /// Parsed timestamp; `None` when the portal string was unparseable.
    /// Descriptors without a timestamp still take part in selection but
    /// sort after every resolved candidate.
    pub timestamp: Option<NaiveDateTime>,
    pub link: DownloadRef,
}

impl FileDescriptor {
    /// Parse a portal file name of the shape
    /// `{Category}{chainref}-{store}-{yyyyMMddHHmm}[.ext]`, e.g.
    /// `PriceFull7290027600007-001-202501010830.gz`.
    ///
    /// Returns `None` when the name does not carry a recognizable category
    /// prefix. Store token `000` (and a missing one) means chain-wide.
    pub fn parse_name(name: &str, link: DownloadRef) -> Option<FileDescriptor> {
        let category = FileCategory::from_label(name)?;
        let stem = name
            .rsplit_once('.')
            .map(|(stem, _ext)| stem)
            .unwrap_or(name);

        let mut parts = stem.split('-');
        let _head = parts.next(); // category prefix + chain reference
        let store_token = parts.next().unwrap_or("");
        let stamp_token = parts.next().unwrap_or("");

        let store = match store_token {
            "" | "000" => None,
            s => Some(s.trim_start_matches('0').to_string()).filter(|s| !s.is_empty()),
        };

        let timestamp = parse_name_stamp(stamp_token);

        Some(FileDescriptor {
            name: name.to_string(),
            store,
            category,
            raw_date: stamp_token.to_string(),
            timestamp,
            link,
        })
    }

    /// Whether this descriptor's resolved timestamp falls on `date`.
    /// Descriptors without a timestamp are treated as matching; discovery
    /// already scoped them to the target day.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        self.timestamp.map(|ts| ts.date() == date).unwrap_or(true)
    }
}

/// `yyyyMMddHHmm` stamps embedded in file names.
pub(crate) fn parse_name_stamp(token: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(token, "%Y%m%d%H%M").ok()
}

/// Date/time strings as the portals render them in listings,
/// `dd/MM/yyyy HH:mm` with a date-only fallback.
pub(crate) fn parse_listing_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%d/%m/%Y")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_label_longest_match() {
        assert_eq!(
            FileCategory::from_label("PriceFull7290027600007-001-202501010830.gz"),
            Some(FileCategory::PriceFull)
        );
        assert_eq!(
            FileCategory::from_label("Price7290027600007-001-202501010830.gz"),
            Some(FileCategory::Price)
        );
        assert_eq!(FileCategory::from_label("promofull123"), Some(FileCategory::PromoFull));
        assert_eq!(FileCategory::from_label("Stores7290027600007-000-202501010700.xml"),
            Some(FileCategory::Stores));
        assert_eq!(FileCategory::from_label("Inventory123"), None);
    }

    #[test]
    fn test_parse_name_full_shape() {
        let d = FileDescriptor::parse_name(
            "PriceFull7290027600007-001-202501010830.gz",
            DownloadRef::Token("PriceFull7290027600007-001-202501010830.gz".into()),
        )
        .unwrap();

        assert_eq!(d.category, FileCategory::PriceFull);
        assert_eq!(d.store.as_deref(), Some("1"));
        assert_eq!(d.raw_date, "202501010830");
        let ts = d.timestamp.unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M").to_string(), "2025-01-01 08:30");
    }

    #[test]
    fn test_parse_name_chain_wide_store() {
        let d = FileDescriptor::parse_name(
            "Stores7290027600007-000-202501010700.xml",
            DownloadRef::Url("/files/x.xml".into()),
        )
        .unwrap();
        assert_eq!(d.category, FileCategory::Stores);
        assert_eq!(d.store, None);
    }

    #[test]
    fn test_parse_name_bad_stamp_keeps_descriptor() {
        let d = FileDescriptor::parse_name(
            "Promo7290027600007-002-notadate.gz",
            DownloadRef::Token("t".into()),
        )
        .unwrap();
        assert_eq!(d.store.as_deref(), Some("2"));
        assert!(d.timestamp.is_none());
    }

    #[test]
    fn test_listing_date_formats() {
        assert!(parse_listing_date("01/01/2025 08:30").is_some());
        assert!(parse_listing_date("01/01/2025").is_some());
        assert!(parse_listing_date("2025-01-01").is_none());
    }

    #[test]
    fn test_matches_date() {
        let d = FileDescriptor::parse_name(
            "Price7290027600007-001-202501010830.gz",
            DownloadRef::Token("t".into()),
        )
        .unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let other = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert!(d.matches_date(day));
        assert!(!d.matches_date(other));
    }
}
