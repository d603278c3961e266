//! Cache keys and their textual addresses.
//!
//! ```text
//! non-spatial: {dataset}/{stream}
//! spatial:     {dataset}/{x}-{y}/{start_ticks}-{end_ticks}.v{version}
//! ```
//!
//! A spatial key with both tick bounds zero addresses the leaf's segment
//! directory rather than a segment. Directories always use
//! [`DIRECTORY_KEY_VERSION`]; each descriptor in them records the key
//! version of its own segment, so segments written under different
//! versions stay reachable.

use std::fmt;
use std::str::FromStr;

use cps_common::{ticks_from_datetime, DatasetId, Error, Result, SubGridOrigin};

use super::conversion::MutabilityConverter;
use crate::range::TimeRange;

/// Key version of every segment directory.
pub const DIRECTORY_KEY_VERSION: i64 = 0;

/// The independent caches a proxy writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKind {
    Spatial,
    NonSpatial,
}

impl CacheKind {
    pub const ALL: [CacheKind; 2] = [CacheKind::Spatial, CacheKind::NonSpatial];

    pub(crate) fn index(self) -> usize {
        match self {
            CacheKind::Spatial => 0,
            CacheKind::NonSpatial => 1,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Spatial => write!(f, "spatial"),
            CacheKind::NonSpatial => write!(f, "non-spatial"),
        }
    }
}

/// A key the storage proxy can stage and commit.
pub trait CacheKey: fmt::Display + FromStr<Err = Error> {
    const KIND: CacheKind;

    fn dataset_id(&self) -> DatasetId;

    /// Address under which the stream is stored.
    fn address(&self) -> String {
        self.to_string()
    }

    /// Derive the immutable representation of `raw` (uncompressed) bytes.
    fn to_immutable(&self, converter: &dyn MutabilityConverter, raw: &[u8]) -> Result<Vec<u8>>;
}

/// Key of a named per-dataset stream (machine table, existence map, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonSpatialKey {
    pub dataset_id: DatasetId,
    pub stream_name: String,
}

impl NonSpatialKey {
    /// Stream names are single path components of `[A-Za-z0-9._-]`.
    pub fn new(dataset_id: DatasetId, stream_name: impl Into<String>) -> Result<Self> {
        let stream_name = stream_name.into();
        let valid = !stream_name.is_empty()
            && !stream_name.starts_with('.')
            && stream_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(Error::decoding(format!("invalid stream name {stream_name:?}")));
        }
        Ok(Self {
            dataset_id,
            stream_name,
        })
    }

    /// Address prefix of every non-spatial stream of a dataset.
    pub fn dataset_prefix(dataset_id: DatasetId) -> String {
        format!("{dataset_id}/")
    }
}

impl fmt::Display for NonSpatialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset_id, self.stream_name)
    }
}

impl FromStr for NonSpatialKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (dataset, stream) = s
            .split_once('/')
            .ok_or_else(|| Error::decoding(format!("bad stream address {s:?}")))?;
        let dataset_id = DatasetId::parse(dataset)
            .ok_or_else(|| Error::decoding(format!("bad dataset id in {s:?}")))?;
        NonSpatialKey::new(dataset_id, stream)
    }
}

impl CacheKey for NonSpatialKey {
    const KIND: CacheKind = CacheKind::NonSpatial;

    fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    fn to_immutable(&self, converter: &dyn MutabilityConverter, raw: &[u8]) -> Result<Vec<u8>> {
        converter.convert_stream(self, raw)
    }
}

/// Key of a stream belonging to one leaf subgrid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpatialKey {
    pub version: i64,
    pub dataset_id: DatasetId,
    pub subgrid_x: i32,
    pub subgrid_y: i32,
    pub segment_start_ticks: i64,
    pub segment_end_ticks: i64,
}

impl SpatialKey {
    /// Key of the segment of `origin` covering `range`.
    pub fn segment(
        version: i64,
        dataset_id: DatasetId,
        origin: SubGridOrigin,
        range: TimeRange,
    ) -> Self {
        Self {
            version,
            dataset_id,
            subgrid_x: origin.x as i32,
            subgrid_y: origin.y as i32,
            segment_start_ticks: ticks_from_datetime(range.start),
            segment_end_ticks: ticks_from_datetime(range.end),
        }
    }

    /// Key of the segment directory of `origin`.
    pub fn directory(dataset_id: DatasetId, origin: SubGridOrigin) -> Self {
        Self {
            version: DIRECTORY_KEY_VERSION,
            dataset_id,
            subgrid_x: origin.x as i32,
            subgrid_y: origin.y as i32,
            segment_start_ticks: 0,
            segment_end_ticks: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.segment_start_ticks == 0 && self.segment_end_ticks == 0
    }

    pub fn origin(&self) -> SubGridOrigin {
        SubGridOrigin::new(self.subgrid_x as u32, self.subgrid_y as u32)
    }

    /// Address prefix of every stream of one leaf.
    pub fn subgrid_prefix(dataset_id: DatasetId, origin: SubGridOrigin) -> String {
        format!("{}/{}-{}/", dataset_id, origin.x, origin.y)
    }
}

impl fmt::Display for SpatialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}/{}-{}.v{}",
            self.dataset_id,
            self.subgrid_x,
            self.subgrid_y,
            self.segment_start_ticks,
            self.segment_end_ticks,
            self.version
        )
    }
}

impl FromStr for SpatialKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::decoding(format!("bad spatial address {s:?}"));
        let mut parts = s.split('/');
        let (Some(dataset), Some(subgrid), Some(segment), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };

        let dataset_id = DatasetId::parse(dataset).ok_or_else(bad)?;
        let (x, y) = subgrid.split_once('-').ok_or_else(bad)?;
        let (ticks, version) = segment.rsplit_once(".v").ok_or_else(bad)?;
        let (start, end) = ticks.split_once('-').ok_or_else(bad)?;

        Ok(Self {
            version: version.parse().map_err(|_| bad())?,
            dataset_id,
            subgrid_x: x.parse().map_err(|_| bad())?,
            subgrid_y: y.parse().map_err(|_| bad())?,
            segment_start_ticks: start.parse().map_err(|_| bad())?,
            segment_end_ticks: end.parse().map_err(|_| bad())?,
        })
    }
}

impl CacheKey for SpatialKey {
    const KIND: CacheKind = CacheKind::Spatial;

    fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    fn to_immutable(&self, converter: &dyn MutabilityConverter, raw: &[u8]) -> Result<Vec<u8>> {
        if self.is_directory() {
            converter.convert_directory(self, raw)
        } else {
            converter.convert_segment(self, raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn spatial_address_round_trips() {
        let dataset = DatasetId::new();
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap(),
        );
        let key = SpatialKey::segment(3, dataset, SubGridOrigin::new(1024, 96), range);
        let address = key.address();
        assert!(address.starts_with(&SpatialKey::subgrid_prefix(
            dataset,
            SubGridOrigin::new(1024, 96)
        )));
        assert!(address.ends_with(".v3"));
        assert_eq!(address.parse::<SpatialKey>().expect("parse"), key);
        assert!(!key.is_directory());
    }

    #[test]
    fn directory_key_has_zero_bounds() {
        let key = SpatialKey::directory(DatasetId::new(), SubGridOrigin::new(0, 32));
        assert!(key.is_directory());
        assert!(key.address().ends_with("/0-32/0-0.v0"));
        assert_eq!(key.origin(), SubGridOrigin::new(0, 32));
    }

    #[test]
    fn non_spatial_key_validates_stream_name() {
        let dataset = DatasetId::new();
        let key = NonSpatialKey::new(dataset, "machines").expect("key");
        assert_eq!(key.address(), format!("{dataset}/machines"));
        assert_eq!(key.address().parse::<NonSpatialKey>().expect("parse"), key);

        assert!(NonSpatialKey::new(dataset, "../escape").is_err());
        assert!(NonSpatialKey::new(dataset, "a/b").is_err());
        assert!(NonSpatialKey::new(dataset, "").is_err());
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert!("nope".parse::<SpatialKey>().is_err());
        assert!(format!("{}/1-2/3-4", DatasetId::new()).parse::<SpatialKey>().is_err());
        assert!(format!("{}/1-2/3-4.v1/x", DatasetId::new()).parse::<SpatialKey>().is_err());
        assert!("bad/machines".parse::<NonSpatialKey>().is_err());
    }
}
