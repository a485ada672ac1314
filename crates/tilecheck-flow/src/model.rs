//! Catalog records and the assessment produced for each collection.
//!
//! [`CollectionRef`] and [`GranuleRef`] are read-only views over catalog
//! metadata. [`Assessment`] is the unit of durable state: built once by the
//! classifier, then only ever advanced through [`Assessment::with_outcome`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::outcome::Outcome;

/// Tile coordinates every probe renders.
pub const PROBE_TILE: (u32, u32, u32) = (0, 0, 0);

/// Reader family used to open a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Georeferenced raster files (GeoTIFF / COG), addressed by band.
    Raster,
    /// Multi-dimensional arrays (NetCDF, HDF5, Zarr), addressed by variable.
    Array,
}

impl Backend {
    /// Returns the stable label used in reports.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::Array => "array",
        }
    }

    /// Returns the backend name the tiling service expects.
    #[must_use]
    pub const fn tiler_name(&self) -> &'static str {
        match self {
            Self::Raster => "rasterio",
            Self::Array => "xarray",
        }
    }

    /// Returns the query parameter that selects a field for this backend.
    #[must_use]
    pub const fn field_param(&self) -> &'static str {
        match self {
            Self::Raster => "bands",
            Self::Array => "variable",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Which class of data link to prefer when resolving a granule's URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// In-region object storage links (`GET DATA VIA DIRECT ACCESS`).
    #[default]
    Direct,
    /// Public HTTPS links (`GET DATA`).
    External,
}

impl AccessMode {
    /// Returns the other access mode.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Direct => Self::External,
            Self::External => Self::Direct,
        }
    }

    /// Returns the stable label.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::External => "external",
        }
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "external" => Ok(Self::External),
            other => Err(format!("unknown access mode: {other} (expected direct or external)")),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A collection record from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Catalog concept id (e.g. `C1234-PROV`).
    pub concept_id: String,
    /// Declared archive file format, if any.
    pub file_format: Option<String>,
    /// Unique data center short names, in catalog order.
    #[serde(default)]
    pub data_centers: Vec<String>,
    /// Declared processing level, if any.
    pub processing_level: Option<String>,
}

impl CollectionRef {
    /// Creates a collection reference carrying only its id.
    #[must_use]
    pub fn new(concept_id: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            file_format: None,
            data_centers: Vec::new(),
            processing_level: None,
        }
    }

    /// Sets the declared file format.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.file_format = Some(format.into());
        self
    }

    /// Returns the data center hint (the first listed data center).
    #[must_use]
    pub fn data_center(&self) -> Option<&str> {
        self.data_centers.first().map(String::as_str)
    }
}

/// Link class of a granule related URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// `GET DATA VIA DIRECT ACCESS`.
    Direct,
    /// `GET DATA`.
    External,
}

impl LinkKind {
    const fn matches(self, mode: AccessMode) -> bool {
        matches!(
            (self, mode),
            (Self::Direct, AccessMode::Direct) | (Self::External, AccessMode::External)
        )
    }
}

/// One data link of a granule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Target URL.
    pub url: String,
    /// Link class.
    pub kind: LinkKind,
    /// Optional link subtype (e.g. `DIRECT DOWNLOAD`).
    pub subtype: Option<String>,
}

/// Link subtypes preferred when a class has several links.
const PREFERRED_SUBTYPES: [&str; 2] = ["DIRECT DOWNLOAD", "VIRTUAL COLLECTION"];

/// Begin/end of a granule's temporal coverage; either side may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalExtent {
    /// Beginning date-time, as given by the catalog.
    pub begin: Option<String>,
    /// Ending date-time, as given by the catalog.
    pub end: Option<String>,
}

impl TemporalExtent {
    /// Creates a closed extent.
    #[must_use]
    pub fn new(begin: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            begin: Some(begin.into()),
            end: Some(end.into()),
        }
    }

    /// Returns true if neither side is known.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.begin.is_none() && self.end.is_none()
    }

    /// Renders the extent as an interval string, `..` standing in for an open side.
    #[must_use]
    pub fn as_interval(&self) -> String {
        format!(
            "{}/{}",
            self.begin.as_deref().unwrap_or(".."),
            self.end.as_deref().unwrap_or("..")
        )
    }
}

/// A granule record from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleRef {
    /// Granule concept id.
    pub granule_id: String,
    /// Owning collection's concept id.
    pub collection_concept_id: String,
    /// Data links, in catalog order.
    pub links: Vec<Link>,
    /// Temporal coverage.
    pub temporal_extent: TemporalExtent,
    /// Granule-declared format, if any.
    pub format: Option<String>,
    /// Provider id from the catalog record.
    pub provider_id: Option<String>,
    /// Raw catalog record.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl GranuleRef {
    /// Resolves the data URL, preferring `mode` and falling back to the other class.
    #[must_use]
    pub fn data_url(&self, mode: AccessMode) -> Option<&str> {
        self.url_of(mode).or_else(|| self.url_of(mode.other()))
    }

    fn url_of(&self, mode: AccessMode) -> Option<&str> {
        let candidates: Vec<&Link> = self
            .links
            .iter()
            .filter(|l| l.kind.matches(mode) && !l.url.trim().is_empty())
            .collect();

        let chosen = match candidates.as_slice() {
            [] => None,
            [only] => Some(*only),
            several => several
                .iter()
                .find(|l| {
                    l.subtype
                        .as_deref()
                        .map_or(true, |s| PREFERRED_SUBTYPES.contains(&s))
                })
                .or_else(|| several.first())
                .copied(),
        };
        chosen.map(|l| l.url.as_str())
    }
}

/// The single tile call a probe makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRequest {
    /// Collection to render.
    pub concept_id: String,
    /// Reader backend.
    pub backend: Backend,
    /// Band (raster) or variable (array) to render.
    pub field: String,
    /// Temporal filter; always present for the array backend.
    pub datetime: Option<TemporalExtent>,
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Zoom level.
    pub z: u32,
}

impl TileRequest {
    /// Creates a request for the fixed probe tile.
    #[must_use]
    pub fn probe(
        concept_id: impl Into<String>,
        backend: Backend,
        field: impl Into<String>,
        datetime: Option<TemporalExtent>,
    ) -> Self {
        let (x, y, z) = PROBE_TILE;
        Self {
            concept_id: concept_id.into(),
            backend,
            field: field.into(),
            datetime,
            x,
            y,
            z,
        }
    }

    /// Returns the query parameters identifying the dataset and field.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("concept_id", self.concept_id.clone()),
            ("backend", self.backend.tiler_name().to_string()),
            (self.backend.field_param(), self.field.clone()),
        ];
        if let Some(datetime) = &self.datetime {
            pairs.push(("datetime", datetime.as_interval()));
        }
        pairs
    }

    /// Renders the equivalent tiles URL against a tiling endpoint.
    #[must_use]
    pub fn tiles_url(&self, endpoint: &str) -> String {
        let query = self
            .query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "{}/tiles/WebMercatorQuad/{}/{}/{}.png?{query}",
            endpoint.trim_end_matches('/'),
            self.z,
            self.x,
            self.y,
        )
    }
}

/// Everything known about one collection's tiling compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Collection concept id.
    pub collection_concept_id: String,
    /// Sampled granule, if one was found.
    pub granule_id: Option<String>,
    /// Resolved data URL.
    pub data_url: Option<String>,
    /// Declared format, if any.
    pub format: Option<String>,
    /// File extension of the data URL.
    pub extension: Option<String>,
    /// Selected reader backend.
    pub backend: Option<Backend>,
    /// Named fields found in the file, in file order.
    #[serde(default)]
    pub data_variables: Vec<String>,
    /// Data centers of the collection.
    #[serde(default)]
    pub data_centers: Vec<String>,
    /// Probe request, present once backend and fields are known.
    pub tile_request: Option<TileRequest>,
    /// Equivalent tiles URL for `tile_request`.
    pub tiles_url: Option<String>,
    /// Verdict; `None` while classified but not yet probed.
    pub outcome: Option<Outcome>,
    /// Failure detail.
    pub detail: Option<String>,
}

impl Assessment {
    /// Creates an empty assessment for a collection.
    #[must_use]
    pub fn new(collection_concept_id: impl Into<String>) -> Self {
        Self {
            collection_concept_id: collection_concept_id.into(),
            granule_id: None,
            data_url: None,
            format: None,
            extension: None,
            backend: None,
            data_variables: Vec::new(),
            data_centers: Vec::new(),
            tile_request: None,
            tiles_url: None,
            outcome: None,
            detail: None,
        }
    }

    /// Creates a minimal assessment carrying only an outcome and detail.
    #[must_use]
    pub fn failed(
        collection_concept_id: impl Into<String>,
        outcome: Outcome,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(collection_concept_id).with_outcome(outcome, Some(detail.into()))
    }

    /// Returns a copy with the outcome and detail replaced; nothing else changes.
    #[must_use]
    pub fn with_outcome(self, outcome: Outcome, detail: Option<String>) -> Self {
        Self {
            outcome: Some(outcome),
            detail,
            ..self
        }
    }

    /// Returns true if the tile probe may run on this assessment.
    #[must_use]
    pub fn is_probe_ready(&self) -> bool {
        self.tile_request.is_some() && !self.outcome.is_some_and(|o| o.blocks_probe())
    }

    /// Returns true if the outcome is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_some_and(|o| o.is_success())
    }

    /// Returns the outcome label, or `none` when no outcome was recorded.
    #[must_use]
    pub fn outcome_label(&self) -> &'static str {
        self.outcome.as_ref().map_or("none", Outcome::as_label)
    }
}

/// One collection scheduled on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Page the collection was fetched on.
    pub page_index: usize,
    /// The collection to assess.
    pub collection: CollectionRef,
}

impl WorkItem {
    /// Creates a work item.
    #[must_use]
    pub const fn new(page_index: usize, collection: CollectionRef) -> Self {
        Self {
            page_index,
            collection,
        }
    }

    /// Returns the collection concept id.
    #[must_use]
    pub fn concept_id(&self) -> &str {
        &self.collection.concept_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str, kind: LinkKind, subtype: Option<&str>) -> Link {
        Link {
            url: url.into(),
            kind,
            subtype: subtype.map(Into::into),
        }
    }

    fn granule(links: Vec<Link>) -> GranuleRef {
        GranuleRef {
            granule_id: "G1-PROV".into(),
            collection_concept_id: "C1-PROV".into(),
            links,
            temporal_extent: TemporalExtent::default(),
            format: None,
            provider_id: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn data_url_prefers_requested_mode() {
        let g = granule(vec![
            link("https://host/a.nc", LinkKind::External, None),
            link("s3://bucket/a.nc", LinkKind::Direct, None),
        ]);
        assert_eq!(g.data_url(AccessMode::Direct), Some("s3://bucket/a.nc"));
        assert_eq!(g.data_url(AccessMode::External), Some("https://host/a.nc"));
    }

    #[test]
    fn data_url_falls_back_to_other_mode() {
        let g = granule(vec![link("https://host/a.nc", LinkKind::External, None)]);
        assert_eq!(g.data_url(AccessMode::Direct), Some("https://host/a.nc"));
        assert_eq!(granule(vec![]).data_url(AccessMode::Direct), None);
    }

    #[test]
    fn data_url_prefers_download_subtypes() {
        let g = granule(vec![
            link("https://host/opendap", LinkKind::External, Some("OPENDAP DATA")),
            link("https://host/a.nc", LinkKind::External, Some("DIRECT DOWNLOAD")),
        ]);
        assert_eq!(g.data_url(AccessMode::External), Some("https://host/a.nc"));

        let g = granule(vec![
            link("https://host/one", LinkKind::External, Some("OPENDAP DATA")),
            link("https://host/two", LinkKind::External, Some("THREDDS DATA")),
        ]);
        assert_eq!(g.data_url(AccessMode::External), Some("https://host/one"));
    }

    #[test]
    fn tiles_url_for_raster() {
        let req = TileRequest::probe("C1-PROV", Backend::Raster, "Red", None);
        assert_eq!(
            req.tiles_url("https://tiler.example/api/"),
            "https://tiler.example/api/tiles/WebMercatorQuad/0/0/0.png?concept_id=C1-PROV&backend=rasterio&bands=Red"
        );
    }

    #[test]
    fn tiles_url_for_array_carries_datetime() {
        let extent = TemporalExtent::new("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z");
        let req = TileRequest::probe("C2-PROV", Backend::Array, "Tair", Some(extent));
        let url = req.tiles_url("https://tiler.example");
        assert!(url.contains("backend=xarray&variable=Tair"));
        assert!(url.ends_with("datetime=2020-01-01T00:00:00Z/2020-01-02T00:00:00Z"));
    }

    #[test]
    fn open_interval_renders_dots() {
        let extent = TemporalExtent {
            begin: Some("2020-01-01".into()),
            end: None,
        };
        assert_eq!(extent.as_interval(), "2020-01-01/..");
        assert!(TemporalExtent::default().is_empty());
    }

    #[test]
    fn with_outcome_changes_only_outcome() {
        let mut original = Assessment::new("C1-PROV");
        original.data_variables = vec!["Red".into()];
        original.tile_request = Some(TileRequest::probe("C1-PROV", Backend::Raster, "Red", None));

        let updated = original
            .clone()
            .with_outcome(Outcome::Success, None);
        assert_eq!(updated.outcome, Some(Outcome::Success));
        assert_eq!(updated.data_variables, original.data_variables);
        assert_eq!(updated.tile_request, original.tile_request);
        assert!(original.outcome.is_none());
    }

    #[test]
    fn probe_readiness() {
        let mut a = Assessment::new("C1-PROV");
        assert!(!a.is_probe_ready());
        a.tile_request = Some(TileRequest::probe("C1-PROV", Backend::Raster, "Red", None));
        assert!(a.is_probe_ready());
        let a = a.with_outcome(Outcome::UnsupportedFormat, None);
        assert!(!a.is_probe_ready());
        assert_eq!(a.outcome_label(), "unsupported_format");
    }
}
