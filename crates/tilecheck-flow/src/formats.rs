//! Supported formats, extension inference and backend selection.
//!
//! All comparisons are ASCII case-insensitive. Extensions double as format
//! aliases: a collection that declares its format as `tif` is treated like one
//! declaring `COG`.

use crate::model::Backend;

/// HDF family format names.
pub const HDF_FORMATS: &[&str] = &["HDF", "HDF5", "HDF-EOS5"];
/// HDF family file extensions.
pub const HDF_EXTENSIONS: &[&str] = &["hdf", "hdf5", "h5"];

/// NetCDF family format names, including a malformed one seen in the catalog.
pub const NETCDF_FORMATS: &[&str] = &["NetCDF", "netCDF-4", "netCDFnetCDF-4 classic"];
/// NetCDF family file extensions.
pub const NETCDF_EXTENSIONS: &[&str] = &["nc", "nc4"];

/// Cloud-optimized GeoTIFF format names.
pub const COG_FORMATS: &[&str] = &["COG"];
/// GeoTIFF file extensions.
pub const COG_EXTENSIONS: &[&str] = &["cog", "tif", "tiff"];

/// Zarr format names.
pub const ZARR_FORMATS: &[&str] = &["zarr"];
/// Zarr store extensions.
pub const ZARR_EXTENSIONS: &[&str] = &["zarr"];

/// Variable names preferred when picking an array field to render.
pub const KNOWN_VARIABLES: &[&str] = &[
    "Tair",
    "SnowDepth",
    "Rainf",
    "Snowf_tavg",
    "wind",
    "aerosol_optical_thickness_ocean",
    "ColumnAmountNO2",
    "precip",
    "EVAP",
    "TS",
    "precipitation",
    "srad",
    "SO2",
    "O3",
    "xco2",
    "prec",
    "SnowDepth_tavg",
    "tmax",
    "SO2CMASS",
    "sma",
    "soil_moisture_c1",
    "tas",
    "RZSM",
    "GPP",
    "reflectance",
    "WINDSPD",
    "PSurf",
];

/// Band names preferred when picking a raster field to render.
pub const KNOWN_BANDS: &[&str] = &[
    "Red",
    "Green",
    "Blue",
    "Cirrus",
    "Swir",
    "Band 1",
    "Red_Edge1",
    "Red_Edge2",
    "Red_Edge3",
    "TIRS1",
    "SWIR1",
    "SWIR2",
    "Water_Vapor",
    "NIR_Narrow",
    "Coastal_Aerosol",
];

fn contains_ci(set: &[&str], value: &str) -> bool {
    set.iter().any(|s| s.eq_ignore_ascii_case(value))
}

fn all_formats() -> impl Iterator<Item = &'static str> {
    [HDF_FORMATS, NETCDF_FORMATS, COG_FORMATS, ZARR_FORMATS]
        .into_iter()
        .flatten()
        .copied()
}

fn all_extensions() -> impl Iterator<Item = &'static str> {
    [HDF_EXTENSIONS, NETCDF_EXTENSIONS, COG_EXTENSIONS, ZARR_EXTENSIONS]
        .into_iter()
        .flatten()
        .copied()
}

/// Returns true if `format` names a supported format or extension alias.
#[must_use]
pub fn is_supported_format(format: &str) -> bool {
    let format = format.trim();
    all_formats()
        .chain(all_extensions())
        .any(|f| f.eq_ignore_ascii_case(format))
}

/// Returns true if `extension` is a supported file extension.
#[must_use]
pub fn is_supported_extension(extension: &str) -> bool {
    let extension = extension.trim().trim_start_matches('.');
    all_extensions().any(|e| e.eq_ignore_ascii_case(extension))
}

/// Infers the file extension from a data URL.
///
/// Query strings and fragments are ignored, as is a trailing `/` (Zarr stores
/// are often linked as directories). Returns `None` when the last path segment
/// has no extension.
#[must_use]
pub fn infer_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

/// Checks a declared format, or failing that the extension, against the supported sets.
///
/// # Errors
///
/// Returns a human-readable reason when neither is supported.
pub fn validate(format: Option<&str>, extension: Option<&str>) -> Result<(), String> {
    match (format, extension) {
        (Some(format), _) if is_supported_format(format) => Ok(()),
        (Some(format), _) => Err(format!("format {format} is not supported")),
        (None, Some(extension)) if is_supported_extension(extension) => Ok(()),
        (None, Some(extension)) => Err(format!("extension {extension} is not supported")),
        (None, None) => Err("no declared format and no file extension".to_string()),
    }
}

/// Selects the reader backend for a supported format or extension.
///
/// The declared format takes precedence over the extension.
#[must_use]
pub fn select_backend(format: Option<&str>, extension: Option<&str>) -> Backend {
    let key = format.or(extension).unwrap_or_default().trim();
    if contains_ci(COG_FORMATS, key) || contains_ci(COG_EXTENSIONS, key) {
        Backend::Raster
    } else {
        Backend::Array
    }
}

/// Returns the allow-list for a backend.
#[must_use]
pub const fn allow_list(backend: Backend) -> &'static [&'static str] {
    match backend {
        Backend::Raster => KNOWN_BANDS,
        Backend::Array => KNOWN_VARIABLES,
    }
}

/// Picks the field to render: the first one on the backend's allow-list, else the first one.
#[must_use]
pub fn choose_field(backend: Backend, fields: &[String]) -> Option<&str> {
    let allowed = allow_list(backend);
    fields
        .iter()
        .find(|f| allowed.contains(&f.as_str()))
        .or_else(|| fields.first())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_are_case_insensitive() {
        assert!(is_supported_format("netcdf-4"));
        assert!(is_supported_format("HDF-EOS5"));
        assert!(is_supported_format("TIFF"));
        assert!(!is_supported_format("HDF-EOS2"));
        assert!(!is_supported_format("ASCII"));
    }

    #[test]
    fn extensions_only_match_extension_set() {
        assert!(is_supported_extension("nc4"));
        assert!(is_supported_extension(".h5"));
        assert!(!is_supported_extension("COG"));
        assert!(!is_supported_extension("txt"));
    }

    #[test]
    fn extension_inference() {
        assert_eq!(infer_extension("https://h/a/b.tif").as_deref(), Some("tif"));
        assert_eq!(infer_extension("s3://b/x.nc4?token=1").as_deref(), Some("nc4"));
        assert_eq!(infer_extension("s3://b/store.zarr/").as_deref(), Some("zarr"));
        assert_eq!(infer_extension("https://h/a/README"), None);
        assert_eq!(infer_extension("https://h/.hidden"), None);
    }

    #[test]
    fn validation_prefers_declared_format() {
        assert!(validate(Some("COG"), Some("txt")).is_ok());
        assert!(validate(Some("HDF-EOS2"), Some("hdf")).is_err());
        assert!(validate(None, Some("tiff")).is_ok());
        assert!(validate(None, Some("txt")).is_err());
        assert!(validate(None, None).is_err());
    }

    #[test]
    fn backend_selection() {
        assert_eq!(select_backend(Some("COG"), Some("tif")), Backend::Raster);
        assert_eq!(select_backend(None, Some("TIFF")), Backend::Raster);
        assert_eq!(select_backend(Some("netCDF-4"), Some("tif")), Backend::Array);
        assert_eq!(select_backend(None, Some("zarr")), Backend::Array);
    }

    #[test]
    fn field_choice_uses_allow_list() {
        let fields = vec!["lat".to_string(), "lon".to_string(), "Tair".to_string()];
        assert_eq!(choose_field(Backend::Array, &fields), Some("Tair"));
        assert_eq!(choose_field(Backend::Raster, &fields), Some("lat"));
        assert_eq!(choose_field(Backend::Raster, &[]), None);
    }
}
