//! Parsing of UMM JSON search responses.
//!
//! Records are navigated as [`serde_json::Value`] trees because the same
//! field is published as an object by some providers and as a list by others.
//! Only the envelope has a fixed shape.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{CollectionRef, GranuleRef, Link, LinkKind, TemporalExtent};

/// Related URL type of a public data link.
pub const GET_DATA: &str = "GET DATA";
/// Related URL type of an in-region data link.
pub const GET_DATA_DIRECT: &str = "GET DATA VIA DIRECT ACCESS";

/// Search response envelope.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Total hits.
    #[serde(default)]
    pub hits: u64,
    /// Raw items.
    #[serde(default)]
    pub items: Vec<Value>,
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().filter(|s| !s.trim().is_empty())
}

/// Returns the object itself, or the first element when it is a list.
fn first_entry(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(value),
        _ => None,
    }
}

/// Parses a collection record.
///
/// # Errors
///
/// Returns an error if the record has no `meta.concept-id`.
pub fn parse_collection(item: &Value) -> Result<CollectionRef> {
    let concept_id = str_at(item, &["meta", "concept-id"])
        .ok_or_else(|| Error::catalog("collection record without meta.concept-id"))?;
    let umm = item.get("umm").unwrap_or(&Value::Null);

    let file_format = umm
        .get("ArchiveAndDistributionInformation")
        .and_then(|a| a.get("FileArchiveInformation"))
        .and_then(first_entry)
        .and_then(|f| str_at(f, &["Format"]))
        .map(str::to_string);

    let mut data_centers: Vec<String> = Vec::new();
    for dc in umm
        .get("DataCenters")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let name = str_at(dc, &["ShortName"]).unwrap_or("Unknown").to_string();
        if !data_centers.contains(&name) {
            data_centers.push(name);
        }
    }

    Ok(CollectionRef {
        concept_id: concept_id.to_string(),
        file_format,
        data_centers,
        processing_level: str_at(umm, &["ProcessingLevel", "Id"]).map(str::to_string),
    })
}

fn parse_links(umm: &Value) -> Vec<Link> {
    umm.get("RelatedUrls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let kind = match str_at(entry, &["Type"])? {
                GET_DATA => LinkKind::External,
                GET_DATA_DIRECT => LinkKind::Direct,
                _ => return None,
            };
            Some(Link {
                url: str_at(entry, &["URL"])?.to_string(),
                kind,
                subtype: str_at(entry, &["Subtype"]).map(str::to_string),
            })
        })
        .collect()
}

fn parse_temporal(umm: &Value) -> TemporalExtent {
    let temporal = umm.get("TemporalExtent").unwrap_or(&Value::Null);
    if let Some(single) = str_at(temporal, &["SingleDateTime"]) {
        return TemporalExtent::new(single, single);
    }
    TemporalExtent {
        begin: str_at(temporal, &["RangeDateTime", "BeginningDateTime"]).map(str::to_string),
        end: str_at(temporal, &["RangeDateTime", "EndingDateTime"]).map(str::to_string),
    }
}

/// Parses a granule record.
///
/// # Errors
///
/// Returns an error if the record names neither its own id nor its collection.
pub fn parse_granule(item: &Value) -> Result<GranuleRef> {
    let umm = item.get("umm").unwrap_or(&Value::Null);

    let collection_concept_id = str_at(item, &["meta", "collection-concept-id"])
        .ok_or_else(|| Error::catalog("granule record without meta.collection-concept-id"))?;
    let granule_id = str_at(item, &["meta", "concept-id"])
        .or_else(|| str_at(umm, &["GranuleUR"]))
        .ok_or_else(|| Error::catalog("granule record without concept id or GranuleUR"))?;

    let format = umm
        .get("DataGranule")
        .and_then(|d| d.get("ArchiveAndDistributionInformation"))
        .and_then(first_entry)
        .and_then(|a| str_at(a, &["Format"]))
        .map(str::to_string);

    Ok(GranuleRef {
        granule_id: granule_id.to_string(),
        collection_concept_id: collection_concept_id.to_string(),
        links: parse_links(umm),
        temporal_extent: parse_temporal(umm),
        format,
        provider_id: str_at(item, &["meta", "provider-id"]).map(str::to_string),
        raw: item.clone(),
    })
}

/// Parses a collection search body. Records that fail to parse are dropped and logged.
///
/// # Errors
///
/// Returns an error if the body is not a search envelope.
pub fn parse_collection_page(body: &[u8]) -> Result<crate::catalog::SearchPage<CollectionRef>> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let items = envelope
        .items
        .iter()
        .filter_map(|item| match parse_collection(item) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed collection record");
                None
            }
        })
        .collect();
    Ok(crate::catalog::SearchPage {
        hits: envelope.hits,
        items,
    })
}

/// Parses a granule search body. Records that fail to parse are dropped and logged.
///
/// # Errors
///
/// Returns an error if the body is not a search envelope.
pub fn parse_granule_page(body: &[u8]) -> Result<crate::catalog::SearchPage<GranuleRef>> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let items = envelope
        .items
        .iter()
        .filter_map(|item| match parse_granule(item) {
            Ok(g) => Some(g),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed granule record");
                None
            }
        })
        .collect();
    Ok(crate::catalog::SearchPage {
        hits: envelope.hits,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_fields() {
        let item = json!({
            "meta": {"concept-id": "C100-PODAAC"},
            "umm": {
                "ArchiveAndDistributionInformation": {
                    "FileArchiveInformation": [{"Format": "netCDF-4"}, {"Format": "ASCII"}]
                },
                "DataCenters": [
                    {"ShortName": "NASA/JPL/PODAAC"},
                    {"ShortName": "NASA/JPL/PODAAC"},
                    {"Roles": ["ARCHIVER"]}
                ],
                "ProcessingLevel": {"Id": "4"}
            }
        });
        let c = parse_collection(&item).unwrap();
        assert_eq!(c.concept_id, "C100-PODAAC");
        assert_eq!(c.file_format.as_deref(), Some("netCDF-4"));
        assert_eq!(c.data_centers, vec!["NASA/JPL/PODAAC", "Unknown"]);
        assert_eq!(c.data_center(), Some("NASA/JPL/PODAAC"));
        assert_eq!(c.processing_level.as_deref(), Some("4"));
    }

    #[test]
    fn collection_format_as_object() {
        let item = json!({
            "meta": {"concept-id": "C1-P"},
            "umm": {"ArchiveAndDistributionInformation": {"FileArchiveInformation": {"Format": "COG"}}}
        });
        assert_eq!(parse_collection(&item).unwrap().file_format.as_deref(), Some("COG"));
    }

    #[test]
    fn collection_without_id_is_rejected() {
        assert!(parse_collection(&json!({"umm": {}})).is_err());
    }

    #[test]
    fn granule_fields() {
        let item = json!({
            "meta": {
                "concept-id": "G9-LPCLOUD",
                "collection-concept-id": "C1-LPCLOUD",
                "provider-id": "LPCLOUD"
            },
            "umm": {
                "GranuleUR": "HLS.S30.T01.2020",
                "RelatedUrls": [
                    {"URL": "https://data/B04.tif", "Type": "GET DATA"},
                    {"URL": "s3://bucket/B04.tif", "Type": "GET DATA VIA DIRECT ACCESS"},
                    {"URL": "https://data/browse.jpg", "Type": "GET RELATED VISUALIZATION"}
                ],
                "TemporalExtent": {"RangeDateTime": {
                    "BeginningDateTime": "2020-01-01T00:00:00Z",
                    "EndingDateTime": "2020-01-01T23:59:59Z"
                }},
                "DataGranule": {"ArchiveAndDistributionInformation": [{"Format": "COG"}]}
            }
        });
        let g = parse_granule(&item).unwrap();
        assert_eq!(g.granule_id, "G9-LPCLOUD");
        assert_eq!(g.collection_concept_id, "C1-LPCLOUD");
        assert_eq!(g.links.len(), 2);
        assert_eq!(g.format.as_deref(), Some("COG"));
        assert_eq!(g.provider_id.as_deref(), Some("LPCLOUD"));
        assert_eq!(
            g.temporal_extent.as_interval(),
            "2020-01-01T00:00:00Z/2020-01-01T23:59:59Z"
        );
    }

    #[test]
    fn granule_id_falls_back_to_granule_ur() {
        let item = json!({
            "meta": {"collection-concept-id": "C1-P"},
            "umm": {"GranuleUR": "file-001"}
        });
        let g = parse_granule(&item).unwrap();
        assert_eq!(g.granule_id, "file-001");
        assert!(g.temporal_extent.is_empty());
    }

    #[test]
    fn page_parsing_skips_bad_records() {
        let body = json!({
            "hits": 42,
            "items": [
                {"meta": {"concept-id": "C1-P"}, "umm": {}},
                {"meta": {}, "umm": {}}
            ]
        });
        let page = parse_collection_page(body.to_string().as_bytes()).unwrap();
        assert_eq!(page.hits, 42);
        assert_eq!(page.items.len(), 1);
        assert!(parse_collection_page(b"not json").is_err());
    }
}
