//! Opener that shells out to `gdalinfo -json`.
//!
//! Remote URLs are read through GDAL's virtual file systems (`/vsis3/`,
//! `/vsicurl/`), signed with the provider's AWS keys or the Earthdata login. Raster files report their band descriptions; NetCDF and HDF
//! containers report one subdataset per variable. The child process is killed
//! when the open future is dropped.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{DatasetInfo, DatasetOpener, OpenRequest};
use crate::error::{Error, Result};

/// `gdalinfo` based opener.
#[derive(Debug, Clone)]
pub struct GdalInfoOpener {
    program: String,
}

impl Default for GdalInfoOpener {
    fn default() -> Self {
        Self::new("gdalinfo")
    }
}

impl GdalInfoOpener {
    /// Creates an opener invoking `program` (normally `gdalinfo`).
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Maps a data URL onto a GDAL virtual file system path.
#[must_use]
pub fn vsi_path(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("s3://") {
        format!("/vsis3/{rest}")
    } else if url.starts_with("https://") || url.starts_with("http://") {
        format!("/vsicurl/{url}")
    } else {
        url.to_string()
    }
}

/// Extracts field names from `gdalinfo -json` output.
///
/// Subdatasets win over bands: a container with subdatasets exposes its
/// variables that way and its own band list is empty or meaningless.
#[must_use]
pub fn fields_from_info(info: &Value) -> Vec<String> {
    let subdatasets = info
        .get("metadata")
        .and_then(|m| m.get("SUBDATASETS"))
        .and_then(Value::as_object);

    if let Some(subdatasets) = subdatasets {
        let mut named: Vec<(u32, String)> = subdatasets
            .iter()
            .filter_map(|(key, value)| {
                let index = key
                    .strip_prefix("SUBDATASET_")?
                    .strip_suffix("_NAME")?
                    .parse()
                    .ok()?;
                let name = value.as_str()?.rsplit(':').next()?.trim_matches('"');
                (!name.is_empty()).then(|| (index, name.to_string()))
            })
            .collect();
        if !named.is_empty() {
            named.sort_by_key(|(index, _)| *index);
            return named.into_iter().map(|(_, name)| name).collect();
        }
    }

    info.get("bands")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, band)| {
            band.get("description")
                .and_then(Value::as_str)
                .filter(|d| !d.trim().is_empty())
                .map_or_else(|| format!("Band {}", i + 1), str::to_string)
        })
        .collect()
}

/// Region of the Earthdata cloud buckets.
const EARTHDATA_REGION: &str = "us-west-2";

impl GdalInfoOpener {
    /// Builds the `gdalinfo` invocation for a request.
    ///
    /// `s3://` paths are signed with the provider's AWS keys when the request
    /// carries them; HTTP paths use the Earthdata token or login.
    fn command(&self, request: &OpenRequest<'_>) -> Command {
        let path = vsi_path(request.url);
        let mut command = Command::new(&self.program);
        command
            .arg("-json")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("GDAL_DISABLE_READDIR_ON_OPEN", "EMPTY_DIR");

        let credentials = request.credentials;
        if let Some(s3) = &credentials.s3 {
            command
                .env("AWS_ACCESS_KEY_ID", &s3.access_key_id)
                .env("AWS_SECRET_ACCESS_KEY", s3.secret_access_key.expose())
                .env("AWS_REGION", EARTHDATA_REGION);
            if let Some(token) = &s3.session_token {
                command.env("AWS_SESSION_TOKEN", token.expose());
            }
        }

        if let Some(token) = &credentials.token {
            command.env(
                "GDAL_HTTP_HEADERS",
                format!("Authorization: Bearer {}", token.expose()),
            );
        } else if let Some(userpwd) = credentials.userpwd() {
            command
                .env("GDAL_HTTP_USERPWD", userpwd)
                .env("GDAL_HTTP_AUTH", "ANY");
        }
        command
    }
}

#[async_trait]
impl DatasetOpener for GdalInfoOpener {
    async fn open(&self, request: &OpenRequest<'_>) -> Result<DatasetInfo> {
        let mut command = self.command(request);
        tracing::debug!(
            url = request.url,
            provider = ?request.provider,
            s3_keys = request.credentials.s3.is_some(),
            "running gdalinfo"
        );

        let output = command.output().await.map_err(|e| Error::Open {
            url: request.url.to_string(),
            message: format!("failed to run {}: {e}", self.program),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Open {
                url: request.url.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let info: Value = serde_json::from_slice(&output.stdout).map_err(|e| Error::Open {
            url: request.url.to_string(),
            message: format!("unreadable gdalinfo output: {e}"),
        })?;

        Ok(DatasetInfo {
            fields: fields_from_info(&info),
        })
    }
}
