//! Outcome taxonomy for a collection assessment.
//!
//! Every unit ends in exactly one [`Outcome`], or in no outcome when it was
//! classified but never probed. Labels are stable: they appear in result
//! object keys and in the exported report, so renaming one orphans stored data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Why, or whether, a collection can be tiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A tile was rendered.
    Success,
    /// Neither the declared format nor the file extension is supported.
    UnsupportedFormat,
    /// The sampled file could not be opened.
    CantOpenFile,
    /// The file opened but exposed no named fields.
    CantExtractVariables,
    /// No data link could be resolved from the granule.
    FailedToExtractUrl,
    /// The collection has no granules.
    NoGranuleFound,
    /// The tiling backend failed to render the probe tile.
    TileGenerationFailed,
    /// The unit exceeded its wall-clock deadline.
    Timeout,
    /// Catch-all for classification errors not otherwise categorized.
    FailedToExtract,
}

impl Outcome {
    /// All outcomes, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Success,
        Self::UnsupportedFormat,
        Self::CantOpenFile,
        Self::CantExtractVariables,
        Self::FailedToExtractUrl,
        Self::NoGranuleFound,
        Self::TileGenerationFailed,
        Self::Timeout,
        Self::FailedToExtract,
    ];

    /// Returns the stable label used in keys and reports.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::UnsupportedFormat => "unsupported_format",
            Self::CantOpenFile => "cant_open_file",
            Self::CantExtractVariables => "cant_extract_variables",
            Self::FailedToExtractUrl => "failed_to_extract_url",
            Self::NoGranuleFound => "no_granule_found",
            Self::TileGenerationFailed => "tile_generation_failed",
            Self::Timeout => "timeout",
            Self::FailedToExtract => "failed_to_extract",
        }
    }

    /// Returns true for the success outcome.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if an assessment carrying this outcome must not be probed.
    ///
    /// These are decided by classification (or are already a success);
    /// probing again would overwrite a definitive verdict.
    #[must_use]
    pub const fn blocks_probe(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::UnsupportedFormat
                | Self::CantOpenFile
                | Self::CantExtractVariables
                | Self::FailedToExtractUrl
                | Self::NoGranuleFound
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|o| o.as_label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown outcome: {s}"))
    }
}
