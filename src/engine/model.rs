//! Supported model sizes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Size variant of the SmolVLM2 video-instruct model.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ModelSize {
    /// 256M parameters.
    #[default]
    #[serde(rename = "256M")]
    M256,
    /// 500M parameters.
    #[serde(rename = "500M")]
    M500,
}

impl ModelSize {
    /// Every selectable size, in display order.
    pub const ALL: [Self; 2] = [Self::M256, Self::M500];

    /// Size key as shown to users.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M256 => "256M",
            Self::M500 => "500M",
        }
    }

    /// Hub identifier of the model.
    #[must_use]
    pub const fn model_id(self) -> &'static str {
        match self {
            Self::M256 => "HuggingFaceTB/SmolVLM2-256M-Video-Instruct",
            Self::M500 => "HuggingFaceTB/SmolVLM2-500M-Video-Instruct",
        }
    }

    /// Size keys, for selectors.
    #[must_use]
    pub fn choices() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == value)
            .ok_or_else(|| ChatError::UnknownModelSize(value.to_string()))
    }
}
