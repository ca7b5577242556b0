use serde::Deserialize;

use crate::tf_error::ConfigError;

/// Construction-time settings of a [`crate::PoseSynchronizer`].
///
/// ```toml
/// reference_frame = "map"
/// start_paused = true
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// tf frame the simulated world is anchored to.
    #[serde(default = "default_reference_frame")]
    pub reference_frame: String,

    /// Start with updates paused until `Resume`.
    #[serde(default)]
    pub start_paused: bool,
}

fn default_reference_frame() -> String {
    "world".to_owned()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(&default_reference_frame())
    }
}

impl SyncConfig {
    pub fn new(reference_frame: &str) -> Self {
        Self {
            reference_frame: reference_frame.to_owned(),
            start_paused: false,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the text a host passes when creating the synchronizer: the reference frame alone.
    pub fn from_create_args(args: &str) -> Result<Self, ConfigError> {
        let mut tokens = args.split_whitespace();
        let frame = tokens.next().ok_or(ConfigError::EmptyReferenceFrame)?;
        if let Some(extra) = tokens.next() {
            return Err(ConfigError::UnexpectedArgument(extra.to_owned()));
        }
        Ok(Self::new(frame))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reference_frame.trim().is_empty() {
            return Err(ConfigError::EmptyReferenceFrame);
        }
        Ok(())
    }
}
