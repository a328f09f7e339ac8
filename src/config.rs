//! Decoder configuration, mirroring the options recognized by the external
//! CLI/UI/export collaborators that sit on top of this crate.

use crate::error::{Error, Result};

/// The default nesting depth [`crate::wire::WireReader`] tolerates before failing
/// with [`Error::DepthExceeded`].
pub const DEFAULT_MAX_NESTING_DEPTH: u32 = 64;

/// Which decoder to use for a payload, overriding auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingOverride {
    /// Detect the encoding from the payload's first byte and the schema registry's
    /// default encoding (see [`crate::dispatch::DecoderDispatcher`]).
    #[default]
    Auto,
    /// Always treat payloads as self-describing wire documents.
    SelfDescribing,
    /// Always treat payloads as Simple Binary Encoding.
    Sbe,
    /// Always treat payloads as the compact tagged protocol.
    CompactTagged,
}

/// Decoding options recognized throughout this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    encoding_override: EncodingOverride,
    max_nesting_depth: u32,
    include_metadata: bool,
    strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoding_override: EncodingOverride::Auto,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            include_metadata: false,
            strict: false,
        }
    }
}

impl Config {
    /// Starts building a [`Config`] from defaults: `auto` encoding, depth 64,
    /// metadata excluded, non-strict.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The configured encoding override.
    pub fn encoding_override(&self) -> EncodingOverride {
        self.encoding_override
    }

    /// The configured maximum nesting depth.
    pub fn max_nesting_depth(&self) -> u32 {
        self.max_nesting_depth
    }

    /// Whether metadata excerpts are included in the default iteration.
    pub fn include_metadata(&self) -> bool {
        self.include_metadata
    }

    /// Whether unknown type codes and unknown field ids are fatal (`true`) or
    /// recoverable (`false`).
    pub fn strict(&self) -> bool {
        self.strict
    }
}

/// Builder for [`Config`], validating option combinations at [`ConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the encoding override.
    pub fn encoding_override(mut self, value: EncodingOverride) -> Self {
        self.config.encoding_override = value;
        self
    }

    /// Sets the maximum nesting depth.
    pub fn max_nesting_depth(mut self, value: u32) -> Self {
        self.config.max_nesting_depth = value;
        self
    }

    /// Sets whether metadata excerpts are included in the default iteration.
    pub fn include_metadata(mut self, value: bool) -> Self {
        self.config.include_metadata = value;
        self
    }

    /// Sets whether unknown type codes and unknown field ids are fatal.
    pub fn strict(mut self, value: bool) -> Self {
        self.config.strict = value;
        self
    }

    /// Validates and produces the final [`Config`].
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `max_nesting_depth` is zero.
    pub fn build(self) -> Result<Config> {
        if self.config.max_nesting_depth == 0 {
            return Err(Error::Config {
                message: "max_nesting_depth must be at least 1".to_owned(),
            });
        }
        Ok(self.config)
    }
}
