//! Delay configuration and startup parameters.
//!
//! Configuration is read once per load. Out-of-range values are normalized
//! rather than rejected: an inverted range falls back to the defaults, and a
//! zero `max_wait` becomes 1 so the sampled range is never empty.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlowdiskError};

/// Default lower bound, in loop iterations.
pub const DEFAULT_MIN_WAIT: u64 = 500;

/// Default upper bound, in loop iterations.
pub const DEFAULT_MAX_WAIT: u64 = 1000;

/// Description of one startup parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    /// Name as written on the command line (`name=value`).
    pub name: &'static str,
    /// Value used when the parameter is not supplied.
    pub default: u64,
    /// Human-readable description.
    pub description: &'static str,
}

/// Startup parameters accepted by [`DelayConfig::from_params`].
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        name: "minWait",
        default: DEFAULT_MIN_WAIT,
        description: "Minimum cycle wait per disk access.",
    },
    ParamSpec {
        name: "maxWait",
        default: DEFAULT_MAX_WAIT,
        description: "Maximum cycle wait per disk access.",
    },
];

/// Bounds of the artificial delay, in busy-loop iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Minimum iterations per intercepted call.
    #[serde(default = "default_min_wait", alias = "minWait")]
    pub min_wait: u64,

    /// Maximum iterations per intercepted call.
    #[serde(default = "default_max_wait", alias = "maxWait")]
    pub max_wait: u64,
}

const fn default_min_wait() -> u64 {
    DEFAULT_MIN_WAIT
}

const fn default_max_wait() -> u64 {
    DEFAULT_MAX_WAIT
}

/// Correction applied to a configuration at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `min_wait > max_wait`; replaced by the defaults.
    InvertedRange {
        /// Supplied lower bound.
        min_wait: u64,
        /// Supplied upper bound.
        max_wait: u64,
    },
    /// `max_wait == 0`; raised to 1, leaving the interval `[0, 1)`.
    ZeroMax,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvertedRange { min_wait, max_wait } => write!(
                f,
                "invalid [minWait, maxWait] range [{min_wait}, {max_wait}] provided, \
                 normalized to [{DEFAULT_MIN_WAIT}, {DEFAULT_MAX_WAIT}]"
            ),
            Self::ZeroMax => write!(f, "maxWait set to 1, interval is now [0, 1)"),
        }
    }
}

/// Inclusive range of iteration counts a delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelayRange {
    min: u64,
    max: u64,
}

impl DelayRange {
    /// Range `[min, max]`, or `None` if `min > max`.
    #[must_use]
    pub const fn new(min: u64, max: u64) -> Option<Self> {
        if min > max { None } else { Some(Self { min, max }) }
    }

    /// Smallest iteration count.
    #[must_use]
    pub const fn min(&self) -> u64 {
        self.min
    }

    /// Largest iteration count.
    #[must_use]
    pub const fn max(&self) -> u64 {
        self.max
    }

    /// Reduce a uniformly random value into the range.
    ///
    /// `min + raw % (max - min + 1)`; the full `u64` range takes `raw` as is.
    #[must_use]
    pub const fn sample(&self, raw: u64) -> u64 {
        match (self.max - self.min).checked_add(1) {
            Some(span) => self.min + raw % span,
            None => raw,
        }
    }

    /// Returns true if `iterations` lies inside the range.
    #[must_use]
    pub const fn contains(&self, iterations: u64) -> bool {
        self.min <= iterations && iterations <= self.max
    }
}

impl fmt::Display for DelayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_WAIT, DEFAULT_MAX_WAIT)
    }
}

impl DelayConfig {
    /// Creates a configuration with explicit bounds.
    #[must_use]
    pub const fn new(min_wait: u64, max_wait: u64) -> Self {
        Self { min_wait, max_wait }
    }

    /// Apply the load-time corrections.
    ///
    /// An inverted range is checked first, so `min_wait > 0 == max_wait`
    /// falls back to the defaults rather than to `[0, 1)`.
    #[must_use]
    pub const fn normalize(self) -> (Self, Option<Normalization>) {
        if self.min_wait > self.max_wait {
            (
                Self::new(DEFAULT_MIN_WAIT, DEFAULT_MAX_WAIT),
                Some(Normalization::InvertedRange {
                    min_wait: self.min_wait,
                    max_wait: self.max_wait,
                }),
            )
        } else if self.max_wait == 0 {
            (Self::new(0, 1), Some(Normalization::ZeroMax))
        } else {
            (self, None)
        }
    }

    /// Normalize, then derive the inclusive range delays are drawn from.
    ///
    /// The range includes `max_wait`. After [`Normalization::ZeroMax`] the
    /// half-open interval `[0, 1)` leaves only 0.
    #[must_use]
    pub const fn effective_range(self) -> (DelayRange, Option<Normalization>) {
        let (config, normalization) = self.normalize();
        let range = match normalization {
            Some(Normalization::ZeroMax) => DelayRange { min: 0, max: 0 },
            _ => DelayRange {
                min: config.min_wait,
                max: config.max_wait,
            },
        };
        (range, normalization)
    }

    /// Parse `name=value` startup parameters.
    ///
    /// Values accept decimal, `0x` hexadecimal and leading-`0` octal.
    /// Unknown parameters are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SlowdiskError::Config`] if a known parameter has no value or
    /// an unparsable one.
    pub fn from_params<I, S>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for param in params {
            let param = param.as_ref().trim();
            if param.is_empty() {
                continue;
            }
            let (name, value) = match param.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (param, None),
            };
            let slot = match name {
                "minWait" | "min_wait" => &mut config.min_wait,
                "maxWait" | "max_wait" => &mut config.max_wait,
                _ => {
                    tracing::warn!("unknown parameter '{name}' ignored");
                    continue;
                }
            };
            let value = value.ok_or_else(|| SlowdiskError::config(format!("{name}: missing value")))?;
            *slot = parse_ulong(value).map_err(|e| SlowdiskError::config(format!("{name}: {e}")))?;
        }
        Ok(config)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SlowdiskError::Config`] if the document does not parse.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SlowdiskError::config(format!("failed to parse config: {e}")))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SlowdiskError::config(format!("failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }
}

/// Parse an unsigned integer with C-style base detection.
fn parse_ulong(value: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if value.len() > 1 && value.starts_with('0') {
        u64::from_str_radix(&value[1..], 8)
    } else {
        value.parse()
    }
}
