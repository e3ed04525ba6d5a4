use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    data::bounds::{BoundsResolver, ColumnBounds},
    mechanisms::{paillier::MIN_KEY_BITS, MechanismKind},
};

/// Engine-wide settings. Every field has a default, so a TOML file only
/// needs to name what it overrides:
///
/// ```toml
/// default_dp_epsilon = 0.5
/// strict_filters = true
/// paillier_key_bits = 2048
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_dp_epsilon: f64,

    /// Echoed for HE requests; the encrypted mechanism spends no budget.
    pub default_he_epsilon: f64,
    pub default_delta: f64,

    /// Bounds for SUM/AVG when the matched rows carry no numeric value.
    pub fallback_bounds: [f64; 2],

    /// Decimal digits of released SUM/AVG/MIN/MAX values.
    pub result_precision: u32,
    pub noise_scale_precision: u32,

    /// Fail on WHERE predicates other than `column = literal` instead of
    /// dropping them.
    pub strict_filters: bool,

    pub paillier_key_bits: u64,
    pub miller_rabin_rounds: usize,

    /// Fixed-point factor for encrypted contributions.
    pub fixed_point_scale: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_dp_epsilon: 1.0,
            default_he_epsilon: 0.1,
            default_delta: 1e-5,
            fallback_bounds: [0.0, 100.0],
            result_precision: 2,
            noise_scale_precision: 3,
            strict_filters: false,
            paillier_key_bits: 1024,
            miller_rabin_rounds: 32,
            fixed_point_scale: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(contents).context("invalid engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read configuration file {}", path.display())
        })?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, eps) in [
            ("default_dp_epsilon", self.default_dp_epsilon),
            ("default_he_epsilon", self.default_he_epsilon),
        ] {
            if !(eps.is_finite() && eps > 0.0) {
                bail!("{name} must be a positive number, got {eps}");
            }
        }
        if !(self.default_delta.is_finite() && self.default_delta >= 0.0) {
            bail!(
                "default_delta must be non-negative, got {}",
                self.default_delta
            );
        }
        let [lower, upper] = self.fallback_bounds;
        if !(lower.is_finite() && upper.is_finite() && lower <= upper) {
            bail!(
                "fallback_bounds must satisfy lower <= upper, \
                 got [{lower}, {upper}]"
            );
        }
        let key_bits = self.paillier_key_bits;
        if key_bits < MIN_KEY_BITS || key_bits % 2 != 0 {
            bail!(
                "paillier_key_bits must be an even number >= {MIN_KEY_BITS}, \
                 got {}",
                self.paillier_key_bits
            );
        }
        if self.miller_rabin_rounds == 0 {
            bail!("miller_rabin_rounds must be at least 1");
        }
        if self.fixed_point_scale == 0 {
            bail!("fixed_point_scale must be at least 1");
        }
        Ok(())
    }

    pub fn bounds_resolver(&self) -> BoundsResolver {
        let [lower, upper] = self.fallback_bounds;
        BoundsResolver::new(ColumnBounds::new(lower, upper))
    }

    pub fn default_epsilon(&self, kind: MechanismKind) -> f64 {
        match kind {
            MechanismKind::Dp => self.default_dp_epsilon,
            MechanismKind::He => self.default_he_epsilon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_epsilon(MechanismKind::Dp), 1.0);
        assert_eq!(config.default_epsilon(MechanismKind::He), 0.1);
        assert_eq!(
            config.bounds_resolver().fallback,
            ColumnBounds::new(0.0, 100.0)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = EngineConfig::from_toml_str(
            "strict_filters = true\n\
             paillier_key_bits = 256\n\
             fallback_bounds = [-1.0, 1.0]\n",
        )?;
        assert!(config.strict_filters);
        assert_eq!(config.paillier_key_bits, 256);
        assert_eq!(config.fallback_bounds, [-1.0, 1.0]);
        assert_eq!(config.default_delta, 1e-5);
        assert_eq!(config.fixed_point_scale, 100);
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_values() {
        for toml in [
            "default_dp_epsilon = 0.0",
            "default_delta = -1.0",
            "fallback_bounds = [5.0, 1.0]",
            "paillier_key_bits = 100",
            "paillier_key_bits = 257",
            "miller_rabin_rounds = 0",
            "fixed_point_scale = 0",
            "unknown = \"x\"\nstrict_filters = 3",
        ] {
            assert!(EngineConfig::from_toml_str(toml).is_err(), "{toml}");
        }
    }
}
