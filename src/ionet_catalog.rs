//! Static io.net mapping tables.
//!
//! Unique responsibility: translate caller-facing instance types and region
//! names into the provider's hardware ids and location ids.
//!
//! Unknown keys are hard errors; there is no fallback entry.

use thiserror::Error;

/// Provider hardware configuration for an instance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareConfig {
    /// io.net hardware id.
    pub hardware_id: u32,
    /// GPUs attached to each VM.
    pub gpus_per_vm: u32,
}

const fn hw(hardware_id: u32, gpus_per_vm: u32) -> HardwareConfig {
    HardwareConfig {
        hardware_id,
        gpus_per_vm,
    }
}

/// Instance type -> hardware configuration.
const INSTANCE_TYPES: &[(&str, HardwareConfig)] = &[
    ("ionet-h100-1x", hw(1, 1)),
    ("ionet-h100-2x", hw(1, 2)),
    ("ionet-h100-4x", hw(1, 4)),
    ("ionet-h100-8x", hw(1, 8)),
    ("ionet-a100-1x", hw(2, 1)),
    ("ionet-a100-2x", hw(2, 2)),
    ("ionet-a100-4x", hw(2, 4)),
    ("ionet-a100-8x", hw(2, 8)),
    ("ionet-rtx4090-1x", hw(3, 1)),
    ("ionet-rtx4090-2x", hw(3, 2)),
    ("ionet-rtx4090-4x", hw(3, 4)),
];

/// Region name -> io.net location id.
const REGIONS: &[(&str, u32)] = &[
    ("us-east-1", 1),
    ("us-west-1", 2),
    ("eu-west-1", 3),
    ("ap-southeast-1", 4),
];

/// Lookup failure in the mapping tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Instance type not in the table.
    #[error("unsupported instance type: {0}")]
    UnsupportedInstanceType(String),
    /// Region not in the table.
    #[error("unsupported region: {0}")]
    UnsupportedRegion(String),
}

/// Resolve an instance type to its hardware configuration.
///
/// # Errors
///
/// Returns [`CatalogError::UnsupportedInstanceType`] for unknown types.
pub fn hardware_for_instance_type(instance_type: &str) -> Result<HardwareConfig, CatalogError> {
    INSTANCE_TYPES
        .iter()
        .find(|(name, _)| *name == instance_type)
        .map(|(_, cfg)| *cfg)
        .ok_or_else(|| CatalogError::UnsupportedInstanceType(instance_type.to_string()))
}

/// Resolve a region name to an io.net location id.
///
/// # Errors
///
/// Returns [`CatalogError::UnsupportedRegion`] for unknown regions.
pub fn location_for_region(region: &str) -> Result<u32, CatalogError> {
    REGIONS
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, id)| *id)
        .ok_or_else(|| CatalogError::UnsupportedRegion(region.to_string()))
}

/// All known instance types, in table order.
pub fn instance_types() -> impl Iterator<Item = &'static str> {
    INSTANCE_TYPES.iter().map(|(name, _)| *name)
}

/// All known region names, in table order.
pub fn regions() -> impl Iterator<Item = &'static str> {
    REGIONS.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_instance_types() {
        assert_eq!(
            hardware_for_instance_type("ionet-a100-4x"),
            Ok(HardwareConfig {
                hardware_id: 2,
                gpus_per_vm: 4
            })
        );
        assert_eq!(hardware_for_instance_type("ionet-rtx4090-1x").map(|c| c.hardware_id), Ok(3));
    }

    #[test]
    fn unknown_instance_type_is_an_error() {
        assert_eq!(
            hardware_for_instance_type("ionet-rtx4090-8x"),
            Err(CatalogError::UnsupportedInstanceType("ionet-rtx4090-8x".into()))
        );
    }

    #[test]
    fn resolves_regions() {
        assert_eq!(location_for_region("eu-west-1"), Ok(3));
        assert!(matches!(
            location_for_region("mars-1"),
            Err(CatalogError::UnsupportedRegion(r)) if r == "mars-1"
        ));
    }

    #[test]
    fn gpu_count_matches_instance_suffix() {
        for name in instance_types() {
            let cfg = hardware_for_instance_type(name).unwrap();
            let suffix = name.rsplit('-').next().unwrap().trim_end_matches('x');
            assert_eq!(suffix.parse::<u32>().unwrap(), cfg.gpus_per_vm, "{name}");
        }
        assert_eq!(regions().count(), 4);
    }
}
