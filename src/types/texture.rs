//! Material texture vectors supplied by the content generator.

use serde::{Deserialize, Serialize};

/// Seven bounded scalars describing how a surface feels.
///
/// `temperature` lies in [-1, 1] (cold to warm); every other field lies in
/// [0, 1]. Construction and deserialization clamp out-of-range input
/// instead of rejecting it, and fill missing or non-finite fields with
/// neutral defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "UncheckedProperties")]
pub struct PhysicalProperties {
    pub friction: f64,
    pub grain: f64,
    pub temperature: f64,
    pub resistance: f64,
    pub elasticity: f64,
    pub moisture: f64,
    pub roughness: f64,
}

impl PhysicalProperties {
    pub fn new(
        friction: f64,
        grain: f64,
        temperature: f64,
        resistance: f64,
        elasticity: f64,
        moisture: f64,
        roughness: f64,
    ) -> Self {
        Self {
            friction,
            grain,
            temperature,
            resistance,
            elasticity,
            moisture,
            roughness,
        }
        .clamped()
    }

    /// Copy with every field forced into its valid range.
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        Self {
            friction: bound(self.friction, 0.0, 1.0, defaults.friction),
            grain: bound(self.grain, 0.0, 1.0, defaults.grain),
            temperature: bound(self.temperature, -1.0, 1.0, defaults.temperature),
            resistance: bound(self.resistance, 0.0, 1.0, defaults.resistance),
            elasticity: bound(self.elasticity, 0.0, 1.0, defaults.elasticity),
            moisture: bound(self.moisture, 0.0, 1.0, defaults.moisture),
            roughness: bound(self.roughness, 0.0, 1.0, defaults.roughness),
        }
    }

    /// Temperature remapped from [-1, 1] to [0, 1].
    pub fn normalized_temperature(&self) -> f64 {
        (bound(self.temperature, -1.0, 1.0, 0.0) + 1.0) / 2.0
    }

    pub fn sandpaper() -> Self {
        Self::new(0.92, 0.95, 0.1, 0.85, 0.02, 0.0, 0.95)
    }

    pub fn silk() -> Self {
        Self::new(0.08, 0.05, 0.2, 0.1, 0.3, 0.1, 0.05)
    }

    pub fn rubber() -> Self {
        Self::new(0.7, 0.2, 0.0, 0.6, 0.9, 0.05, 0.4)
    }

    pub fn wet_stone() -> Self {
        Self::new(0.35, 0.4, -0.6, 0.95, 0.0, 0.85, 0.3)
    }
}

impl Default for PhysicalProperties {
    fn default() -> Self {
        Self {
            friction: 0.5,
            grain: 0.5,
            temperature: 0.0,
            resistance: 0.5,
            elasticity: 0.5,
            moisture: 0.5,
            roughness: 0.5,
        }
    }
}

fn bound(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Wire form accepted from the generator before clamping.
#[derive(Deserialize)]
#[serde(default)]
struct UncheckedProperties {
    friction: f64,
    grain: f64,
    temperature: f64,
    resistance: f64,
    elasticity: f64,
    moisture: f64,
    roughness: f64,
}

impl Default for UncheckedProperties {
    fn default() -> Self {
        let d = PhysicalProperties::default();
        Self {
            friction: d.friction,
            grain: d.grain,
            temperature: d.temperature,
            resistance: d.resistance,
            elasticity: d.elasticity,
            moisture: d.moisture,
            roughness: d.roughness,
        }
    }
}

impl From<UncheckedProperties> for PhysicalProperties {
    fn from(raw: UncheckedProperties) -> Self {
        PhysicalProperties::new(
            raw.friction,
            raw.grain,
            raw.temperature,
            raw.resistance,
            raw.elasticity,
            raw.moisture,
            raw.roughness,
        )
    }
}
