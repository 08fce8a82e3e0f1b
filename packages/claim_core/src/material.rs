//! Material vocabulary and the fixed points tariff.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Points granted for a plastic item.
pub const POINTS_PLASTIC: u32 = 20;
/// Points granted for an aluminum item.
pub const POINTS_ALUMINUM: u32 = 30;

/// A point-eligible material. Only these ever populate a claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    Plastic,
    Aluminum,
}

impl Material {
    /// Tariff for this material, fixed at claim creation.
    pub fn points(self) -> u32 {
        match self {
            Material::Plastic => POINTS_PLASTIC,
            Material::Aluminum => POINTS_ALUMINUM,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Material::Plastic => "plastic",
            Material::Aluminum => "aluminum",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classifier label after mapping to the kiosk vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Material(Material),
    /// Nothing is present in the bin area.
    Empty,
}

impl Label {
    pub fn is_empty(self) -> bool {
        matches!(self, Label::Empty)
    }

    pub fn material(self) -> Option<Material> {
        match self {
            Label::Material(m) => Some(m),
            Label::Empty => None,
        }
    }

    /// Map a raw model class name onto the vocabulary.
    ///
    /// Matching is by case-insensitive substring so that class files carrying
    /// index prefixes (`"0 plastico"`) or either language still resolve.
    /// Returns `None` for out-of-vocabulary classes, which callers drop.
    pub fn from_class_name(class_name: &str) -> Option<Label> {
        let name = class_name.trim().to_lowercase();
        if name.contains("plastic") {
            Some(Label::Material(Material::Plastic))
        } else if name.contains("alumin") {
            Some(Label::Material(Material::Aluminum))
        } else if name.contains("empty") || name.contains("vacio") || name.contains("vacío") {
            Some(Label::Empty)
        } else {
            None
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Material(m) => m.fmt(f),
            Label::Empty => f.write_str("empty"),
        }
    }
}

impl From<Material> for Label {
    fn from(material: Material) -> Self {
        Label::Material(material)
    }
}

/// Round a model score in `0.0..=1.0` to an integer percent.
pub fn confidence_percent(score: f64) -> u8 {
    (score * 100.0).round().clamp(0.0, 100.0) as u8
}
