//! Farm/User service types: ThresholdConfig, CropProfile, ResourceConstraints,
//! NotificationPreferences

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{FarmId, RiskType, Severity};

// ============================================================================
// Threshold Config
// ============================================================================

/// Per-farmer risk sensitivity.
///
/// Read-only to the pipeline. A cycle takes one snapshot (`Arc<ThresholdConfig>`)
/// at start so an update mid-cycle only affects the next cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    pub farm_id: FarmId,
    /// Minimum severity to alert on, per risk type
    #[serde(default)]
    pub min_severity: BTreeMap<RiskType, Severity>,
    /// Applied to risk types not listed in `min_severity`
    #[serde(default = "default_min_severity")]
    pub default_min_severity: Severity,
    /// Version stamp
    pub updated_at: DateTime<Utc>,
}

fn default_min_severity() -> Severity {
    Severity::Medium
}

impl ThresholdConfig {
    /// Threshold for a risk type, falling back to the farm-wide default.
    pub fn threshold_for(&self, risk: RiskType) -> Severity {
        self.min_severity
            .get(&risk)
            .copied()
            .unwrap_or(self.default_min_severity)
    }

    /// Built-in set used when the Farm/User service has no thresholds.
    ///
    /// Alerts on every severity so a missing configuration never hides a risk.
    pub fn conservative_default(farm_id: &str) -> Self {
        Self {
            farm_id: farm_id.to_string(),
            min_severity: BTreeMap::new(),
            default_min_severity: Severity::Low,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

// ============================================================================
// Crop Profile
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CropType {
    Maize,
    Wheat,
    Rice,
    Soybean,
    Vegetables,
    Orchard,
}

impl std::fmt::Display for CropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CropType::Maize => write!(f, "maize"),
            CropType::Wheat => write!(f, "wheat"),
            CropType::Rice => write!(f, "rice"),
            CropType::Soybean => write!(f, "soybean"),
            CropType::Vegetables => write!(f, "vegetables"),
            CropType::Orchard => write!(f, "orchard"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    Seedling,
    Vegetative,
    Flowering,
    Fruiting,
    Maturity,
}

impl std::fmt::Display for GrowthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrowthStage::Seedling => write!(f, "seedling"),
            GrowthStage::Vegetative => write!(f, "vegetative"),
            GrowthStage::Flowering => write!(f, "flowering"),
            GrowthStage::Fruiting => write!(f, "fruiting"),
            GrowthStage::Maturity => write!(f, "maturity"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CropProfile {
    pub crop_type: CropType,
    pub growth_stage: GrowthStage,
    /// Planted area (hectares)
    pub area_ha: f64,
}

// ============================================================================
// Resource Constraints
// ============================================================================

/// Equipment a protective action may require.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    Irrigation,
    Sprayer,
    FrostFan,
    CoverFabric,
    DrainagePump,
    ShadeNet,
}

/// What the farmer can spend on mitigation this cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConstraints {
    /// Available budget (local currency)
    pub budget: f64,
    /// Available labour (person-hours)
    pub labor_hours: f64,
    /// Available water (cubic metres)
    pub water_m3: f64,
    pub equipment: BTreeSet<Equipment>,
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self {
            budget: 1_000.0,
            labor_hours: 16.0,
            water_m3: 200.0,
            equipment: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Notification Preferences
// ============================================================================

/// Delivery channel kinds. Transports are external collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Push,
    Email,
    Voice,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Push => write!(f, "push"),
            Channel::Email => write!(f, "email"),
            Channel::Voice => write!(f, "voice"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPreferences {
    /// Channels in preference order (first = primary)
    pub channels: Vec<Channel>,
    /// Language tag for alert text
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            channels: vec![Channel::Push, Channel::Sms],
            language: default_language(),
        }
    }
}

/// Everything the Farm/User service knows about a farm, as of one lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FarmProfile {
    pub farm_id: FarmId,
    /// `None` when the farmer never configured thresholds
    pub thresholds: Option<ThresholdConfig>,
    pub preferences: NotificationPreferences,
    pub crop: CropProfile,
    pub resources: ResourceConstraints,
}
