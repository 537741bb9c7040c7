//! Protective action rule table
//!
//! Rules are keyed by (risk type, crop, growth stage); `None` matches any
//! crop or stage. Costs and inputs scale with planted area.

use crate::types::{CropType, Equipment, GrowthStage, RiskType};

#[derive(Debug, Clone, Copy)]
pub struct ActionRule {
    pub risk: RiskType,
    pub crop: Option<CropType>,
    pub stage: Option<GrowthStage>,
    pub action: &'static str,
    /// Loss reduction before crop/stage modulation (0.0-1.0)
    pub effectiveness: f64,
    pub fixed_cost: f64,
    pub cost_per_ha: f64,
    pub labor_hours: f64,
    pub labor_per_ha: f64,
    pub water_per_ha: f64,
    pub equipment: Option<Equipment>,
    pub hours_to_implement: f64,
}

impl ActionRule {
    pub fn matches(&self, risk: RiskType, crop: CropType, stage: GrowthStage) -> bool {
        self.risk == risk
            && self.crop.map_or(true, |c| c == crop)
            && self.stage.map_or(true, |s| s == stage)
    }
}

const fn rule(risk: RiskType, action: &'static str, effectiveness: f64, hours_to_implement: f64) -> ActionRule {
    ActionRule {
        risk,
        crop: None,
        stage: None,
        action,
        effectiveness,
        fixed_cost: 0.0,
        cost_per_ha: 0.0,
        labor_hours: 0.0,
        labor_per_ha: 0.0,
        water_per_ha: 0.0,
        equipment: None,
        hours_to_implement,
    }
}

pub static RULES: &[ActionRule] = &[
    // ---- Drought ----
    ActionRule {
        equipment: Some(Equipment::Irrigation),
        cost_per_ha: 40.0,
        water_per_ha: 25.0,
        labor_hours: 2.0,
        labor_per_ha: 0.5,
        ..rule(RiskType::Drought, "Schedule deficit irrigation", 0.75, 6.0)
    },
    ActionRule {
        cost_per_ha: 60.0,
        labor_per_ha: 3.0,
        ..rule(RiskType::Drought, "Apply mulch to conserve soil moisture", 0.45, 12.0)
    },
    ActionRule {
        crop: Some(CropType::Maize),
        stage: Some(GrowthStage::Flowering),
        equipment: Some(Equipment::Irrigation),
        cost_per_ha: 55.0,
        water_per_ha: 35.0,
        labor_hours: 2.0,
        labor_per_ha: 0.5,
        ..rule(RiskType::Drought, "Prioritise irrigation ahead of silking", 0.85, 4.0)
    },
    ActionRule {
        crop: Some(CropType::Rice),
        water_per_ha: 50.0,
        labor_per_ha: 1.0,
        cost_per_ha: 20.0,
        ..rule(RiskType::Drought, "Hold shallow standing water in paddies", 0.7, 8.0)
    },
    ActionRule {
        labor_hours: 1.0,
        ..rule(RiskType::Drought, "Defer fertiliser application until rain", 0.2, 1.0)
    },
    // ---- Frost ----
    ActionRule {
        equipment: Some(Equipment::FrostFan),
        fixed_cost: 80.0,
        cost_per_ha: 15.0,
        labor_hours: 3.0,
        ..rule(RiskType::Frost, "Run frost fans overnight", 0.7, 2.0)
    },
    ActionRule {
        equipment: Some(Equipment::Irrigation),
        water_per_ha: 40.0,
        cost_per_ha: 25.0,
        labor_hours: 4.0,
        ..rule(RiskType::Frost, "Run over-crop sprinklers through the cold hours", 0.65, 3.0)
    },
    ActionRule {
        stage: Some(GrowthStage::Seedling),
        equipment: Some(Equipment::CoverFabric),
        cost_per_ha: 90.0,
        labor_per_ha: 4.0,
        ..rule(RiskType::Frost, "Cover seedlings with frost fabric", 0.8, 6.0)
    },
    ActionRule {
        crop: Some(CropType::Vegetables),
        cost_per_ha: 70.0,
        labor_per_ha: 5.0,
        ..rule(RiskType::Frost, "Cover beds with row covers or straw", 0.6, 5.0)
    },
    ActionRule {
        crop: Some(CropType::Orchard),
        stage: Some(GrowthStage::Flowering),
        equipment: Some(Equipment::FrostFan),
        fixed_cost: 120.0,
        cost_per_ha: 30.0,
        labor_hours: 6.0,
        ..rule(RiskType::Frost, "Protect blossoms with fans and orchard heaters", 0.8, 3.0)
    },
    ActionRule {
        stage: Some(GrowthStage::Seedling),
        labor_hours: 1.0,
        ..rule(RiskType::Frost, "Delay transplanting until the cold spell passes", 0.5, 1.0)
    },
    ActionRule {
        labor_per_ha: 0.5,
        water_per_ha: 10.0,
        ..rule(RiskType::Frost, "Irrigate the day before to store soil heat", 0.35, 8.0)
    },
    // ---- Flood ----
    ActionRule {
        labor_hours: 6.0,
        labor_per_ha: 0.5,
        ..rule(RiskType::Flood, "Clear drainage channels and culverts", 0.5, 8.0)
    },
    ActionRule {
        equipment: Some(Equipment::DrainagePump),
        fixed_cost: 60.0,
        cost_per_ha: 10.0,
        labor_hours: 4.0,
        ..rule(RiskType::Flood, "Stage pumps to drain low-lying fields", 0.7, 4.0)
    },
    ActionRule {
        stage: Some(GrowthStage::Maturity),
        cost_per_ha: 45.0,
        labor_per_ha: 6.0,
        ..rule(RiskType::Flood, "Harvest mature crop early", 0.75, 12.0)
    },
    ActionRule {
        crop: Some(CropType::Rice),
        labor_per_ha: 3.0,
        cost_per_ha: 15.0,
        ..rule(RiskType::Flood, "Raise and reinforce paddy bunds", 0.6, 10.0)
    },
    ActionRule {
        labor_hours: 2.0,
        ..rule(RiskType::Flood, "Move inputs and machinery to high ground", 0.25, 2.0)
    },
    // ---- Heat stress ----
    ActionRule {
        equipment: Some(Equipment::Irrigation),
        water_per_ha: 20.0,
        cost_per_ha: 20.0,
        labor_hours: 2.0,
        ..rule(RiskType::HeatStress, "Irrigate early morning to cool the canopy", 0.6, 4.0)
    },
    ActionRule {
        equipment: Some(Equipment::ShadeNet),
        cost_per_ha: 50.0,
        labor_per_ha: 3.0,
        ..rule(RiskType::HeatStress, "Deploy shade nets over sensitive beds", 0.7, 6.0)
    },
    ActionRule {
        stage: Some(GrowthStage::Flowering),
        cost_per_ha: 12.0,
        labor_per_ha: 1.0,
        ..rule(RiskType::HeatStress, "Apply kaolin or anti-transpirant spray", 0.45, 6.0)
    },
    rule(RiskType::HeatStress, "Move field work to the cooler hours", 0.2, 1.0),
    // ---- Pest outbreak ----
    ActionRule {
        cost_per_ha: 8.0,
        labor_hours: 2.0,
        labor_per_ha: 0.3,
        ..rule(RiskType::PestOutbreak, "Scout fields and set pheromone traps", 0.4, 4.0)
    },
    ActionRule {
        equipment: Some(Equipment::Sprayer),
        cost_per_ha: 45.0,
        labor_per_ha: 0.5,
        ..rule(RiskType::PestOutbreak, "Release or spray biological control agents", 0.6, 8.0)
    },
    ActionRule {
        equipment: Some(Equipment::Sprayer),
        cost_per_ha: 70.0,
        labor_per_ha: 0.5,
        ..rule(RiskType::PestOutbreak, "Apply approved insecticide at action threshold", 0.8, 6.0)
    },
    ActionRule {
        crop: Some(CropType::Orchard),
        cost_per_ha: 30.0,
        labor_per_ha: 2.0,
        ..rule(RiskType::PestOutbreak, "Band trunks and remove infested fruit", 0.5, 10.0)
    },
    // ---- Fungal disease ----
    ActionRule {
        equipment: Some(Equipment::Sprayer),
        cost_per_ha: 55.0,
        labor_per_ha: 0.5,
        ..rule(RiskType::FungalDisease, "Apply protective fungicide before the wet spell", 0.75, 6.0)
    },
    ActionRule {
        crop: Some(CropType::Orchard),
        labor_per_ha: 6.0,
        ..rule(RiskType::FungalDisease, "Prune to open the canopy for airflow", 0.45, 16.0)
    },
    ActionRule {
        labor_hours: 1.0,
        ..rule(RiskType::FungalDisease, "Stop overhead irrigation to keep foliage dry", 0.35, 1.0)
    },
    ActionRule {
        crop: Some(CropType::Vegetables),
        labor_per_ha: 2.0,
        ..rule(RiskType::FungalDisease, "Remove and destroy infected leaves", 0.4, 4.0)
    },
];

/// How much of a rule's effectiveness carries over to this crop.
///
/// Every crop gets a distinct factor so two farms that differ only in crop
/// never score identically.
pub fn crop_factor(risk: RiskType, crop: CropType) -> f64 {
    let base = match crop {
        CropType::Maize => 0.92,
        CropType::Wheat => 0.88,
        CropType::Rice => 0.84,
        CropType::Soybean => 0.90,
        CropType::Vegetables => 0.96,
        CropType::Orchard => 0.80,
    };
    // Tall perennial canopies are harder to protect from frost
    if risk == RiskType::Frost && crop == CropType::Orchard {
        base * 0.9
    } else {
        base
    }
}

/// How much of a rule's effectiveness carries over at this growth stage.
///
/// Later stages leave less of the yield to protect. Distinct per stage.
pub fn stage_factor(risk: RiskType, stage: GrowthStage) -> f64 {
    let base = match stage {
        GrowthStage::Seedling => 0.95,
        GrowthStage::Vegetative => 0.90,
        GrowthStage::Flowering => 0.86,
        GrowthStage::Fruiting => 0.78,
        GrowthStage::Maturity => 0.65,
    };
    // Flooding at maturity is exactly when early harvest pays off
    if risk == RiskType::Flood && stage == GrowthStage::Maturity {
        0.85
    } else {
        base
    }
}
