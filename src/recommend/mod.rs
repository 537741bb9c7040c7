//! Recommendation Synthesizer (Stage 4)
//!
//! Turns the qualifying predictions of a `RiskAssessment` into ranked,
//! resource-feasible protective actions.
//!
//! ```text
//! score = effectiveness × crop_factor × stage_factor × feasibility / (1 + cost / cost_reference)
//! ```
//!
//! Ordering per risk type: emergencies first (deadline inside the emergency
//! window), then score descending, then quicker actions. `score_rank` keeps
//! the pure score ordering for consumers that ignore emergencies.

pub mod rules;

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use tracing::debug;

use crate::config::RecommendationConfig;
use crate::types::{
    CropProfile, EnsemblePrediction, Recommendation, ResourceConstraints, RiskAssessment, Urgency,
};
use rules::{crop_factor, stage_factor, ActionRule, RULES};

#[derive(Debug, Clone, Default)]
pub struct RecommendationSynthesizer {
    config: RecommendationConfig,
}

impl RecommendationSynthesizer {
    pub fn new(config: RecommendationConfig) -> Self {
        Self { config }
    }

    /// Recommendations for every qualifying prediction, grouped by risk type
    /// in assessment order and capped at `max_per_alert` per risk type.
    pub fn synthesize(
        &self,
        assessment: &RiskAssessment,
        crop: &CropProfile,
        resources: &ResourceConstraints,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        assessment
            .qualifying()
            .flat_map(|a| self.for_prediction(&a.prediction, crop, resources, now))
            .collect()
    }

    /// Ranked recommendations for a single prediction.
    pub fn for_prediction(
        &self,
        prediction: &EnsemblePrediction,
        crop: &CropProfile,
        resources: &ResourceConstraints,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let risk = prediction.risk_type;
        let modulation = crop_factor(risk, crop.crop_type) * stage_factor(risk, crop.growth_stage);

        let mut candidates: Vec<Recommendation> = RULES
            .iter()
            .filter(|r| r.matches(risk, crop.crop_type, crop.growth_stage))
            .filter_map(|r| self.evaluate_rule(r, prediction, crop, resources, modulation, now))
            .collect();

        // Score rank first, independent of emergencies
        candidates.sort_by(by_score);
        for (i, c) in candidates.iter_mut().enumerate() {
            c.score_rank = i + 1;
        }

        // Stable sort keeps score order inside each group
        candidates.sort_by_key(|c| !c.emergency);
        candidates.truncate(self.config.max_per_alert);

        debug!(
            risk = %risk,
            crop = %crop.crop_type,
            stage = %crop.growth_stage,
            count = candidates.len(),
            "Synthesized recommendations"
        );
        candidates
    }

    fn evaluate_rule(
        &self,
        rule: &ActionRule,
        prediction: &EnsemblePrediction,
        crop: &CropProfile,
        resources: &ResourceConstraints,
        modulation: f64,
        now: DateTime<Utc>,
    ) -> Option<Recommendation> {
        if let Some(equipment) = rule.equipment {
            if !resources.equipment.contains(&equipment) {
                return None;
            }
        }

        let area = crop.area_ha.max(0.0);
        let cost = rule.fixed_cost + rule.cost_per_ha * area;
        let labor = rule.labor_hours + rule.labor_per_ha * area;
        let water = rule.water_per_ha * area;

        let feasibility = share(resources.labor_hours, labor)
            * share(resources.water_m3, water)
            * share(resources.budget, cost);
        if feasibility <= 0.0 {
            return None;
        }

        let effectiveness = (rule.effectiveness * modulation).clamp(0.0, 1.0);
        let normalized_cost = 1.0 + cost / self.config.cost_reference.max(f64::EPSILON);
        let score = effectiveness * feasibility / normalized_cost;

        let event_time = prediction.event_time;
        let lead = Duration::minutes((rule.hours_to_implement * 60.0).round() as i64);
        let latest_start = event_time - lead;
        let deadline = if event_time <= now {
            event_time
        } else {
            latest_start.clamp(now, event_time)
        };

        let until_deadline = deadline - now;
        let emergency = until_deadline < Duration::hours(self.config.emergency_window_hours);
        let urgency = if emergency {
            Urgency::Immediate
        } else if until_deadline < Duration::hours(24) {
            Urgency::Soon
        } else {
            Urgency::Planned
        };

        Some(Recommendation {
            risk_type: prediction.risk_type,
            action: rule.action.to_string(),
            urgency,
            expected_effectiveness: effectiveness,
            cost,
            deadline,
            time_to_implement_hours: rule.hours_to_implement,
            score,
            score_rank: 0,
            emergency,
        })
    }
}

/// Fraction of a requirement that the available amount covers (0.0-1.0).
fn share(available: f64, required: f64) -> f64 {
    if required <= 0.0 {
        1.0
    } else {
        (available.max(0.0) / required).min(1.0)
    }
}

fn by_score(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.time_to_implement_hours
                .partial_cmp(&b.time_to_implement_hours)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.action.cmp(&b.action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CropType, Equipment, GrowthStage, RiskType, Severity, TimeWindow};
    use std::collections::BTreeSet;

    fn prediction(risk: RiskType, hours: i64, now: DateTime<Utc>) -> EnsemblePrediction {
        let event_time = now + Duration::hours(hours);
        EnsemblePrediction {
            risk_type: risk,
            probability: 0.8,
            severity: Severity::High,
            confidence: 0.85,
            contributing_models: vec![],
            expected_models: 2,
            time_window: TimeWindow::instant(event_time),
            event_time,
            degraded: false,
            data_quality_score: 0.9,
        }
    }

    fn crop(crop_type: CropType, growth_stage: GrowthStage) -> CropProfile {
        CropProfile { crop_type, growth_stage, area_ha: 4.0 }
    }

    fn well_equipped() -> ResourceConstraints {
        ResourceConstraints {
            budget: 2_000.0,
            labor_hours: 40.0,
            water_m3: 500.0,
            equipment: BTreeSet::from([Equipment::Irrigation, Equipment::Sprayer, Equipment::FrostFan]),
        }
    }

    #[test]
    fn sorted_by_score_with_deadlines_before_event() {
        let now = Utc::now();
        let p = prediction(RiskType::Drought, 72, now);
        let recs = RecommendationSynthesizer::default().for_prediction(
            &p,
            &crop(CropType::Wheat, GrowthStage::Vegetative),
            &well_equipped(),
            now,
        );
        assert!(!recs.is_empty());
        for pair in recs.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for r in &recs {
            assert!(r.deadline <= p.event_time);
            assert!(r.deadline >= now);
        }
        assert_eq!(recs[0].score_rank, 1);
    }

    #[test]
    fn missing_equipment_drops_candidate() {
        let now = Utc::now();
        let p = prediction(RiskType::Drought, 72, now);
        let recs = RecommendationSynthesizer::default().for_prediction(
            &p,
            &crop(CropType::Wheat, GrowthStage::Vegetative),
            &ResourceConstraints::default(),
            now,
        );
        assert!(recs.iter().all(|r| !r.action.contains("irrigation")));
        assert!(!recs.is_empty());
    }

    #[test]
    fn crop_and_stage_change_scores() {
        let now = Utc::now();
        let synth = RecommendationSynthesizer::default();
        let p = prediction(RiskType::PestOutbreak, 72, now);
        let res = well_equipped();

        let wheat = synth.for_prediction(&p, &crop(CropType::Wheat, GrowthStage::Vegetative), &res, now);
        let maize = synth.for_prediction(&p, &crop(CropType::Maize, GrowthStage::Vegetative), &res, now);
        let flowering = synth.for_prediction(&p, &crop(CropType::Wheat, GrowthStage::Flowering), &res, now);

        assert_ne!(wheat[0].score, maize[0].score);
        assert_ne!(wheat[0].score, flowering[0].score);
    }

    #[test]
    fn emergency_forced_to_front() {
        let now = Utc::now();
        // Event in 8h: 1h actions have a 7h deadline, 6h+ actions fall inside the 6h window
        let p = prediction(RiskType::Frost, 8, now);
        let recs = RecommendationSynthesizer::default().for_prediction(
            &p,
            &crop(CropType::Wheat, GrowthStage::Vegetative),
            &well_equipped(),
            now,
        );
        let first_non_emergency = recs.iter().position(|r| !r.emergency).unwrap_or(recs.len());
        assert!(recs[first_non_emergency..].iter().all(|r| !r.emergency));
        assert!(recs.iter().any(|r| r.emergency));
        assert!(recs.iter().filter(|r| r.emergency).all(|r| r.urgency == Urgency::Immediate));
    }

    #[test]
    fn budget_shortfall_reduces_score() {
        let now = Utc::now();
        let synth = RecommendationSynthesizer::default();
        let p = prediction(RiskType::Drought, 72, now);
        let c = crop(CropType::Wheat, GrowthStage::Vegetative);
        let rich = synth.for_prediction(&p, &c, &well_equipped(), now);
        let poor = synth.for_prediction(
            &p,
            &c,
            &ResourceConstraints { budget: 50.0, ..well_equipped() },
            now,
        );
        let mulch = |recs: &[Recommendation]| {
            recs.iter().find(|r| r.action.starts_with("Apply mulch")).map(|r| r.score)
        };
        assert!(mulch(&poor).unwrap() < mulch(&rich).unwrap());
    }

    #[test]
    fn capped_per_alert() {
        let now = Utc::now();
        let synth = RecommendationSynthesizer::new(RecommendationConfig {
            max_per_alert: 2,
            ..RecommendationConfig::default()
        });
        let recs = synth.for_prediction(
            &prediction(RiskType::Frost, 72, now),
            &crop(CropType::Vegetables, GrowthStage::Seedling),
            &ResourceConstraints {
                equipment: BTreeSet::from([Equipment::FrostFan, Equipment::CoverFabric, Equipment::Irrigation]),
                ..well_equipped()
            },
            now,
        );
        assert_eq!(recs.len(), 2);
    }
}
