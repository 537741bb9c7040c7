//! Observation sources and the farm directory.
//!
//! Both are external services in production: the data processing pipeline
//! supplies validated observations, the Farm/User service supplies profiles
//! and thresholds. The traits here are the seams; the implementations are
//! what the standalone binary and the tests plug in.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::{DirectoryError, SourceError};
use crate::types::{FarmId, FarmProfile, Observation};

// ============================================================================
// Snapshot source
// ============================================================================

/// Supplies the raw observations for one farm and cycle.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn observations(&self, farm_id: &str, as_of: DateTime<Utc>) -> Result<Vec<Observation>, SourceError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

/// Fixed observations per farm, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticSource {
    observations: RwLock<HashMap<FarmId, Vec<Observation>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, farm_id: &str, observations: Vec<Observation>) {
        let mut map = self.observations.write().unwrap_or_else(|poisoned| {
            warn!("Static source lock poisoned, recovering");
            poisoned.into_inner()
        });
        map.insert(farm_id.to_string(), observations);
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn observations(&self, farm_id: &str, _as_of: DateTime<Utc>) -> Result<Vec<Observation>, SourceError> {
        let map = self.observations.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        match map.get(farm_id) {
            Some(obs) if !obs.is_empty() => Ok(obs.clone()),
            _ => Err(SourceError::NoData(farm_id.to_string())),
        }
    }

    fn source_name(&self) -> &str {
        "static"
    }
}

// ============================================================================
// Simulated source
// ============================================================================

/// Weather pattern a simulated farm is stuck in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Dry,
    Cold,
    Wet,
    Hot,
    Humid,
    Mild,
}

impl Regime {
    const ALL: [Regime; 6] = [
        Regime::Dry,
        Regime::Cold,
        Regime::Wet,
        Regime::Hot,
        Regime::Humid,
        Regime::Mild,
    ];

    /// Stable regime per farm id.
    pub fn for_farm(farm_id: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        farm_id.hash(&mut hasher);
        Self::ALL[(hasher.finish() % Self::ALL.len() as u64) as usize]
    }

    /// Mean value and noise sigma per feature.
    fn profile(self) -> [(&'static str, f64, f64); 11] {
        let (moisture, rain, forecast_rain, min_t, max_t, fc_min, fc_max, humidity, wetness, gdd) = match self {
            Regime::Dry => (14.0, 0.5, 1.0, 12.0, 31.0, 11.0, 33.0, 35.0, 1.0, 260.0),
            Regime::Cold => (38.0, 3.0, 4.0, 1.0, 9.0, -3.5, 8.0, 70.0, 5.0, 60.0),
            Regime::Wet => (82.0, 45.0, 130.0, 11.0, 19.0, 10.0, 18.0, 92.0, 12.0, 180.0),
            Regime::Hot => (30.0, 1.0, 2.0, 22.0, 38.0, 23.0, 40.5, 40.0, 1.0, 380.0),
            Regime::Humid => (55.0, 12.0, 18.0, 17.0, 27.0, 17.0, 28.0, 94.0, 15.0, 470.0),
            Regime::Mild => (42.0, 8.0, 12.0, 9.0, 22.0, 8.0, 23.0, 62.0, 3.0, 200.0),
        };
        [
            ("soil_moisture_pct", moisture, 3.0),
            ("rainfall_mm", rain, 1.5),
            ("forecast_rain_mm", forecast_rain, 4.0),
            ("min_temp_c", min_t, 1.0),
            ("max_temp_c", max_t, 1.0),
            ("forecast_min_temp_c", fc_min, 1.0),
            ("forecast_max_temp_c", fc_max, 1.0),
            ("humidity_pct", humidity, 4.0),
            ("leaf_wetness_hours", wetness, 1.0),
            ("growing_degree_days", gdd, 15.0),
            ("mean_temp_c", (min_t + max_t) / 2.0, 0.8),
        ]
    }
}

/// Synthetic multi-station observations for demos and soak runs.
///
/// Output is deterministic for a given seed, farm and hour.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    seed: u64,
    stations: usize,
}

impl SimulatedSource {
    pub fn new(seed: u64, stations: usize) -> Self {
        Self {
            seed,
            stations: stations.max(1),
        }
    }

    fn rng_for(&self, farm_id: &str, as_of: DateTime<Utc>) -> StdRng {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        farm_id.hash(&mut hasher);
        (as_of.timestamp() / 3_600).hash(&mut hasher);
        StdRng::seed_from_u64(hasher.finish())
    }
}

#[async_trait]
impl SnapshotSource for SimulatedSource {
    async fn observations(&self, farm_id: &str, as_of: DateTime<Utc>) -> Result<Vec<Observation>, SourceError> {
        let regime = Regime::for_farm(farm_id);
        let mut rng = self.rng_for(farm_id, as_of);

        let mut out = Vec::with_capacity(self.stations);
        for station in 0..self.stations {
            let mut measurements = BTreeMap::new();
            for (name, mean, sigma) in regime.profile() {
                let noise = Normal::new(0.0, sigma).map_err(|e| SourceError::Unavailable {
                    farm_id: farm_id.to_string(),
                    reason: e.to_string(),
                })?;
                let mut value = mean + noise.sample(&mut rng);
                if !name.ends_with("_c") {
                    value = value.max(0.0);
                }
                measurements.insert(name.to_string(), value);
            }
            out.push(Observation {
                farm_id: farm_id.to_string(),
                timestamp: as_of - Duration::minutes(rng.gen_range(5..90)),
                source_id: format!("sim-station-{station}"),
                measurements,
                quality_score: rng.gen_range(0.8..0.98),
            });
        }
        Ok(out)
    }

    fn source_name(&self) -> &str {
        "simulated"
    }
}

// ============================================================================
// Farm directory
// ============================================================================

/// Farm/User service lookups.
#[async_trait]
pub trait FarmDirectory: Send + Sync {
    /// Profile snapshot for one cycle. Later updates do not affect it.
    async fn profile(&self, farm_id: &str) -> Result<Arc<FarmProfile>, DirectoryError>;

    async fn farm_ids(&self) -> Result<Vec<FarmId>, DirectoryError>;
}

/// Copy-on-write profile table. Readers take an `Arc` snapshot; writers swap
/// the whole map.
#[derive(Debug, Default)]
pub struct InMemoryFarmDirectory {
    profiles: ArcSwap<BTreeMap<FarmId, Arc<FarmProfile>>>,
}

impl InMemoryFarmDirectory {
    pub fn new(profiles: impl IntoIterator<Item = FarmProfile>) -> Self {
        let map = profiles
            .into_iter()
            .map(|p| (p.farm_id.clone(), Arc::new(p)))
            .collect();
        Self {
            profiles: ArcSwap::from_pointee(map),
        }
    }

    /// Insert or replace a profile. Cycles already running keep the old one.
    pub fn upsert(&self, profile: FarmProfile) {
        self.profiles.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(profile.farm_id.clone(), Arc::new(profile.clone()));
            next
        });
    }

    pub fn len(&self) -> usize {
        self.profiles.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.load().is_empty()
    }
}

#[async_trait]
impl FarmDirectory for InMemoryFarmDirectory {
    async fn profile(&self, farm_id: &str) -> Result<Arc<FarmProfile>, DirectoryError> {
        self.profiles
            .load()
            .get(farm_id)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownFarm(farm_id.to_string()))
    }

    async fn farm_ids(&self) -> Result<Vec<FarmId>, DirectoryError> {
        Ok(self.profiles.load().keys().cloned().collect())
    }
}
