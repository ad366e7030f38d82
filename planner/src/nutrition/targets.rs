//! Daily calorie and macronutrient targets (Mifflin-St Jeor).

use anyhow::{Context as _, Result};
use tracing::{debug, instrument};

use crate::core::context::Context;
use crate::core::stage::{Outcome, Stage, StageSpec};
use crate::nutrition::types::{
    Condition, IntakeProfile, MealShare, NutritionTargets, PatientHealthData, Sex,
};
use crate::nutrition::{PATIENT_DATA_KEY, REQUIREMENTS_KEY, REQUIREMENTS_STAGE};

const KCAL_PER_G_PROTEIN: f64 = 4.0;
const KCAL_PER_G_CARBS: f64 = 4.0;
const KCAL_PER_G_FAT: f64 = 9.0;

const FAT_SHARE: f64 = 0.30;
const FAT_SHARE_HIGH_CHOLESTEROL: f64 = 0.25;
const CARB_SHARE_CAP_DIABETES: f64 = 0.45;
const PROTEIN_G_PER_KG_KIDNEY_CAP: f64 = 0.8;

const SODIUM_LIMIT_MG: u32 = 2300;
const FIBER_MIN_DIABETES_G: u32 = 30;
const FIBER_MIN_CHOLESTEROL_G: u32 = 25;

/// Daily calorie split, in percent.
pub const MEAL_DISTRIBUTION: [(&str, u32); 5] = [
    ("breakfast", 25),
    ("mid_morning_snack", 10),
    ("lunch", 30),
    ("evening_snack", 10),
    ("dinner", 25),
];

/// Basal metabolic rate in kcal/day.
pub fn basal_metabolic_rate(profile: &IntakeProfile) -> f64 {
    let base = 10.0 * profile.weight_kg + 6.25 * profile.height_cm - 5.0 * f64::from(profile.age);
    match profile.sex {
        Sex::Male => base + 5.0,
        Sex::Female => base - 161.0,
    }
}

#[instrument(skip_all, fields(age = profile.age, activity = ?profile.activity_level))]
pub fn derive_targets(profile: &IntakeProfile) -> NutritionTargets {
    let bmr = basal_metabolic_rate(profile);
    let calories = (bmr * profile.activity_level.multiplier()).round();

    let mut protein_per_kg = profile.activity_level.protein_g_per_kg();
    if profile.has(Condition::KidneyDisease) {
        protein_per_kg = protein_per_kg.min(PROTEIN_G_PER_KG_KIDNEY_CAP);
    }
    let protein_kcal = protein_per_kg * profile.weight_kg * KCAL_PER_G_PROTEIN;

    let fat_share = if profile.has(Condition::HighCholesterol) {
        FAT_SHARE_HIGH_CHOLESTEROL
    } else {
        FAT_SHARE
    };
    let mut fat_kcal = calories * fat_share;
    let mut carbs_kcal = (calories - protein_kcal - fat_kcal).max(0.0);

    if profile.has(Condition::Diabetes) {
        let cap = calories * CARB_SHARE_CAP_DIABETES;
        if carbs_kcal > cap {
            fat_kcal += carbs_kcal - cap;
            carbs_kcal = cap;
        }
    }

    let mut guidelines = Vec::new();
    let mut sodium_limit_mg = None;
    let mut fiber_min_g = None;
    if profile.has(Condition::Hypertension) {
        sodium_limit_mg = Some(SODIUM_LIMIT_MG);
        guidelines.push(format!("limit sodium to {SODIUM_LIMIT_MG} mg per day"));
    }
    if profile.has(Condition::Diabetes) {
        fiber_min_g = Some(FIBER_MIN_DIABETES_G);
        guidelines.push("prefer low glycemic index carbohydrates".to_string());
        guidelines.push(format!("at least {FIBER_MIN_DIABETES_G} g fibre per day"));
    }
    if profile.has(Condition::HighCholesterol) {
        fiber_min_g = Some(fiber_min_g.unwrap_or(0).max(FIBER_MIN_CHOLESTEROL_G));
        guidelines.push(format!("at least {FIBER_MIN_CHOLESTEROL_G} g fibre per day"));
        guidelines.push("limit saturated fat".to_string());
    }
    if profile.has(Condition::KidneyDisease) {
        guidelines.push(format!(
            "protein capped at {PROTEIN_G_PER_KG_KIDNEY_CAP} g/kg for kidney health"
        ));
    }

    let meal_distribution = MEAL_DISTRIBUTION
        .iter()
        .map(|&(meal, percent)| MealShare {
            meal: meal.to_string(),
            percent,
            calories_kcal: (calories * f64::from(percent) / 100.0).round(),
        })
        .collect();

    let targets = NutritionTargets {
        bmr_kcal: round1(bmr),
        calories_kcal: calories,
        protein_g: round1(protein_kcal / KCAL_PER_G_PROTEIN),
        carbs_g: round1(carbs_kcal / KCAL_PER_G_CARBS),
        fat_g: round1(fat_kcal / KCAL_PER_G_FAT),
        sodium_limit_mg,
        fiber_min_g,
        guidelines,
        meal_distribution,
    };
    debug!(
        calories = targets.calories_kcal,
        protein_g = targets.protein_g,
        carbs_g = targets.carbs_g,
        fat_g = targets.fat_g,
        "targets derived"
    );
    targets
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Deterministic requirement derivation from the intake profile.
pub struct TargetsStage {
    spec: StageSpec,
}

impl TargetsStage {
    pub fn new() -> Self {
        Self {
            spec: StageSpec::new(REQUIREMENTS_STAGE, &[PATIENT_DATA_KEY], REQUIREMENTS_KEY),
        }
    }

    fn run(&self, ctx: &Context) -> Result<Outcome> {
        let data: PatientHealthData = ctx.get_as(PATIENT_DATA_KEY)?;
        let targets = derive_targets(&data.profile);
        let value = serde_json::to_value(targets).context("serialize nutrition targets")?;
        Ok(Outcome::produced(REQUIREMENTS_KEY, value))
    }
}

impl Default for TargetsStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for TargetsStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &Context) -> Outcome {
        self.run(ctx).into()
    }
}
