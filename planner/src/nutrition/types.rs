//! Domain types exchanged between the nutrition stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[serde(alias = "m", alias = "Male", alias = "MALE")]
    Male,
    #[serde(alias = "f", alias = "Female", alias = "FEMALE")]
    Female,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    #[default]
    Sedentary,
    #[serde(alias = "lightly_active")]
    Light,
    #[serde(alias = "moderately_active")]
    Moderate,
    VeryActive,
    #[serde(alias = "extra_active")]
    SuperActive,
}

impl ActivityLevel {
    /// TDEE multiplier applied to the basal metabolic rate.
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Sedentary => 1.2,
            Self::Light => 1.375,
            Self::Moderate => 1.55,
            Self::VeryActive => 1.725,
            Self::SuperActive => 1.9,
        }
    }

    /// Daily protein per kilogram of body weight.
    pub fn protein_g_per_kg(self) -> f64 {
        match self {
            Self::Sedentary => 0.9,
            Self::Light | Self::Moderate => 1.2,
            Self::VeryActive | Self::SuperActive => 1.8,
        }
    }
}

/// Medical conditions that change the derived targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Diabetes,
    Hypertension,
    HighCholesterol,
    KidneyDisease,
}

impl Condition {
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Diabetes => &["diabet"],
            Self::Hypertension => &["hypertension", "blood pressure"],
            Self::HighCholesterol => &["cholesterol", "hyperlipid"],
            Self::KidneyDisease => &["kidney", "renal", "ckd"],
        }
    }
}

/// Patient details decoded from the questionnaire.
///
/// Unknown questionnaire fields are ignored; the common alternative spellings
/// are accepted through aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeProfile {
    pub age: u32,
    #[serde(alias = "gender")]
    pub sex: Sex,
    #[serde(alias = "height")]
    pub height_cm: f64,
    #[serde(alias = "weight")]
    pub weight_kg: f64,
    #[serde(default, alias = "activity")]
    pub activity_level: ActivityLevel,
    #[serde(default, alias = "diet")]
    pub dietary_preference: Option<String>,
    #[serde(default, alias = "medical_conditions")]
    pub conditions: Vec<String>,
    #[serde(default, alias = "food_allergies")]
    pub allergies: Vec<String>,
}

impl IntakeProfile {
    pub fn has(&self, condition: Condition) -> bool {
        self.conditions.iter().any(|listed| {
            let listed = listed.to_lowercase();
            condition
                .keywords()
                .iter()
                .any(|keyword| listed.contains(keyword))
        })
    }
}

/// Output of the intake stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientHealthData {
    pub questionnaire: Value,
    pub measurements: Value,
    pub profile: IntakeProfile,
}

/// Share of the daily calories assigned to one meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealShare {
    pub meal: String,
    pub percent: u32,
    pub calories_kcal: f64,
}

/// Daily targets derived from the patient profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionTargets {
    pub bmr_kcal: f64,
    pub calories_kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub sodium_limit_mg: Option<u32>,
    pub fiber_min_g: Option<u32>,
    #[serde(default)]
    pub guidelines: Vec<String>,
    pub meal_distribution: Vec<MealShare>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub calories_kcal: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl std::ops::Add for Macros {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            calories_kcal: self.calories_kcal + other.calories_kcal,
            protein_g: self.protein_g + other.protein_g,
            carbs_g: self.carbs_g + other.carbs_g,
            fat_g: self.fat_g + other.fat_g,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub food: String,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    pub items: Vec<FoodItem>,
    pub totals: Macros,
}

/// The artifact under refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub meals: Vec<Meal>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MealPlan {
    pub fn daily_totals(&self) -> Macros {
        self.meals
            .iter()
            .fold(Macros::default(), |sum, meal| sum + meal.totals)
    }

    pub fn foods(&self) -> impl Iterator<Item = (&str, &FoodItem)> {
        self.meals.iter().flat_map(|meal| {
            meal.items
                .iter()
                .map(move |item| (meal.name.as_str(), item))
        })
    }
}
