//! Deterministic meal-plan evaluator comparing totals with the targets.

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::core::context::Context;
use crate::core::stage::{Outcome, Stage, StageSpec};
use crate::core::verdict::{EvaluationVerdict, Issue, Severity};
use crate::nutrition::types::{MealPlan, NutritionTargets, PatientHealthData};
use crate::nutrition::{
    CRITIQUE_KEY, MEAL_PLAN_KEY, PATIENT_DATA_KEY, REQUIREMENTS_KEY, VALIDATOR_STAGE,
};

/// Allowed deviation of daily calories from the target.
pub const CALORIE_TOLERANCE_KCAL: f64 = 100.0;
/// Allowed relative deviation of each macronutrient.
pub const MACRO_TOLERANCE: f64 = 0.10;

pub struct TargetCheckEvaluator {
    spec: StageSpec,
}

impl TargetCheckEvaluator {
    pub fn new() -> Self {
        Self {
            spec: StageSpec::new(
                VALIDATOR_STAGE,
                &[MEAL_PLAN_KEY, REQUIREMENTS_KEY, PATIENT_DATA_KEY],
                CRITIQUE_KEY,
            ),
        }
    }

    fn run(&self, ctx: &Context) -> Result<Outcome> {
        let plan: MealPlan = ctx.get_as(MEAL_PLAN_KEY)?;
        let targets: NutritionTargets = ctx.get_as(REQUIREMENTS_KEY)?;
        let data: PatientHealthData = ctx.get_as(PATIENT_DATA_KEY)?;

        let verdict = check_plan(&plan, &targets, &data.profile.allergies);
        debug!(
            approved = verdict.approved,
            issues = verdict.issues.len(),
            "plan checked against targets"
        );
        let value = serde_json::to_value(verdict).context("serialize verdict")?;
        Ok(Outcome::produced(CRITIQUE_KEY, value))
    }
}

impl Default for TargetCheckEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for TargetCheckEvaluator {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, ctx: &Context) -> Outcome {
        self.run(ctx).into()
    }
}

/// Compare a plan with its targets; approved iff nothing was found.
pub fn check_plan(
    plan: &MealPlan,
    targets: &NutritionTargets,
    allergies: &[String],
) -> EvaluationVerdict {
    let totals = plan.daily_totals();
    let mut issues = Vec::new();

    let calorie_gap = totals.calories_kcal - targets.calories_kcal;
    if calorie_gap.abs() > CALORIE_TOLERANCE_KCAL {
        issues.push(
            Issue::new(
                "calories",
                Severity::Major,
                format!(
                    "daily calories {:.0} kcal are {:.0} kcal {} the target of {:.0} kcal",
                    totals.calories_kcal,
                    calorie_gap.abs(),
                    direction(calorie_gap),
                    targets.calories_kcal
                ),
            )
            .with_fix(format!(
                "{} portions by about {:.0} kcal",
                if calorie_gap > 0.0 { "reduce" } else { "increase" },
                calorie_gap.abs()
            )),
        );
    }

    for (category, actual, target) in [
        ("protein", totals.protein_g, targets.protein_g),
        ("carbohydrates", totals.carbs_g, targets.carbs_g),
        ("fat", totals.fat_g, targets.fat_g),
    ] {
        if target <= 0.0 {
            continue;
        }
        let gap = actual - target;
        if gap.abs() > target * MACRO_TOLERANCE {
            issues.push(
                Issue::new(
                    category,
                    Severity::Major,
                    format!(
                        "{category} {actual:.1} g is {:.0}% {} the target of {target:.1} g",
                        gap.abs() / target * 100.0,
                        direction(gap)
                    ),
                )
                .with_fix(format!("bring {category} within 10% of {target:.1} g")),
            );
        }
    }

    for (meal, item) in plan.foods() {
        let food = item.food.to_lowercase();
        for allergen in allergies {
            let allergen_lower = allergen.trim().to_lowercase();
            if !allergen_lower.is_empty() && food.contains(&allergen_lower) {
                issues.push(
                    Issue::new(
                        "allergen",
                        Severity::Critical,
                        format!("{meal} contains '{}', which matches allergy '{allergen}'", item.food),
                    )
                    .with_fix(format!("replace '{}' with an allergen-free alternative", item.food)),
                );
            }
        }
    }

    if issues.is_empty() {
        EvaluationVerdict::approve()
    } else {
        EvaluationVerdict::reject(issues)
    }
}

fn direction(gap: f64) -> &'static str {
    if gap > 0.0 { "above" } else { "below" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition::types::{FoodItem, Macros, Meal};

    fn targets() -> NutritionTargets {
        NutritionTargets {
            bmr_kcal: 1780.0,
            calories_kcal: 2759.0,
            protein_g: 96.0,
            carbs_g: 386.8,
            fat_g: 92.0,
            sodium_limit_mg: None,
            fiber_min_g: None,
            guidelines: Vec::new(),
            meal_distribution: Vec::new(),
        }
    }

    fn plan(totals: Macros, foods: &[&str]) -> MealPlan {
        MealPlan {
            meals: vec![Meal {
                name: "lunch".to_string(),
                items: foods
                    .iter()
                    .map(|food| FoodItem {
                        food: food.to_string(),
                        quantity: "1 serving".to_string(),
                    })
                    .collect(),
                totals,
            }],
            notes: None,
        }
    }

    fn on_target() -> Macros {
        Macros {
            calories_kcal: 2740.0,
            protein_g: 98.0,
            carbs_g: 380.0,
            fat_g: 90.0,
        }
    }

    #[test]
    fn plan_within_tolerances_is_approved() {
        let verdict = check_plan(&plan(on_target(), &["rice", "dal"]), &targets(), &[]);
        assert!(verdict.approved);
        assert!(verdict.issues.is_empty());
    }

    #[test]
    fn calorie_and_macro_gaps_are_major_issues() {
        let totals = Macros {
            calories_kcal: 2500.0,
            protein_g: 70.0,
            ..on_target()
        };
        let verdict = check_plan(&plan(totals, &["rice"]), &targets(), &[]);

        assert!(!verdict.approved);
        let categories: Vec<&str> = verdict.issues.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(categories, vec!["calories", "protein"]);
        assert!(verdict.issues.iter().all(|i| i.severity == Severity::Major));
        assert!(verdict.issues[0].description.contains("below"));
    }

    #[test]
    fn allergens_in_food_names_are_critical() {
        let verdict = check_plan(
            &plan(on_target(), &["Peanut chikki", "rice"]),
            &targets(),
            &["peanut".to_string()],
        );

        assert!(!verdict.approved);
        assert_eq!(verdict.issues.len(), 1);
        assert_eq!(verdict.issues[0].category, "allergen");
        assert_eq!(verdict.issues[0].severity, Severity::Critical);
    }

    #[test]
    fn verdicts_are_consistent() {
        let verdict = check_plan(&plan(Macros::default(), &[]), &targets(), &[]);
        assert!(!verdict.approved);
        assert!(verdict.is_consistent());
    }
}
