//! Loads the patient questionnaire and blood-test measurements.

use std::fs;
use std::path::{Path, PathBuf};

use std::ops::RangeInclusive;

use anyhow::{Context as _, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::context::Context;
use crate::core::stage::{Outcome, Stage, StageSpec};
use crate::nutrition::types::{IntakeProfile, PatientHealthData};
use crate::nutrition::{PATIENT_DATA_KEY, PATIENT_DATA_STAGE};

const AGE_YEARS: RangeInclusive<u32> = 2..=120;
const HEIGHT_CM: RangeInclusive<f64> = 50.0..=260.0;
const WEIGHT_KG: RangeInclusive<f64> = 10.0..=400.0;

pub struct IntakeStage {
    spec: StageSpec,
    questionnaire_path: PathBuf,
    measurements_path: PathBuf,
}

impl IntakeStage {
    pub fn new(
        questionnaire_path: impl Into<PathBuf>,
        measurements_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            spec: StageSpec::new(PATIENT_DATA_STAGE, &[], PATIENT_DATA_KEY),
            questionnaire_path: questionnaire_path.into(),
            measurements_path: measurements_path.into(),
        }
    }

    #[instrument(skip_all, fields(questionnaire = %self.questionnaire_path.display()))]
    fn load(&self) -> Result<PatientHealthData> {
        let questionnaire = read_json(&self.questionnaire_path)?;
        let measurements = read_json(&self.measurements_path)?;
        let profile: IntakeProfile = serde_json::from_value(questionnaire.clone())
            .with_context(|| {
                format!(
                    "questionnaire {} lacks patient details",
                    self.questionnaire_path.display()
                )
            })?;
        check_anthropometrics(&profile).with_context(|| {
            format!(
                "questionnaire {} has implausible patient details",
                self.questionnaire_path.display()
            )
        })?;
        debug!(
            age = profile.age,
            conditions = profile.conditions.len(),
            allergies = profile.allergies.len(),
            "patient profile loaded"
        );
        Ok(PatientHealthData {
            questionnaire,
            measurements,
            profile,
        })
    }
}

impl Stage for IntakeStage {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn execute(&self, _ctx: &Context) -> Outcome {
        self.load()
            .and_then(|data| serde_json::to_value(data).context("serialize patient data"))
            .map(|value| Outcome::produced(PATIENT_DATA_KEY, value))
            .into()
    }
}

/// Energy targets are only meaningful inside these ranges.
fn check_anthropometrics(profile: &IntakeProfile) -> Result<()> {
    if !AGE_YEARS.contains(&profile.age) {
        bail!("age {} is outside {AGE_YEARS:?}", profile.age);
    }
    if !HEIGHT_CM.contains(&profile.height_cm) {
        bail!("height {} cm is outside {HEIGHT_CM:?}", profile.height_cm);
    }
    if !WEIGHT_KG.contains(&profile.weight_kg) {
        bail!("weight {} kg is outside {WEIGHT_KG:?}", profile.weight_kg);
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!("file not found: {}", path.display()));
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid JSON in {}", path.display()))
}
