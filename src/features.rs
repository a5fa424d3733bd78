//! Feature engineering done by the questionnaire before scoring.
//!
//! The form collects raw answers (birth date, income, annuity, ...); the
//! model expects the derived ratios the historical dataset was built with.

use crate::errors::AppError;
use crate::models::ApplicantFeatures;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: f64 = 365.0;

/// Raw answers of the loan questionnaire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    /// Client number, required only when saving a decision.
    #[serde(default)]
    pub sk_id_curr: Option<i64>,
    pub owns_car: bool,
    pub owns_realty: bool,
    #[serde(default)]
    pub children: u32,
    /// Yearly income.
    pub income: f64,
    /// Amount of loan demanded.
    pub credit: f64,
    /// Yearly payment of the requested loan.
    pub annuity: f64,
    /// Bureau confidence score for the acquisition of credit.
    pub ext_source: f64,
    pub birth_date: NaiveDate,
    /// Total years worked, e.g. 2.5 for two years and six months.
    pub years_worked: f64,
}

/// The four ratios derived from the raw answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedRatios {
    pub annuity_income_perc: f64,
    pub days_employed_perc: f64,
    pub income_credit_perc: f64,
    pub payment_rate: f64,
}

impl DerivedRatios {
    /// Computes the ratios from their defining formulas.
    pub fn compute(
        annuity: f64,
        income: f64,
        credit: f64,
        days_birth: i64,
        years_worked: f64,
    ) -> Result<Self, AppError> {
        for (name, value) in [
            ("income", income),
            ("credit", credit),
            ("years worked", years_worked),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(AppError::BadRequest(format!(
                    "{} must be a positive number",
                    name
                )));
            }
        }

        Ok(Self {
            annuity_income_perc: annuity / income,
            days_employed_perc: days_birth.unsigned_abs() as f64 / (years_worked * DAYS_PER_YEAR),
            income_credit_perc: income / credit,
            payment_rate: annuity / credit,
        })
    }
}

/// Days since birth as a negative count, the way the dataset stores ages.
pub fn days_birth(birth_date: NaiveDate, today: NaiveDate) -> i64 {
    -(today - birth_date).num_days()
}

impl LoanApplication {
    /// Builds the model inputs, computing ages relative to `today`.
    pub fn into_features(&self, today: NaiveDate) -> Result<ApplicantFeatures, AppError> {
        if self.birth_date > today {
            return Err(AppError::BadRequest(
                "birth date cannot be in the future".to_string(),
            ));
        }

        let days_b = days_birth(self.birth_date, today);
        let ratios =
            DerivedRatios::compute(self.annuity, self.income, self.credit, days_b, self.years_worked)?;

        Ok(ApplicantFeatures {
            flag_own_car: flag(self.owns_car),
            flag_own_realty: flag(self.owns_realty),
            cnt_children: f64::from(self.children),
            amt_income_total: self.income,
            amt_credit: self.credit,
            amt_annuity: self.annuity,
            ext_source_1: self.ext_source,
            days_birth: days_b as f64,
            annuity_income_perc: ratios.annuity_income_perc,
            days_employed_perc: ratios.days_employed_perc,
            income_credit_perc: ratios.income_credit_perc,
            payment_rate: ratios.payment_rate,
        })
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Risk band displayed next to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl RiskBand {
    /// Bands a default probability by the repayment confidence `1 - p`.
    pub fn from_score(p_default: f64) -> Self {
        let confidence = 1.0 - p_default.clamp(0.0, 1.0);
        if confidence < 0.3 {
            RiskBand::VeryHigh
        } else if confidence <= 0.5 {
            RiskBand::High
        } else if confidence <= 0.6 {
            RiskBand::Medium
        } else if confidence <= 0.8 {
            RiskBand::Low
        } else {
            RiskBand::VeryLow
        }
    }

    /// Advice shown to the operator.
    pub fn advice(&self) -> &'static str {
        match self {
            RiskBand::VeryHigh => "very high risk BE CAREFUL !",
            RiskBand::High => "high risk CAUTION, Reconsider",
            RiskBand::Medium => "medium risk, be precautious",
            RiskBand::Low => "low risk, proceed carefully",
            RiskBand::VeryLow => "very low risk, proceed without problems",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unit_annuity_and_income_give_unit_ratio() {
        let ratios = DerivedRatios::compute(1.0, 1.0, 1.0, -7018, 1.0).unwrap();
        assert_eq!(ratios.annuity_income_perc, 1.0);
        assert_eq!(ratios.income_credit_perc, 1.0);
        assert_eq!(ratios.payment_rate, 1.0);
        assert!((ratios.days_employed_perc - 19.22739726027397).abs() < 1e-12);
    }

    #[test]
    fn ratios_follow_their_formulas() {
        let ratios = DerivedRatios::compute(1500.0, 35000.0, 7000.0, -3650, 2.5).unwrap();
        assert!((ratios.annuity_income_perc - 1500.0 / 35000.0).abs() < 1e-12);
        assert!((ratios.income_credit_perc - 5.0).abs() < 1e-12);
        assert!((ratios.payment_rate - 1500.0 / 7000.0).abs() < 1e-12);
        assert!((ratios.days_employed_perc - 4.0).abs() < 1e-12);
    }

    #[test]
    fn zero_denominators_are_rejected() {
        assert!(DerivedRatios::compute(1.0, 0.0, 1.0, -1, 1.0).is_err());
        assert!(DerivedRatios::compute(1.0, 1.0, 0.0, -1, 1.0).is_err());
        assert!(DerivedRatios::compute(1.0, 1.0, 1.0, -1, 0.0).is_err());
    }

    #[test]
    fn days_birth_is_negative_age_in_days() {
        assert_eq!(days_birth(date(2004, 1, 1), date(2004, 1, 11)), -10);
        assert_eq!(days_birth(date(2000, 3, 1), date(2000, 3, 1)), 0);
    }

    #[test]
    fn application_builds_features() {
        let application = LoanApplication {
            sk_id_curr: None,
            owns_car: true,
            owns_realty: false,
            children: 2,
            income: 35000.0,
            credit: 7000.0,
            annuity: 1500.0,
            ext_source: 0.5059,
            birth_date: date(1990, 1, 1),
            years_worked: 10.0,
        };
        let features = application.into_features(date(2000, 1, 1)).unwrap();

        assert_eq!(features.flag_own_car, 1.0);
        assert_eq!(features.flag_own_realty, 0.0);
        assert_eq!(features.cnt_children, 2.0);
        assert_eq!(features.days_birth, -3652.0);
        assert!((features.days_employed_perc - 3652.0 / 3650.0).abs() < 1e-12);
        assert!(features.validate().is_empty());
    }

    #[test]
    fn future_birth_date_is_rejected() {
        let application = LoanApplication {
            sk_id_curr: None,
            owns_car: false,
            owns_realty: false,
            children: 0,
            income: 1.0,
            credit: 1.0,
            annuity: 1.0,
            ext_source: 0.5,
            birth_date: date(2030, 1, 1),
            years_worked: 1.0,
        };
        assert!(application.into_features(date(2020, 1, 1)).is_err());
    }

    #[test]
    fn risk_bands_cover_the_unit_interval() {
        assert_eq!(RiskBand::from_score(0.9), RiskBand::VeryHigh);
        assert_eq!(RiskBand::from_score(0.6), RiskBand::High);
        assert_eq!(RiskBand::from_score(0.45), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(0.3), RiskBand::Low);
        assert_eq!(RiskBand::from_score(0.1), RiskBand::VeryLow);
        assert_eq!(RiskBand::from_score(1.7), RiskBand::VeryHigh);
    }
}
