use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

// ============ Applicant Models ============

/// Column holding the external applicant identifier.
pub const ID_COLUMN: &str = "SK_ID_CURR";

/// Column holding the outcome label.
pub const TARGET_COLUMN: &str = "TARGET";

/// Model input columns, in the order used for feature vectors.
pub const FEATURE_NAMES: [&str; 12] = [
    "FLAG_OWN_CAR",
    "FLAG_OWN_REALTY",
    "CNT_CHILDREN",
    "AMT_INCOME_TOTAL",
    "AMT_CREDIT",
    "AMT_ANNUITY",
    "EXT_SOURCE_1",
    "DAYS_BIRTH",
    "ANNUITY_INCOME_PERC",
    "DAYS_EMPLOYED_PERC",
    "INCOME_CREDIT_PERC",
    "PAYMENT_RATE",
];

/// Number of model input columns.
pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Columns summarised as value counts rather than mean/min/max.
pub const COUNT_COLUMNS: [&str; 3] = ["FLAG_OWN_CAR", "FLAG_OWN_REALTY", "CNT_CHILDREN"];

/// Label value of an accepted (repaid) application.
pub const LABEL_ACCEPTED: u8 = 0;

/// Label value of a rejected (defaulted) application.
pub const LABEL_REJECTED: u8 = 1;

/// The twelve attributes the model scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ApplicantFeatures {
    /// Owns a car (0 or 1).
    #[serde(deserialize_with = "deserialize_flag")]
    pub flag_own_car: f64,
    /// Owns an apartment or a house (0 or 1).
    #[serde(deserialize_with = "deserialize_flag")]
    pub flag_own_realty: f64,
    pub cnt_children: f64,
    pub amt_income_total: f64,
    pub amt_credit: f64,
    pub amt_annuity: f64,
    /// External bureau score in [0, 1].
    pub ext_source_1: f64,
    /// Negative number of days since birth.
    pub days_birth: f64,
    pub annuity_income_perc: f64,
    pub days_employed_perc: f64,
    pub income_credit_perc: f64,
    pub payment_rate: f64,
}

impl ApplicantFeatures {
    /// Builds features from a vector ordered as [`FEATURE_NAMES`].
    pub fn from_vector(v: [f64; FEATURE_COUNT]) -> Self {
        Self {
            flag_own_car: v[0],
            flag_own_realty: v[1],
            cnt_children: v[2],
            amt_income_total: v[3],
            amt_credit: v[4],
            amt_annuity: v[5],
            ext_source_1: v[6],
            days_birth: v[7],
            annuity_income_perc: v[8],
            days_employed_perc: v[9],
            income_credit_perc: v[10],
            payment_rate: v[11],
        }
    }

    /// Feature vector ordered as [`FEATURE_NAMES`].
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.flag_own_car,
            self.flag_own_realty,
            self.cnt_children,
            self.amt_income_total,
            self.amt_credit,
            self.amt_annuity,
            self.ext_source_1,
            self.days_birth,
            self.annuity_income_perc,
            self.days_employed_perc,
            self.income_credit_perc,
            self.payment_rate,
        ]
    }

    /// Checks the constraints the questionnaire enforces on its widgets.
    ///
    /// Returns every violation found, or an empty list when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut issues: Vec<String> = FEATURE_NAMES
            .iter()
            .zip(self.to_vector())
            .filter(|(_, value)| !value.is_finite())
            .map(|(name, _)| format!("{} must be a finite number", name))
            .collect();

        for (name, value) in [
            ("FLAG_OWN_CAR", self.flag_own_car),
            ("FLAG_OWN_REALTY", self.flag_own_realty),
        ] {
            if value.is_finite() && value != 0.0 && value != 1.0 {
                issues.push(format!("{} must be 0 or 1", name));
            }
        }

        for (name, value) in [
            ("CNT_CHILDREN", self.cnt_children),
            ("AMT_INCOME_TOTAL", self.amt_income_total),
            ("AMT_CREDIT", self.amt_credit),
            ("AMT_ANNUITY", self.amt_annuity),
        ] {
            if value < 0.0 {
                issues.push(format!("{} cannot be negative", name));
            }
        }

        if !(0.0..=1.0).contains(&self.ext_source_1) && self.ext_source_1.is_finite() {
            issues.push("EXT_SOURCE_1 must be between 0 and 1".to_string());
        }

        if self.days_birth > 0.0 {
            issues.push("DAYS_BIRTH must be zero or negative".to_string());
        }

        issues
    }
}

/// One historical application as kept in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantRecord {
    #[serde(rename = "SK_ID_CURR")]
    pub sk_id_curr: i64,
    #[serde(flatten)]
    pub features: ApplicantFeatures,
    /// Outcome label; `None` for a record that was never decided.
    #[serde(rename = "TARGET")]
    pub target: Option<u8>,
}

/// Body of `POST /api/make_prediction`.
///
/// The front end sends its whole customer form, so the identifier and a
/// (null) label may be present; only the features are scored.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreRequest {
    #[serde(rename = "SK_ID_CURR", default)]
    pub sk_id_curr: Option<i64>,
    #[serde(flatten)]
    pub features: ApplicantFeatures,
}

/// Body of `POST /api/decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    #[serde(rename = "SK_ID_CURR")]
    pub sk_id_curr: i64,
    #[serde(flatten)]
    pub features: ApplicantFeatures,
    #[serde(rename = "TARGET")]
    pub target: u8,
}

impl DecisionRequest {
    /// Validates the request and converts it into a labelled record.
    pub fn into_record(self) -> Result<ApplicantRecord, Vec<String>> {
        let mut issues = self.features.validate();
        if self.target != LABEL_ACCEPTED && self.target != LABEL_REJECTED {
            issues.push("TARGET must be 0 or 1".to_string());
        }
        if !issues.is_empty() {
            return Err(issues);
        }

        Ok(ApplicantRecord {
            sk_id_curr: self.sk_id_curr,
            features: self.features,
            target: Some(self.target),
        })
    }
}

/// Response of `POST /api/decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub status: String,
    #[serde(rename = "SK_ID_CURR")]
    pub sk_id_curr: i64,
}

// ============ Analytics Models ============

/// One row of the feature importance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Split-oriented table (`columns`, `index`, `data`) as charted by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTable {
    pub columns: Vec<String>,
    pub index: Vec<String>,
    /// One row per index entry; `None` where a column had no values.
    pub data: Vec<Vec<Option<f64>>>,
}

/// Number of accepted records per distinct value of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCounts {
    pub name: String,
    pub index: Vec<f64>,
    pub data: Vec<u64>,
}

/// Descriptive statistics of historically accepted applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedDescription {
    /// Mean, min and max of every continuous column.
    pub summary: SplitTable,
    /// Value counts of the ownership flags and the children count.
    pub counts: Vec<ValueCounts>,
    /// Number of accepted records summarised.
    pub accepted_records: usize,
}

// ============ Model Metadata ============

/// Hyper-parameters of a forest training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestSettings {
    pub n_estimators: usize,
    pub random_state: u64,
    pub max_depth: Option<usize>,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            n_estimators: 5,
            random_state: 150,
            max_depth: None,
        }
    }
}

/// Public description of the model currently serving predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: u64,
    /// SHA-256 of the store files the model was trained on.
    pub store_fingerprint: String,
    pub trained_at: DateTime<Utc>,
    pub training_records: usize,
    pub settings: ForestSettings,
}

/// Accepts `true`/`false` as well as numbers for ownership flags.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> de::Visitor<'de> for FlagVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a boolean or a number")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<f64, E> {
            Ok(if v { 1.0 } else { 0.0 })
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}
