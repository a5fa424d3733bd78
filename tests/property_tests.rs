/// Property-based tests using proptest
/// Tests invariants of feature derivation and scoring for arbitrary inputs
use proptest::prelude::*;
use risk_scoring_api::features::{DerivedRatios, RiskBand};
use risk_scoring_api::forest::{median, RandomForest};
use risk_scoring_api::models::ForestSettings;

// Property: derived ratios follow their defining formulas
proptest! {
    #[test]
    fn ratios_match_formulas(
        annuity in 0.0f64..1e6,
        income in 1.0f64..1e7,
        credit in 1.0f64..1e7,
        days_birth in -40000i64..=0,
        years_worked in 0.1f64..60.0
    ) {
        let ratios = DerivedRatios::compute(annuity, income, credit, days_birth, years_worked).unwrap();

        prop_assert_eq!(ratios.annuity_income_perc, annuity / income);
        prop_assert_eq!(ratios.income_credit_perc, income / credit);
        prop_assert_eq!(ratios.payment_rate, annuity / credit);
        prop_assert!(ratios.days_employed_perc >= 0.0);
        prop_assert!(ratios.days_employed_perc.is_finite());
    }

    #[test]
    fn non_positive_denominators_are_rejected(income in -1e6f64..=0.0) {
        prop_assert!(DerivedRatios::compute(1.0, income, 1.0, -7000, 1.0).is_err());
        prop_assert!(DerivedRatios::compute(1.0, 1.0, income, -7000, 1.0).is_err());
        prop_assert!(DerivedRatios::compute(1.0, 1.0, 1.0, -7000, income).is_err());
    }
}

// Property: bands are monotone in the default probability
proptest! {
    #[test]
    fn riskier_scores_never_get_a_safer_band(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        // VeryHigh is declared first, so a riskier band compares lower
        prop_assert!(rank(RiskBand::from_score(high)) <= rank(RiskBand::from_score(low)));
    }

    #[test]
    fn median_lies_within_range(mut values in proptest::collection::vec(-1e6f64..1e6, 1..50)) {
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let m = median(&mut values).unwrap();
        prop_assert!(m >= min && m <= max);
    }
}

fn rank(band: RiskBand) -> u8 {
    match band {
        RiskBand::VeryHigh => 0,
        RiskBand::High => 1,
        RiskBand::Medium => 2,
        RiskBand::Low => 3,
        RiskBand::VeryLow => 4,
    }
}

// Property: forest probabilities are a distribution for any query
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn probabilities_sum_to_one(
        query in proptest::collection::vec(-10.0f64..10.0, 3),
        seed in 0u64..1000
    ) {
        let x: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![i as f64 / 10.0 - 1.5, (i % 4) as f64, (i % 7) as f64])
            .collect();
        let y: Vec<u8> = (0..30).map(|i| u8::from(i < 12)).collect();
        let settings = ForestSettings {
            n_estimators: 3,
            random_state: seed,
            max_depth: None,
        };

        let forest = RandomForest::fit(&x, &y, &settings).unwrap();
        let [p0, p1] = forest.predict_proba(&query).unwrap();

        prop_assert!((0.0..=1.0).contains(&p1));
        prop_assert!((p0 + p1 - 1.0).abs() < 1e-12);
    }
}
