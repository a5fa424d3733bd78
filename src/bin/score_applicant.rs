//! Scores a loan application against a running scoring service.
//!
//! Usage: `score_applicant <application.json> [--decision 0|1]`
//!
//! The JSON file holds the questionnaire answers (see `LoanApplication`).
//! With `--decision`, the operator's outcome is saved to the store afterwards.

use anyhow::Context;
use dotenvy::dotenv;
use risk_scoring_api::client::ScoringClient;
use risk_scoring_api::features::{LoanApplication, RiskBand};
use risk_scoring_api::models::DecisionRequest;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenv().ok();

    let mut args = env::args().skip(1);
    let path = args
        .next()
        .context("usage: score_applicant <application.json> [--decision 0|1]")?;
    let decision = match (args.next().as_deref(), args.next()) {
        (Some("--decision"), Some(label)) => Some(
            label
                .parse::<u8>()
                .context("--decision expects 0 (accepted) or 1 (rejected)")?,
        ),
        (None, _) => None,
        _ => anyhow::bail!("usage: score_applicant <application.json> [--decision 0|1]"),
    };

    let base_url = env::var("SCORING_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let client = ScoringClient::new(base_url)?;

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path))?;
    let application: LoanApplication =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
    let features = application.into_features(chrono::Local::now().date_naive())?;

    let score = client.score(&features).await?;
    let band = RiskBand::from_score(score);
    println!("Score = {:.4} which is {}", score, band.advice());

    let importances = client.feature_importance().await?;
    println!("\nMost influential features:");
    for row in importances.iter().take(5) {
        println!("  {:<22} {:.3}", row.feature, row.importance);
    }

    let accepted = client.accepted_description().await?;
    println!(
        "\nCompared with {} accepted applications (mean / applicant):",
        accepted.accepted_records
    );
    let applicant = serde_json::to_value(&features)?;
    for (column, mean) in accepted.summary.columns.iter().zip(&accepted.summary.data[0]) {
        let value = applicant.get(column).and_then(|v| v.as_f64());
        match (mean, value) {
            (Some(mean), Some(value)) => println!("  {:<22} {:>14.3} / {:.3}", column, mean, value),
            _ => println!("  {:<22} {:>14} / {:?}", column, "n/a", value),
        }
    }

    if let Some(target) = decision {
        let sk_id_curr = application
            .sk_id_curr
            .context("saving a decision needs sk_id_curr in the application")?;
        let saved = client
            .save_decision(&DecisionRequest {
                sk_id_curr,
                features,
                target,
            })
            .await?;
        println!("\nDecision for customer {}: {}", saved.sk_id_curr, saved.status);
    }

    Ok(())
}
