
use chrono::Duration;
use common::config::BehavioralConfig;
use mocks::{MockPatternStorage, base_time, identity};
use scoring::analyzers::{BehavioralPatternDetector, IncomingCall};
use scoring::error::ScoringError;
use scoring::model::*;
use scoring::pattern_store::PatternStore;
use scoring::storage::{ActivityStorage, InMemoryStorage};
use std::error::Error;
use std::sync::Arc;

fn detector(storage: Arc<InMemoryStorage>) -> BehavioralPatternDetector {
    let config = BehavioralConfig::default();
    let patterns = Arc::new(PatternStore::new(&config, storage.clone()));
    BehavioralPatternDetector::new(&config, storage, patterns)
}

fn call(identity_hash: &IdentityHash, minutes: i64, text: &str) -> IncomingCall {
    IncomingCall {
        identity_hash: identity_hash.clone(),
        occurred_at: base_time() + Duration::minutes(minutes),
        location: None,
        feedback_text: text.to_string(),
    }
}

const VARIED_FEEDBACK: [&str; 6] = [
    "Pho broth was rich and the herbs were fresh",
    "Waited twenty minutes for a table on Sunday",
    "Iced coffee too sweet for my taste",
    "Staff helped us choose a vegetarian dish",
    "Parking behind the shop is hard to find",
    "Bun cha portion was generous, good value",
];

#[tokio::test]
async fn six_calls_in_ten_minutes_open_a_frequency_pattern() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = Arc::new(InMemoryStorage::new());
    let detector = detector(storage.clone());
    let id = identity();

    let mut last = None;
    for (i, text) in VARIED_FEEDBACK.iter().enumerate() {
        let at = base_time() + Duration::minutes(i as i64 * 2);
        last = Some(detector.analyze(call(&id, i as i64 * 2, text), at).await?);
    }
    let outcome = last.ok_or("no calls analyzed")?;

    let frequency: Vec<&BehavioralPattern> = outcome
        .active_patterns
        .iter()
        .filter(|p| p.pattern_type == PatternType::FrequencyAbuse)
        .collect();
    assert_eq!(frequency.len(), 1);
    assert!(frequency[0].violation_count >= 1);
    assert!(frequency[0].risk_score > 0.0);
    assert!(outcome.score > 0.0 && outcome.score <= 30.0);

    assert_eq!(storage.calls_since(&id, base_time()).await?.len(), 6);
    Ok(())
}

#[tokio::test]
async fn five_calls_stay_below_the_threshold() -> Result<(), Box<dyn Error + Send + Sync>> {
    let detector = detector(Arc::new(InMemoryStorage::new()));
    let id = identity();

    for (i, text) in VARIED_FEEDBACK.iter().take(5).enumerate() {
        let outcome = detector
            .analyze(call(&id, i as i64, text), base_time() + Duration::minutes(i as i64))
            .await?;
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.detections.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn continued_abuse_escalates_one_pattern() -> Result<(), Box<dyn Error + Send + Sync>> {
    let detector = detector(Arc::new(InMemoryStorage::new()));
    let id = identity();

    let mut outcome = None;
    for i in 0..8 {
        let text = format!("{} #{}", VARIED_FEEDBACK[i % 6], i);
        outcome = Some(detector.analyze(call(&id, i as i64, &text), base_time() + Duration::minutes(i as i64)).await?);
    }
    let outcome = outcome.ok_or("no calls analyzed")?;

    let frequency = outcome
        .active_patterns
        .iter()
        .find(|p| p.pattern_type == PatternType::FrequencyAbuse)
        .ok_or("frequency pattern missing")?;
    // calls 6, 7 and 8 each trip the threshold
    assert_eq!(frequency.violation_count, 3);
    assert!(frequency.risk_score <= 30.0);
    Ok(())
}

#[tokio::test]
async fn copy_pasted_feedback_is_flagged() -> Result<(), Box<dyn Error + Send + Sync>> {
    let detector = detector(Arc::new(InMemoryStorage::new()));
    let id = identity();
    let text = "Best pho in the city, five stars, highly recommend!!!";

    let first = detector.analyze(call(&id, 0, text), base_time()).await?;
    assert!(first.detections.is_empty());

    let later = 60 * 24;
    let second = detector
        .analyze(call(&id, later, text), base_time() + Duration::minutes(later))
        .await?;

    assert_eq!(second.detections.len(), 1);
    assert_eq!(second.detections[0].pattern_type, PatternType::ContentSimilarity);
    assert_eq!(second.score, 10.0);
    Ok(())
}

#[tokio::test]
async fn impossible_travel_between_cities() -> Result<(), Box<dyn Error + Send + Sync>> {
    let detector = detector(Arc::new(InMemoryStorage::new()));
    let id = identity();

    let mut hanoi = call(&id, 0, VARIED_FEEDBACK[0]);
    hanoi.location = Some(GeoPoint::new(21.0285, 105.8542));
    detector.analyze(hanoi, base_time()).await?;

    let mut saigon = call(&id, 15, VARIED_FEEDBACK[1]);
    saigon.location = Some(GeoPoint::new(10.8231, 106.6297));
    let outcome = detector.analyze(saigon, base_time() + Duration::minutes(15)).await?;

    let pattern = outcome
        .detections
        .iter()
        .find(|p| p.pattern_type == PatternType::LocationImpossible)
        .ok_or("travel pattern missing")?;
    assert_eq!(pattern.risk_score, 30.0);
    assert!(pattern.pattern_data["speed_kmh"].as_f64().is_some_and(|s| s > 900.0));
    Ok(())
}

#[tokio::test]
async fn patterns_are_tracked_per_identity() -> Result<(), Box<dyn Error + Send + Sync>> {
    let detector = detector(Arc::new(InMemoryStorage::new()));
    let (abuser, bystander) = (identity(), identity());

    for (i, text) in VARIED_FEEDBACK.iter().enumerate() {
        detector
            .analyze(call(&abuser, i as i64, text), base_time() + Duration::minutes(i as i64))
            .await?;
    }
    let clean = detector
        .analyze(call(&bystander, 7, "Lovely lunch"), base_time() + Duration::minutes(7))
        .await?;

    assert_eq!(clean.score, 0.0);
    assert!(clean.active_patterns.is_empty());
    Ok(())
}

#[tokio::test]
async fn replaying_a_call_changes_nothing() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = Arc::new(InMemoryStorage::new());
    let detector = detector(storage.clone());
    let id = identity();
    let text = "Best pho in the city, five stars, highly recommend!!!";
    let later = 60 * 24;
    let at = base_time() + Duration::minutes(later);

    detector.analyze(call(&id, 0, text), base_time()).await?;
    let original = detector.analyze(call(&id, later, text), at).await?;
    assert_eq!(original.score, 10.0);

    let replay = detector.analyze(call(&id, later, text), at + Duration::hours(1)).await?;

    assert!(replay.detections.is_empty());
    assert_eq!(replay.score, original.score);
    assert_eq!(replay.active_patterns.len(), 1);
    assert_eq!(replay.active_patterns[0].violation_count, 1);
    assert_eq!(storage.calls_since(&id, base_time()).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn clean_history_scores_positive_zero() -> Result<(), Box<dyn Error + Send + Sync>> {
    let detector = detector(Arc::new(InMemoryStorage::new()));
    let outcome = detector.analyze(call(&identity(), 0, "Lovely lunch"), base_time()).await?;
    assert!(outcome.score == 0.0 && outcome.score.is_sign_positive());
    Ok(())
}

#[tokio::test]
async fn failed_pattern_write_leaves_no_history() -> Result<(), Box<dyn Error + Send + Sync>> {
    let activity = Arc::new(InMemoryStorage::new());
    let mut patterns = MockPatternStorage::new();
    patterns.expect_find_open_pattern().returning(|_, _| Ok(None));
    patterns.expect_patterns_for_identity().returning(|_, _| Ok(vec![]));
    patterns
        .expect_insert_pattern()
        .returning(|_| Err(ScoringError::Persistence("disk full".to_string())));
    let config = BehavioralConfig::default();
    let store = Arc::new(PatternStore::new(&config, Arc::new(patterns)));
    let detector = BehavioralPatternDetector::new(&config, activity.clone(), store);
    let id = identity();
    let text = "Best pho in the city, five stars, highly recommend!!!";

    detector.analyze(call(&id, 0, text), base_time()).await?;
    let later = 60 * 24;
    let result = detector
        .analyze(call(&id, later, text), base_time() + Duration::minutes(later))
        .await;

    assert!(matches!(result, Err(ScoringError::Persistence(_))));
    // only the first call made it into history, so a retry is scored afresh
    assert_eq!(activity.calls_since(&id, base_time()).await?.len(), 1);
    Ok(())
}
