//! End-to-end pipeline scenarios against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use propline::config::PipelineConfig;
use propline::engine::{RunOutcome, RunRequest, StatusUpdate};
use propline::types::*;

use crate::mock_services::*;

fn request(sport: &str) -> RunRequest {
    RunRequest::new(sport, "player", StatFilter::Any)
}

/// Fails every attempt after sport activation, before any page is fetched.
fn unknown_preset(sport: &str) -> RunRequest {
    RunRequest::new(sport, "player", StatFilter::Preset("playoffs".into()))
}

fn drain(events: &mut broadcast::Receiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

/// Stage sequence with consecutive repeats collapsed.
fn stages(events: &[StatusUpdate]) -> Vec<Stage> {
    let mut out: Vec<Stage> = Vec::new();
    for ev in events {
        if out.last() != Some(&ev.stage) {
            out.push(ev.stage);
        }
    }
    out
}

#[tokio::test]
async fn test_mlb_four_pages_publishes_1700() {
    let h = Harness::with_source(
        ScriptedSource::new(vec![Some(500), Some(500), Some(500), Some(200)]),
        EnrichmentMode::Empty,
    );

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    assert_eq!(h.source.offsets(), vec![0, 500, 1000, 1500]);
    assert!(h.source.queries().iter().all(|q| q.limit == 500));
    let RunOutcome::Completed { projections, enriched, attempts } = &outcome else {
        panic!("expected completed run, got {outcome:?}");
    };
    assert_eq!(projections.len(), 1700);
    assert!(!*enriched);
    assert_eq!(*attempts, 1);
    // Empty enrichment publishes the full list, not the capped candidates.
    assert_eq!(h.enrichment.batch_sizes(), vec![200]);
    assert_eq!(h.orchestrator.snapshot().result_count, 1700);
}

#[tokio::test]
async fn test_non_empty_enrichment_publishes_capped_set() {
    let h = Harness::with_source(
        ScriptedSource::new(vec![Some(500), Some(500), Some(500), Some(200)]),
        EnrichmentMode::Predict,
    );

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    let projections = outcome.projections().unwrap();
    assert_eq!(projections.len(), 200);
    assert!(projections.iter().all(|p| p.is_enriched()));
    assert_eq!(projections[0].id(), "MLB-0");
    assert!(h.orchestrator.snapshot().enriched);
}

#[tokio::test]
async fn test_enrichment_failure_publishes_unenriched() {
    let h = Harness::with_source(ScriptedSource::new(vec![Some(150)]), EnrichmentMode::Fail);

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    assert!(outcome.is_completed());
    let projections = outcome.projections().unwrap();
    assert_eq!(projections.len(), 150);
    assert!(projections.iter().all(|p| p.prediction.is_none()));
    assert!(h.orchestrator.snapshot().error.is_none());
}

#[tokio::test]
async fn test_activation_failure_still_fetches() {
    let h = Harness::new(
        RecordingActivator::new().failing_for("NFL"),
        ScriptedSource::new(vec![Some(42)]),
        MockEnrichment::new(EnrichmentMode::Empty),
        MockGames::new(&[]),
        fast_config(),
    );

    let outcome = h.orchestrator.run(request("NFL")).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.projections().unwrap().len(), 42);
    assert_eq!(h.activator.calls(), vec!["activate:NFL"]);
    assert_eq!(h.orchestrator.sport_status(&Sport::new("NFL")), SportStatus::Error);
}

#[tokio::test]
async fn test_offset_ceiling_bounds_requests() {
    let h = Harness::with_source(ScriptedSource::new(vec![Some(500); 12]), EnrichmentMode::Empty);

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    assert_eq!(h.source.offsets(), vec![0, 500, 1000, 1500, 2000, 2500]);
    assert_eq!(outcome.projections().unwrap().len(), 3000);
}

#[tokio::test]
async fn test_batch_failure_keeps_partial_results() {
    let h = Harness::with_source(
        ScriptedSource::new(vec![Some(500), Some(500), None, Some(500)]),
        EnrichmentMode::Empty,
    );

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.attempts(), 1);
    assert_eq!(outcome.projections().unwrap().len(), 1000);
    assert_eq!(h.source.offsets().len(), 3);
}

#[tokio::test]
async fn test_deactivates_previous_sport_before_activating() {
    let h = Harness::with_source(ScriptedSource::new(vec![]), EnrichmentMode::Empty);

    h.orchestrator.run(request("MLB")).await.unwrap();
    h.orchestrator.run(request("NBA")).await.unwrap();
    h.orchestrator.run(request("ALL")).await.unwrap();
    h.orchestrator.run(request("NHL")).await.unwrap();

    assert_eq!(
        h.activator.calls(),
        vec![
            "activate:MLB",
            "deactivate:MLB",
            "activate:NBA",
            "deactivate:NBA",
            "activate:NHL",
        ]
    );
    assert_eq!(h.orchestrator.sport_status(&Sport::new("MLB")), SportStatus::Inactive);
    assert_eq!(h.orchestrator.sport_status(&Sport::new("NHL")), SportStatus::Ready);
}

#[tokio::test]
async fn test_retry_bound_is_three_attempts() {
    let h = Harness::with_source(ScriptedSource::new(vec![Some(10)]), EnrichmentMode::Empty);
    let mut events = h.orchestrator.events();

    let outcome = h.orchestrator.run(unknown_preset("MLB")).await.unwrap();

    assert!(h.source.queries().is_empty());
    assert_eq!(h.activator.calls(), vec!["activate:MLB"; 3]);
    assert!(matches!(
        outcome.error(),
        Some(PipelineError::RetriesExhausted { attempts: 3, .. })
    ));

    let seen = drain(&mut events);
    let retries = seen.iter().filter(|e| e.stage == Stage::Retrying).count();
    assert_eq!(retries, 2);
    assert_eq!(seen.last().unwrap().stage, Stage::Error);

    let snap = h.orchestrator.snapshot();
    assert_eq!(snap.stage, Stage::Error);
    assert!(snap.error.unwrap().contains("Unknown stat preset: playoffs"));
}

#[tokio::test]
async fn test_failed_run_keeps_previous_results() {
    let h = Harness::with_source(ScriptedSource::new(vec![Some(25)]), EnrichmentMode::Empty);

    let first = h.orchestrator.run(request("MLB")).await.unwrap();
    assert_eq!(first.projections().unwrap().len(), 25);

    let second = h.orchestrator.run(unknown_preset("NBA")).await.unwrap();
    let RunOutcome::Failed { projections, attempts, .. } = &second else {
        panic!("expected failed run, got {second:?}");
    };
    assert_eq!(*attempts, 3);
    assert_eq!(projections.len(), 25);

    let snap = h.orchestrator.snapshot();
    assert_eq!(snap.projections.len(), 25);
    assert_eq!(snap.result_count, 25);
    assert!(snap.error.is_some());
}

#[tokio::test]
async fn test_games_outage_publishes_unfiltered() {
    let h = Harness::new(
        RecordingActivator::new(),
        ScriptedSource::new(vec![Some(40)]).with_matchups(&["Houston Astros"]),
        MockEnrichment::new(EnrichmentMode::Empty),
        MockGames::new(&["Yankees @ Red Sox"]).failing_for("MLB"),
        PipelineConfig {
            filter_upcoming: true,
            ..fast_config()
        },
    );

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.attempts(), 1);
    assert_eq!(outcome.projections().unwrap().len(), 40);
    assert_eq!(h.games.calls(), 1);
    assert!(h.orchestrator.snapshot().error.is_none());
}

#[tokio::test]
async fn test_rapid_double_switch_releases_loaded_sport() {
    let h = Harness::with_source(
        ScriptedSource::new(vec![Some(5), Some(5)]),
        EnrichmentMode::Empty,
    );
    h.orchestrator.run(request("MLB")).await.unwrap();

    // NBA is superseded before it touches the backend.
    let nba = h.orchestrator.begin(request("NBA")).unwrap();
    let nfl = h.orchestrator.begin(request("NFL")).unwrap();
    assert!(h.orchestrator.drive(nba).await.is_superseded());
    assert!(h.orchestrator.drive(nfl).await.is_completed());

    assert_eq!(
        h.activator.calls(),
        vec!["activate:MLB", "deactivate:MLB", "activate:NFL"]
    );
    assert_eq!(h.orchestrator.sport_status(&Sport::new("MLB")), SportStatus::Inactive);
    assert_eq!(h.orchestrator.sport_status(&Sport::new("NBA")), SportStatus::Inactive);
    assert_eq!(h.orchestrator.sport_status(&Sport::new("NFL")), SportStatus::Ready);
}

#[tokio::test]
async fn test_session_superseded_during_backoff_goes_quiet() {
    let h = Harness::new(
        RecordingActivator::new(),
        ScriptedSource::new(vec![Some(4)]),
        MockEnrichment::new(EnrichmentMode::Empty),
        MockGames::new(&[]),
        PipelineConfig {
            retry_base_delay_ms: 10_000,
            retry_max_delay_ms: 10_000,
            ..fast_config()
        },
    );
    let mut events = h.orchestrator.events();

    let stale_session = h.orchestrator.begin(unknown_preset("MLB")).unwrap();
    let stale_id = stale_session.id();
    let stale = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.drive(stale_session).await })
    };

    // Wait until the MLB run is sleeping before its second attempt.
    loop {
        let ev = events.recv().await.unwrap();
        if ev.session_id == stale_id && ev.stage == Stage::Retrying {
            break;
        }
    }

    let fresh = h.orchestrator.run(request("NBA")).await.unwrap();
    assert!(fresh.is_completed());

    let stale = tokio::time::timeout(Duration::from_secs(2), stale)
        .await
        .expect("backoff should end as soon as the session is superseded")
        .unwrap();
    assert!(stale.is_superseded());

    let after = drain(&mut events);
    assert!(after.iter().all(|e| e.session_id != stale_id));
    assert_eq!(after.last().unwrap().stage, Stage::Complete);

    let snap = h.orchestrator.snapshot();
    assert_eq!(snap.stage, Stage::Complete);
    assert!(snap.error.is_none());
    assert_eq!(
        h.activator.calls(),
        vec!["activate:MLB", "deactivate:MLB", "activate:NBA"]
    );
}

#[tokio::test]
async fn test_upcoming_games_filter() {
    let h = Harness::new(
        RecordingActivator::new(),
        ScriptedSource::new(vec![Some(9)]).with_matchups(&[
            "Red Sox vs Yankees",
            "Houston Astros",
            "Chicago Cubs at St. Louis Cardinals",
        ]),
        MockEnrichment::new(EnrichmentMode::Empty),
        MockGames::new(&["Yankees @ Red Sox"]),
        PipelineConfig {
            filter_upcoming: true,
            ..fast_config()
        },
    );

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();

    let projections = outcome.projections().unwrap();
    assert_eq!(projections.len(), 3);
    assert!(projections
        .iter()
        .all(|p| p.projection.matchup.as_deref() == Some("Red Sox vs Yankees")));
}

#[tokio::test]
async fn test_empty_game_list_passes_everything() {
    let h = Harness::new(
        RecordingActivator::new(),
        ScriptedSource::new(vec![Some(7)]),
        MockEnrichment::new(EnrichmentMode::Empty),
        MockGames::new(&[]),
        PipelineConfig {
            filter_upcoming: true,
            ..fast_config()
        },
    );

    let outcome = h.orchestrator.run(request("MLB")).await.unwrap();
    assert_eq!(outcome.projections().unwrap().len(), 7);
    assert_eq!(h.games.calls(), 1);
}

#[tokio::test]
async fn test_stat_preset_sent_with_every_page() {
    let mut config = fast_config();
    config.stat_presets.insert(
        "pitching".to_string(),
        vec!["strikeouts".to_string(), "earned_runs".to_string()],
    );
    let h = Harness::new(
        RecordingActivator::new(),
        ScriptedSource::new(vec![Some(500), Some(3)]),
        MockEnrichment::new(EnrichmentMode::Empty),
        MockGames::new(&[]),
        config,
    );

    h.orchestrator
        .run(RunRequest::new("MLB", "player", StatFilter::Preset("Pitching".into())))
        .await
        .unwrap();

    let queries = h.source.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries
        .iter()
        .all(|q| q.stat_types == vec!["strikeouts", "earned_runs"]));
}

#[tokio::test]
async fn test_stage_sequence() {
    let h = Harness::new(
        RecordingActivator::new(),
        ScriptedSource::new(vec![Some(500), Some(12)]),
        MockEnrichment::new(EnrichmentMode::Predict),
        MockGames::new(&[]),
        PipelineConfig {
            filter_upcoming: true,
            ..fast_config()
        },
    );
    let mut events = h.orchestrator.events();

    h.orchestrator.run(request("MLB")).await.unwrap();

    let seen = drain(&mut events);
    assert_eq!(
        stages(&seen),
        vec![
            Stage::Initializing,
            Stage::ActivatingSport,
            Stage::FetchingBatches,
            Stage::Filtering,
            Stage::Enriching,
            Stage::Complete,
        ]
    );

    let progress: Vec<u8> = seen.iter().map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*progress.last().unwrap(), 100);
    assert!(seen.last().unwrap().message.is_none());

    let fetching: Vec<u8> = seen
        .iter()
        .filter(|e| e.stage == Stage::FetchingBatches)
        .map(|e| e.progress)
        .collect();
    assert!(fetching.iter().all(|p| (20..=50).contains(p)));
}

#[tokio::test]
async fn test_identical_request_in_flight_is_refused() {
    let h = Harness::with_source(ScriptedSource::new(vec![Some(3)]), EnrichmentMode::Empty);

    let session = h.orchestrator.begin(request("MLB")).unwrap();
    assert!(h.orchestrator.begin(request("mlb")).is_none());
    assert!(h.orchestrator.run(request("MLB")).await.is_none());

    let outcome = h.orchestrator.drive(session).await;
    assert!(outcome.is_completed());
    assert_eq!(h.source.offsets(), vec![0]);
}

#[tokio::test]
async fn test_superseded_session_never_publishes() {
    let h = Harness::with_source(
        ScriptedSource::new(vec![Some(500), Some(8)]).gated_on("MLB"),
        EnrichmentMode::Empty,
    );
    let mut events = h.orchestrator.events();

    let stale = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.run(request("MLB")).await })
    };
    // Wait until the MLB run is blocked inside its first page request.
    h.source.entered.notified().await;

    let fresh = h.orchestrator.run(request("NBA")).await.unwrap();
    assert!(fresh.is_completed());
    let fresh_count = fresh.projections().unwrap().len();

    h.source.release.notify_one();
    let stale = stale.await.unwrap().unwrap();
    assert!(stale.is_superseded());

    let snap = h.orchestrator.snapshot();
    assert_eq!(snap.sport, Some(Sport::new("NBA")));
    assert_eq!(snap.result_count, fresh_count);
    assert!(snap.projections.iter().all(|p| p.id().starts_with("NBA-")));

    let seen = drain(&mut events);
    let first_fresh = seen
        .iter()
        .position(|e| e.sport == Sport::new("NBA"))
        .unwrap();
    assert!(seen[first_fresh..]
        .iter()
        .all(|e| e.sport == Sport::new("NBA")));
}
