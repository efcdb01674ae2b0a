mod common;

use common::*;
use skypatch::coordinates::SkyCoord;
use skypatch::mosaic::compose_mosaic;
use skypatch::patches::{initialize_patches, process_patch};
use skypatch::pipeline::{run_query, QueryRequest, QueryTarget};
use skypatch::progress::{NoProgress, PipelineStage, RecordingProgress};
use skypatch::skypatch_errors::{SkyPatchError, Stage};
use skypatch::time::{Step, StepUnit, TimeWindow};

fn hour_request() -> QueryRequest {
    QueryRequest::new(
        QueryTarget::Identifier("Ceres".into()),
        TimeWindow::parse("2024-01-01 00:00:00", "2024-01-01 01:00:00").unwrap(),
        Step::new(20, StepUnit::Minutes).unwrap(),
    )
}

fn four_rows() -> FakeEphemeris {
    FakeEphemeris::rows(vec![
        row("2024-01-01 00:00:00", 150.00, 2.0),
        row("2024-01-01 00:20:00", 150.01, 2.0),
        row("2024-01-01 00:40:00", 150.02, 2.0),
        row("2024-01-01 01:00:00", 150.03, 2.0),
    ])
}

#[test]
fn unknown_target_is_reported_with_its_identifier() {
    let ephemeris = FakeEphemeris::new(EphemerisBehaviour::NotFound);
    let catalog = FakeCatalog::empty();
    let cutouts = FakeCutouts::new();
    let progress = RecordingProgress::new();

    let err = run_query(
        &hour_request(),
        &test_config(7.1),
        &services(&ephemeris, &catalog, &cutouts),
        &progress,
    )
    .unwrap_err();

    assert_eq!(err, SkyPatchError::TargetNotFound("Ceres".into()));
    assert!(catalog.queries.lock().unwrap().is_empty());
    assert_eq!(
        progress.milestones(),
        vec![(PipelineStage::Ephemeris, 10)]
    );
}

#[test]
fn timeout_is_surfaced_without_retry() {
    let ephemeris = FakeEphemeris::new(EphemerisBehaviour::Timeout);
    let catalog = FakeCatalog::empty();
    let cutouts = FakeCutouts::new();

    let err = run_query(
        &hour_request(),
        &test_config(7.1),
        &services(&ephemeris, &catalog, &cutouts),
        &NoProgress,
    )
    .unwrap_err();

    assert_eq!(
        err,
        SkyPatchError::ServiceTimeout {
            stage: Stage::Ephemeris,
            identifier: "Ceres".into()
        }
    );
    assert_eq!(ephemeris.calls(), 1);
    assert_eq!(
        err.to_string(),
        "Connection timeout during the ephemeris stage for Ceres"
    );
}

#[test]
fn ephemeris_outside_window_is_an_empty_result() {
    let ephemeris = FakeEphemeris::rows(vec![row("2024-01-02 00:00:00", 150.0, 2.0)]);
    let catalog = FakeCatalog::empty();
    let cutouts = FakeCutouts::new();

    let err = run_query(
        &hour_request(),
        &test_config(7.1),
        &services(&ephemeris, &catalog, &cutouts),
        &NoProgress,
    )
    .unwrap_err();
    assert!(matches!(err, SkyPatchError::EmptyResult(_)));
}

#[test]
fn one_failed_cone_search_aborts_the_batch() {
    let ephemeris = four_rows();
    let catalog = FakeCatalog::empty().failing_after(2);
    let cutouts = FakeCutouts::new();

    let err = run_query(
        &hour_request(),
        &test_config(7.1),
        &services(&ephemeris, &catalog, &cutouts),
        &NoProgress,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        SkyPatchError::CatalogQuery { ref identifier, .. } if identifier == "II/246/out"
    ));
    // nothing reaches the processing stage
    assert!(cutouts.requests.lock().unwrap().is_empty());
}

#[test]
fn one_failed_cutout_aborts_the_batch() {
    let ephemeris = four_rows();
    let catalog = FakeCatalog::empty();
    let cutouts = FakeCutouts::new().failing_after(3);
    let progress = RecordingProgress::new();

    let err = run_query(
        &hour_request(),
        &test_config(7.1),
        &services(&ephemeris, &catalog, &cutouts),
        &progress,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        SkyPatchError::ImageFetch { ref identifier, .. } if identifier == "DSS"
    ));
    assert!(!progress
        .milestones()
        .iter()
        .any(|(s, _)| *s == PipelineStage::Flagging));
}

#[test]
fn bad_catalog_columns_only_affect_their_patch() {
    let config = test_config(7.1);
    let rows = [
        row("2024-01-01 00:00:00", 150.00, 2.0),
        row("2024-01-01 00:20:00", 150.01, 2.0),
    ];
    // a non-numeric RA breaks coordinate extraction of the first patch only
    let target = SkyCoord::new(150.0, 2.0).unwrap();
    let catalog = FakeCatalog::new(vec![(north_of(target, 1.0), "14.0")]);
    let patches = initialize_patches(&rows, &config, &catalog, &NoProgress).unwrap();
    assert!(!patches[0].has_no_sources());

    let mut broken = patches[0].raw_catalog_result().clone();
    let columns = broken.columns().to_vec();
    let mut cells = broken.rows()[0].cells.clone();
    cells[0] = "not a number".into();
    broken = skypatch::catalog::CatalogTable::new(
        columns,
        vec![skypatch::catalog::CatalogRow { cells }],
    )
    .unwrap();
    let first = skypatch::sky_patch::SkyPatch::new(0, &rows[0], &config, 7.1, broken);

    let cutouts = FakeCutouts::new();
    let first = process_patch(first, &config, &cutouts).unwrap();
    let second = process_patch(patches[1].clone(), &config, &cutouts).unwrap();

    assert!(first.source_error().is_some());
    assert!(first.cutout().is_some());
    assert!(second.source_error().is_none());
    assert_eq!(second.source_coords().len(), 1);

    let processed = vec![first, second];
    let summary = skypatch::flagging::evaluate_patches(&processed, &config).unwrap();
    assert!(summary.reports[0]
        .brightness_notice()
        .starts_with("Sources unavailable on 2024-01-01 00:00:00"));
    assert!(compose_mosaic(&processed).is_ok());
}

#[test]
fn bad_magnitude_only_affects_its_patch() {
    let config = test_config(7.1);
    let rows = [
        row("2024-01-01 00:00:00", 150.00, 2.0),
        row("2024-01-01 00:20:00", 150.01, 2.0),
    ];
    let target = SkyCoord::new(150.0, 2.0).unwrap();
    let catalog = FakeCatalog::new(vec![(north_of(target, 1.0), "14.0")]);
    let patches = initialize_patches(&rows, &config, &catalog, &NoProgress).unwrap();

    let raw = patches[0].raw_catalog_result();
    let mag_column = raw
        .columns()
        .iter()
        .position(|c| *c == config.catalog.flag_mag_column)
        .unwrap();
    let mut cells = raw.rows()[0].cells.clone();
    cells[mag_column] = "--".into();
    let broken = skypatch::catalog::CatalogTable::new(
        raw.columns().to_vec(),
        vec![skypatch::catalog::CatalogRow { cells }],
    )
    .unwrap();
    let first = skypatch::sky_patch::SkyPatch::new(0, &rows[0], &config, 7.1, broken);

    let cutouts = FakeCutouts::new();
    let processed = vec![
        process_patch(first, &config, &cutouts).unwrap(),
        process_patch(patches[1].clone(), &config, &cutouts).unwrap(),
    ];
    assert!(processed[0].source_error().is_none());

    let summary = skypatch::flagging::evaluate_patches(&processed, &config).unwrap();
    assert!(matches!(
        summary.reports[0].brightness,
        skypatch::flagging::FlagOutcome::Unavailable(_)
    ));
    let flag = summary.reports[1].brightness.flagged().unwrap();
    assert_eq!(flag.magnitude, 14.0);
    // proximity still works on the patch with the bad magnitude
    assert!(summary.reports[0].proximity.flagged().is_some());
}

#[test]
fn mosaic_needs_at_least_one_image() {
    let config = test_config(7.1);
    let rows = [row("2024-01-01 00:00:00", 150.0, 2.0)];
    let patches =
        initialize_patches(&rows, &config, &FakeCatalog::empty(), &NoProgress).unwrap();
    assert!(matches!(
        compose_mosaic(&patches),
        Err(SkyPatchError::InsufficientData(_))
    ));
}

#[test]
fn malformed_fields_are_rejected_before_any_call() {
    let cases = [
        ("Ceres", "", "", "2024-13-01 00:00:00", "2024-01-01 01:00:00", "20", "m", "", "start"),
        ("Ceres", "", "", "2024-01-01 00:00:00", "tomorrow", "20", "m", "", "end"),
        ("Ceres", "", "", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "-5", "m", "", "step"),
        ("Ceres", "", "", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "5", "weeks", "", "step_unit"),
        ("", "12:61:00", "+10:00:00", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "5", "m", "", "ra"),
        ("", "12:00:00", "+95:00:00", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "5", "m", "", "dec"),
        ("Ceres", "", "", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "5", "m", "many", "n_results"),
    ];
    for (id, ra, dec, start, end, step, unit, count, field) in cases {
        match QueryRequest::from_fields(id, ra, dec, start, end, step, unit, count) {
            Err(SkyPatchError::InvalidInput { field: f, .. }) => assert_eq!(f, field),
            other => panic!("expected an input error on {field}, got {other:?}"),
        }
    }
}
