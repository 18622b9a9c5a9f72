/// Integration tests for the full evaluation pipeline
///
/// These tests verify:
/// 1. JSON observations and CSV predictions join through a crosswalk and
///    score against extracted thresholds with a hand-computed grade
/// 2. Predicted values are converted into the observation unit before
///    thresholds apply, and pass through untouched when units already agree
/// 3. Thresholds convert into each location's own observation unit
/// 4. Field-name and value-field mismatches fail before any file is read
/// 5. An empty crosswalk fails with the exact expected message
/// 6. Locations without thresholds are silently left out of the results
/// 7. A gauge cross-walked to several reaches keeps every pairing
/// 8. Seasonal threshold tables extract as day-keyed series
///
/// Fixtures are written under the system temp directory; each test uses its
/// own subdirectory so they can run in parallel.
///
/// Run with: cargo test --test evaluation_pipeline

use std::fs;
use std::path::PathBuf;

use serde_json::{Value, json};

use hydroeval::errors::EvaluationError;
use hydroeval::metrics::ThresholdValue;
use hydroeval::retrieval;
use hydroeval::specification::{
    EvaluationSpecification, TemplatedSpecification, ThresholdSpecification,
};
use hydroeval::units::CFS_PER_CMS;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn fixture_dir(test_name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hydroeval_{}", test_name));
    fs::create_dir_all(&dir).expect("temp fixture directory should be creatable");
    dir
}

fn write_fixture(dir: &PathBuf, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).expect("fixture should be writable");
    path.to_string_lossy().into_owned()
}

/// Observed flows in cfs for two gauges over four days.
fn observations_json() -> String {
    json!({
        "sites": {
            "05568500": {
                "unit_code": "cfs",
                "values": [
                    {"time": "2026-04-01T00:00:00Z", "flow": 350.0},
                    {"time": "2026-04-02T00:00:00Z", "flow": 420.0},
                    {"time": "2026-04-03T00:00:00Z", "flow": 380.0},
                    {"time": "2026-04-04T00:00:00Z", "flow": 500.0}
                ]
            },
            "05578500": {
                "unit_code": "cfs",
                "values": [
                    {"time": "2026-04-01T00:00:00Z", "flow": 55.0},
                    {"time": "2026-04-02T00:00:00Z", "flow": 70.0},
                    {"time": "2026-04-03T00:00:00Z", "flow": 90.0},
                    {"time": "2026-04-04T00:00:00Z", "flow": 85.0}
                ]
            }
        }
    })
    .to_string()
}

/// Predicted flows in cms. The intended cfs-equivalent values are listed
/// next to each reach; writing them as cfs / CFS_PER_CMS exercises the unit
/// conversion on the way back.
fn predictions_csv() -> String {
    let mut csv = String::from("location,date,value,measurement_unit\n");
    let series = [
        ("reach-42", [360.0, 390.0, 310.0, 510.0]),
        ("reach-77", [50.0, 75.0, 88.0, 59.0]),
    ];
    for (reach, flows_cfs) in series {
        for (day, cfs) in flows_cfs.iter().enumerate() {
            csv.push_str(&format!(
                "{},2026-04-{:02} 00:00,{:.12},cms\n",
                reach,
                day + 1,
                cfs / CFS_PER_CMS
            ));
        }
    }
    csv
}

fn crosswalk_json() -> String {
    json!({
        "05568500": {"reach": "reach-42"},
        "05578500": {"reach": "reach-77"}
    })
    .to_string()
}

fn stages_json() -> String {
    json!({
        "05568500": {"action_stage": 300.0, "flood_stage": 400.0},
        "05578500": {"action_stage": 60.0, "flood_stage": 80.0}
    })
    .to_string()
}

fn evaluation_document(
    observations: &str,
    predictions: &str,
    crosswalk: &str,
    stages: &str,
) -> Value {
    json!({
        "name": "april flows",
        "observations": [{
            "name": "gauges",
            "backend": {"backend_type": "file", "address": observations, "format": "json"},
            "value_selectors": [{
                "name": "streamflow",
                "where": "value",
                "origin": "sites/*",
                "path": "values/*/flow",
                "datatype": "float",
                "associated_fields": [
                    {"name": "value_date", "datatype": "datetime", "path": "time"}
                ]
            }],
            "unit": {"field": "unit_code"},
            "locations": {"identify": true, "from_field": "key"}
        }],
        "predictions": [{
            "name": "model",
            "backend": {"backend_type": "file", "address": predictions, "format": "csv"},
            "value_selectors": [{
                "name": "streamflow",
                "where": "column",
                "path": "value",
                "datatype": "float",
                "associated_fields": [
                    {"name": "value_date", "datatype": "datetime", "path": "date"}
                ]
            }],
            "unit": {"field": "measurement_unit"},
            "locations": {"identify": true, "from_field": "location"}
        }],
        "crosswalks": [{
            "backend": {"backend_type": "file", "address": crosswalk, "format": "json"},
            "field": {
                "name": "site_no",
                "where": "key",
                "path": "*",
                "associated_fields": [{"name": "model_id", "path": "reach"}]
            },
            "observation_field_name": "observed_location",
            "prediction_field_name": "predicted_location"
        }],
        "thresholds": [{
            "backend": {"backend_type": "file", "address": stages, "format": "json"},
            "origin": "*",
            "locations": {"identify": true, "from_field": "key"},
            "definitions": [
                {"name": "Action", "field": "action_stage", "weight": 2, "unit": "cfs"},
                {"name": "Flood", "field": "flood_stage", "weight": 5, "unit": "cfs"}
            ]
        }],
        "scheme": {
            "metrics": [
                {"name": "probability_of_detection", "weight": 4},
                {"name": "false_alarm_ratio", "weight": 1}
            ]
        }
    })
}

fn build_specification(document: Value) -> EvaluationSpecification {
    EvaluationSpecification::create(document, None)
        .expect("evaluation document should build")
        .into_one()
        .expect("single instance")
}

// ---------------------------------------------------------------------------
// Full Pipeline
// ---------------------------------------------------------------------------

#[test]
fn test_pipeline_scores_two_location_pairs_with_expected_grade() {
    let dir = fixture_dir("pipeline_grade");
    let observations = write_fixture(&dir, "observations.json", &observations_json());
    let predictions = write_fixture(&dir, "predictions.csv", &predictions_csv());
    let crosswalk = write_fixture(&dir, "crosswalk.json", &crosswalk_json());
    let stages = write_fixture(&dir, "stages.json", &stages_json());

    let specification = build_specification(evaluation_document(
        &observations,
        &predictions,
        &crosswalk,
        &stages,
    ));
    let results = hydroeval::evaluate(specification).expect("evaluation should run");

    assert_eq!(results.pair_count(), 2, "both gauges should pair with a reach");
    assert_eq!(results.counterparts("05568500").to_vec(), vec!["reach-42"]);
    assert_eq!(results.counterparts("reach-77").to_vec(), vec!["05578500"]);

    // Hand-computed from the fixture values (predictions read in cfs):
    //
    //   05568500 / reach-42, action stage 300 (weight 2):
    //     every observed and predicted flow exceeds it, so POD = 1 and
    //     FAR = 0 -> 2*4 + 2*1 = 10 of 10
    //   05568500 / reach-42, flood stage 400 (weight 5):
    //     observed events on 4/2 and 4/4; predicted 390 misses, 510 hits,
    //     so POD = 0.5; the one warning is a hit, FAR = 0
    //     -> 0.5*20 + 5 = 15 of 25
    //   05578500 / reach-77, action stage 60 (weight 2):
    //     observed events on 4/2, 4/3, 4/4; predicted 75 and 88 hit, 59
    //     misses, so POD = 2/3; no false alarms -> (2/3)*8 + 2 of 10
    //   05578500 / reach-77, flood stage 80 (weight 5):
    //     observed events on 4/3 and 4/4; predicted 88 hits, 59 misses,
    //     so POD = 0.5; no false alarms -> 10 + 5 of 25
    //
    // Total 142/3 of 70, grade trunc(10000 * 142/210) / 100 = 67.61.
    assert!((results.total() - 142.0 / 3.0).abs() < 1e-9, "total: {}", results.total());
    assert_eq!(results.maximum_value(), 70.0);
    assert!((results.grade() - 67.61).abs() < 1e-9, "grade: {}", results.grade());

    let report = results.to_value();
    assert_eq!(report["pairs"].as_array().map(Vec::len), Some(2));
    assert_eq!(report["location_map"]["05568500"], json!(["reach-42"]));
}

#[test]
fn test_unit_conversion_drives_the_threshold_comparison() {
    // Without cms -> cfs conversion every predicted value (all under 15 cms)
    // would miss every threshold and POD would be 0 everywhere; the grade
    // from the main fixture is only reachable when conversion happens.
    let dir = fixture_dir("pipeline_units");
    let observations = write_fixture(&dir, "observations.json", &observations_json());
    let predictions = write_fixture(&dir, "predictions.csv", &predictions_csv());
    let crosswalk = write_fixture(&dir, "crosswalk.json", &crosswalk_json());
    let stages = write_fixture(&dir, "stages.json", &stages_json());

    let specification = build_specification(evaluation_document(
        &observations,
        &predictions,
        &crosswalk,
        &stages,
    ));
    let results = hydroeval::evaluate(specification).expect("evaluation should run");

    let report = results.to_value();
    let first_pair = &report["pairs"][0];
    let action_scores = first_pair["thresholds"][0]["scores"].as_array().unwrap();
    let pod = action_scores
        .iter()
        .find(|score| score["metric"] == json!("probability_of_detection"))
        .expect("probability of detection is configured");
    assert_eq!(
        pod["value"],
        json!(1.0),
        "every converted prediction clears the action stage"
    );
}

#[test]
fn test_matching_units_pass_predictions_through_unchanged() {
    // Predictions already in cfs, with values sitting exactly on the stage
    // cutoffs. Any conversion at all would move them off the boundary, so
    // the hand-computed grade only holds when the values pass through
    // untouched.
    let dir = fixture_dir("pipeline_passthrough");
    let observations = write_fixture(&dir, "observations.json", &observations_json());
    let crosswalk = write_fixture(&dir, "crosswalk.json", &crosswalk_json());
    let stages = write_fixture(&dir, "stages.json", &stages_json());

    let mut csv = String::from("location,date,value,measurement_unit\n");
    let series = [
        ("reach-42", [300.0, 400.0, 380.0, 500.0]),
        ("reach-77", [60.0, 80.0, 88.0, 85.0]),
    ];
    for (reach, flows) in series {
        for (day, cfs) in flows.iter().enumerate() {
            csv.push_str(&format!("{},2026-04-{:02} 00:00,{},cfs\n", reach, day + 1, cfs));
        }
    }
    let predictions = write_fixture(&dir, "predictions.csv", &csv);

    let specification = build_specification(evaluation_document(
        &observations,
        &predictions,
        &crosswalk,
        &stages,
    ));
    let results = hydroeval::evaluate(specification).expect("evaluation should run");

    // Hand-computed with the boundary rows counting as events:
    //
    //   05568500 / reach-42, action stage 300 (weight 2): the 300 on 4/1
    //     is a hit, so POD = 1, FAR = 0 -> 10 of 10
    //   05568500 / reach-42, flood stage 400 (weight 5): the 400 on 4/2
    //     is a hit, so POD = 1, FAR = 0 -> 25 of 25
    //   05578500 / reach-77, action stage 60 (weight 2): POD = 1, but the
    //     60 on 4/1 warns while the gauge reads 55, FAR = 1/4
    //     -> 8 + 0.75*2 = 9.5 of 10
    //   05578500 / reach-77, flood stage 80 (weight 5): POD = 1, but the
    //     80 on 4/2 warns while the gauge reads 70, FAR = 1/3
    //     -> 20 + (2/3)*5 of 25
    //
    // Total 35 + 9.5 + 20 + 10/3 = 407/6 of 70, grade trunc of 96.904 = 96.90.
    assert!(
        (results.total() - 407.0 / 6.0).abs() < 1e-9,
        "total: {}",
        results.total()
    );
    assert_eq!(results.maximum_value(), 70.0);
    assert!((results.grade() - 96.90).abs() < 1e-9, "grade: {}", results.grade());
}

#[test]
fn test_thresholds_convert_into_each_locations_observation_unit() {
    // The first gauge reports in cfs and the second in cms; the stage
    // thresholds are declared in cfs. Converting every threshold into one
    // global unit would leave the cms gauge compared against cutoffs around
    // sixty while its flows sit near two, scoring nothing. Per-location
    // conversion reproduces the grade from the all-cfs fixture exactly.
    let dir = fixture_dir("pipeline_mixed_units");
    let observations_cfs = write_fixture(
        &dir,
        "observations_cfs.json",
        &json!({
            "sites": {
                "05568500": {
                    "unit_code": "cfs",
                    "values": [
                        {"time": "2026-04-01T00:00:00Z", "flow": 350.0},
                        {"time": "2026-04-02T00:00:00Z", "flow": 420.0},
                        {"time": "2026-04-03T00:00:00Z", "flow": 380.0},
                        {"time": "2026-04-04T00:00:00Z", "flow": 500.0}
                    ]
                }
            }
        })
        .to_string(),
    );
    let days = ["2026-04-01", "2026-04-02", "2026-04-03", "2026-04-04"];
    let flows_cfs = [55.0, 70.0, 90.0, 85.0];
    let values: Vec<Value> = days
        .iter()
        .zip(flows_cfs)
        .map(|(day, cfs)| {
            json!({"time": format!("{}T00:00:00Z", day), "flow": cfs / CFS_PER_CMS})
        })
        .collect();
    let observations_cms = write_fixture(
        &dir,
        "observations_cms.json",
        &json!({"sites": {"05578500": {"unit_code": "cms", "values": values}}}).to_string(),
    );
    let predictions = write_fixture(&dir, "predictions.csv", &predictions_csv());
    let crosswalk = write_fixture(&dir, "crosswalk.json", &crosswalk_json());
    let stages = write_fixture(&dir, "stages.json", &stages_json());

    let mut document = evaluation_document(
        &observations_cfs,
        &predictions,
        &crosswalk,
        &stages,
    );
    let mut second = document["observations"][0].clone();
    second["backend"]["address"] = json!(observations_cms);
    document["observations"].as_array_mut().unwrap().push(second);

    let specification = build_specification(document);
    let results = hydroeval::evaluate(specification).expect("evaluation should run");

    assert_eq!(results.pair_count(), 2);
    assert!((results.total() - 142.0 / 3.0).abs() < 1e-9, "total: {}", results.total());
    assert_eq!(results.maximum_value(), 70.0);
    assert!((results.grade() - 67.61).abs() < 1e-9, "grade: {}", results.grade());
}

// ---------------------------------------------------------------------------
// Failure Modes
// ---------------------------------------------------------------------------

#[test]
fn test_mismatched_value_fields_fail_before_any_file_is_read() {
    // The addresses point nowhere; reaching the filesystem would error with
    // SourceNotFound instead of FieldMismatch.
    let mut document = evaluation_document(
        "/nonexistent/observations.json",
        "/nonexistent/predictions.csv",
        "/nonexistent/crosswalk.json",
        "/nonexistent/stages.json",
    );
    document["predictions"][0]["value_selectors"][0]["name"] = json!("discharge");

    let specification = build_specification(document);
    let error = hydroeval::evaluate(specification).expect_err("field names disagree");
    match error {
        EvaluationError::FieldMismatch(message) => {
            assert!(message.contains("streamflow"), "got: {}", message);
            assert!(message.contains("discharge"), "got: {}", message);
        }
        other => panic!("expected FieldMismatch, got: {}", other),
    }
}

#[test]
fn test_mismatched_value_field_columns_fail_before_any_file_is_read() {
    let mut document = evaluation_document(
        "/nonexistent/observations.json",
        "/nonexistent/predictions.csv",
        "/nonexistent/crosswalk.json",
        "/nonexistent/stages.json",
    );
    let mut second = document["observations"][0].clone();
    document["observations"][0]["value_field"] = json!("flow_a");
    second["value_field"] = json!("flow_b");
    document["observations"].as_array_mut().unwrap().push(second);

    let specification = build_specification(document);
    let error = hydroeval::evaluate(specification).expect_err("value field columns disagree");
    match error {
        EvaluationError::FieldMismatch(message) => {
            assert!(message.contains("flow_a"), "got: {}", message);
            assert!(message.contains("flow_b"), "got: {}", message);
        }
        other => panic!("expected FieldMismatch, got: {}", other),
    }
}

#[test]
fn test_empty_crosswalk_reports_the_exact_message() {
    let dir = fixture_dir("pipeline_empty_crosswalk");
    let observations = write_fixture(&dir, "observations.json", &observations_json());
    let predictions = write_fixture(&dir, "predictions.csv", &predictions_csv());
    let crosswalk = write_fixture(&dir, "crosswalk.json", "{}");
    let stages = write_fixture(&dir, "stages.json", &stages_json());

    let specification = build_specification(evaluation_document(
        &observations,
        &predictions,
        &crosswalk,
        &stages,
    ));
    let error = hydroeval::evaluate(specification).expect_err("nothing to cross-walk");
    assert_eq!(error.to_string(), "No crosswalk data could be found");
}

#[test]
fn test_locations_without_thresholds_are_left_out() {
    let dir = fixture_dir("pipeline_partial_thresholds");
    let observations = write_fixture(&dir, "observations.json", &observations_json());
    let predictions = write_fixture(&dir, "predictions.csv", &predictions_csv());
    let crosswalk = write_fixture(&dir, "crosswalk.json", &crosswalk_json());
    let stages = write_fixture(
        &dir,
        "stages.json",
        &json!({"05568500": {"action_stage": 300.0, "flood_stage": 400.0}}).to_string(),
    );

    let specification = build_specification(evaluation_document(
        &observations,
        &predictions,
        &crosswalk,
        &stages,
    ));
    let results = hydroeval::evaluate(specification).expect("evaluation should run");

    assert_eq!(results.pair_count(), 1, "only the covered gauge is scored");
    assert_eq!(results.counterparts("05568500").to_vec(), vec!["reach-42"]);
    assert!(results.counterparts("05578500").is_empty());
    assert_eq!(results.maximum_value(), 35.0);
}

#[test]
fn test_one_gauge_crosswalked_to_two_reaches_keeps_both_pairings() {
    let dir = fixture_dir("pipeline_fanout");
    let observations = write_fixture(&dir, "observations.json", &observations_json());
    let predictions = write_fixture(&dir, "predictions.csv", &predictions_csv());
    let crosswalk_a = write_fixture(
        &dir,
        "crosswalk_a.json",
        &json!({"05568500": {"reach": "reach-42"}}).to_string(),
    );
    let crosswalk_b = write_fixture(
        &dir,
        "crosswalk_b.json",
        &json!({"05568500": {"reach": "reach-77"}}).to_string(),
    );
    let stages = write_fixture(&dir, "stages.json", &stages_json());

    let mut document = evaluation_document(&observations, &predictions, &crosswalk_a, &stages);
    let mut second = document["crosswalks"][0].clone();
    second["backend"]["address"] = json!(crosswalk_b);
    document["crosswalks"].as_array_mut().unwrap().push(second);

    let specification = build_specification(document);
    let results = hydroeval::evaluate(specification).expect("evaluation should run");

    assert_eq!(results.pair_count(), 2, "both reach pairings are scored");

    let mut reaches = results.counterparts("05568500").to_vec();
    reaches.sort();
    assert_eq!(reaches, vec!["reach-42", "reach-77"]);
    assert_eq!(results.counterparts("reach-42").to_vec(), vec!["05568500"]);
    assert_eq!(results.counterparts("reach-77").to_vec(), vec!["05568500"]);

    let report = results.to_value();
    let mapped: Vec<&str> = report["location_map"]["05568500"]
        .as_array()
        .expect("the map holds every counterpart")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(mapped.contains(&"reach-42"), "got: {:?}", mapped);
    assert!(mapped.contains(&"reach-77"), "got: {:?}", mapped);
}

// ---------------------------------------------------------------------------
// Threshold Extraction
// ---------------------------------------------------------------------------

#[test]
fn test_seasonal_threshold_tables_extract_as_day_keyed_series() {
    let dir = fixture_dir("seasonal_thresholds");
    let stages = write_fixture(
        &dir,
        "seasonal.json",
        &json!({
            "05568500": {
                "seasonal": [
                    {"month": 4, "day": 1, "value": 300.0},
                    {"month": 4, "day": 2, "value": 320.0}
                ]
            }
        })
        .to_string(),
    );

    let specification = ThresholdSpecification::create(
        json!({
            "backend": {"backend_type": "file", "address": stages, "format": "json"},
            "origin": "*",
            "locations": {"identify": true, "from_field": "key"},
            "definitions": [
                {"name": "Seasonal", "field": "seasonal/*/value", "weight": 1, "unit": "cfs"}
            ],
            "application_rules": {
                "threshold_field": {"name": "day", "datatype": "day", "path": "month/day"},
                "observation_field": {"name": "day", "datatype": "day", "path": "value_date"}
            }
        }),
        None,
    )
    .expect("threshold document should build")
    .into_one()
    .expect("single instance");

    let retrieved =
        retrieval::get_threshold_data(&specification).expect("extraction should run");
    assert_eq!(retrieved.len(), 1);
    assert_eq!(retrieved[0].location, "05568500");
    assert_eq!(retrieved[0].unit.as_deref(), Some("cfs"));

    match &retrieved[0].value {
        ThresholdValue::Series(series) => {
            assert_eq!(series.get("4/1"), Some(&300.0), "keys drop zero padding");
            assert_eq!(series.get("4/2"), Some(&320.0));
        }
        ThresholdValue::Scalar(value) => panic!("expected a series, got scalar {}", value),
    }
}
