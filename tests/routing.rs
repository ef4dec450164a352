mod common;

use approx::assert_abs_diff_eq;
use common::{Fixture, mandatory, signature};
use staywise::router::{BUNDLE_UNUSABLE_MESSAGE, MODEL_NOT_FOUND_MESSAGE, PredictError};
use staywise::types::{Feature, Prediction, PredictionRequest, PredictionResponse};
use std::fs;

fn diagnosis_request(code: &str, admission: &str) -> PredictionRequest {
    PredictionRequest {
        diagnosis_code: code.to_string(),
        type_of_admission: admission.to_string(),
        ..Default::default()
    }
}

fn procedure_request(code: &str) -> PredictionRequest {
    PredictionRequest {
        procedure_code: code.to_string(),
        type_of_admission: "Emergency".to_string(),
        ..Default::default()
    }
}

fn ranked(prediction: Prediction) -> Vec<staywise::types::ProcedurePrediction> {
    match prediction {
        Prediction::Ranked(r) => r,
        other => panic!("Expected a ranked prediction, got {other:?}"),
    }
}

#[test]
fn diagnosis_returns_three_cheapest_adjusted_procedures() {
    let fixture = Fixture::complete();
    let predictor = fixture.predictor();
    let results = ranked(
        predictor
            .predict(&diagnosis_request("Pneumonia (RSP002)", "Emergency"))
            .unwrap(),
    );

    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].procedure_code,
        "Upper gastrointestinal endoscopy (GIS010)"
    );
    assert_eq!(results[1].procedure_code, "URN003");
    assert_eq!(
        results[2].procedure_code,
        "Respiratory intubation and mechanical ventilation (RES005)"
    );

    // 1802 - 0.3 * (900 - 1802) = 2072.6 -> 2100
    assert_abs_diff_eq!(results[0].total_costs, 2100.0);
    assert_abs_diff_eq!(results[1].total_costs, 3100.0);
    assert_abs_diff_eq!(results[2].total_costs, 4100.0);

    assert_eq!(results[0].length_of_stay, 1);
    assert_eq!(results[1].length_of_stay, 2);
    assert_eq!(results[2].length_of_stay, 4);
    assert_abs_diff_eq!(results[0].usage_percentage, 30.0, epsilon = 1e-9);
    assert_abs_diff_eq!(results[1].usage_percentage, 5.0, epsilon = 1e-9);
}

#[test]
fn admission_type_changes_the_prediction() {
    let fixture = Fixture::complete();
    let predictor = fixture.predictor();
    let elective = ranked(
        predictor
            .predict(&diagnosis_request("RSP002", "Elective"))
            .unwrap(),
    );
    let costs: Vec<f64> = elective.iter().map(|r| r.total_costs).collect();
    assert_eq!(costs, vec![800.0, 2000.0, 3000.0]);
}

#[test]
fn implausible_adjustment_falls_back_to_reference_median() {
    let fixture = Fixture::complete();
    let results = ranked(
        fixture
            .predictor()
            .predict(&diagnosis_request("CIR019", "Emergency"))
            .unwrap(),
    );
    assert_eq!(results.len(), 1);
    assert_abs_diff_eq!(results[0].total_costs, 200000.0);
    assert_abs_diff_eq!(results[0].usage_percentage, 90.0, epsilon = 1e-9);
}

#[test]
fn ranked_json_has_no_mortality_field() {
    let fixture = Fixture::complete();
    let response = fixture
        .predictor()
        .respond(&diagnosis_request("RSP002", "Emergency"));
    let json = serde_json::to_value(&response).unwrap();
    let entries = json.as_array().expect("ranked response is a JSON array");
    assert_eq!(entries.len(), 3);
    for entry in entries {
        let keys: Vec<&str> = entry
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert!(!keys.contains(&"mortality"));
        assert!(keys.contains(&"usage_percentage"));
    }
}

#[test]
fn unknown_diagnosis_is_an_empty_list() {
    let fixture = Fixture::complete();
    let response = fixture
        .predictor()
        .respond(&diagnosis_request("Unlisted (XYZ000)", "Emergency"));
    assert_eq!(response, PredictionResponse::Ranked(Vec::new()));
    assert_eq!(serde_json::to_string(&response).unwrap(), "[]");
}

#[test]
fn direct_request_is_served_by_the_bundle_for_its_exact_fields() {
    let fixture = Fixture::complete();
    let predictor = fixture.predictor();

    let mandatory_only = predictor.predict(&procedure_request("CAR004")).unwrap();
    let mut with_gender = procedure_request("CAR004");
    with_gender.gender = "M".into();
    let with_gender = predictor.predict(&with_gender).unwrap();

    let full = PredictionRequest {
        procedure_code: "CAR004".into(),
        age_group: "50 to 69".into(),
        gender: "M".into(),
        race: "White".into(),
        ethnicity: "Not Span/Hispanic".into(),
        type_of_admission: "Emergency".into(),
        ..Default::default()
    };
    let full = predictor.predict(&full).unwrap();

    // The cost intercept of each fixture bundle is its feature count.
    let cost = |p: &Prediction| match p {
        Prediction::Direct(d) => d.total_costs,
        other => panic!("Expected a direct prediction, got {other:?}"),
    };
    assert_abs_diff_eq!(cost(&mandatory_only), 13002.0, epsilon = 1e-6);
    assert_abs_diff_eq!(cost(&with_gender), 13003.0, epsilon = 1e-6);
    assert_abs_diff_eq!(cost(&full), 13006.0, epsilon = 1e-6);

    match full {
        Prediction::Direct(direct) => {
            assert_eq!(direct.length_of_stay, 6);
            assert_eq!(direct.mortality, "Major");
        }
        other => panic!("Expected a direct prediction, got {other:?}"),
    }
}

#[test]
fn missing_model_for_one_candidate_fails_the_whole_request() {
    let fixture = Fixture::with_signatures(&[mandatory()]);
    let predictor = fixture.predictor();
    let mut request = diagnosis_request("RSP002", "Emergency");
    request.gender = "F".into();

    match predictor.predict(&request) {
        Err(PredictError::ModelNotFound { signature: sig }) => {
            assert_eq!(
                sig,
                signature(&[Feature::ProcedureCode, Feature::Gender, Feature::TypeOfAdmission])
            );
        }
        other => panic!("Expected ModelNotFound, got {other:?}"),
    }
    assert_eq!(
        predictor.respond(&request),
        PredictionResponse::Error {
            error: MODEL_NOT_FOUND_MESSAGE.to_string()
        }
    );
}

#[test]
fn request_without_procedure_or_diagnosis_has_no_model() {
    let fixture = Fixture::complete();
    let request = PredictionRequest {
        age_group: "50 to 69".into(),
        gender: "M".into(),
        race: "Black/African American".into(),
        ethnicity: "Not Span/Hispanic".into(),
        type_of_admission: "Elective".into(),
        ..Default::default()
    };
    let response = fixture.predictor().respond(&request);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"], MODEL_NOT_FOUND_MESSAGE);
}

#[test]
fn deleted_bundle_reads_as_model_not_found() {
    let fixture = Fixture::complete();
    let predictor = fixture.predictor();
    fs::remove_file(fixture.bundle_path(mandatory())).unwrap();

    let err = predictor
        .predict(&procedure_request("ADM001"))
        .unwrap_err();
    assert!(matches!(err, PredictError::BundlePathInvalid { .. }));
    assert_eq!(err.to_string(), MODEL_NOT_FOUND_MESSAGE);
}

#[test]
fn unreadable_bundle_is_reported_as_corrupt() {
    let fixture = Fixture::complete();
    fs::write(fixture.bundle_path(mandatory()), "model = 'not a regressor'\n").unwrap();

    let err = fixture
        .predictor()
        .predict(&procedure_request("ADM001"))
        .unwrap_err();
    assert!(matches!(err, PredictError::CorruptBundle { .. }));
}

#[test]
fn corrupt_bundle_error_body_does_not_leak_paths() {
    let fixture = Fixture::complete();
    let bundle_path = fixture.bundle_path(mandatory());
    fs::write(&bundle_path, "model = 'not a regressor'\n").unwrap();

    let response = fixture.predictor().respond(&procedure_request("ADM001"));
    let error = match response {
        PredictionResponse::Error { error } => error,
        other => panic!("Expected an error body, got {other:?}"),
    };
    assert_eq!(error, BUNDLE_UNUSABLE_MESSAGE);

    let root = fixture.root().to_string_lossy().into_owned();
    let body = serde_json::to_string(&PredictionResponse::Error { error }).unwrap();
    assert!(!body.contains(&root));
    assert!(!body.contains("bundle_"));
    assert!(!body.contains("regressor"));
}

#[test]
fn both_codes_are_rejected() {
    let fixture = Fixture::complete();
    let mut request = procedure_request("ADM001");
    request.diagnosis_code = "RSP002".into();
    let err = fixture.predictor().predict(&request).unwrap_err();
    assert!(matches!(err, PredictError::MalformedRequest(_)));
}

#[test]
fn cached_and_uncached_sources_agree() {
    let fixture = Fixture::complete();
    let cached = fixture.predictor();
    let mut config = fixture.config();
    config.cache_bundles = false;
    let uncached = config.build_predictor().unwrap();

    let request = diagnosis_request("RSP002", "Emergency");
    let first = cached.predict(&request).unwrap();
    assert_eq!(cached.predict(&request).unwrap(), first);
    assert_eq!(uncached.predict(&request).unwrap(), first);
}
