//! Generate a report for manual inspection

fn main() {
    let rows = r#"[
        { "metric_type": "glucose", "sub_type": "fasting", "value": 96.0, "taken_at": "2024-03-01T07:30:00Z", "source_id": "g-1" },
        { "metric_type": "glucose", "sub_type": "fasting", "value": 112.0, "taken_at": "2024-03-08T07:40:00Z", "source_id": "g-2" },
        { "metric_type": "glucose", "sub_type": "postprandial", "value": 165.0, "taken_at": "2024-03-08T13:10:00Z", "source_id": "g-3" },
        { "metric_type": "glucose", "sub_type": "fasting", "value": 6.1, "unit": "mmol/L", "taken_at": "2024-03-15T07:35:00Z", "source_id": "g-4" },
        { "metric_type": "glucose", "sub_type": "fasting", "value": 99.0, "taken_at": "2024-03-22T07:20:00Z", "source_id": "g-5" },
        { "metric_type": "blood_pressure", "systolic": 138.0, "diastolic": 88.0, "taken_at": "2024-03-02T08:00:00Z", "source_id": "bp-1" },
        { "metric_type": "blood_pressure", "systolic": 126.0, "diastolic": 82.0, "taken_at": "2024-03-16T08:00:00Z", "source_id": "bp-2" },
        { "metric_type": "weight", "value": 171.0, "unit": "lb", "taken_at": "2024-03-01T06:45:00Z", "source_id": "w-1" },
        { "metric_type": "weight", "value": 77.1, "unit": "kg", "taken_at": "2024-03-20T06:50:00Z", "source_id": "w-2" }
    ]"#;

    match healthtrack::readings_to_report_json(
        rows.to_string(),
        "2024-03-01".to_string(),
        "2024-03-31".to_string(),
    ) {
        Ok(report) => print!("{report}"),
        Err(e) => eprintln!("Error: {e:?}"),
    }
}
