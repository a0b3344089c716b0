use relic_core::elf::ElfArtifact;
use relic_core::report::BuildReport;

fn sample() -> BuildReport {
    let artifact = ElfArtifact {
        bytes: vec![0u8; 180],
        entry: 0x400078,
        code_size: 46,
        data_size: 14,
        pointers_resolved: 3,
    };
    BuildReport::from_artifact("hello", "out/hello", &artifact, "deadbeef")
}

#[test]
fn report_is_stamped_with_a_timestamp() {
    let report = sample();
    assert!(!report.generated_at.is_empty());
}

#[test]
fn report_round_trips_through_json() {
    let report = sample();
    let json = report.to_json_pretty().expect("serialize");
    assert!(json.contains("\"program\": \"hello\""));
    assert!(json.contains("\"entry\": 4194424"));
    assert!(json.contains("\"total_size\": 180"));

    let back: BuildReport = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, report);
}
