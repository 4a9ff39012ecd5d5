use domain::{AccountStatus, CalcMode, CommAddress, DeductionStatus};

#[test]
fn status_round_trips_through_str() {
    assert_eq!(AccountStatus::Arrears.as_str(), "arrears");
    assert_eq!("arrears".parse::<AccountStatus>(), Ok(AccountStatus::Arrears));
    assert_eq!("time_of_use".parse::<CalcMode>(), Ok(CalcMode::TimeOfUse));
    assert!("paused".parse::<AccountStatus>().is_err());
}

#[test]
fn status_serializes_snake_case() {
    let json = serde_json::to_string(&DeductionStatus::Partial).expect("serialize");
    assert_eq!(json, "\"partial\"");
}

#[test]
fn comm_address_candidates_prefer_composite() {
    let addr = CommAddress::new("collector-01", 3);
    assert_eq!(addr.candidates(), vec!["collector-01:3".to_string(), "3".to_string()]);

    let bare = CommAddress::new("", 7);
    assert_eq!(bare.candidates(), vec!["7".to_string()]);
}
