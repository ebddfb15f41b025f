use crate::error::format::format_error_with_color;
use crate::error::*;
use crate::locking::timeout::LockTimeoutValue;

#[test]
fn test_error_context_invalid_configuration() {
    let error = LeaseError::InvalidConfiguration("quorum needs an odd coordinator count".into());
    let context = ErrorContext::new(&error);

    assert!(context.suggestion.unwrap().contains("odd number"));
    assert!(context.details.unwrap().contains("odd coordinator count"));
}

#[test]
fn test_error_context_coordinator_unavailable() {
    let error = LeaseError::CoordinatorUnavailable {
        coordinator: "redis://10.0.0.7:6379".to_string(),
        details: "connection refused".to_string(),
    };
    let context = ErrorContext::new(&error);

    assert!(context.suggestion.unwrap().contains("redis://10.0.0.7:6379"));
    assert_eq!(context.details.as_deref(), Some("connection refused"));
}

#[test]
fn test_error_context_quorum_details() {
    let error = LeaseError::QuorumUnavailable {
        resource: "job-42".to_string(),
        reachable: 2,
        required: 3,
    };
    let context = ErrorContext::new(&error);

    let details = context.details.unwrap();
    assert!(details.contains("Only 2"));
    assert!(details.contains("3 are needed"));
}

#[test]
fn test_error_context_with_custom_suggestion() {
    let error = LeaseError::LeaseLost {
        resource: "job-42".to_string(),
    };
    let context = ErrorContext::new(&error).with_suggestion("Restart the batch".to_string());

    assert_eq!(context.suggestion.as_deref(), Some("Restart the batch"));
}

#[test]
fn test_error_context_display() {
    let error = LeaseError::LockTimeout {
        resource: "job-42".to_string(),
        waited_secs: 5.0,
        timeout_value: LockTimeoutValue::from_secs(5),
    };
    let context = ErrorContext::new(&error);
    let display = format!("{context}");

    assert!(display.contains("Error: Timed out acquiring lock on 'job-42'"));
    assert!(display.contains("Details: Configured acquire timeout: 5s"));
    assert!(display.contains("Suggestion:"));
}

#[test]
fn test_exit_codes() {
    assert_eq!(
        get_exit_code(&LeaseError::InvalidConfiguration("bad".into())),
        2
    );
    assert_eq!(
        get_exit_code(&LeaseError::LockTimeout {
            resource: "r".into(),
            waited_secs: 1.0,
            timeout_value: LockTimeoutValue::from_secs(1),
        }),
        3
    );
    assert_eq!(
        get_exit_code(&LeaseError::LeaseLost {
            resource: "r".into()
        }),
        4
    );
    assert_eq!(
        get_exit_code(&LeaseError::unavailable("node-a", "timeout")),
        20
    );
    assert_eq!(
        get_exit_code(&LeaseError::Cancelled {
            resource: "r".into(),
            waited_secs: 0.2,
        }),
        130
    );
    assert_eq!(get_exit_code(&LeaseError::ConfigFile("x".into())), 2);
}

#[test]
fn test_is_unavailable_classification() {
    assert!(LeaseError::unavailable("node-a", "refused").is_unavailable());
    assert!(
        LeaseError::QuorumUnavailable {
            resource: "r".into(),
            reachable: 1,
            required: 2,
        }
        .is_unavailable()
    );
    assert!(!LeaseError::AlreadyHeld { resource: "r".into() }.is_unavailable());
}

#[test]
fn test_format_error_chain() {
    let error = LeaseError::AlreadyHeld {
        resource: "job-42".to_string(),
    };
    let formatted = format_error_chain(&error);

    assert!(formatted.contains("Error:"));
    assert!(formatted.contains("already held"));
}

#[test]
fn test_format_error_with_color_reset() {
    let error = LeaseError::QuorumUnavailable {
        resource: "job-42".to_string(),
        reachable: 1,
        required: 3,
    };

    let formatted = format_error_with_color(&error, true);

    assert!(formatted.ends_with("\x1b[0m"));
    assert!(formatted.contains("Error:"));
    assert!(formatted.contains("Suggestions:"));
    assert!(formatted.contains("majority of coordination nodes"));
}

#[test]
fn test_format_error_no_color_no_reset() {
    let error = LeaseError::QuorumUnavailable {
        resource: "job-42".to_string(),
        reachable: 1,
        required: 3,
    };

    let formatted = format_error_with_color(&error, false);

    assert!(!formatted.contains("\x1b["));
    assert!(formatted.contains("Error:"));
    assert!(formatted.contains("Suggestions:"));
}
