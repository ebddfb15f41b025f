use crate::error::LeaseError;

pub fn get_exit_code(error: &LeaseError) -> i32 {
    match error {
        LeaseError::InvalidConfiguration(_)
        | LeaseError::ConfigFile(_)
        | LeaseError::Config(_) => 2,

        LeaseError::LockTimeout { .. } => 3,

        LeaseError::LeaseLost { .. } => 4,

        LeaseError::ExclusionViolated { .. } => 5,

        LeaseError::AlreadyHeld { .. } => 17,

        LeaseError::CoordinatorUnavailable { .. } | LeaseError::QuorumUnavailable { .. } => 20,

        LeaseError::Cancelled { .. } => 130, // Conventional exit code for SIGINT

        _ => 1,
    }
}
