// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::LeaseError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a LeaseError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a LeaseError) -> Self {
        let (suggestion, details) = match error {
            LeaseError::InvalidConfiguration(msg) => {
                let suggestion = Some(
                    "Check leaselock.toml or the LEASELOCK_* environment variables. Quorum \
                     strategies need an odd number (3 or more) of coordinator addresses."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LeaseError::CoordinatorUnavailable {
                coordinator,
                details,
            } => {
                let suggestion = Some(format!(
                    "Verify that the coordination node at {coordinator} is running and reachable, \
                     or raise coordinators.timeout_ms if the network is slow."
                ));
                (suggestion, Some(details.clone()))
            }
            LeaseError::QuorumUnavailable {
                reachable,
                required,
                ..
            } => {
                let suggestion = Some(
                    "A majority of coordination nodes must be reachable. Restore the failed nodes \
                     before retrying."
                        .to_string(),
                );
                let details = Some(format!(
                    "Only {reachable} coordinator(s) answered; {required} are needed for a quorum."
                ));
                (suggestion, details)
            }
            LeaseError::LockTimeout { timeout_value, .. } => {
                let suggestion = Some(
                    "Another process is holding the lock. Wait for it to finish or raise the \
                     timeout with --wait (use 'infinite' to wait indefinitely)."
                        .to_string(),
                );
                let details = Some(format!("Configured acquire timeout: {timeout_value}"));
                (suggestion, details)
            }
            LeaseError::LeaseLost { .. } => {
                let suggestion = Some(
                    "The lease could not be renewed. Abort the protected work and acquire the \
                     lock again."
                        .to_string(),
                );
                (suggestion, None)
            }
            LeaseError::AlreadyHeld { .. } => {
                let suggestion = Some(
                    "Release the existing handle before acquiring the same resource again."
                        .to_string(),
                );
                (suggestion, None)
            }
            LeaseError::ExclusionViolated { .. } => {
                let suggestion = Some(
                    "Check coordinator clocks and the clock_drift_factor setting, and make sure \
                     every node enforces key expiry."
                        .to_string(),
                );
                (suggestion, None)
            }
            LeaseError::Config(err) => {
                let suggestion =
                    Some("Fix the configuration file syntax and field types.".to_string());
                (suggestion, Some(err.to_string()))
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
