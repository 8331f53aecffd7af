//! Result contract of every multi-key mutation.

use serde::Serialize;

/// Overall shape of an [`OperationOutcome`].
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Nothing matched the target; no store call was made.
    Noop,
    Succeeded,
    Partial,
    Failed,
}

/// Per-key result of a delete, copy or rename.
///
/// Keys are recorded as they are processed, so a partially applied
/// operation reports exactly which keys made it.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub succeeded_keys: Vec<String>,
    pub failed_keys: Vec<String>,

    /// First error encountered, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&mut self, key: impl Into<String>) {
        self.succeeded_keys.push(key.into());
    }

    /// Record a failed key. Only the first error message is kept.
    pub fn fail(&mut self, key: impl Into<String>, error: impl ToString) {
        self.failed_keys.push(key.into());
        if self.error.is_none() {
            self.error = Some(error.to_string());
        }
    }

    /// Mark every key in `keys` as failed with the same error.
    pub fn fail_all<I, K>(&mut self, keys: I, error: impl ToString)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let message = error.to_string();
        for key in keys {
            self.fail(key, &message);
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        match (self.succeeded_keys.is_empty(), self.failed_keys.is_empty()) {
            (true, true) => OutcomeStatus::Noop,
            (false, true) => OutcomeStatus::Succeeded,
            (false, false) => OutcomeStatus::Partial,
            (true, false) => OutcomeStatus::Failed,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.status() == OutcomeStatus::Noop
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_distinguishes_empty_full_and_partial() {
        let mut outcome = OperationOutcome::new();
        assert_eq!(outcome.status(), OutcomeStatus::Noop);

        outcome.succeed("a");
        assert_eq!(outcome.status(), OutcomeStatus::Succeeded);

        outcome.fail("b", "boom");
        outcome.fail("c", "second");
        assert_eq!(outcome.status(), OutcomeStatus::Partial);
        assert_eq!(outcome.error.as_deref(), Some("boom"));

        let mut failed = OperationOutcome::new();
        failed.fail_all(["x", "y"], "down");
        assert_eq!(failed.status(), OutcomeStatus::Failed);
        assert_eq!(failed.failed_keys, vec!["x", "y"]);
    }
}
