//! Exchange attempt state machine.

use std::fmt;
use std::time::Instant;

use kantor_common::ExchangeError;

/// Progress of a single exchange request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeState {
    /// Checking the request before any lock is taken.
    Validating,
    /// Wallet locks held and the source wallet loaded.
    SourceLocked,
    /// Conversion priced.
    RatesResolved,
    /// Target wallet loaded or created under its lock.
    TargetLocked,
    /// Debit and credit staged.
    Applied,
    /// Balances and transaction committed.
    Recorded,
    /// Refused for a business reason; nothing was written.
    Rejected,
    /// Infrastructure failure; nothing was written.
    Failed,
}

impl ExchangeState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Recorded | ExchangeState::Rejected | ExchangeState::Failed
        )
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[ExchangeState] {
        match self {
            ExchangeState::Validating => &[
                ExchangeState::SourceLocked,
                ExchangeState::Rejected,
                ExchangeState::Failed,
            ],
            ExchangeState::SourceLocked => &[
                ExchangeState::RatesResolved,
                ExchangeState::Rejected,
                ExchangeState::Failed,
            ],
            ExchangeState::RatesResolved => &[
                ExchangeState::TargetLocked,
                ExchangeState::Rejected,
                ExchangeState::Failed,
            ],
            ExchangeState::TargetLocked => &[
                ExchangeState::Applied,
                ExchangeState::Rejected,
                ExchangeState::Failed,
            ],
            ExchangeState::Applied => &[
                ExchangeState::Recorded,
                ExchangeState::Rejected,
                ExchangeState::Failed,
            ],
            ExchangeState::Recorded | ExchangeState::Rejected | ExchangeState::Failed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: ExchangeState) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Terminal failure state for an error.
    pub fn for_error(err: &ExchangeError) -> ExchangeState {
        if err.is_rejection() {
            ExchangeState::Rejected
        } else {
            ExchangeState::Failed
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the states an attempt went through.
#[derive(Debug, Clone)]
pub struct ExchangeProgress {
    state: ExchangeState,
    started: Instant,
    path: Vec<ExchangeState>,
}

impl ExchangeProgress {
    pub fn new() -> Self {
        Self {
            state: ExchangeState::Validating,
            started: Instant::now(),
            path: vec![ExchangeState::Validating],
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// States visited so far, in order.
    pub fn path(&self) -> &[ExchangeState] {
        &self.path
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Move to `next`, refusing transitions the machine does not allow.
    pub fn advance(&mut self, next: ExchangeState) -> Result<(), ExchangeError> {
        if !self.state.can_transition_to(next) {
            return Err(ExchangeError::Internal(format!(
                "invalid exchange transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        self.path.push(next);
        Ok(())
    }

    /// Record the terminal state for an error. No-op once terminal.
    pub fn abort(&mut self, err: &ExchangeError) -> ExchangeState {
        if !self.state.is_terminal() {
            let terminal = ExchangeState::for_error(err);
            self.state = terminal;
            self.path.push(terminal);
        }
        self.state
    }
}

impl Default for ExchangeProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kantor_common::Currency;

    #[test]
    fn test_happy_path() {
        let mut progress = ExchangeProgress::new();
        for next in [
            ExchangeState::SourceLocked,
            ExchangeState::RatesResolved,
            ExchangeState::TargetLocked,
            ExchangeState::Applied,
            ExchangeState::Recorded,
        ] {
            progress.advance(next).unwrap();
        }

        assert!(progress.state().is_terminal());
        assert_eq!(progress.path().len(), 6);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut progress = ExchangeProgress::new();
        assert!(progress.advance(ExchangeState::Applied).is_err());
        assert_eq!(progress.state(), ExchangeState::Validating);
    }

    #[test]
    fn test_abort_classifies_errors() {
        let mut progress = ExchangeProgress::new();
        let state = progress.abort(&ExchangeError::SameCurrency(Currency::pln()));
        assert_eq!(state, ExchangeState::Rejected);

        // Terminal states stick.
        assert_eq!(
            progress.abort(&ExchangeError::Storage("down".into())),
            ExchangeState::Rejected
        );

        let mut progress = ExchangeProgress::new();
        progress.advance(ExchangeState::SourceLocked).unwrap();
        assert_eq!(
            progress.abort(&ExchangeError::Storage("down".into())),
            ExchangeState::Failed
        );
        assert!(!ExchangeState::Failed.can_transition_to(ExchangeState::Recorded));
    }
}
