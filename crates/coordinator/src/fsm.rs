use quorum_types::{Error, Result, TransactionId, TransactionStatus};
use tracing::info;

/// Per-ceremony finite state machine.
///
/// Valid transitions:
/// - pending -> signing_round1 (first Round 1 submission)
/// - signing_round1 -> signing_round2 (round full, aggregation commits)
/// - signing_round2 -> signing_round3 (Round 3 opens)
/// - signing_round3 -> signing_round4 (round full, aggregation commits)
/// - signing_round4 -> completed (final signature persisted)
/// - any non-terminal -> cancelled (administrative)
/// - any non-terminal -> failed (timeout or aggregation failure)
///
/// The durable status column is authoritative; this automaton only
/// decides legality inside a conditional write, so a stale view loses
/// the compare-and-set rather than corrupting state.
pub struct CeremonyFsm {
    current: TransactionStatus,
    transaction_id: TransactionId,
}

impl CeremonyFsm {
    /// Rehydrate from the status a repository read returned.
    pub fn from_status(transaction_id: TransactionId, status: TransactionStatus) -> Self {
        Self {
            current: status,
            transaction_id,
        }
    }

    pub fn current(&self) -> TransactionStatus {
        self.current
    }

    /// First Round 1 submission opens the round.
    pub fn open_round1(&mut self) -> Result<()> {
        self.transition(
            TransactionStatus::SigningRound1,
            &[TransactionStatus::Pending],
        )
    }

    /// Round 1 is full; the server starts aggregating.
    pub fn begin_round2(&mut self) -> Result<()> {
        self.transition(
            TransactionStatus::SigningRound2,
            &[TransactionStatus::SigningRound1],
        )
    }

    /// Aggregate committed; guardians may fetch Round 3 inputs.
    pub fn open_round3(&mut self) -> Result<()> {
        self.transition(
            TransactionStatus::SigningRound3,
            &[TransactionStatus::SigningRound2],
        )
    }

    /// Round 3 is full; the server combines shares.
    pub fn begin_round4(&mut self) -> Result<()> {
        self.transition(
            TransactionStatus::SigningRound4,
            &[TransactionStatus::SigningRound3],
        )
    }

    /// Final signature persisted.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(
            TransactionStatus::Completed,
            &[TransactionStatus::SigningRound4],
        )
    }

    /// Administrative cancellation, from any non-terminal state.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition_from_active(TransactionStatus::Cancelled)
    }

    /// Timeout or aggregation failure, from any non-terminal state.
    pub fn fail(&mut self) -> Result<()> {
        self.transition_from_active(TransactionStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    fn transition_from_active(&mut self, new_state: TransactionStatus) -> Result<()> {
        self.transition(
            new_state,
            &[
                TransactionStatus::Pending,
                TransactionStatus::SigningRound1,
                TransactionStatus::SigningRound2,
                TransactionStatus::SigningRound3,
                TransactionStatus::SigningRound4,
            ],
        )
    }

    fn transition(
        &mut self,
        new_state: TransactionStatus,
        allowed_from: &[TransactionStatus],
    ) -> Result<()> {
        if !allowed_from.contains(&self.current) {
            return Err(Error::ConflictingStatus {
                transaction_id: self.transaction_id.clone(),
                actual: self.current,
            });
        }

        info!(
            "state transition for transaction={}: {} -> {}",
            self.transaction_id, self.current, new_state
        );

        self.current = new_state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm(status: TransactionStatus) -> CeremonyFsm {
        CeremonyFsm::from_status(TransactionId::from("tx-1"), status)
    }

    #[test]
    fn test_fsm_happy_path() {
        let mut fsm = fsm(TransactionStatus::Pending);

        assert!(fsm.open_round1().is_ok());
        assert!(fsm.begin_round2().is_ok());
        assert!(fsm.open_round3().is_ok());
        assert!(fsm.begin_round4().is_ok());
        assert!(fsm.complete().is_ok());

        assert_eq!(fsm.current(), TransactionStatus::Completed);
        assert!(fsm.is_terminal());
    }

    #[test]
    fn test_fsm_rejects_skipping_rounds() {
        let mut fsm = fsm(TransactionStatus::Pending);
        assert!(fsm.begin_round4().is_err());
        assert!(fsm.complete().is_err());

        assert!(fsm.open_round1().is_ok());
        assert!(fsm.open_round3().is_err());
    }

    #[test]
    fn test_fsm_never_regresses_from_terminal() {
        for status in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            let mut terminal = fsm(status);
            assert!(terminal.cancel().is_err());
            assert!(terminal.fail().is_err());
            assert!(terminal.open_round1().is_err());
        }
    }

    #[test]
    fn test_fsm_cancel_and_fail_from_any_active_state() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::SigningRound1,
            TransactionStatus::SigningRound2,
            TransactionStatus::SigningRound3,
            TransactionStatus::SigningRound4,
        ] {
            let mut cancel_fsm = fsm(status);
            assert!(cancel_fsm.cancel().is_ok());
            assert!(cancel_fsm.is_terminal());

            let mut fail_fsm = fsm(status);
            assert!(fail_fsm.fail().is_ok());
            assert_eq!(fail_fsm.current(), TransactionStatus::Failed);
        }
    }
}
