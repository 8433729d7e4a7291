use crate::error::HubError;

/// Strict execution stages for a payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStage {
    New,
    Routed,
    PrepareInProgress,
    Prepared,
    Committed,
    Aborted,
}

impl PaymentStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Routed => "routed",
            Self::PrepareInProgress => "prepare_in_progress",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

/// Enforces new->routed->prepare_in_progress->{prepared|aborted}->committed
/// ordering. Kept explicit so a phase cannot be skipped silently.
#[derive(Debug, Clone)]
pub struct PaymentStageMachine {
    tx_id: uuid::Uuid,
    stage: PaymentStage,
}

impl PaymentStageMachine {
    pub fn new(tx_id: uuid::Uuid) -> Self {
        Self {
            tx_id,
            stage: PaymentStage::New,
        }
    }

    pub fn tx_id(&self) -> uuid::Uuid {
        self.tx_id
    }

    pub fn stage(&self) -> PaymentStage {
        self.stage
    }

    pub fn mark_routed(&mut self) -> Result<(), HubError> {
        self.advance(PaymentStage::New, PaymentStage::Routed)
    }

    pub fn mark_prepare_in_progress(&mut self) -> Result<(), HubError> {
        self.advance(PaymentStage::Routed, PaymentStage::PrepareInProgress)
    }

    pub fn mark_prepared(&mut self) -> Result<(), HubError> {
        self.advance(PaymentStage::PrepareInProgress, PaymentStage::Prepared)
    }

    pub fn mark_committed(&mut self) -> Result<(), HubError> {
        self.advance(PaymentStage::Prepared, PaymentStage::Committed)
    }

    /// Abort is reachable from any non-terminal stage, and is itself
    /// idempotent: aborting an already-aborted transaction is a no-op.
    pub fn mark_aborted(&mut self) -> Result<(), HubError> {
        if self.stage == PaymentStage::Committed {
            return Err(HubError::stage_violation("non-committed", "committed"));
        }
        self.stage = PaymentStage::Aborted;
        Ok(())
    }

    fn advance(&mut self, expected_current: PaymentStage, next: PaymentStage) -> Result<(), HubError> {
        if self.stage != expected_current {
            return Err(HubError::stage_violation(
                expected_current.name(),
                self.stage.name(),
            ));
        }
        self.stage = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_stage_order() {
        let mut machine = PaymentStageMachine::new(uuid::Uuid::new_v4());
        assert!(machine.mark_routed().is_ok());
        assert!(machine.mark_prepare_in_progress().is_ok());
        assert!(machine.mark_prepared().is_ok());
        assert!(machine.mark_committed().is_ok());
    }

    #[test]
    fn rejects_skipping_prepare() {
        let mut machine = PaymentStageMachine::new(uuid::Uuid::new_v4());
        machine.mark_routed().unwrap();
        let err = machine.mark_prepared().unwrap_err();
        assert!(err
            .to_string()
            .contains("expected 'prepare_in_progress', got 'routed'"));
    }

    #[test]
    fn abort_is_idempotent_unless_committed() {
        let mut machine = PaymentStageMachine::new(uuid::Uuid::new_v4());
        assert!(machine.mark_aborted().is_ok());
        assert!(machine.mark_aborted().is_ok());

        let mut committed = PaymentStageMachine::new(uuid::Uuid::new_v4());
        committed.mark_routed().unwrap();
        committed.mark_prepare_in_progress().unwrap();
        committed.mark_prepared().unwrap();
        committed.mark_committed().unwrap();
        assert!(committed.mark_aborted().is_err());
    }
}
