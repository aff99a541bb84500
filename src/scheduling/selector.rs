//! Due-user selection

use std::sync::Arc;
use tracing::debug;

use crate::ledger::{LedgerError, PaymentLedger, User};
use crate::utils::Cadence;

/// Picks the users an execution cycle should attempt
#[derive(Clone)]
pub struct DueUserSelector {
    ledger: Arc<PaymentLedger>,
}

impl DueUserSelector {
    pub fn new(ledger: Arc<PaymentLedger>) -> Self {
        Self { ledger }
    }

    /// Every non-paused user on `cadence`, in address order. Whether a user
    /// was already paid this period is the executor's concern.
    pub async fn find_due(&self, cadence: Cadence) -> Result<Vec<User>, LedgerError> {
        // `users()` iterates a BTreeMap keyed by address, so order is stable
        let due: Vec<User> = self
            .ledger
            .users()
            .await
            .into_iter()
            .filter(|u| u.cadence == cadence && !u.paused)
            .collect();

        debug!("{} users due for {} cycle", due.len(), cadence);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_find_due_filters_cadence_and_paused() {
        let ledger = Arc::new(PaymentLedger::in_memory());
        for (addr, cadence) in [
            ("0x03", Cadence::Daily),
            ("0x01", Cadence::Daily),
            ("0x02", Cadence::Weekly),
            ("0x04", Cadence::Daily),
        ] {
            ledger
                .enroll_user(User::new(addr, cadence, dec!(10), dec!(100)))
                .await
                .unwrap();
        }
        ledger.set_paused("0x04", true).await.unwrap();

        let selector = DueUserSelector::new(ledger);
        let daily: Vec<String> = selector
            .find_due(Cadence::Daily)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.address)
            .collect();
        assert_eq!(daily, vec!["0x01".to_string(), "0x03".to_string()]);

        let weekly = selector.find_due(Cadence::Weekly).await.unwrap();
        assert_eq!(weekly.len(), 1);
    }
}
