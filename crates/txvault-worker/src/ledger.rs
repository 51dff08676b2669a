//! Credit ledger.
//!
//! Every routed event costs its tenant one credit. The decrement is a single
//! atomic update in the metadata store, so concurrent charges never lose an
//! update; the returned snapshot decides whether the tenant is still served.

use std::sync::Arc;

use tracing::debug;

use txvault_core::{DatabaseId, UserAccount, UserId};
use txvault_store::{MetadataStore, Result};

/// Result of charging one credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The charge left the balance above the low-water mark.
    Charged(UserAccount),
    /// The charge left the balance at or below the low-water mark.
    Depleted(UserAccount),
    /// The user no longer exists.
    UserMissing,
}

/// Atomic decrement-and-check against the metadata store.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn MetadataStore>,
}

impl CreditLedger {
    /// Create a ledger over a metadata store.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Charge one credit and classify the resulting balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata store fails; nothing is charged then.
    pub async fn charge_and_check(
        &self,
        user_id: &UserId,
        database_id: &DatabaseId,
    ) -> Result<ChargeOutcome> {
        let Some(account) = self.store.charge_credit(user_id).await? else {
            debug!(user_id = %user_id, database_id = %database_id, "charged user does not exist");
            return Ok(ChargeOutcome::UserMissing);
        };

        debug!(
            user_id = %user_id,
            database_id = %database_id,
            credits = account.credits,
            "charged one credit"
        );

        Ok(if account.is_depleted() {
            ChargeOutcome::Depleted(account)
        } else {
            ChargeOutcome::Charged(account)
        })
    }
}
