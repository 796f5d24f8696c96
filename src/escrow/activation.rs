//! Activation keys and the activated-user set
//!
//! A key flips `unused -> used` exactly once. The flip and the user insert
//! share one SQLite transaction, and the flip is a conditional update, so of
//! any number of concurrent redeemers of the same code exactly one sees a row
//! change.

use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::types::UserId;
use crate::store::Store;

/// Bytes of entropy per key (rendered as uppercase hex).
const KEY_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activated {
    pub user: UserId,
}

#[derive(Clone)]
pub struct ActivationStore {
    store: Store,
}

impl ActivationStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Mint and persist a fresh unused key. Caller checks authorization.
    pub fn issue_key(&self, created_by: Option<&UserId>) -> EscrowResult<String> {
        let mut raw = [0u8; KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let code = hex::encode_upper(raw);
        self.store.with_conn(|c| {
            c.execute(
                "INSERT INTO activation_keys (code, used, created_by, created_at) VALUES (?1, 0, ?2, ?3)",
                params![code, created_by.map(|u| u.as_str()), Utc::now().timestamp()],
            )?;
            Ok(())
        })?;
        info!("[ACTIVATION] Issued key {}…", &code[..6]);
        Ok(code)
    }

    pub fn redeem(&self, code: &str, user: &UserId) -> EscrowResult<Activated> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(EscrowError::not_found("activation key", ""));
        }
        self.store.with_conn(|c| {
            let tx = c.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = Utc::now().timestamp();
            let flipped = tx.execute(
                "UPDATE activation_keys SET used = 1, used_by = ?2, used_at = ?3 WHERE code = ?1 AND used = 0",
                params![code, user.as_str(), now],
            )?;
            if flipped == 0 {
                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT used FROM activation_keys WHERE code = ?1",
                        params![code],
                        |r| r.get(0),
                    )
                    .optional()?;
                return match exists {
                    Some(_) => Err(EscrowError::AlreadyUsed),
                    None => Err(EscrowError::not_found("activation key", &code)),
                };
            }
            tx.execute(
                "INSERT OR IGNORE INTO activated_users (user_id, activated_at) VALUES (?1, ?2)",
                params![user.as_str(), now],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        info!(user = %user, "[ACTIVATION] Key redeemed");
        Ok(Activated { user: user.clone() })
    }

    pub fn is_activated(&self, user: &UserId) -> EscrowResult<bool> {
        self.store.with_conn(|c| {
            let found: Option<i64> = c
                .query_row(
                    "SELECT 1 FROM activated_users WHERE user_id = ?1",
                    params![user.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

/// Keys are issued uppercase; accept pasted lowercase and stray whitespace.
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
