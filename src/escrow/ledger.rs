//! Trade ledger: the only durable record of a trade
//!
//! Status writes are compare-and-swap updates guarded by `WHERE status = ?`,
//! so two racing writers for the same trade resolve to one applied update and
//! one stale read. The legal-transition table is checked before every write.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::types::{
    ChannelRef, Currency, NewTrade, Role, Trade, TradeId, TradeStatus, UserId,
};
use crate::store::Store;

const TRADE_COLUMNS: &str = "id, initiator_id, counterparty_id, currency, initiator_gives, \
     counterparty_gives, deposit_address, channel_ref, status, counterparty_role, deposit_amount, \
     released_by, payout_address, cancel_reason, created_at, updated_at, expected_amount";

/// Extra fields written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub counterparty_role: Option<Role>,
    pub deposit_amount: Option<u64>,
    pub released_by: Option<UserId>,
    pub payout_address: Option<String>,
    pub cancel_reason: Option<String>,
}

/// Outcome of a conditional status update.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The trade was in the expected state and now holds the new one.
    Applied(Trade),
    /// Someone else moved the trade first; this is its current state.
    Stale(Trade),
}

#[derive(Clone)]
pub struct TradeLedger {
    store: Store,
}

impl TradeLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a trade in `Created` and return its id.
    pub fn create(&self, new: &NewTrade) -> EscrowResult<TradeId> {
        self.store.with_conn(|c| insert_trade(c, new))
    }

    /// Insert a trade and attach the address derived from its id in one
    /// transaction. If `derive` fails nothing is committed.
    pub fn create_with_address<F>(&self, new: &NewTrade, derive: F) -> EscrowResult<Trade>
    where
        F: FnOnce(TradeId) -> EscrowResult<String>,
    {
        self.store.with_conn(|c| {
            let tx = c.transaction()?;
            let id = insert_trade(&tx, new)?;
            let address = derive(id)?;
            tx.execute(
                "UPDATE trades SET deposit_address = ?2 WHERE id = ?1",
                params![id, address],
            )?;
            let trade = load(&tx, id)?;
            tx.commit()?;
            Ok(trade)
        })
    }

    /// Set the deposit address once; re-attaching the same value is accepted.
    pub fn attach_address(&self, id: TradeId, address: &str) -> EscrowResult<()> {
        self.store.with_conn(|c| {
            let n = c.execute(
                "UPDATE trades SET deposit_address = ?2, updated_at = ?3 WHERE id = ?1 AND deposit_address IS NULL",
                params![id, address, Utc::now().timestamp()],
            )?;
            if n == 1 {
                return Ok(());
            }
            let current = load(c, id)?;
            if current.deposit_address.as_deref() == Some(address) {
                Ok(())
            } else {
                Err(EscrowError::InvalidInput(format!(
                    "trade {} already has a deposit address",
                    id
                )))
            }
        })
    }

    /// Bind the private channel once; the binding never changes afterwards.
    pub fn attach_channel(&self, id: TradeId, channel: &ChannelRef) -> EscrowResult<()> {
        self.store.with_conn(|c| {
            let n = c.execute(
                "UPDATE trades SET channel_ref = ?2, updated_at = ?3 WHERE id = ?1 AND channel_ref IS NULL",
                params![id, channel, Utc::now().timestamp()],
            )?;
            if n == 1 {
                return Ok(());
            }
            let current = load(c, id)?;
            if current.channel_ref.as_ref() == Some(channel) {
                Ok(())
            } else {
                Err(EscrowError::InvalidInput(format!(
                    "trade {} is already bound to a channel",
                    id
                )))
            }
        })
    }

    /// Move a trade to `next` from whatever state it is in, if that edge is legal.
    pub fn set_status(&self, id: TradeId, next: TradeStatus) -> EscrowResult<Trade> {
        loop {
            let current = self.get(id)?;
            match self.transition(id, current.status, next, TransitionPatch::default())? {
                Transition::Applied(trade) => return Ok(trade),
                // lost a race: re-read and re-validate against the new state
                Transition::Stale(_) => continue,
            }
        }
    }

    /// Conditional update: applies only if the trade is still in `expected`.
    pub fn transition(
        &self,
        id: TradeId,
        expected: TradeStatus,
        next: TradeStatus,
        patch: TransitionPatch,
    ) -> EscrowResult<Transition> {
        if !expected.can_transition_to(next) {
            return Err(EscrowError::IllegalTransition {
                from: expected,
                to: next,
            });
        }
        self.store.with_conn(|c| {
            let n = c.execute(
                "UPDATE trades SET
                    status = ?3,
                    updated_at = ?4,
                    counterparty_role = COALESCE(?5, counterparty_role),
                    deposit_amount = COALESCE(?6, deposit_amount),
                    released_by = COALESCE(?7, released_by),
                    payout_address = COALESCE(?8, payout_address),
                    cancel_reason = COALESCE(?9, cancel_reason)
                 WHERE id = ?1 AND status = ?2",
                params![
                    id,
                    expected.as_str(),
                    next.as_str(),
                    Utc::now().timestamp(),
                    patch.counterparty_role.map(|r| r.as_str()),
                    patch.deposit_amount.map(|a| a as i64),
                    patch.released_by.as_ref().map(|u| u.as_str()),
                    patch.payout_address,
                    patch.cancel_reason,
                ],
            )?;
            let trade = load(c, id)?;
            if n == 1 {
                debug!(trade_id = id, from = %expected, to = %next, "[LEDGER] status updated");
                Ok(Transition::Applied(trade))
            } else {
                Ok(Transition::Stale(trade))
            }
        })
    }

    pub fn get(&self, id: TradeId) -> EscrowResult<Trade> {
        self.store.with_conn(|c| load(c, id))
    }

    pub fn list_by_status(&self, statuses: &[TradeStatus]) -> EscrowResult<Vec<Trade>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM trades WHERE status IN ({}) ORDER BY id",
            TRADE_COLUMNS, placeholders
        );
        self.store.with_conn(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(statuses.iter().map(|s| s.as_str())),
                TradeRow::from_row,
            )?;
            collect_trades(rows)
        })
    }

    /// Trades the user is a party to, newest first.
    pub fn list_for_user(&self, user: &UserId, include_terminal: bool) -> EscrowResult<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE (initiator_id = ?1 OR counterparty_id = ?1) ORDER BY id DESC",
            TRADE_COLUMNS
        );
        let trades = self.store.with_conn(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![user.as_str()], TradeRow::from_row)?;
            collect_trades(rows)
        })?;
        Ok(trades
            .into_iter()
            .filter(|t| include_terminal || !t.status.is_terminal())
            .collect())
    }
}

fn insert_trade(c: &Connection, new: &NewTrade) -> EscrowResult<TradeId> {
    let now = Utc::now().timestamp();
    let expected = i64::try_from(new.expected_amount)
        .map_err(|_| EscrowError::InvalidInput("Escrow amount is too large.".into()))?;
    c.execute(
        "INSERT INTO trades (initiator_id, counterparty_id, currency, initiator_gives, counterparty_gives, expected_amount, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            new.initiator_id.as_str(),
            new.counterparty_id.as_str(),
            new.currency.code(),
            new.initiator_gives,
            new.counterparty_gives,
            expected,
            TradeStatus::Created.as_str(),
            now,
        ],
    )?;
    Ok(c.last_insert_rowid())
}

fn load(c: &Connection, id: TradeId) -> EscrowResult<Trade> {
    let sql = format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS);
    let row = c
        .query_row(&sql, params![id], TradeRow::from_row)
        .optional()?;
    match row {
        Some(r) => r.into_trade(),
        None => Err(EscrowError::not_found("trade", id)),
    }
}

fn collect_trades(
    rows: impl Iterator<Item = rusqlite::Result<TradeRow>>,
) -> EscrowResult<Vec<Trade>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_trade()?);
    }
    Ok(out)
}

/// Raw column values; decoded into `Trade` outside the rusqlite closure.
struct TradeRow {
    id: i64,
    initiator_id: String,
    counterparty_id: String,
    currency: String,
    initiator_gives: String,
    counterparty_gives: String,
    deposit_address: Option<String>,
    channel_ref: Option<String>,
    status: String,
    counterparty_role: Option<String>,
    deposit_amount: Option<i64>,
    released_by: Option<String>,
    payout_address: Option<String>,
    cancel_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
    expected_amount: i64,
}

impl TradeRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            initiator_id: r.get(1)?,
            counterparty_id: r.get(2)?,
            currency: r.get(3)?,
            initiator_gives: r.get(4)?,
            counterparty_gives: r.get(5)?,
            deposit_address: r.get(6)?,
            channel_ref: r.get(7)?,
            status: r.get(8)?,
            counterparty_role: r.get(9)?,
            deposit_amount: r.get(10)?,
            released_by: r.get(11)?,
            payout_address: r.get(12)?,
            cancel_reason: r.get(13)?,
            created_at: r.get(14)?,
            updated_at: r.get(15)?,
            expected_amount: r.get(16)?,
        })
    }

    fn into_trade(self) -> EscrowResult<Trade> {
        let id = self.id;
        let corrupt = |what: &str, value: &str| {
            EscrowError::Corrupt(format!("trade {}: bad {} `{}`", id, what, value))
        };
        let currency: Currency = self
            .currency
            .parse()
            .map_err(|_| corrupt("currency", &self.currency))?;
        let status =
            TradeStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        let counterparty_role = match self.counterparty_role.as_deref() {
            Some(r) => Some(Role::parse(r).ok_or_else(|| corrupt("role", r))?),
            None => None,
        };
        let deposit_amount = match self.deposit_amount {
            Some(a) => Some(u64::try_from(a).map_err(|_| corrupt("amount", &a.to_string()))?),
            None => None,
        };
        let expected_amount = u64::try_from(self.expected_amount)
            .map_err(|_| corrupt("expected amount", &self.expected_amount.to_string()))?;
        Ok(Trade {
            id,
            initiator_id: UserId(self.initiator_id),
            counterparty_id: UserId(self.counterparty_id),
            currency,
            initiator_gives: self.initiator_gives,
            counterparty_gives: self.counterparty_gives,
            expected_amount,
            deposit_address: self.deposit_address,
            channel_ref: self.channel_ref,
            status,
            counterparty_role,
            deposit_amount,
            released_by: self.released_by.map(UserId),
            payout_address: self.payout_address,
            cancel_reason: self.cancel_reason,
            created_at: timestamp(id, self.created_at)?,
            updated_at: timestamp(id, self.updated_at)?,
        })
    }
}

fn timestamp(id: TradeId, secs: i64) -> EscrowResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| EscrowError::Corrupt(format!("trade {}: bad timestamp {}", id, secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> TradeLedger {
        TradeLedger::new(Store::open_in_memory().unwrap())
    }

    fn new_trade() -> NewTrade {
        NewTrade {
            initiator_id: UserId::new("100"),
            counterparty_id: UserId::new("200"),
            currency: Currency::Ltc,
            initiator_gives: "0.5 LTC".into(),
            counterparty_gives: "Steam card".into(),
            expected_amount: 50_000_000,
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let l = ledger();
        let a = l.create(&new_trade()).unwrap();
        let b = l.create(&new_trade()).unwrap();
        assert!(b > a);
        let stored = l.get(a).unwrap();
        assert_eq!(stored.status, TradeStatus::Created);
        assert_eq!(stored.expected_amount, 50_000_000);
    }

    #[test]
    fn failed_derivation_leaves_no_record() {
        let l = ledger();
        let err = l
            .create_with_address(&new_trade(), |_| {
                Err(EscrowError::WalletUnavailable("no seed".into()))
            })
            .unwrap_err();
        assert!(matches!(err, EscrowError::WalletUnavailable(_)));
        assert!(l
            .list_by_status(&[TradeStatus::Created])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn address_and_channel_attach_once() {
        let l = ledger();
        let id = l.create(&new_trade()).unwrap();
        l.attach_address(id, "ltc1qexample").unwrap();
        l.attach_address(id, "ltc1qexample").unwrap();
        assert!(l.attach_address(id, "ltc1qother").is_err());

        l.attach_channel(id, &"555".to_string()).unwrap();
        assert!(l.attach_channel(id, &"556".to_string()).is_err());
        let t = l.get(id).unwrap();
        assert_eq!(t.deposit_address.as_deref(), Some("ltc1qexample"));
        assert_eq!(t.channel_ref.as_deref(), Some("555"));
    }

    #[test]
    fn illegal_set_status_leaves_status_unchanged() {
        let l = ledger();
        let id = l.create(&new_trade()).unwrap();
        let err = l.set_status(id, TradeStatus::Released).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::IllegalTransition {
                from: TradeStatus::Created,
                to: TradeStatus::Released
            }
        ));
        assert_eq!(l.get(id).unwrap().status, TradeStatus::Created);

        l.set_status(id, TradeStatus::Cancelled).unwrap();
        assert!(l.set_status(id, TradeStatus::AwaitingRole).is_err());
        assert_eq!(l.get(id).unwrap().status, TradeStatus::Cancelled);
    }

    #[test]
    fn compare_and_swap_reports_stale() {
        let l = ledger();
        let id = l.create(&new_trade()).unwrap();
        l.set_status(id, TradeStatus::AwaitingRole).unwrap();

        let first = l
            .transition(
                id,
                TradeStatus::AwaitingRole,
                TradeStatus::SenderChosen,
                TransitionPatch {
                    counterparty_role: Some(Role::Sender),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(first, Transition::Applied(ref t) if t.counterparty_role == Some(Role::Sender)));

        let second = l
            .transition(
                id,
                TradeStatus::AwaitingRole,
                TradeStatus::ReceiverChosen,
                TransitionPatch {
                    counterparty_role: Some(Role::Receiver),
                    ..Default::default()
                },
            )
            .unwrap();
        match second {
            Transition::Stale(t) => {
                assert_eq!(t.status, TradeStatus::SenderChosen);
                assert_eq!(t.counterparty_role, Some(Role::Sender));
            }
            other => panic!("expected stale, got {:?}", other),
        }
    }

    #[test]
    fn list_queries_filter() {
        let l = ledger();
        let a = l.create(&new_trade()).unwrap();
        let b = l.create(&new_trade()).unwrap();
        l.set_status(b, TradeStatus::Cancelled).unwrap();

        let open = l.list_by_status(&[TradeStatus::Created]).unwrap();
        assert_eq!(open.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a]);

        let mine = l.list_for_user(&UserId::new("200"), false).unwrap();
        assert_eq!(mine.len(), 1);
        let all = l.list_for_user(&UserId::new("100"), true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(l.list_for_user(&UserId::new("999"), true).unwrap().is_empty());
    }

    #[test]
    fn missing_trade_is_not_found() {
        let l = ledger();
        assert!(matches!(
            l.get(42),
            Err(EscrowError::NotFound { what: "trade", .. })
        ));
    }
}
