//! Transactions.

use crate::error::{DbError, DbResult};
use crate::types::{Cookie, DnPolicy, Entry};
use crate::url::UrlDescriptor;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can record operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// An operation recorded by a transaction, applied in order at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    /// Insert or replace an entry.
    Put(Entry),
    /// Remove an entry by DN.
    Delete(String),
    /// Record a cookie.
    SetCookie(Cookie),
    /// Forget the cookie.
    ClearCookie,
    /// Record the search descriptor.
    SetDescriptor(UrlDescriptor),
    /// Forget the search descriptor.
    ClearDescriptor,
    /// Mark every entry absent.
    ResetPresence,
    /// Mark one entry present.
    MarkPresent(String),
    /// Remove every entry.
    ClearEntries,
}

/// A group of changes committed as one durable unit.
///
/// Nothing is visible to readers until [`crate::Store::commit`] succeeds.
/// Operations are kept in order: a later put of the same DN wins, and a
/// `ResetPresence` followed by `MarkPresent` leaves that entry present.
#[derive(Debug)]
pub struct Transaction {
    ops: Vec<PendingOp>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self {
            ops: Vec::new(),
            state: TransactionState::Active,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Records a put.
    pub fn put(&mut self, entry: Entry) -> DbResult<()> {
        self.push(PendingOp::Put(entry))
    }

    /// Records a delete. Deleting an absent DN is a no-op at commit.
    pub fn delete(&mut self, dn: impl Into<String>) -> DbResult<()> {
        self.push(PendingOp::Delete(dn.into()))
    }

    /// Records a new cookie.
    pub fn set_cookie(&mut self, cookie: Cookie) -> DbResult<()> {
        self.push(PendingOp::SetCookie(cookie))
    }

    /// Records clearing the cookie.
    pub fn clear_cookie(&mut self) -> DbResult<()> {
        self.push(PendingOp::ClearCookie)
    }

    /// Records the search descriptor.
    pub fn set_descriptor(&mut self, descriptor: UrlDescriptor) -> DbResult<()> {
        self.push(PendingOp::SetDescriptor(descriptor))
    }

    /// Records clearing the search descriptor.
    pub fn clear_descriptor(&mut self) -> DbResult<()> {
        self.push(PendingOp::ClearDescriptor)
    }

    /// Marks every entry absent.
    pub fn reset_presence(&mut self) -> DbResult<()> {
        self.push(PendingOp::ResetPresence)
    }

    /// Marks one entry present. A DN with no entry is ignored at commit.
    pub fn mark_present(&mut self, dn: impl Into<String>) -> DbResult<()> {
        self.push(PendingOp::MarkPresent(dn.into()))
    }

    /// Removes every entry.
    pub fn clear_entries(&mut self) -> DbResult<()> {
        self.push(PendingOp::ClearEntries)
    }

    /// Returns the recorded operations.
    #[must_use]
    pub fn ops(&self) -> &[PendingOp] {
        &self.ops
    }

    /// Returns the number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }

    fn push(&mut self, op: PendingOp) -> DbResult<()> {
        self.ensure_active()?;
        self.ops.push(op);
        Ok(())
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DbError::invalid_operation(format!(
                "transaction is {:?}",
                self.state
            )))
        }
    }

    /// Replays the recorded operations over one committed entry.
    ///
    /// Returns what the entry would be after commit.
    pub(crate) fn resolve_entry(
        &self,
        policy: DnPolicy,
        key: &str,
        committed: Option<&Entry>,
    ) -> Option<Entry> {
        let mut current = committed.cloned();
        for op in &self.ops {
            match op {
                PendingOp::Put(entry) if policy.key(&entry.dn) == key => {
                    current = Some(entry.clone());
                }
                PendingOp::Delete(dn) if policy.key(dn) == key => current = None,
                PendingOp::ResetPresence => {
                    if let Some(entry) = current.as_mut() {
                        entry.present = false;
                    }
                }
                PendingOp::MarkPresent(dn) if policy.key(dn) == key => {
                    if let Some(entry) = current.as_mut() {
                        entry.present = true;
                    }
                }
                PendingOp::ClearEntries => current = None,
                _ => {}
            }
        }
        current
    }

    /// Keys written by this transaction, normalized by `policy`.
    pub(crate) fn touched_keys(&self, policy: DnPolicy) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PendingOp::Put(entry) => Some(policy.key(&entry.dn)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_are_kept_in_order() {
        let mut txn = Transaction::new();
        txn.put(Entry::new("cn=a")).unwrap();
        txn.delete("cn=a").unwrap();
        txn.set_cookie(Cookie::from("c1")).unwrap();

        assert_eq!(txn.len(), 3);
        assert!(matches!(txn.ops()[1], PendingOp::Delete(_)));
    }

    #[test]
    fn inactive_transaction_rejects_ops() {
        let mut txn = Transaction::new();
        txn.mark_committed();
        assert!(txn.put(Entry::new("cn=a")).is_err());

        let mut txn = Transaction::new();
        txn.mark_aborted();
        assert!(matches!(
            txn.clear_cookie(),
            Err(DbError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn resolve_entry_replays_ops() {
        let policy = DnPolicy::CaseInsensitive;
        let committed = Entry::new("cn=A");

        let mut txn = Transaction::new();
        txn.reset_presence().unwrap();
        let resolved = txn.resolve_entry(policy, "cn=a", Some(&committed)).unwrap();
        assert!(!resolved.present);

        txn.mark_present("CN=a").unwrap();
        assert!(txn.resolve_entry(policy, "cn=a", Some(&committed)).unwrap().present);

        txn.delete("cn=a").unwrap();
        assert!(txn.resolve_entry(policy, "cn=a", Some(&committed)).is_none());

        txn.put(Entry::new("Cn=A").with_text("cn", &["A"])).unwrap();
        let resolved = txn.resolve_entry(policy, "cn=a", Some(&committed)).unwrap();
        assert_eq!(resolved.dn, "Cn=A");
        assert_eq!(txn.touched_keys(policy), vec!["cn=a"]);
    }
}
