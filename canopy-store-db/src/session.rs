// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Sessions and advisory owner locks.
//!
//! A lock is a row in `owner_lock`, so every connection to the same database
//! file sees it. Locks order sessions that ask for them; they do not block
//! writes from callers that never lock.
//!
//! A lock is a lease of [`StoreConfig::lock_lease`](crate::StoreConfig::lock_lease).
//! Once it is older than that, any session asking for the owner takes it
//! over, so the locks of a process that died holding them run out. Holders
//! that keep an owner longer renew with
//! [`renew_locks`](FragmentStore::renew_locks).

use std::fmt;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use rusqlite::{OptionalExtension, params};
use tracing::{debug, trace, warn};

use crate::connection::FragmentStore;
use crate::error::{Error, Result};
use crate::types::{Owner, system_time_to_unix_millis};

/// Random identifier of a session, as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Result<Self> {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes)?;
        Ok(SessionId(hex::encode(bytes)))
    }

    /// The id as stored in `owner_lock.session_id`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        SessionId(id)
    }
}

impl FragmentStore {
    /// Start a session owned by this handle. Its locks are released when it
    /// is closed or the handle is dropped.
    pub fn start_session(&mut self) -> Result<SessionId> {
        let session = SessionId::generate()?;
        self.sessions.insert(session.clone());
        debug!(%session, "started session");
        Ok(session)
    }

    /// End a session and release every lock it holds.
    pub fn close_session(&mut self, session: &SessionId) -> Result<()> {
        if !self.sessions.remove(session) {
            return Err(Error::SessionNotFound(session.to_string()));
        }
        let released = self.release_locks(session)?;
        debug!(%session, released, "closed session");
        Ok(())
    }

    /// Take the lock on `owner` for `session`, waiting up to `timeout` for
    /// another session to release it or for its lease to run out.
    ///
    /// Locking an owner the session already holds succeeds at once and
    /// renews the lease.
    pub fn lock_owner(&self, session: &SessionId, owner: &Owner, timeout: Duration) -> Result<()> {
        if !self.sessions.contains(session) {
            return Err(Error::SessionNotFound(session.to_string()));
        }
        let lease = self.lock_lease.as_millis() as i64;
        let started = Instant::now();
        let mut waited = false;
        loop {
            let now = system_time_to_unix_millis(SystemTime::now());
            let previous = self.owner_lock_holder(owner)?;
            self.conn
                .prepare_cached(
                    r#"
                    INSERT INTO owner_lock (owner_id, session_id, acquired_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT (owner_id) DO UPDATE
                    SET session_id = excluded.session_id, acquired_at = excluded.acquired_at
                    WHERE owner_lock.session_id = excluded.session_id
                       OR owner_lock.acquired_at <= excluded.acquired_at - ?4
                    "#,
                )?
                .execute(params![owner.id, session.as_str(), now, lease])?;
            match self.owner_lock_holder(owner)? {
                Some(holder) if holder == *session => {
                    if let Some(expired) = previous.filter(|p| p != session) {
                        warn!(%session, owner = %owner.name, %expired, "took over expired owner lock");
                    }
                    debug!(%session, owner = %owner.name, elapsed = ?started.elapsed(), "locked owner");
                    return Ok(());
                }
                holder => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        return Err(Error::LockTimeout {
                            owner: owner.name.clone(),
                            timeout,
                        });
                    }
                    if !waited {
                        warn!(%session, owner = %owner.name, holder = ?holder.map(|h| h.0), "waiting for owner lock");
                        waited = true;
                    }
                    trace!(%session, owner = %owner.name, ?elapsed, "owner lock busy");
                    thread::sleep(self.lock_poll_interval.min(timeout - elapsed));
                }
            }
        }
    }

    /// Restart the lease of every lock `session` holds.
    ///
    /// Returns the number of locks renewed.
    pub fn renew_locks(&self, session: &SessionId) -> Result<usize> {
        if !self.sessions.contains(session) {
            return Err(Error::SessionNotFound(session.to_string()));
        }
        let renewed = self
            .conn
            .prepare_cached("UPDATE owner_lock SET acquired_at = ?1 WHERE session_id = ?2")?
            .execute(params![
                system_time_to_unix_millis(SystemTime::now()),
                session.as_str()
            ])?;
        trace!(%session, renewed, "renewed owner locks");
        Ok(renewed)
    }

    /// The session currently holding the lock on `owner`, if any.
    pub fn owner_lock_holder(&self, owner: &Owner) -> Result<Option<SessionId>> {
        let holder = self
            .conn
            .prepare_cached("SELECT session_id FROM owner_lock WHERE owner_id = ?1")?
            .query_row(params![owner.id], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(holder.map(SessionId))
    }

    fn release_locks(&self, session: &SessionId) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("DELETE FROM owner_lock WHERE session_id = ?1")?
            .execute(params![session.as_str()])?)
    }
}

impl Drop for FragmentStore {
    fn drop(&mut self) {
        for session in std::mem::take(&mut self.sessions) {
            if let Err(e) = self.release_locks(&session) {
                warn!(%session, error = %e, "failed to release locks of open session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (FragmentStore, Owner) {
        let store = FragmentStore::open_memory().unwrap();
        let dataspace = store.create_dataspace("test").unwrap();
        let owner = store.create_owner(&dataspace, "owner").unwrap();
        (store, owner)
    }

    #[test]
    fn test_session_ids_are_unique_hex() {
        let (mut store, _) = setup();
        let a = store.start_session().unwrap();
        let b = store.start_session().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_relock_by_holder() {
        let (mut store, owner) = setup();
        let session = store.start_session().unwrap();
        store.lock_owner(&session, &owner, Duration::ZERO).unwrap();
        store.lock_owner(&session, &owner, Duration::ZERO).unwrap();
        assert_eq!(store.owner_lock_holder(&owner).unwrap(), Some(session));
    }

    #[test]
    fn test_contended_lock_times_out() {
        let (mut store, owner) = setup();
        let first = store.start_session().unwrap();
        let second = store.start_session().unwrap();
        store.lock_owner(&first, &owner, Duration::ZERO).unwrap();

        let err = store
            .lock_owner(&second, &owner, Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { ref owner, .. } if owner == "owner"));

        store.close_session(&first).unwrap();
        store.lock_owner(&second, &owner, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let (mut store, owner) = setup();
        store.lock_lease = Duration::from_millis(100);
        let first = store.start_session().unwrap();
        let second = store.start_session().unwrap();
        store.lock_owner(&first, &owner, Duration::ZERO).unwrap();
        assert!(store.lock_owner(&second, &owner, Duration::ZERO).is_err());

        store
            .lock_owner(&second, &owner, Duration::from_secs(5))
            .unwrap();
        assert_eq!(store.owner_lock_holder(&owner).unwrap(), Some(second));
        assert_eq!(store.renew_locks(&first).unwrap(), 0);
    }

    #[test]
    fn test_renewal_keeps_the_lease() {
        let (mut store, owner) = setup();
        store.lock_lease = Duration::from_millis(200);
        let first = store.start_session().unwrap();
        let second = store.start_session().unwrap();
        store.lock_owner(&first, &owner, Duration::ZERO).unwrap();
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(80));
            assert_eq!(store.renew_locks(&first).unwrap(), 1);
        }
        assert!(matches!(
            store.lock_owner(&second, &owner, Duration::ZERO),
            Err(Error::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_unknown_session() {
        let (mut store, owner) = setup();
        let stranger = SessionId::from("feedface".to_string());
        assert!(matches!(
            store.close_session(&stranger),
            Err(Error::SessionNotFound(_))
        ));
        assert!(matches!(
            store.lock_owner(&stranger, &owner, Duration::ZERO),
            Err(Error::SessionNotFound(_))
        ));

        assert!(matches!(
            store.renew_locks(&stranger),
            Err(Error::SessionNotFound(_))
        ));

        let session = store.start_session().unwrap();
        store.close_session(&session).unwrap();
        assert!(store.close_session(&session).is_err());
    }
}
