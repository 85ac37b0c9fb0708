//! Promise registry.
//!
//! Outstanding operations live in an arena of slots. A [`PromiseId`] packs the
//! slot index in its low 32 bits and the slot generation in its high 32 bits;
//! releasing a promise bumps the generation, so a released id can never match
//! again even after its slot is reused. A slot whose generation runs out is
//! retired rather than wrapped.
//!
//! Status changes are published on a per-promise `watch` channel. Waiters
//! subscribe and sleep until the status turns terminal; nothing polls.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error, trace};

use crate::directory::ResolvedIdentity;
use crate::error::{
    ConnectionError, CryptoOperationError, OwnershipViolation, ResolutionError,
};
use crate::status::{PromiseStatus, Timeout};

/// Opaque handle to an asynchronous operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseId(u64);

impl PromiseId {
    const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    /// Rebuild a handle from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn index(self) -> u32 {
        self.0 as u32
    }

    const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromiseId({}#{})", self.index(), self.generation())
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseKind {
    Search,
    Encrypt,
    Decrypt,
}

impl fmt::Display for PromiseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Search => "search",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        })
    }
}

/// Why a promise ended in `RESULT_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Resolution(ResolutionError),
    Crypto(CryptoOperationError),
    Connection(ConnectionError),
}

impl Failure {
    /// Failures whose real outcome is unknown also raise `ERROR_UNDEFINED`.
    const fn is_undefined(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution(e) => e.fmt(f),
            Self::Crypto(e) => e.fmt(f),
            Self::Connection(e) => e.fmt(f),
        }
    }
}

/// Crypto output held by the registry until retrieved or concluded.
#[derive(Debug)]
pub(crate) enum HeldOutput {
    /// Moved out on first retrieval.
    Caller(Option<Vec<u8>>),
    /// Shared with every view handed out; dropped on conclude.
    Engine(Arc<[u8]>),
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Pending,
    Resolved(ResolvedIdentity),
    Output(HeldOutput),
    Failed(Failure),
}

struct Entry {
    kind: PromiseKind,
    status: watch::Sender<PromiseStatus>,
    outcome: Outcome,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
    /// Generation space exhausted; the slot is never handed out again.
    retired: bool,
}

impl Slot {
    /// Empty the slot and advance its generation, retiring it when the
    /// generation cannot advance.
    fn vacate(&mut self) -> Option<Entry> {
        let entry = self.entry.take();
        match self.generation.checked_add(1) {
            Some(next) => self.generation = next,
            None => self.retired = true,
        }
        entry
    }
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn entry(&self, id: PromiseId) -> Result<&Entry, OwnershipViolation> {
        let slot = self
            .slots
            .get(id.index() as usize)
            .ok_or(OwnershipViolation::UnknownHandle(id))?;
        if slot.generation != id.generation() {
            return Err(if id.generation() < slot.generation {
                OwnershipViolation::StaleHandle(id)
            } else {
                OwnershipViolation::UnknownHandle(id)
            });
        }
        if slot.retired {
            return Err(OwnershipViolation::StaleHandle(id));
        }
        slot.entry
            .as_ref()
            .ok_or(OwnershipViolation::UnknownHandle(id))
    }

    fn entry_mut(&mut self, id: PromiseId) -> Result<&mut Entry, OwnershipViolation> {
        self.entry(id)?;
        self.slots[id.index() as usize]
            .entry
            .as_mut()
            .ok_or(OwnershipViolation::UnknownHandle(id))
    }
}

/// Single source of truth for every outstanding operation.
#[derive(Default)]
pub struct PromiseRegistry {
    inner: Mutex<Slots>,
}

impl fmt::Debug for PromiseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseRegistry")
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl PromiseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a new promise in `NO_STATUS`.
    pub(crate) fn issue(&self, kind: PromiseKind) -> PromiseId {
        let (status, _) = watch::channel(PromiseStatus::NO_STATUS);
        let entry = Entry {
            kind,
            status,
            outcome: Outcome::Pending,
        };

        let mut slots = self.lock();
        slots.live += 1;
        let id = if let Some(index) = slots.free.pop() {
            let slot = &mut slots.slots[index as usize];
            slot.entry = Some(entry);
            PromiseId::new(index, slot.generation)
        } else {
            let Ok(index) = u32::try_from(slots.slots.len()) else {
                // Generation 0 is never issued, so this id matches nothing.
                error!("Promise arena exhausted");
                slots.live -= 1;
                return PromiseId::new(u32::MAX, 0);
            };
            slots.slots.push(Slot {
                generation: 1,
                entry: Some(entry),
                retired: false,
            });
            PromiseId::new(index, 1)
        };
        trace!(promise = %id, %kind, "Promise issued");
        id
    }

    /// `NO_STATUS` → `WAIT_STATUS` once a worker has picked the promise up.
    pub(crate) fn mark_waiting(&self, id: PromiseId) {
        let slots = self.lock();
        if let Ok(entry) = slots.entry(id) {
            entry.status.send_if_modified(|s| {
                if s.is_terminal() || *s == PromiseStatus::WAIT_STATUS {
                    false
                } else {
                    *s = PromiseStatus::WAIT_STATUS;
                    true
                }
            });
        }
    }

    /// Record a terminal outcome. Later completions of the same promise are
    /// ignored, as are completions of promises the caller already released.
    pub(crate) fn complete(&self, id: PromiseId, outcome: Outcome) {
        let mut slots = self.lock();
        let Ok(entry) = slots.entry_mut(id) else {
            debug!(promise = %id, "Completion for released promise dropped");
            return;
        };
        if entry.status.borrow().is_terminal() {
            debug!(promise = %id, "Promise already terminal, completion ignored");
            return;
        }
        let status = match &outcome {
            Outcome::Failed(failure) => PromiseStatus::failed(failure.is_undefined()),
            Outcome::Pending => return,
            Outcome::Resolved(_) | Outcome::Output(_) => PromiseStatus::succeeded(),
        };
        if let Outcome::Failed(failure) = &outcome {
            debug!(promise = %id, kind = %entry.kind, %failure, "Promise failed");
        } else {
            trace!(promise = %id, kind = %entry.kind, "Promise completed");
        }
        entry.outcome = outcome;
        entry.status.send_replace(status);
    }

    pub fn status(&self, id: PromiseId) -> Result<PromiseStatus, OwnershipViolation> {
        self.lock().entry(id).map(|e| *e.status.borrow())
    }

    pub fn kind(&self, id: PromiseId) -> Result<PromiseKind, OwnershipViolation> {
        self.lock().entry(id).map(|e| e.kind)
    }

    /// Live view of a promise's status.
    pub fn subscribe(
        &self,
        id: PromiseId,
    ) -> Result<watch::Receiver<PromiseStatus>, OwnershipViolation> {
        self.lock().entry(id).map(|e| e.status.subscribe())
    }

    /// Wait until the promise is terminal or `timeout` elapses.
    ///
    /// Returns the status observed at that point, which is non-terminal on
    /// timeout. A promise released or invalidated while waiting yields its
    /// last published status.
    pub async fn wait(
        &self,
        id: PromiseId,
        timeout: Timeout,
    ) -> Result<PromiseStatus, OwnershipViolation> {
        let mut rx = self.subscribe(id)?;
        let terminal = async {
            // Err means the sender is gone; fall through to the last value.
            let _ = rx.wait_for(|s| s.is_terminal()).await;
        };
        match timeout.as_duration() {
            None => terminal.await,
            Some(limit) => {
                let _ = tokio::time::timeout(limit, terminal).await;
            }
        }
        Ok(*rx.borrow())
    }

    /// Run `f` against a promise's kind, status and outcome.
    pub(crate) fn with_outcome<T>(
        &self,
        id: PromiseId,
        f: impl FnOnce(PromiseKind, PromiseStatus, &mut Outcome) -> T,
    ) -> Result<T, OwnershipViolation> {
        let mut slots = self.lock();
        let entry = slots.entry_mut(id)?;
        let status = *entry.status.borrow();
        Ok(f(entry.kind, status, &mut entry.outcome))
    }

    /// Invalidate `id`, dropping anything the engine still holds for it.
    pub fn release(&self, id: PromiseId) -> Result<(), OwnershipViolation> {
        self.remove(id, |_| Ok(())).map(|_| ())
    }

    /// Remove `id` if `check` accepts its kind.
    pub(crate) fn remove(
        &self,
        id: PromiseId,
        check: impl FnOnce(PromiseKind) -> Result<(), OwnershipViolation>,
    ) -> Result<Outcome, OwnershipViolation> {
        let mut slots = self.lock();
        let kind = match slots.entry(id) {
            Ok(entry) => entry.kind,
            Err(violation) => {
                error!(promise = %id, %violation, "Ownership violation on release");
                return Err(violation);
            }
        };
        check(kind)?;

        let index = id.index();
        let slot = &mut slots.slots[index as usize];
        let entry = slot.vacate();
        if slot.retired {
            debug!(promise = %id, "Promise slot retired");
        } else {
            slots.free.push(index);
        }
        slots.live -= 1;
        trace!(promise = %id, %kind, "Promise released");

        Ok(entry.map_or(Outcome::Pending, |e| e.outcome))
    }

    pub fn outstanding(&self) -> usize {
        self.lock().live
    }

    /// Bytes currently held on behalf of engine-owned outputs.
    pub fn engine_held_bytes(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .map(|e| match &e.outcome {
                Outcome::Output(HeldOutput::Engine(bytes)) => bytes.len(),
                _ => 0,
            })
            .sum()
    }

    /// Fail every pending promise and drop every entry. Returns how many
    /// promises were still outstanding.
    pub(crate) fn invalidate_all(&self) -> usize {
        let mut slots = self.lock();
        let outstanding = slots.live;
        let Slots { slots: list, free, live } = &mut *slots;
        for (index, slot) in list.iter_mut().enumerate() {
            if let Some(entry) = slot.vacate() {
                entry.status.send_if_modified(|s| {
                    if s.is_terminal() {
                        false
                    } else {
                        *s = PromiseStatus::failed(true);
                        true
                    }
                });
                if !slot.retired
                    && let Ok(index) = u32::try_from(index)
                {
                    free.push(index);
                }
            }
        }
        *live = 0;
        outstanding
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn output(bytes: &[u8]) -> Outcome {
        Outcome::Output(HeldOutput::Caller(Some(bytes.to_vec())))
    }

    #[test]
    fn issue_starts_with_no_status() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Encrypt);
        assert_eq!(reg.status(id).unwrap(), PromiseStatus::NO_STATUS);
        assert_eq!(reg.kind(id).unwrap(), PromiseKind::Encrypt);
        assert_eq!(reg.outstanding(), 1);
    }

    #[test]
    fn ids_are_unique_while_outstanding() {
        let reg = PromiseRegistry::new();
        let ids: Vec<_> = (0..64).map(|_| reg.issue(PromiseKind::Decrypt)).collect();
        let unique: std::collections::HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 64);
    }

    #[test]
    fn exhausted_slot_is_retired_on_release() {
        let reg = PromiseRegistry::new();
        let old = reg.issue(PromiseKind::Search);
        reg.lock().slots[0].generation = u32::MAX;
        let last = PromiseId::new(0, u32::MAX);

        reg.release(last).unwrap();
        for id in [old, last] {
            assert!(matches!(
                reg.status(id),
                Err(OwnershipViolation::StaleHandle(_))
            ));
        }

        let next = reg.issue(PromiseKind::Search);
        assert_eq!((next.index(), next.generation()), (1, 1));
        assert_eq!(reg.outstanding(), 1);
    }

    #[test]
    fn exhausted_slot_is_retired_on_invalidate() {
        let reg = PromiseRegistry::new();
        reg.issue(PromiseKind::Decrypt);
        reg.issue(PromiseKind::Decrypt);
        reg.lock().slots[1].generation = u32::MAX;

        assert_eq!(reg.invalidate_all(), 2);
        let reused = reg.issue(PromiseKind::Encrypt);
        let fresh = reg.issue(PromiseKind::Encrypt);
        assert_eq!((reused.index(), reused.generation()), (0, 2));
        assert_eq!((fresh.index(), fresh.generation()), (2, 1));
    }

    #[test]
    fn released_id_is_never_valid_again() {
        let reg = PromiseRegistry::new();
        let first = reg.issue(PromiseKind::Search);
        reg.release(first).unwrap();

        let second = reg.issue(PromiseKind::Search);
        assert_ne!(first, second, "slot reuse must change the generation");
        assert_eq!(
            reg.status(first),
            Err(OwnershipViolation::StaleHandle(first))
        );
        assert_eq!(
            reg.release(first),
            Err(OwnershipViolation::StaleHandle(first))
        );
        assert!(reg.status(second).is_ok());
    }

    #[test]
    fn double_release_is_a_violation() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Encrypt);
        reg.release(id).unwrap();
        assert!(matches!(
            reg.release(id),
            Err(OwnershipViolation::StaleHandle(_))
        ));
        assert_eq!(reg.outstanding(), 0);
    }

    #[test]
    fn forged_handles_are_unknown() {
        let reg = PromiseRegistry::new();
        let _ = reg.issue(PromiseKind::Encrypt);
        let forged = PromiseId::from_raw(0xDEAD_0000_0000_0007);
        assert_eq!(
            reg.status(forged),
            Err(OwnershipViolation::UnknownHandle(forged))
        );
        let future_gen = PromiseId::new(0, 99);
        assert_eq!(
            reg.status(future_gen),
            Err(OwnershipViolation::UnknownHandle(future_gen))
        );
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Encrypt);

        reg.mark_waiting(id);
        assert_eq!(reg.status(id).unwrap(), PromiseStatus::WAIT_STATUS);

        reg.complete(id, output(b"ct"));
        let done = reg.status(id).unwrap();
        assert!(done.has_data());

        reg.mark_waiting(id);
        reg.complete(
            id,
            Outcome::Failed(Failure::Crypto(CryptoOperationError::EmptyResult)),
        );
        assert_eq!(reg.status(id).unwrap(), done);
    }

    #[test]
    fn connection_failures_are_undefined() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Search);
        reg.complete(
            id,
            Outcome::Failed(Failure::Connection(ConnectionError::Closed)),
        );
        let status = reg.status(id).unwrap();
        assert!(status.contains(PromiseStatus::RESULT_ERROR));
        assert!(status.contains(PromiseStatus::ERROR_UNDEFINED));
    }

    #[test]
    fn completing_a_released_promise_is_harmless() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Decrypt);
        reg.release(id).unwrap();
        reg.complete(id, output(b"late"));
        assert_eq!(reg.outstanding(), 0);
        assert_eq!(reg.engine_held_bytes(), 0);
    }

    #[tokio::test]
    async fn wait_returns_when_completed_elsewhere() {
        let reg = Arc::new(PromiseRegistry::new());
        let id = reg.issue(PromiseKind::Encrypt);

        let worker = Arc::clone(&reg);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker.complete(id, output(b"done"));
        });

        let status = reg.wait(id, Timeout::Infinite).await.unwrap();
        assert!(status.has_data());
    }

    #[tokio::test]
    async fn wait_times_out_with_pending_status() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Search);
        reg.mark_waiting(id);

        let started = Instant::now();
        let status = reg.wait(id, Timeout::millis(30)).await.unwrap();
        assert!(!status.is_terminal());
        assert_eq!(status, PromiseStatus::WAIT_STATUS);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn wait_on_terminal_promise_is_immediate() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Decrypt);
        reg.complete(id, output(b"x"));
        let status = reg.wait(id, Timeout::millis(0)).await.unwrap();
        assert!(status.is_terminal());
    }

    #[tokio::test]
    async fn invalidate_all_wakes_waiters() {
        let reg = Arc::new(PromiseRegistry::new());
        let id = reg.issue(PromiseKind::Search);
        let mut rx = reg.subscribe(id).unwrap();

        assert_eq!(reg.invalidate_all(), 1);
        rx.changed().await.unwrap();
        let status = *rx.borrow();
        assert!(status.contains(PromiseStatus::ERROR_UNDEFINED));
        assert_eq!(reg.outstanding(), 0);
        assert!(matches!(
            reg.status(id),
            Err(OwnershipViolation::StaleHandle(_))
        ));
    }

    #[test]
    fn engine_outputs_are_accounted_until_removed() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Encrypt);
        reg.complete(
            id,
            Outcome::Output(HeldOutput::Engine(Arc::from(&b"0123456789"[..]))),
        );
        assert_eq!(reg.engine_held_bytes(), 10);

        reg.release(id).unwrap();
        assert_eq!(reg.engine_held_bytes(), 0);
    }

    #[test]
    fn remove_respects_kind_check() {
        let reg = PromiseRegistry::new();
        let id = reg.issue(PromiseKind::Search);
        let err = reg
            .remove(id, |kind| {
                Err(OwnershipViolation::WrongKind {
                    id,
                    expected: "encrypt or decrypt",
                    actual: kind,
                })
            })
            .unwrap_err();
        assert!(matches!(err, OwnershipViolation::WrongKind { .. }));
        assert_eq!(reg.outstanding(), 1, "rejected removal keeps the promise");
    }

    #[test]
    fn display_is_hex() {
        let id = PromiseId::new(3, 2);
        assert_eq!(id.to_string(), "0x0000000200000003");
        assert_eq!(PromiseId::from_raw(id.as_u64()), id);
    }
}
