use crate::domain::value_objects::{EntityKey, MutationPolicy};
use crate::shared::error::MutationError;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, oneshot};
use uuid::Uuid;

/// Confirmed temp ids remembered for late callers still holding a temp key.
const ALIAS_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Lane {
    gate: Arc<AsyncMutex<()>>,
    /// Accepted mutations not yet settled, including the running one.
    depth: AtomicUsize,
}

#[derive(Debug)]
struct QueueState {
    lanes: HashMap<EntityKey, Arc<Lane>>,
    aliases: LruCache<Uuid, i64>,
}

impl QueueState {
    fn new(alias_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(alias_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            lanes: HashMap::new(),
            aliases: LruCache::new(capacity),
        }
    }

    fn resolve(&self, key: EntityKey) -> EntityKey {
        match key {
            EntityKey::Temp(temp) => self
                .aliases
                .peek(&temp)
                .map_or(key, |id| EntityKey::Server(*id)),
            EntityKey::Server(_) => key,
        }
    }

    /// Drops lanes nobody is queued on.
    fn prune_idle(&mut self) {
        self.lanes
            .retain(|_, lane| lane.depth.load(Ordering::SeqCst) > 0);
    }
}

#[derive(Debug)]
struct QueueInner {
    state: Mutex<QueueState>,
    timeout: Duration,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, key: EntityKey) -> EntityKey {
        self.lock().resolve(key)
    }

    fn release(&self, lanes: &[Arc<Lane>]) {
        let mut state = self.lock();
        for lane in lanes {
            if lane.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
                state.lanes.retain(|_, other| !Arc::ptr_eq(other, lane));
            }
        }
    }
}

/// Where a mutation stands when `enqueue_spanning` hands it to its task.
enum Turn<P, Prep> {
    /// Lanes were idle: gates held and `prepare` already ran.
    Held(Vec<OwnedMutexGuard<()>>, P),
    Waiting(Prep),
}

async fn lock_all(lanes: &[Arc<Lane>]) -> Vec<OwnedMutexGuard<()>> {
    let mut guards = Vec::with_capacity(lanes.len());
    for lane in lanes {
        guards.push(lane.gate.clone().lock_owned().await);
    }
    guards
}

/// Pending result of a queued mutation.
///
/// Dropping the ticket only detaches the caller: the mutation keeps running
/// and its settle step still writes to the store.
#[derive(Debug)]
pub struct MutationTicket<T> {
    resource: EntityKey,
    rejected: bool,
    receiver: oneshot::Receiver<Result<T, MutationError>>,
}

impl<T> MutationTicket<T> {
    fn rejected(resource: EntityKey) -> Self {
        let (tx, receiver) = oneshot::channel();
        let _ = tx.send(Err(MutationError::Conflict(resource.to_string())));
        Self {
            resource,
            rejected: true,
            receiver,
        }
    }

    pub fn resource(&self) -> EntityKey {
        self.resource
    }

    /// True when the queue refused the mutation without running any phase.
    pub fn was_rejected(&self) -> bool {
        self.rejected
    }

    pub async fn outcome(self) -> Result<T, MutationError> {
        self.receiver.await.unwrap_or(Err(MutationError::Detached))
    }
}

/// Serializes mutations per resource id. At most one mutation per resource
/// is running at any time.
#[derive(Debug, Clone)]
pub struct MutationQueue {
    inner: Arc<QueueInner>,
}

impl MutationQueue {
    pub fn new(timeout: Duration) -> Self {
        Self::with_alias_capacity(timeout, ALIAS_CAPACITY)
    }

    pub fn with_alias_capacity(timeout: Duration, alias_capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::new(alias_capacity)),
                timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Number of accepted, unsettled mutations holding `resource`'s lane.
    pub fn in_flight(&self, resource: EntityKey) -> usize {
        let state = self.inner.lock();
        let resolved = state.resolve(resource);
        state
            .lanes
            .get(&resolved)
            .map_or(0, |lane| lane.depth.load(Ordering::SeqCst))
    }

    /// The id `resource` currently dispatches under.
    pub fn resolve(&self, resource: EntityKey) -> EntityKey {
        self.inner.resolve(resource)
    }

    /// Records that `temp` was persisted as `server_id`. Mutations still
    /// queued for the temp key are dispatched against the server id and
    /// share its lane.
    pub fn retarget(&self, temp: Uuid, server_id: i64) {
        let mut state = self.inner.lock();
        state.aliases.put(temp, server_id);
        if let Some(lane) = state.lanes.get(&EntityKey::Temp(temp)).cloned() {
            state
                .lanes
                .entry(EntityKey::Server(server_id))
                .or_insert(lane);
        }
        tracing::debug!(
            target: "sync::queue",
            temp = %temp,
            server_id,
            "retargeted queued mutations"
        );
    }

    /// Queues a bare remote call.
    pub fn enqueue<T, D, Fut>(
        &self,
        resource: EntityKey,
        policy: MutationPolicy,
        dispatch: D,
    ) -> MutationTicket<T>
    where
        T: Send + 'static,
        D: FnOnce(EntityKey) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, MutationError>> + Send + 'static,
    {
        self.enqueue_with(
            resource,
            policy,
            |_| Ok(()),
            move |target, ()| dispatch(target),
            |_, (), result| result,
        )
    }

    /// Queues a mutation in three phases:
    ///
    /// * `prepare` runs when the mutation's turn starts: synchronously
    ///   inside this call if the lane is idle, otherwise after every earlier
    ///   mutation for the same resource has settled;
    /// * `dispatch` performs the remote call, bounded by the queue timeout;
    /// * `settle` sees the result and runs before the next mutation's turn.
    pub fn enqueue_with<P, T, U, Prep, D, Fut, S>(
        &self,
        resource: EntityKey,
        policy: MutationPolicy,
        prepare: Prep,
        dispatch: D,
        settle: S,
    ) -> MutationTicket<U>
    where
        P: Clone + Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
        Prep: FnOnce(EntityKey) -> Result<P, MutationError> + Send + 'static,
        D: FnOnce(EntityKey, P) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, MutationError>> + Send + 'static,
        S: FnOnce(EntityKey, P, Result<T, MutationError>) -> Result<U, MutationError>
            + Send
            + 'static,
    {
        self.enqueue_spanning(resource, &[], policy, prepare, dispatch, settle)
    }

    /// Like `enqueue_with`, but the turn also holds the lanes of `touches`.
    /// The policy applies to every lane: an overlap on any of them rejects
    /// or waits.
    pub fn enqueue_spanning<P, T, U, Prep, D, Fut, S>(
        &self,
        resource: EntityKey,
        touches: &[EntityKey],
        policy: MutationPolicy,
        prepare: Prep,
        dispatch: D,
        settle: S,
    ) -> MutationTicket<U>
    where
        P: Clone + Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
        Prep: FnOnce(EntityKey) -> Result<P, MutationError> + Send + 'static,
        D: FnOnce(EntityKey, P) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, MutationError>> + Send + 'static,
        S: FnOnce(EntityKey, P, Result<T, MutationError>) -> Result<U, MutationError>
            + Send
            + 'static,
    {
        let (lanes, resolved, idle_turn) = {
            let mut state = self.inner.lock();
            let resolved = state.resolve(resource);

            let mut lanes: Vec<Arc<Lane>> = Vec::with_capacity(touches.len() + 1);
            let mut busy = None;
            for key in std::iter::once(resource).chain(touches.iter().copied()) {
                let key = state.resolve(key);
                let lane = state.lanes.entry(key).or_default().clone();
                if lanes.iter().any(|held| Arc::ptr_eq(held, &lane)) {
                    continue;
                }
                if busy.is_none() && lane.depth.load(Ordering::SeqCst) > 0 {
                    busy = Some(key);
                }
                lanes.push(lane);
            }

            if let Some(busy) = busy.filter(|_| policy == MutationPolicy::RejectOverlapping) {
                state.prune_idle();
                drop(state);
                tracing::warn!(
                    target: "sync::queue",
                    resource = %resolved,
                    busy = %busy,
                    "rejected overlapping mutation"
                );
                return MutationTicket::rejected(busy);
            }

            // one global acquisition order keeps overlapping spans deadlock-free
            lanes.sort_by_key(|lane| Arc::as_ptr(lane) as usize);
            for lane in &lanes {
                lane.depth.fetch_add(1, Ordering::SeqCst);
            }
            let idle_turn = if busy.is_none() {
                lanes
                    .iter()
                    .map(|lane| lane.gate.clone().try_lock_owned().ok())
                    .collect::<Option<Vec<_>>>()
            } else {
                None
            };
            (lanes, resolved, idle_turn)
        };

        let (tx, receiver) = oneshot::channel();
        let ticket = MutationTicket {
            resource: resolved,
            rejected: false,
            receiver,
        };

        // Idle lanes: take the turn now so the optimistic state is visible
        // before this call returns.
        let turn = match idle_turn {
            Some(guards) => match prepare(resolved) {
                Ok(prepared) => Turn::Held(guards, prepared),
                Err(err) => {
                    drop(guards);
                    self.inner.release(&lanes);
                    let _ = tx.send(Err(err));
                    return ticket;
                }
            },
            None => Turn::Waiting(prepare),
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let (guards, target, prepared) = match turn {
                Turn::Held(guards, prepared) => (guards, resolved, prepared),
                Turn::Waiting(prepare) => {
                    let guards = lock_all(&lanes).await;
                    let target = inner.resolve(resource);
                    match prepare(target) {
                        Ok(prepared) => (guards, target, prepared),
                        Err(err) => {
                            drop(guards);
                            inner.release(&lanes);
                            let _ = tx.send(Err(err));
                            return;
                        }
                    }
                }
            };

            tracing::debug!(target: "sync::queue", resource = %target, "dispatching mutation");
            let result =
                match tokio::time::timeout(inner.timeout, dispatch(target, prepared.clone())).await
                {
                    Ok(result) => result,
                    Err(_) => Err(MutationError::Timeout(inner.timeout)),
                };
            let outcome = settle(target, prepared, result);

            drop(guards);
            inner.release(&lanes);

            if tx.send(outcome).is_err() {
                tracing::debug!(
                    target: "sync::queue",
                    resource = %target,
                    "mutation settled after the caller detached"
                );
            }
        });

        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn queue() -> MutationQueue {
        MutationQueue::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn reject_policy_fails_overlap_without_dispatching() {
        let queue = queue();
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU32::new(0));

        let gate = release.clone();
        let first_calls = calls.clone();
        let first = queue.enqueue(
            EntityKey::Server(42),
            MutationPolicy::RejectOverlapping,
            move |_| async move {
                first_calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok("update A")
            },
        );

        let second_calls = calls.clone();
        let second = queue.enqueue(
            EntityKey::Server(42),
            MutationPolicy::RejectOverlapping,
            move |_| async move {
                second_calls.fetch_add(1, Ordering::SeqCst);
                Ok("update B")
            },
        );

        assert!(second.was_rejected());
        assert!(!first.was_rejected());
        assert_eq!(
            second.outcome().await,
            Err(MutationError::Conflict("42".to_string()))
        );

        release.notify_one();
        assert_eq!(first.outcome().await, Ok("update A"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.in_flight(EntityKey::Server(42)), 0);
    }

    #[tokio::test]
    async fn serialize_policy_runs_in_submission_order() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        let tickets: Vec<_> = (0..5)
            .map(|index| {
                let log = log.clone();
                queue.enqueue(
                    EntityKey::Server(7),
                    MutationPolicy::Serialize,
                    move |_| async move {
                        tokio::time::sleep(Duration::from_millis(5 * (5 - index))).await;
                        log.lock().unwrap().push(index);
                        Ok(index)
                    },
                )
            })
            .collect();

        for ticket in tickets {
            ticket.outcome().await.unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_resources_do_not_block_each_other() {
        let queue = queue();
        let release = Arc::new(Notify::new());

        let gate = release.clone();
        let slow = queue.enqueue(EntityKey::Server(1), MutationPolicy::Serialize, move |_| {
            async move {
                gate.notified().await;
                Ok(1)
            }
        });
        let fast = queue.enqueue(EntityKey::Server(2), MutationPolicy::Serialize, |_| async {
            Ok(2)
        });

        assert_eq!(fast.outcome().await, Ok(2));
        release.notify_one();
        assert_eq!(slow.outcome().await, Ok(1));
    }

    #[tokio::test]
    async fn queued_temp_mutations_are_retargeted() {
        let queue = queue();
        let temp_uuid = Uuid::new_v4();
        let temp = EntityKey::Temp(temp_uuid);

        let retargeting = queue.clone();
        let create = queue.enqueue(temp, MutationPolicy::Serialize, move |_| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            retargeting.retarget(temp_uuid, 500);
            Ok(EntityKey::Server(500))
        });
        let follow_up = queue.enqueue(temp, MutationPolicy::Serialize, |target| async move {
            Ok(target)
        });

        assert_eq!(create.outcome().await, Ok(EntityKey::Server(500)));
        assert_eq!(follow_up.outcome().await, Ok(EntityKey::Server(500)));
        assert_eq!(queue.resolve(temp), EntityKey::Server(500));
    }

    #[tokio::test]
    async fn slow_dispatch_times_out_and_settle_still_runs() {
        let queue = MutationQueue::new(Duration::from_millis(20));
        let settled = Arc::new(AtomicU32::new(0));
        let observed = settled.clone();

        let ticket = queue.enqueue_with(
            EntityKey::Server(9),
            MutationPolicy::RejectOverlapping,
            |_| Ok(()),
            |_, ()| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            move |_, (), result: Result<(), MutationError>| {
                observed.fetch_add(1, Ordering::SeqCst);
                result
            },
        );

        assert_eq!(
            ticket.outcome().await,
            Err(MutationError::Timeout(Duration::from_millis(20)))
        );
        assert_eq!(settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_ticket_does_not_cancel_the_mutation() {
        let queue = queue();
        let (done_tx, done_rx) = oneshot::channel();

        let ticket = queue.enqueue_with(
            EntityKey::Server(3),
            MutationPolicy::Serialize,
            |_| Ok(()),
            |_, ()| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            },
            move |_, (), result: Result<(), MutationError>| {
                let _ = done_tx.send(result.is_ok());
                result
            },
        );
        drop(ticket);

        assert_eq!(done_rx.await, Ok(true));
    }

    #[tokio::test]
    async fn prepare_runs_synchronously_on_idle_lane() {
        let queue = queue();
        let prepared = Arc::new(AtomicU32::new(0));
        let counter = prepared.clone();

        let ticket = queue.enqueue_with(
            EntityKey::Server(11),
            MutationPolicy::RejectOverlapping,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            |_, ()| async { Ok(()) },
            |_, (), result: Result<(), MutationError>| result,
        );

        assert_eq!(prepared.load(Ordering::SeqCst), 1);
        assert_eq!(ticket.outcome().await, Ok(()));
    }

    #[tokio::test]
    async fn failed_prepare_resolves_ticket_and_frees_lane() {
        let queue = queue();
        let ticket: MutationTicket<()> = queue.enqueue_with(
            EntityKey::Server(12),
            MutationPolicy::RejectOverlapping,
            |target| Err::<(), _>(MutationError::Missing(target.to_string())),
            |_, ()| async { Ok(()) },
            |_, (), result| result,
        );

        assert_eq!(
            ticket.outcome().await,
            Err(MutationError::Missing("12".to_string()))
        );
        assert_eq!(queue.in_flight(EntityKey::Server(12)), 0);
    }

    #[tokio::test]
    async fn queued_prepare_runs_once_its_turn_starts() {
        let queue = queue();
        let release = Arc::new(Notify::new());
        let prepared = Arc::new(AtomicU32::new(0));

        let gate = release.clone();
        let first = queue.enqueue(EntityKey::Server(13), MutationPolicy::Serialize, move |_| {
            async move {
                gate.notified().await;
                Ok(())
            }
        });

        let counter = prepared.clone();
        let second = queue.enqueue_with(
            EntityKey::Server(13),
            MutationPolicy::Serialize,
            move |target| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(target)
            },
            |_, target| async move { Ok(target) },
            |_, _, result: Result<EntityKey, MutationError>| result,
        );

        tokio::task::yield_now().await;
        assert_eq!(prepared.load(Ordering::SeqCst), 0);

        release.notify_one();
        assert_eq!(first.outcome().await, Ok(()));
        assert_eq!(second.outcome().await, Ok(EntityKey::Server(13)));
        assert_eq!(prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spanning_turn_holds_every_touched_lane() {
        let queue = queue();
        let release = Arc::new(Notify::new());

        let gate = release.clone();
        let reorder = queue.enqueue_spanning(
            EntityKey::Server(1),
            &[EntityKey::Server(2), EntityKey::Server(3)],
            MutationPolicy::Serialize,
            |_| Ok(()),
            move |_, ()| async move {
                gate.notified().await;
                Ok("reordered")
            },
            |_, (), result: Result<&'static str, MutationError>| result,
        );
        assert_eq!(queue.in_flight(EntityKey::Server(2)), 1);
        assert_eq!(queue.in_flight(EntityKey::Server(3)), 1);

        let edit = queue.enqueue(
            EntityKey::Server(2),
            MutationPolicy::RejectOverlapping,
            |_| async { Ok("edited") },
        );
        assert!(edit.was_rejected());
        assert_eq!(
            edit.outcome().await,
            Err(MutationError::Conflict("2".to_string()))
        );

        let log = Arc::new(Mutex::new(Vec::new()));
        let waiting_log = log.clone();
        let waiting = queue.enqueue(EntityKey::Server(3), MutationPolicy::Serialize, move |_| {
            async move {
                waiting_log.lock().unwrap().push("edit");
                Ok("edited")
            }
        });

        tokio::task::yield_now().await;
        assert!(log.lock().unwrap().is_empty());

        release.notify_one();
        assert_eq!(reorder.outcome().await, Ok("reordered"));
        assert_eq!(waiting.outcome().await, Ok("edited"));
        for id in 1..=3 {
            assert_eq!(queue.in_flight(EntityKey::Server(id)), 0);
        }
    }

    #[tokio::test]
    async fn rejected_span_leaves_no_idle_lanes_behind() {
        let queue = queue();
        let release = Arc::new(Notify::new());

        let gate = release.clone();
        let busy = queue.enqueue(EntityKey::Server(5), MutationPolicy::Serialize, move |_| {
            async move {
                gate.notified().await;
                Ok(())
            }
        });

        let rejected: MutationTicket<()> = queue.enqueue_spanning(
            EntityKey::Server(4),
            &[EntityKey::Server(5), EntityKey::Server(6)],
            MutationPolicy::RejectOverlapping,
            |_| Ok(()),
            |_, ()| async { Ok(()) },
            |_, (), result| result,
        );
        assert!(rejected.was_rejected());
        assert_eq!(queue.inner.lock().lanes.len(), 1);

        release.notify_one();
        busy.outcome().await.unwrap();
        assert!(queue.inner.lock().lanes.is_empty());
    }

    #[test]
    fn confirmed_aliases_are_bounded() {
        let queue = MutationQueue::with_alias_capacity(Duration::from_secs(5), 2);
        let temps: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (offset, temp) in temps.iter().enumerate() {
            queue.retarget(*temp, 200 + offset as i64);
        }

        assert_eq!(queue.resolve(EntityKey::Temp(temps[0])), EntityKey::Temp(temps[0]));
        assert_eq!(queue.resolve(EntityKey::Temp(temps[2])), EntityKey::Server(202));
        assert_eq!(queue.inner.lock().aliases.len(), 2);
    }
}
