//! Event-driven simulation kernel
//!
//! The kernel is deliberately small: events, the event priority queue and
//! the entity registry. The virtual clock itself lives in the simulation
//! world, which advances it to each dequeued event's arrival tick.
//!
//! Ordering is the central contract here. The queue is totally ordered by
//! `(ts_arrival, type priority, insertion order)`: completions free
//! resources before rescheduling runs, monitors observe mutated state, and
//! statistics updates come last within a tick. Schedulers and autoscalers
//! depend on this ordering for determinism, so it must not change.

use shared::SimulatorError;
use std::collections::BTreeMap;

/// Identifies a registered simulation entity.
pub type EntityId = usize;

/// Identifies a task across the whole simulation.
pub type TaskId = u64;

/// Identifies a workflow across the whole simulation.
pub type WorkflowId = u64;

/// The closed set of event types, ordered by priority: a lower number is
/// processed earlier when arrival ticks tie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A task finished on a site; frees resources before anything else.
    TaskDoneSite { running_task_index: u64 },
    /// Completion notice from a site to the central queue.
    TaskDoneUser { task: TaskId },
    /// Central queue refreshes its view of every site's free resources.
    MonitorSiteStatus,
    /// Periodic elasticity evaluation.
    AutoScaleEvaluate,
    /// Allocation pass of the meta-scheduler.
    SchedulerReschedule,
    /// A task is handed to a site's local queue.
    AddTask { task: TaskId },
    /// A site runs its local FCFS policy.
    SiteReschedule,
    /// System monitor refreshes aggregate statistics.
    UpdateStatistics,
    /// System monitor writes its stat rows and checks for termination.
    SysMonMonitor,
    /// A site snapshots its counters into the stats database.
    SiteMonitor,
}

impl EventKind {
    /// Priority within a tick; lower runs first.
    pub fn priority(&self) -> u8 {
        match self {
            EventKind::TaskDoneSite { .. } => 1,
            EventKind::TaskDoneUser { .. } => 2,
            EventKind::MonitorSiteStatus => 3,
            EventKind::AutoScaleEvaluate => 4,
            EventKind::SchedulerReschedule => 5,
            EventKind::AddTask { .. } => 6,
            EventKind::SiteReschedule => 7,
            EventKind::UpdateStatistics => 8,
            EventKind::SysMonMonitor => 9,
            EventKind::SiteMonitor => 10,
        }
    }

    /// Stable name, used for per-type message statistics.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TaskDoneSite { .. } => "TASK_DONE_SITE",
            EventKind::TaskDoneUser { .. } => "TASK_DONE_USER",
            EventKind::MonitorSiteStatus => "MONITOR_SITE_STATUS",
            EventKind::AutoScaleEvaluate => "AUTO_SCALE_EVALUATE",
            EventKind::SchedulerReschedule => "SCHEDULER_RESCHEDULE",
            EventKind::AddTask { .. } => "ADD_TASK",
            EventKind::SiteReschedule => "SITE_RESCHEDULE",
            EventKind::UpdateStatistics => "UPDATE_STATISTICS",
            EventKind::SysMonMonitor => "SYSMON_MONITOR",
            EventKind::SiteMonitor => "SITE_MONITOR",
        }
    }

    /// All priorities, for seeding per-type counters.
    pub fn all_priorities() -> impl Iterator<Item = u8> {
        1..=10
    }
}

/// A scheduled event: who sent it, who receives it, when it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub ts_arrival: u64,
    pub src: EntityId,
    pub dest: EntityId,
    pub kind: EventKind,
}

impl Event {
    pub fn new(ts_arrival: u64, src: EntityId, dest: EntityId, kind: EventKind) -> Self {
        Self {
            ts_arrival,
            src,
            dest,
            kind,
        }
    }
}

/// Event priority queue.
///
/// Events live in per-timestamp buckets; within a bucket they are kept
/// sorted by type priority with ties resolved in insertion order. Enqueues
/// that exactly repeat the bucket's current tail are coalesced, which keeps
/// chains like "every departure requests a reschedule" from piling up
/// identical events.
#[derive(Debug, Default)]
pub struct EventQueue {
    buckets: BTreeMap<u64, Vec<Event>>,

    pub count_events_in: u64,
    pub count_events_out: u64,
    pub count_events_peek: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.count_events_in - self.count_events_out
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds one event to the queue.
    pub fn enqueue(&mut self, event: Event) {
        let bucket = self.buckets.entry(event.ts_arrival).or_default();

        // avoid appending identical events one after another
        if bucket.last() == Some(&event) {
            return;
        }

        let priority = event.kind.priority();
        let position = bucket.partition_point(|queued| queued.kind.priority() <= priority);
        bucket.insert(position, event);
        self.count_events_in += 1;
    }

    /// Returns (and removes from the queue) the next event.
    pub fn dequeue(&mut self) -> Result<Event, SimulatorError> {
        let mut first = self.buckets.first_entry().ok_or_else(|| {
            SimulatorError::Invariant("dequeue from empty EventQueue".to_string())
        })?;

        let event = first.get_mut().remove(0);
        if first.get().is_empty() {
            first.remove();
        }

        self.count_events_out += 1;
        Ok(event)
    }

    /// Returns (but does not remove) the next event.
    pub fn peek(&mut self) -> Result<&Event, SimulatorError> {
        self.count_events_peek += 1;

        self.buckets
            .first_key_value()
            .and_then(|(_, bucket)| bucket.first())
            .ok_or_else(|| SimulatorError::Invariant("peek in empty EventQueue".to_string()))
    }
}

/// The kinds of entity that can receive events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    CentralQueue,
    Site,
    SystemMonitor,
    Scheduler,
    Autoscaler,
}

/// Assigns unique entity ids and maps them back to their kind. The world
/// keeps the entity state itself; the registry only answers "who is id N
/// and is it still alive".
#[derive(Debug, Default)]
pub struct EntityRegistry {
    index: BTreeMap<EntityId, EntityKind>,
    next_id: EntityId,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, kind: EntityKind) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        self.index.insert(id, kind);
        id
    }

    pub fn remove_entity_by_id(&mut self, id: EntityId) {
        self.index.remove(&id);
    }

    /// Looks up a live entity. Asking about an id that was never assigned
    /// is a programming error; asking about a removed one returns `None`
    /// (events racing a site teardown are expected and dropped).
    pub fn get_entity_by_id(&self, id: EntityId) -> Result<Option<EntityKind>, SimulatorError> {
        if id >= self.next_id {
            return Err(SimulatorError::Invariant(format!(
                "entity id {} has not been assigned yet",
                id
            )));
        }

        Ok(self.index.get(&id).copied())
    }

    /// Live entity ids in creation order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.index.keys().copied().collect()
    }
}
