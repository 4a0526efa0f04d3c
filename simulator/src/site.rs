//! Site: a cluster of identical resources running tasks FCFS
//!
//! A site accepts tasks unconditionally, queues them locally, and starts
//! the head of the queue whenever enough resources are free. Each site
//! embeds a [`SiteMonitor`] that keeps arrival/start/finish counters,
//! consumed-CPU-time accounting and an arrival histogram the predictive
//! elasticity policies can query.

use crate::kernel::{EntityId, Event, EventKind, TaskId};
use crate::monitors::SiteStatKind;
use crate::sim::SystemSim;
use crate::task::TaskArena;
use shared::config::SiteMonitorConfig;
use shared::utils::hour_and_day_for_ts;
use shared::Result;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteStatus {
    Running,
    Shutdown,
}

#[derive(Debug)]
pub struct Site {
    pub id: EntityId,
    pub name: String,
    pub resources: u64,
    pub resource_speed: f64,
    pub used_resources: u64,

    pub task_queue: VecDeque<TaskId>,
    /// Running tasks keyed by a monotonic per-site start index.
    pub running_tasks: BTreeMap<u64, TaskId>,

    pub status: SiteStatus,
    /// Set on capacity leased from a cloud-style provider.
    pub leased_instance: bool,
    /// Tick after which a leased instance disappears; 0 means no lease end.
    pub expiration_ts: u64,

    pub report_interval: u64,
    pub monitor: SiteMonitor,
}

impl Site {
    pub fn new(
        id: EntityId,
        name: String,
        resources: u64,
        resource_speed: f64,
        leased_instance: bool,
        monitor_config: &SiteMonitorConfig,
    ) -> Self {
        Self {
            id,
            name,
            resources,
            resource_speed,
            used_resources: 0,
            task_queue: VecDeque::new(),
            running_tasks: BTreeMap::new(),
            status: SiteStatus::Running,
            leased_instance,
            expiration_ts: 0,
            report_interval: monitor_config.n_ticks_between_monitoring,
            monitor: SiteMonitor::new(monitor_config),
        }
    }

    pub fn free_resources(&self) -> u64 {
        self.resources - self.used_resources
    }

    /// An idle site can be shut down cheaply: nothing running, nothing
    /// queued.
    pub fn is_idle(&self) -> bool {
        self.running_tasks.is_empty() && self.task_queue.is_empty()
    }

    pub fn expired(&self, ts_now: u64) -> bool {
        self.expiration_ts > 0 && self.expiration_ts <= ts_now
    }

    /// Ticks a task occupies this site: `ceil(runtime / resource_speed)`.
    pub fn run_ticks(&self, runtime: u64) -> u64 {
        let mut ticks = (runtime as f64 / self.resource_speed) as u64;
        if runtime as f64 > ticks as f64 * self.resource_speed {
            ticks += 1;
        }
        ticks.max(1)
    }

    /// CPU time consumed so far by still-running tasks.
    pub fn running_tasks_consumed_time(&self, tasks: &TaskArena, ts_now: u64) -> u64 {
        self.running_tasks
            .values()
            .filter_map(|&id| tasks.get(id))
            .map(|task| (ts_now - task.ts_start.unwrap_or(ts_now)) * task.cpus)
            .sum()
    }

    /// Same, clipped to the last reporting interval.
    pub fn running_tasks_consumed_time_lrtu(&self, tasks: &TaskArena, ts_now: u64) -> u64 {
        self.running_tasks
            .values()
            .filter_map(|&id| tasks.get(id))
            .map(|task| {
                (ts_now - task.ts_start.unwrap_or(ts_now)).min(self.report_interval) * task.cpus
            })
            .sum()
    }
}

/// Per-site counters and arrival history.
#[derive(Debug)]
pub struct SiteMonitor {
    days_history: u64,
    minutes_to_track: u64,

    pub stats_total_tasks_in: u64,
    pub stats_total_tasks_started: u64,
    pub stats_total_tasks_finished: u64,
    pub stats_total_interrupted: u64,
    pub stats_total_consumed_cpu_time: u64,

    // stats for the last reporting time interval (LRTU)
    pub stats_lrtu_tasks_in: u64,
    pub stats_lrtu_tasks_started: u64,
    pub stats_lrtu_tasks_finished: u64,
    pub stats_lrtu_consumed_cpu_time: u64,

    task_arrived_last_minutes: Vec<u64>,
    tasks_arrival_per_day: BTreeMap<u64, [u64; 24]>,
}

impl SiteMonitor {
    pub fn new(config: &SiteMonitorConfig) -> Self {
        Self {
            days_history: config.amount_of_days_history,
            minutes_to_track: config.amount_of_minutes_to_track,
            stats_total_tasks_in: 0,
            stats_total_tasks_started: 0,
            stats_total_tasks_finished: 0,
            stats_total_interrupted: 0,
            stats_total_consumed_cpu_time: 0,
            stats_lrtu_tasks_in: 0,
            stats_lrtu_tasks_started: 0,
            stats_lrtu_tasks_finished: 0,
            stats_lrtu_consumed_cpu_time: 0,
            task_arrived_last_minutes: Vec::new(),
            tasks_arrival_per_day: BTreeMap::new(),
        }
    }

    fn drop_old_arrivals(&mut self, ts_now: u64) {
        let horizon = ts_now.saturating_sub(self.minutes_to_track * 60);
        let index = self.task_arrived_last_minutes.partition_point(|&ts| ts < horizon);
        self.task_arrived_last_minutes.drain(..index);
    }

    pub fn arrivals_in_last_minutes(&mut self, ts_now: u64) -> usize {
        self.drop_old_arrivals(ts_now);
        self.task_arrived_last_minutes.len()
    }

    pub fn add_arrived_task(&mut self, ts: u64, ts_now: u64) {
        self.drop_old_arrivals(ts_now);
        if ts >= ts_now.saturating_sub(self.minutes_to_track * 60) {
            self.task_arrived_last_minutes.push(ts);
        }

        let (hour, day) = hour_and_day_for_ts(ts);
        self.tasks_arrival_per_day.entry(day).or_insert([0; 24])[hour] += 1;
    }

    /// Percentile of arrivals seen at this hour of day over the tracked
    /// history window; 0 without history.
    pub fn estimate_arrival_for_ts(&self, ts: u64, percentile: f64) -> f64 {
        let (hour, day) = hour_and_day_for_ts(ts);

        let mut past: Vec<f64> = Vec::new();
        for past_day in day.saturating_sub(self.days_history)..day {
            if let Some(per_hour) = self.tasks_arrival_per_day.get(&past_day) {
                past.push(per_hour[hour] as f64);
            }
        }

        if past.is_empty() {
            0.0
        } else {
            crate::stats::percentile(&past, percentile)
        }
    }

    pub fn exact_arrivals_for_ts(&self, ts: u64) -> u64 {
        let (hour, day) = hour_and_day_for_ts(ts);
        self.tasks_arrival_per_day
            .get(&day)
            .map(|per_hour| per_hour[hour])
            .unwrap_or(0)
    }
}

fn unknown_site(site_id: EntityId) -> shared::SimulatorError {
    shared::SimulatorError::Invariant(format!("no live site with id {}", site_id))
}

impl SystemSim {
    /// ADD_TASK handler: tasks are accepted no matter what.
    pub(crate) fn site_add_task(&mut self, site_id: EntityId, task_id: TaskId) -> Result<()> {
        let ts_now = self.ts_now;
        let site = self
            .sites
            .get_mut(&site_id)
            .ok_or_else(|| unknown_site(site_id))?;
        site.monitor.stats_total_tasks_in += 1;
        site.monitor.stats_lrtu_tasks_in += 1;
        site.monitor.add_arrived_task(ts_now, ts_now);

        self.tasks.require_mut(task_id)?.queue_at_site(site_id);
        site.task_queue.push_back(task_id);

        self.events.enqueue(Event::new(
            ts_now,
            site_id,
            site_id,
            EventKind::SiteReschedule,
        ));
        Ok(())
    }

    /// SITE_RESCHEDULE handler: FCFS, start head-of-queue tasks while they
    /// fit into the free resources.
    pub(crate) fn site_reschedule(&mut self, site_id: EntityId) -> Result<()> {
        let ts_now = self.ts_now;
        let site = self
            .sites
            .get_mut(&site_id)
            .ok_or_else(|| unknown_site(site_id))?;

        debug!(site = %site.name, queued = site.task_queue.len(), "site reschedule");

        while let Some(&head) = site.task_queue.front() {
            let (cpus, runtime) = {
                let task = self.tasks.require(head)?;
                (task.cpus, task.runtime)
            };
            if cpus > site.free_resources() {
                break;
            }

            site.task_queue.pop_front();
            site.monitor.stats_total_tasks_started += 1;
            site.monitor.stats_lrtu_tasks_started += 1;

            // allocate resource(s)
            site.used_resources += cpus;

            let ts_end = ts_now + site.run_ticks(runtime);
            self.tasks.require_mut(head)?.run(ts_now, ts_end);

            let running_task_index = site.monitor.stats_total_tasks_started;
            site.running_tasks.insert(running_task_index, head);

            debug!(
                task = head,
                site = %site.name,
                duration = runtime,
                ts_end,
                "task started"
            );

            self.events.enqueue(Event::new(
                ts_end,
                site_id,
                site_id,
                EventKind::TaskDoneSite { running_task_index },
            ));
        }

        Ok(())
    }

    /// TASK_DONE_SITE handler: release resources, account CPU time, notify
    /// the central queue and trigger a local reschedule.
    pub(crate) fn site_finish_task(&mut self, site_id: EntityId, running_task_index: u64) -> Result<()> {
        let ts_now = self.ts_now;
        let site = self
            .sites
            .get_mut(&site_id)
            .ok_or_else(|| unknown_site(site_id))?;

        let task_id = site
            .running_tasks
            .remove(&running_task_index)
            .ok_or_else(|| {
                shared::SimulatorError::Invariant(format!(
                    "site {} has no running task with index {}",
                    site.name, running_task_index
                ))
            })?;

        let task = self.tasks.require_mut(task_id)?;
        task.stop();
        let cpus = task.cpus;
        let ts_start = task.ts_start.unwrap_or(ts_now);
        let ts_submit = task.ts_submit;
        let ts_end = task.ts_end.unwrap_or(ts_now);
        let submission_site = task.submission_site;

        site.used_resources -= cpus;

        // overall stats, then last-reporting-interval stats
        site.monitor.stats_total_tasks_finished += 1;
        site.monitor.stats_total_consumed_cpu_time += (ts_now - ts_start) * cpus;
        site.monitor.stats_lrtu_tasks_finished += 1;
        site.monitor.stats_lrtu_consumed_cpu_time +=
            (ts_now - ts_start).min(site.report_interval) * cpus;

        self.db.tasks_done.add_finished_task(
            submission_site as i64,
            site_id as i64,
            submission_site as i64,
            ts_submit,
            ts_start,
            ts_end,
            0,
            cpus,
            Some(format!("{}/{}", site_id, site.name)),
        )?;

        debug!(task = task_id, site = %site.name, "task finished");

        // tell the task owner the task is done
        self.events.enqueue(Event::new(
            ts_now,
            site_id,
            self.central_queue.id,
            EventKind::TaskDoneUser { task: task_id },
        ));

        // each task departure triggers a scheduling event
        self.events.enqueue(Event::new(
            ts_now,
            site_id,
            site_id,
            EventKind::SiteReschedule,
        ));

        Ok(())
    }

    /// SITE_MONITOR handler: snapshot the counters into the stats database
    /// and re-arm.
    pub(crate) fn site_monitor(&mut self, site_id: EntityId) -> Result<()> {
        let ts_now = self.ts_now;
        let site = self
            .sites
            .get(&site_id)
            .ok_or_else(|| unknown_site(site_id))?;
        let interval = site.report_interval as f64;
        let source = site_id as i64;

        let monitor = &site.monitor;
        let running_consumed = site.running_tasks_consumed_time(&self.tasks, ts_now);
        let running_consumed_lrtu = site.running_tasks_consumed_time_lrtu(&self.tasks, ts_now);

        let stats = &mut self.db.stats;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::NTasksArrived as u8,
            source,
            Some(monitor.stats_lrtu_tasks_in as i64),
            None,
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::TaskArrivalRate as u8,
            source,
            None,
            Some(monitor.stats_lrtu_tasks_in as f64 / interval),
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::NTasksStarted as u8,
            source,
            Some(monitor.stats_lrtu_tasks_started as i64),
            None,
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::TaskStartRate as u8,
            source,
            None,
            Some(monitor.stats_lrtu_tasks_started as f64 / interval),
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::NTasksFinished as u8,
            source,
            Some(monitor.stats_lrtu_tasks_finished as i64),
            None,
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::TaskFinishRate as u8,
            source,
            None,
            Some(monitor.stats_lrtu_tasks_finished as f64 / interval),
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::TotalCpuTime as u8,
            source,
            Some((monitor.stats_total_consumed_cpu_time + running_consumed) as i64),
            None,
        )?;
        let lrtu_cpu_time = monitor.stats_lrtu_consumed_cpu_time + running_consumed_lrtu;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::TotalCpuTimeLrtu as u8,
            source,
            Some(lrtu_cpu_time as i64),
            None,
        )?;
        stats.add_site_stats(
            ts_now,
            SiteStatKind::CpuTimeRate as u8,
            source,
            None,
            Some(lrtu_cpu_time as f64 / interval),
        )?;

        // schedule the next monitoring round
        self.events.enqueue(Event::new(
            ts_now + site.report_interval,
            site_id,
            site_id,
            EventKind::SiteMonitor,
        ));

        Ok(())
    }

    /// Shutdown protocol: mark the site SHUTDOWN and hand every running
    /// and queued task back to the central queue, interrupted. The site
    /// keeps dropping events until the next statistics refresh removes it
    /// from the registry.
    pub(crate) fn shutdown_site(&mut self, site_id: EntityId) -> Result<()> {
        let site = self
            .sites
            .get_mut(&site_id)
            .ok_or_else(|| unknown_site(site_id))?;
        site.status = SiteStatus::Shutdown;

        if site.is_idle() {
            return Ok(());
        }

        let running: Vec<TaskId> = site.running_tasks.values().copied().collect();
        let queued: Vec<TaskId> = site.task_queue.iter().copied().collect();
        site.running_tasks.clear();
        site.task_queue.clear();
        site.used_resources = 0;
        site.monitor.stats_total_interrupted += running.len() as u64;

        for &task_id in running.iter().chain(&queued) {
            self.tasks.require_mut(task_id)?.interrupt();
        }

        self.central_queue.extend_task_list(&self.tasks, &running);
        self.central_queue.extend_task_list(&self.tasks, &queued);
        Ok(())
    }
}
