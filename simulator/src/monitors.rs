//! System-wide monitoring
//!
//! The system monitor aggregates every site monitor's counters, writes
//! system-level stat rows, reaps sites that finished their shutdown
//! protocol, and raises the forced-stop flag once nothing is left to do.
//! It also answers the load queries the elasticity policies are built on.

use crate::kernel::{EntityId, Event, EventKind};
use crate::site::SiteStatus;
use crate::sim::SystemSim;
use shared::Result;
use std::collections::BTreeMap;

/// Stat sample types written to the statistics database.
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum SiteStatKind {
    TaskArrivalRate = 0,
    TaskStartRate = 1,
    TaskFinishRate = 2,
    NTasksArrived = 3,
    NTasksStarted = 4,
    NTasksFinished = 5,
    /// CPUs per resource-second.
    CpuTimeRate = 6,
    TotalCpuTime = 7,
    TotalCpuTimeLrtu = 8,
}

#[derive(Debug)]
pub struct SystemMonitor {
    pub id: EntityId,
    report_interval: u64,
    n_ticks_update_statistics: u64,

    tasks_in_per_site: BTreeMap<EntityId, u64>,
    tasks_started_per_site: BTreeMap<EntityId, u64>,
    tasks_finished_per_site: BTreeMap<EntityId, u64>,
    tasks_interrupted_per_site: BTreeMap<EntityId, u64>,
    consumed_cpu_time_per_site: BTreeMap<EntityId, u64>,
    running_consumed_cpu_time_per_site: BTreeMap<EntityId, u64>,

    pub sstats_total_tasks_in: u64,
    pub sstats_total_tasks_started: u64,
    pub sstats_total_tasks_finished: u64,
    pub sstats_total_tasks_interrupted: u64,
    pub sstats_total_consumed_cpu_time: u64,
    pub sstats_total_running_consumed_cpu_time: u64,

    // previous reporting interval's values, for rate computation
    sstats_old_tasks_in: u64,
    sstats_old_tasks_started: u64,
    sstats_old_tasks_finished: u64,
    sstats_old_consumed_cpu_time: u64,
    sstats_old_running_consumed_cpu_time: u64,
}

impl SystemMonitor {
    pub fn new(id: EntityId, report_interval: u64, n_ticks_update_statistics: u64) -> Self {
        Self {
            id,
            report_interval,
            n_ticks_update_statistics,
            tasks_in_per_site: BTreeMap::new(),
            tasks_started_per_site: BTreeMap::new(),
            tasks_finished_per_site: BTreeMap::new(),
            tasks_interrupted_per_site: BTreeMap::new(),
            consumed_cpu_time_per_site: BTreeMap::new(),
            running_consumed_cpu_time_per_site: BTreeMap::new(),
            sstats_total_tasks_in: 0,
            sstats_total_tasks_started: 0,
            sstats_total_tasks_finished: 0,
            sstats_total_tasks_interrupted: 0,
            sstats_total_consumed_cpu_time: 0,
            sstats_total_running_consumed_cpu_time: 0,
            sstats_old_tasks_in: 0,
            sstats_old_tasks_started: 0,
            sstats_old_tasks_finished: 0,
            sstats_old_consumed_cpu_time: 0,
            sstats_old_running_consumed_cpu_time: 0,
        }
    }
}

impl SystemSim {
    /// Tasks that have not yet been handed to a site.
    pub fn tasks_to_come(&self) -> usize {
        self.central_queue.queued_task_count() + self.central_queue.ready_count()
    }

    /// Queued tasks too wide for even the largest site.
    pub fn count_tasks_too_large(&self) -> usize {
        let Some(max_resources) = self.sites.values().map(|site| site.resources).max() else {
            return 0;
        };

        self.central_queue
            .pending_dependency_tasks()
            .chain(self.central_queue.submitted_future_tasks())
            .filter(|&(_, id)| {
                self.tasks
                    .get(id)
                    .is_some_and(|task| task.cpus > max_resources)
            })
            .count()
    }

    /// Free resources across running sites.
    pub fn count_idle_resources(&self) -> u64 {
        self.sites
            .values()
            .filter(|site| site.status == SiteStatus::Running)
            .map(|site| site.free_resources())
            .sum()
    }

    /// Demand: CPUs of everything running, queued at sites, or due at the
    /// central queue.
    pub fn get_total_load(&self) -> u64 {
        let mut total_load = 0;
        for site in self.sites.values() {
            total_load += site
                .running_tasks
                .values()
                .filter_map(|&id| self.tasks.get(id))
                .map(|task| task.cpus)
                .sum::<u64>();
            total_load += site
                .task_queue
                .iter()
                .filter_map(|&id| self.tasks.get(id))
                .map(|task| task.cpus)
                .sum::<u64>();
        }

        total_load + self.get_pending_tasks_load()
    }

    /// CPUs of tasks waiting at the central queue whose submit tick has
    /// passed, dependency-blocked ones included.
    pub fn get_pending_tasks_load(&self) -> u64 {
        let mut load: u64 = self
            .central_queue
            .ready_tasks()
            .filter_map(|id| self.tasks.get(id))
            .map(|task| task.cpus)
            .sum();

        for (ts_submit, id) in self
            .central_queue
            .submitted_future_tasks()
            .chain(self.central_queue.pending_dependency_tasks())
        {
            if ts_submit <= self.ts_now {
                if let Some(task) = self.tasks.get(id) {
                    load += task.cpus;
                }
            }
        }

        load
    }

    /// Tasks arrived across all sites within their sliding windows.
    pub fn total_incoming_tasks_past_minutes(&mut self) -> usize {
        let ts_now = self.ts_now;
        self.sites
            .values_mut()
            .map(|site| site.monitor.arrivals_in_last_minutes(ts_now))
            .sum()
    }

    /// Sum of per-site arrival percentile estimates for a future tick.
    pub fn estimated_total_arrivals_for_ts(&self, ts: u64, percentile: f64) -> f64 {
        self.sites
            .values()
            .map(|site| site.monitor.estimate_arrival_for_ts(ts, percentile))
            .sum()
    }

    /// Sum of exact per-site arrival counts recorded for a tick.
    pub fn total_observed_arrivals_for_ts(&self, ts: u64) -> u64 {
        self.sites
            .values()
            .map(|site| site.monitor.exact_arrivals_for_ts(ts))
            .sum()
    }

    /// UPDATE_STATISTICS handler: re-sum all site counters and drop sites
    /// whose shutdown has drained.
    pub(crate) fn sysmon_refresh_sstats(&mut self) -> Result<()> {
        let ts_now = self.ts_now;
        let site_ids: Vec<EntityId> = self.sites.keys().copied().collect();
        let mut shutdown_sites: Vec<EntityId> = Vec::new();

        for site_id in site_ids {
            let Some(site) = self.sites.get(&site_id) else {
                continue;
            };
            let monitor = &site.monitor;
            let running_consumed = site.running_tasks_consumed_time(&self.tasks, ts_now);

            let sysmon = &mut self.system_monitor;
            sysmon
                .tasks_in_per_site
                .insert(site_id, monitor.stats_total_tasks_in);
            sysmon
                .tasks_started_per_site
                .insert(site_id, monitor.stats_total_tasks_started);
            sysmon
                .tasks_finished_per_site
                .insert(site_id, monitor.stats_total_tasks_finished);
            sysmon
                .tasks_interrupted_per_site
                .insert(site_id, monitor.stats_total_interrupted);
            sysmon
                .consumed_cpu_time_per_site
                .insert(site_id, monitor.stats_total_consumed_cpu_time);
            sysmon
                .running_consumed_cpu_time_per_site
                .insert(site_id, running_consumed);

            if site.status == SiteStatus::Shutdown {
                shutdown_sites.push(site_id);
            }
        }

        let sysmon = &mut self.system_monitor;
        sysmon.sstats_total_tasks_in = sysmon.tasks_in_per_site.values().sum();
        sysmon.sstats_total_tasks_started = sysmon.tasks_started_per_site.values().sum();
        sysmon.sstats_total_tasks_finished = sysmon.tasks_finished_per_site.values().sum();
        sysmon.sstats_total_tasks_interrupted = sysmon.tasks_interrupted_per_site.values().sum();
        sysmon.sstats_total_consumed_cpu_time = sysmon.consumed_cpu_time_per_site.values().sum();
        sysmon.sstats_total_running_consumed_cpu_time =
            sysmon.running_consumed_cpu_time_per_site.values().sum();

        for site_id in shutdown_sites {
            self.drop_site(site_id)?;
        }

        let sysmon = &self.system_monitor;
        self.events.enqueue(Event::new(
            ts_now + sysmon.n_ticks_update_statistics,
            sysmon.id,
            sysmon.id,
            EventKind::UpdateStatistics,
        ));

        Ok(())
    }

    /// SYSMON_MONITOR handler: write system-level stat rows, check the
    /// termination condition, re-arm.
    pub(crate) fn sysmon_monitor(&mut self) -> Result<()> {
        let ts_now = self.ts_now;
        let sysmon = &self.system_monitor;
        let interval = sysmon.report_interval as f64;

        let arrived = sysmon.sstats_total_tasks_in - sysmon.sstats_old_tasks_in;
        let started = sysmon.sstats_total_tasks_started - sysmon.sstats_old_tasks_started;
        let finished = sysmon.sstats_total_tasks_finished - sysmon.sstats_old_tasks_finished;
        let total_cpu_time =
            sysmon.sstats_total_consumed_cpu_time + sysmon.sstats_total_running_consumed_cpu_time;
        let lrtu_cpu_time = total_cpu_time
            - sysmon.sstats_old_consumed_cpu_time
            - sysmon.sstats_old_running_consumed_cpu_time;

        let stats = &mut self.db.stats;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::NTasksArrived as u8,
            Some(arrived as i64),
            None,
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::TaskArrivalRate as u8,
            None,
            Some(arrived as f64 / interval),
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::NTasksStarted as u8,
            Some(started as i64),
            None,
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::TaskStartRate as u8,
            None,
            Some(started as f64 / interval),
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::NTasksFinished as u8,
            Some(finished as i64),
            None,
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::TaskFinishRate as u8,
            None,
            Some(finished as f64 / interval),
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::TotalCpuTime as u8,
            Some(total_cpu_time as i64),
            None,
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::TotalCpuTimeLrtu as u8,
            Some(lrtu_cpu_time as i64),
            None,
        )?;
        stats.add_system_sites_stats(
            ts_now,
            SiteStatKind::CpuTimeRate as u8,
            None,
            Some(lrtu_cpu_time as f64 / interval),
        )?;

        let sysmon = &mut self.system_monitor;
        sysmon.sstats_old_tasks_in = sysmon.sstats_total_tasks_in;
        sysmon.sstats_old_tasks_started = sysmon.sstats_total_tasks_started;
        sysmon.sstats_old_tasks_finished = sysmon.sstats_total_tasks_finished;
        sysmon.sstats_old_consumed_cpu_time = sysmon.sstats_total_consumed_cpu_time;
        sysmon.sstats_old_running_consumed_cpu_time =
            sysmon.sstats_total_running_consumed_cpu_time;

        // Stop condition: nothing left to hand out, everything handed out
        // has come back.
        if self.tasks_to_come() == 0
            && self.central_queue.submitted_tasks_count == self.central_queue.finished_tasks_count
        {
            self.forced_stop = true;
        }

        let sysmon = &self.system_monitor;
        self.events.enqueue(Event::new(
            ts_now + sysmon.report_interval,
            sysmon.id,
            sysmon.id,
            EventKind::SysMonMonitor,
        ));

        Ok(())
    }
}
