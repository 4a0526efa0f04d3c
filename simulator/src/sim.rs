//! The simulation world: wiring, event loop and final report
//!
//! `SystemSim` owns the virtual clock, the event queue, the entity
//! registry, the task arena and every subsystem. There are n sites, each
//! with its own resources; users submit tasks to a central queue; the
//! meta-scheduler dispatches tasks onto sites with free resources, whose
//! availability a monitoring service refreshes periodically; an optional
//! elasticity policy grows and shrinks the site pool as demand moves.
//!
//! Event handlers live with their subsystems as `impl SystemSim` blocks;
//! this module only routes events and drives setup, the loop and the
//! report.

use crate::central_queue::CentralQueue;
use crate::database::TraceDatabases;
use crate::kernel::{
    EntityId, EntityKind, EntityRegistry, Event, EventKind, EventQueue, TaskId, WorkflowId,
};
use crate::monitors::SystemMonitor;
use crate::resource_manager::ResourceManager;
use crate::scheduler::{AllocationPolicy, Scheduler};
use crate::site::{Site, SiteStatus};
use crate::task::TaskArena;
use crate::workflow::Workflow;
use crate::{autoscaler::AutoscalerEntity, workload};
use serde::Serialize;
use shared::config::SimConfig;
use shared::gwf::{gwf_files, read_cluster_setup};
use shared::utils::RunningStats;
use shared::{Result, SimulatorError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const DB_BUFFER_SIZE: usize = 10_000;
const DATE_FORMAT: &str = "%Y-%m-%d/%H:%M:%S";

pub struct SystemSim {
    pub config: SimConfig,
    pub output: PathBuf,

    pub ts_now: u64,
    pub ts_end: u64,
    pub forced_stop: bool,
    pub(crate) started: bool,

    pub events: EventQueue,
    pub registry: EntityRegistry,

    pub tasks: TaskArena,
    pub workflows: BTreeMap<WorkflowId, Workflow>,

    pub sites: BTreeMap<EntityId, Site>,
    pub central_queue: CentralQueue,
    pub resource_manager: ResourceManager,
    pub system_monitor: SystemMonitor,
    pub scheduler: Scheduler,
    pub autoscaler: Option<AutoscalerEntity>,

    pub db: TraceDatabases,
}

impl SystemSim {
    /// Builds the complete simulation: output directory, trace databases,
    /// entities, sites from the cluster descriptor, and the admitted
    /// workload.
    pub fn new(config: SimConfig) -> Result<Self> {
        let dt_start = chrono::Local::now();

        config.validate()?;
        let output = config.output_dir()?;
        config.save(&output)?;
        let db = TraceDatabases::open(&output, &config.simulation, DB_BUFFER_SIZE)?;

        let cluster_path = PathBuf::from(&config.simulation.cluster_setup);
        let (mut clusters, mut gwf_names) = read_cluster_setup(&cluster_path)?;
        if let Some(n) = config.simulation.n_clusters {
            clusters.truncate(n);
        }
        let cluster_count = clusters.len();
        let resource_manager = ResourceManager::new(clusters, false)?;

        let mut registry = EntityRegistry::new();
        let cq_id = registry.add_entity(EntityKind::CentralQueue);
        let central_queue = CentralQueue::new(cq_id, &config.central_queue);

        let sysmon_id = registry.add_entity(EntityKind::SystemMonitor);
        let system_monitor = SystemMonitor::new(
            sysmon_id,
            config.site_monitor.n_ticks_between_monitoring,
            config.system_monitor.n_ticks_update_statistics,
        );

        let scheduler_id = registry.add_entity(EntityKind::Scheduler);
        let scheduler = Scheduler::new(
            scheduler_id,
            AllocationPolicy::from_name(&config.simulation.scheduler)?,
        );

        let autoscaler_name = config.simulation.autoscaler.clone();
        let gwf_override = config.simulation.gwf.clone();

        let mut sim = SystemSim {
            config,
            output,
            ts_now: 0,
            ts_end: 0,
            forced_stop: false,
            started: false,
            events: EventQueue::new(),
            registry,
            tasks: TaskArena::new(),
            workflows: BTreeMap::new(),
            sites: BTreeMap::new(),
            central_queue,
            resource_manager,
            system_monitor,
            scheduler,
            autoscaler: None,
            db,
        };

        sim.start_all_available_sites()?;
        sim.attach_autoscaler(&autoscaler_name)?;

        // A workload given in the config overrides the ones referenced by
        // the cluster descriptor.
        let gwf_arguments: Vec<PathBuf> = match gwf_override {
            Some(gwf) => vec![PathBuf::from(gwf)],
            None => {
                let base = cluster_path.parent().unwrap_or_else(|| ".".as_ref());
                gwf_names.drain(..).map(|name| base.join(name)).collect()
            }
        };
        let mut gwf_paths: Vec<PathBuf> = Vec::new();
        for argument in &gwf_arguments {
            gwf_paths.extend(gwf_files(argument)?);
        }

        let (workflows, task_ids) =
            workload::read_tasks(&mut sim.tasks, cluster_count.max(1), &gwf_paths)?;
        sim.log_tasks_in(&workflows, &task_ids)?;
        sim.central_queue
            .set_task_list(&mut sim.tasks, &task_ids, false);
        sim.workflows = workflows;

        let dt_end = chrono::Local::now();
        info!(
            start = %dt_start.format(DATE_FORMAT),
            end = %dt_end.format(DATE_FORMAT),
            "simulation setup complete"
        );

        Ok(sim)
    }

    /// Dumps the admitted workload: JSON snapshots for inspection and one
    /// trace row per task.
    fn log_tasks_in(
        &mut self,
        workflows: &BTreeMap<WorkflowId, Workflow>,
        task_ids: &[TaskId],
    ) -> Result<()> {
        #[derive(Serialize)]
        struct WorkflowRecord<'a> {
            id: WorkflowId,
            ts_submit: u64,
            critical_path_length: u64,
            critical_path_task_count: u64,
            tasks: &'a [TaskId],
        }

        let workflow_records: Vec<WorkflowRecord> = workflows
            .values()
            .map(|workflow| WorkflowRecord {
                id: workflow.id,
                ts_submit: workflow.ts_submit,
                critical_path_length: workflow.critical_path_length,
                critical_path_task_count: workflow.critical_path_task_count,
                tasks: &workflow.tasks,
            })
            .collect();
        std::fs::write(
            self.output.join("workflows.in"),
            serde_json::to_string_pretty(&workflow_records)?,
        )?;

        let tasks: Vec<_> = task_ids.iter().filter_map(|&id| self.tasks.get(id)).collect();
        std::fs::write(
            self.output.join("tasks.in"),
            serde_json::to_string_pretty(&tasks)?,
        )?;

        for &task_id in task_ids {
            let task = self.tasks.require(task_id)?;
            self.db.tasks_in.add_finished_task(
                task.submission_site as i64,
                0,
                0,
                task.ts_submit,
                0,
                task.runtime,
                0,
                task.cpus,
                None,
            )?;
        }
        self.db
            .log
            .db(self.ts_now, &format!("Saved {} tasks.", task_ids.len()))?;
        self.db.tasks_in.flush()?;
        Ok(())
    }

    /// Every registered entity emits its first event.
    fn activate_entities(&mut self) {
        let evaluate_period = self
            .autoscaler
            .as_ref()
            .map(|autoscaler| autoscaler.core.n_ticks_per_evaluate)
            .unwrap_or(0);

        for id in self.registry.ids() {
            let Ok(Some(kind)) = self.registry.get_entity_by_id(id) else {
                continue;
            };
            match kind {
                EntityKind::CentralQueue => {
                    // first monitor sites, then reschedule tasks
                    self.events
                        .enqueue(Event::new(self.ts_now, id, id, EventKind::MonitorSiteStatus));
                }
                EntityKind::Site => {
                    self.events
                        .enqueue(Event::new(self.ts_now, id, id, EventKind::SiteMonitor));
                }
                EntityKind::SystemMonitor => {
                    self.events
                        .enqueue(Event::new(self.ts_now, id, id, EventKind::SysMonMonitor));
                    self.events
                        .enqueue(Event::new(self.ts_now, id, id, EventKind::UpdateStatistics));
                }
                EntityKind::Scheduler => {
                    self.events.enqueue(Event::new(
                        self.ts_now,
                        id,
                        id,
                        EventKind::SchedulerReschedule,
                    ));
                }
                EntityKind::Autoscaler => {
                    self.events.enqueue(Event::new(
                        self.ts_now + evaluate_period,
                        id,
                        id,
                        EventKind::AutoScaleEvaluate,
                    ));
                }
            }
        }
    }

    /// Routes one event to its destination entity. Events for entities
    /// that have been dropped are discarded: that is the expected race
    /// while a shutdown site drains. An event type the destination does
    /// not handle is a programming error.
    fn dispatch(&mut self, event: Event) -> Result<()> {
        let Some(kind) = self.registry.get_entity_by_id(event.dest)? else {
            debug!(?event, "cannot deliver event, entity no longer registered");
            return Ok(());
        };

        match kind {
            EntityKind::Site => {
                let Some(site) = self.sites.get(&event.dest) else {
                    debug!(?event, "cannot deliver event, site dropped");
                    return Ok(());
                };
                // a site stops receiving events once shut down
                if site.status == SiteStatus::Shutdown {
                    return Ok(());
                }

                match event.kind {
                    EventKind::AddTask { task } => self.site_add_task(event.dest, task)?,
                    EventKind::SiteReschedule => self.site_reschedule(event.dest)?,
                    EventKind::TaskDoneSite { running_task_index } => {
                        self.site_finish_task(event.dest, running_task_index)?
                    }
                    EventKind::SiteMonitor => self.site_monitor(event.dest)?,
                    other => return Err(unhandled(kind, other)),
                }
            }
            EntityKind::CentralQueue => match event.kind {
                EventKind::MonitorSiteStatus => self.cq_monitor_sites(),
                EventKind::TaskDoneUser { task } => self.cq_task_done(task)?,
                other => return Err(unhandled(kind, other)),
            },
            EntityKind::SystemMonitor => match event.kind {
                EventKind::UpdateStatistics => self.sysmon_refresh_sstats()?,
                EventKind::SysMonMonitor => self.sysmon_monitor()?,
                other => return Err(unhandled(kind, other)),
            },
            EntityKind::Scheduler => match event.kind {
                EventKind::SchedulerReschedule => self.scheduler_reschedule()?,
                other => return Err(unhandled(kind, other)),
            },
            EntityKind::Autoscaler => match event.kind {
                EventKind::AutoScaleEvaluate => self.autoscale_evaluate()?,
                other => return Err(unhandled(kind, other)),
            },
        }

        Ok(())
    }

    /// Runs the event loop until the horizon, an empty queue, or a forced
    /// stop.
    pub fn start(&mut self, ts_end: u64) -> Result<()> {
        self.ts_end = ts_end;
        self.ts_now = 0;
        self.started = true;

        self.activate_entities();
        self.log_system_totals()?;

        let mut last_ts: Option<u64> = None;
        let mut cycle_counts: BTreeMap<u8, u64> = BTreeMap::new();
        let mut cycle_index: u64 = 0;

        while !self.forced_stop && self.ts_now <= self.ts_end && !self.events.is_empty() {
            let event = self.events.dequeue()?;

            // do not process events beyond the horizon
            if event.ts_arrival > self.ts_end {
                info!(
                    ts_arrival = event.ts_arrival,
                    ts_end = self.ts_end,
                    "got an event beyond the horizon, ending simulation"
                );
                break;
            }

            self.ts_now = event.ts_arrival;
            *cycle_counts.entry(event.kind.priority()).or_insert(0) += 1;

            if let Some(last) = last_ts {
                if self.ts_now > last {
                    cycle_index += 1;
                    for priority in EventKind::all_priorities() {
                        let count = cycle_counts.get(&priority).copied().unwrap_or(0);
                        self.db.stats.add_no_messages(self.ts_now, priority, count)?;
                    }
                    cycle_counts.clear();

                    if cycle_index % 10_000 == 0 {
                        info!(cycle = cycle_index, ts_now = self.ts_now, "progress");
                        self.log_system_totals()?;
                    }
                }
            }
            last_ts = Some(self.ts_now);

            debug!(?event, "processing event");
            self.dispatch(event)?;
        }

        if self.forced_stop {
            warn!("was forced to stop");
            self.db.log.db(self.ts_now, "Was forced to stop!")?;
        }

        self.db.flush_all()?;
        self.sysmon_refresh_sstats()?;
        self.log_system_totals()?;
        info!(
            tasks_too_large = self.count_tasks_too_large(),
            "simulation loop finished"
        );
        Ok(())
    }

    fn log_system_totals(&mut self) -> Result<()> {
        let lines = [
            format!("Sys: Tasks In      ={}", self.system_monitor.sstats_total_tasks_in),
            format!(
                "Sys: Tasks Started ={}",
                self.system_monitor.sstats_total_tasks_started
            ),
            format!(
                "Sys: Tasks Finished={}",
                self.system_monitor.sstats_total_tasks_finished
            ),
            format!("Sys: Tasks To Come ={}", self.tasks_to_come()),
        ];
        for line in lines {
            info!("{}", line);
            self.db.log.db(self.ts_now, &line)?;
        }
        Ok(())
    }

    /// Final report: event counters, per-site and aggregate statistics,
    /// elasticity KPIs and the user metrics file.
    pub fn report(&mut self) -> Result<()> {
        let ts_now = self.ts_now;
        self.db.log.db(ts_now, "Simulation report")?;
        self.db.log.db(ts_now, "=============================")?;
        self.db.log.db(
            ts_now,
            &format!(
                "Events: {:8}|{:8}|{:8} (In/P/Out)",
                self.events.count_events_in,
                self.events.count_events_peek,
                self.events.count_events_out
            ),
        )?;

        if !self.events.is_empty() {
            let next_ts = self.events.peek()?.ts_arrival;
            self.db.log.db(
                ts_now,
                &format!("TS of next event in the queue: {}", next_ts),
            )?;
        }

        let mut site_tasks_in = RunningStats::new();
        let mut site_tasks_started_pct = RunningStats::new();
        let mut site_tasks_finished_pct = RunningStats::new();

        let site_ids: Vec<EntityId> = self.sites.keys().copied().collect();
        for site_id in site_ids {
            let Some(site) = self.sites.get(&site_id) else {
                continue;
            };
            let (name, tasks_in, started, finished) = (
                site.name.clone(),
                site.monitor.stats_total_tasks_in,
                site.monitor.stats_total_tasks_started,
                site.monitor.stats_total_tasks_finished,
            );

            self.db.log.db(ts_now, &format!("Site: {}", name))?;
            self.db.log.db(
                ts_now,
                &format!("Tasks: {:8}|{:8}|{:8} (In/S/F)", tasks_in, started, finished),
            )?;

            site_tasks_in.add_value(tasks_in as f64);
            if tasks_in > 0 {
                site_tasks_started_pct.add_value(100.0 * started as f64 / tasks_in as f64);
                site_tasks_finished_pct.add_value(100.0 * finished as f64 / tasks_in as f64);
            }
        }

        info!(
            sites = site_tasks_in.count(),
            tasks_in_avg = site_tasks_in.avg(),
            started_pct_avg = site_tasks_started_pct.avg(),
            finished_pct_avg = site_tasks_finished_pct.avg(),
            submitted = self.central_queue.submitted_tasks_count,
            finished = self.central_queue.finished_tasks_count,
            "site summary"
        );

        if let Some(mut autoscaler) = self.autoscaler.take() {
            let cluster_resources = self.get_maximum_capacity()?;
            autoscaler.core.report_stats(self.ts_now, cluster_resources)?;
            self.autoscaler = Some(autoscaler);
        }

        self.cq_report_stats()?;
        self.db.flush_all()?;
        Ok(())
    }

    /// Full run: event loop over the configured horizon, then the report.
    pub fn run(&mut self) -> Result<()> {
        let dt_start = chrono::Local::now();

        let n_ticks = self.config.simulation.n_ticks;
        self.start(n_ticks)?;
        self.report()?;

        let dt_end = chrono::Local::now();
        info!(
            start = %dt_start.format(DATE_FORMAT),
            end = %dt_end.format(DATE_FORMAT),
            runtime = %(dt_end - dt_start),
            "simulation run complete"
        );
        Ok(())
    }
}

fn unhandled(kind: EntityKind, event_kind: EventKind) -> anyhow::Error {
    SimulatorError::Invariant(format!(
        "{:?} entity cannot handle {} events",
        kind,
        event_kind.name()
    ))
    .into()
}
