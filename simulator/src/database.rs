//! SQLite trace databases
//!
//! Every run writes four databases into its output directory: a message
//! log, a statistics database, and two task traces (admitted and finished
//! tasks). Inserts are buffered and flushed in single transactions so the
//! hot path of the event loop never waits on disk.
//!
//! The writers are constructed once by the driver and injected into the
//! components that record through them; nothing here is global, so state
//! cannot leak between simulation runs.

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, Connection};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d/%H:%M:%S";

/// Message log (`Log` table). Mirrors the runtime log into the database so
/// a run can be inspected with plain SQL afterwards.
pub struct DbLogger {
    connection: Connection,
    buffer: Vec<(String, u64, String)>,
    buffer_size: usize,
    enabled: bool,
}

impl DbLogger {
    pub fn new(path: &Path, buffer_size: usize, enabled: bool) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("cannot open log database {}", path.display()))?;

        connection
            .execute_batch(
                r#"
                DROP TABLE IF EXISTS Log;
                CREATE TABLE Log (
                    line_no INTEGER PRIMARY KEY,
                    real_time VARCHAR(45) DEFAULT NULL,
                    sim_time INTEGER DEFAULT NULL,
                    message VARCHAR(5000) DEFAULT NULL
                );
                "#,
            )
            .context("cannot create Log table")?;

        Ok(Self {
            connection,
            buffer: Vec::new(),
            buffer_size,
            enabled,
        })
    }

    /// Buffers one log line stamped with the current virtual time.
    pub fn db(&mut self, ts_now: u64, message: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let real_time = Local::now().format(DATE_FORMAT).to_string();
        self.buffer.push((real_time, ts_now, message.to_string()));

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.enabled || self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO Log (line_no, real_time, sim_time, message) VALUES (NULL, ?1, ?2, ?3)",
            )?;
            for (real_time, sim_time, message) in self.buffer.drain(..) {
                stmt.execute(params![real_time, sim_time, message])?;
            }
        }
        tx.commit().context("cannot flush Log buffer")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum StatsTable {
    NoMessages,
    SiteStats,
    SystemSitesStats,
}

type StatRow = (u64, u8, Option<i64>, Option<i64>, Option<f64>);

/// Statistics database: per-tick message counts, per-site stat samples and
/// aggregate system samples.
pub struct DbStats {
    connection: Connection,
    buffer_size: usize,
    no_messages: Vec<(u64, u8, u64)>,
    site_stats: Vec<StatRow>,
    system_sites_stats: Vec<StatRow>,
}

impl DbStats {
    pub fn new(path: &Path, buffer_size: usize) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("cannot open stats database {}", path.display()))?;

        connection
            .execute_batch(
                r#"
                DROP TABLE IF EXISTS NoMessages;
                CREATE TABLE NoMessages (
                    id INTEGER PRIMARY KEY,
                    sim_time INTEGER DEFAULT NULL,
                    id_message_type INTEGER DEFAULT NULL,
                    no_messages INTEGER DEFAULT NULL
                );
                DROP TABLE IF EXISTS SiteStats;
                CREATE TABLE SiteStats (
                    id INTEGER PRIMARY KEY,
                    sim_time INTEGER DEFAULT NULL,
                    id_stat_type INTEGER DEFAULT NULL,
                    id_source INTEGER DEFAULT NULL,
                    ivalue INTEGER DEFAULT NULL,
                    fvalue FLOAT DEFAULT NULL,
                    svalue VARCHAR(100) DEFAULT NULL
                );
                DROP TABLE IF EXISTS SystemSitesStats;
                CREATE TABLE SystemSitesStats (
                    id INTEGER PRIMARY KEY,
                    sim_time INTEGER DEFAULT NULL,
                    id_stat_type INTEGER DEFAULT NULL,
                    ivalue INTEGER DEFAULT NULL,
                    fvalue FLOAT DEFAULT NULL,
                    svalue VARCHAR(100) DEFAULT NULL
                );
                "#,
            )
            .context("cannot create statistics tables")?;

        Ok(Self {
            connection,
            buffer_size,
            no_messages: Vec::new(),
            site_stats: Vec::new(),
            system_sites_stats: Vec::new(),
        })
    }

    pub fn add_no_messages(
        &mut self,
        sim_time: u64,
        message_type: u8,
        no_messages: u64,
    ) -> Result<()> {
        self.no_messages.push((sim_time, message_type, no_messages));
        if self.no_messages.len() >= self.buffer_size {
            self.flush_table(StatsTable::NoMessages)?;
        }
        Ok(())
    }

    pub fn add_site_stats(
        &mut self,
        sim_time: u64,
        stat_type: u8,
        source: i64,
        ivalue: Option<i64>,
        fvalue: Option<f64>,
    ) -> Result<()> {
        self.site_stats
            .push((sim_time, stat_type, Some(source), ivalue, fvalue));
        if self.site_stats.len() >= self.buffer_size {
            self.flush_table(StatsTable::SiteStats)?;
        }
        Ok(())
    }

    pub fn add_system_sites_stats(
        &mut self,
        sim_time: u64,
        stat_type: u8,
        ivalue: Option<i64>,
        fvalue: Option<f64>,
    ) -> Result<()> {
        self.system_sites_stats
            .push((sim_time, stat_type, None, ivalue, fvalue));
        if self.system_sites_stats.len() >= self.buffer_size {
            self.flush_table(StatsTable::SystemSitesStats)?;
        }
        Ok(())
    }

    fn flush_table(&mut self, table: StatsTable) -> Result<()> {
        let tx = self.connection.transaction()?;
        {
            match table {
                StatsTable::NoMessages => {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO NoMessages (id, sim_time, id_message_type, no_messages) \
                         VALUES (NULL, ?1, ?2, ?3)",
                    )?;
                    for (sim_time, message_type, count) in self.no_messages.drain(..) {
                        stmt.execute(params![sim_time, message_type, count])?;
                    }
                }
                StatsTable::SiteStats => {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO SiteStats (id, sim_time, id_stat_type, id_source, ivalue, fvalue, svalue) \
                         VALUES (NULL, ?1, ?2, ?3, ?4, ?5, NULL)",
                    )?;
                    for (sim_time, stat_type, source, ivalue, fvalue) in self.site_stats.drain(..) {
                        stmt.execute(params![sim_time, stat_type, source, ivalue, fvalue])?;
                    }
                }
                StatsTable::SystemSitesStats => {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO SystemSitesStats (id, sim_time, id_stat_type, ivalue, fvalue, svalue) \
                         VALUES (NULL, ?1, ?2, ?3, ?4, NULL)",
                    )?;
                    for (sim_time, stat_type, _, ivalue, fvalue) in
                        self.system_sites_stats.drain(..)
                    {
                        stmt.execute(params![sim_time, stat_type, ivalue, fvalue])?;
                    }
                }
            }
        }
        tx.commit().context("cannot flush statistics buffer")?;
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        self.flush_table(StatsTable::NoMessages)?;
        self.flush_table(StatsTable::SiteStats)?;
        self.flush_table(StatsTable::SystemSitesStats)?;
        Ok(())
    }
}

type TaskTraceRow = (i64, i64, i64, u64, u64, u64, u64, u64, Option<String>);

/// Task trace database (`FinishedTasks` table). Used twice per run: once
/// for the admitted workload and once for completed tasks.
pub struct DbTaskTrace {
    connection: Connection,
    buffer: Vec<TaskTraceRow>,
    buffer_size: usize,
}

impl DbTaskTrace {
    pub fn new(path: &Path, buffer_size: usize) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("cannot open task trace database {}", path.display()))?;

        connection
            .execute_batch(
                r#"
                DROP TABLE IF EXISTS FinishedTasks;
                CREATE TABLE FinishedTasks (
                    task_id INTEGER PRIMARY KEY,
                    sub_site VARCHAR(45) DEFAULT NULL,
                    exec_site VARCHAR(45) DEFAULT NULL,
                    user VARCHAR(45) DEFAULT NULL,
                    ts_submit INTEGER DEFAULT NULL,
                    ts_start INTEGER DEFAULT NULL,
                    ts_stop INTEGER DEFAULT NULL,
                    result INTEGER DEFAULT NULL,
                    ncpus INTEGER DEFAULT NULL,
                    visited_sites VARCHAR(1000) DEFAULT NULL
                );
                "#,
            )
            .context("cannot create FinishedTasks table")?;

        Ok(Self {
            connection,
            buffer: Vec::new(),
            buffer_size,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_finished_task(
        &mut self,
        sub_site: i64,
        exec_site: i64,
        user: i64,
        ts_submit: u64,
        ts_start: u64,
        ts_stop: u64,
        result: u64,
        ncpus: u64,
        visited_sites: Option<String>,
    ) -> Result<()> {
        self.buffer.push((
            sub_site,
            exec_site,
            user,
            ts_submit,
            ts_start,
            ts_stop,
            result,
            ncpus,
            visited_sites,
        ));
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO FinishedTasks \
                 (task_id, sub_site, exec_site, user, ts_submit, ts_start, ts_stop, result, ncpus, visited_sites) \
                 VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for row in self.buffer.drain(..) {
                stmt.execute(params![
                    row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8
                ])?;
            }
        }
        tx.commit().context("cannot flush task trace buffer")?;
        Ok(())
    }
}

/// The full set of trace databases for one run.
pub struct TraceDatabases {
    pub log: DbLogger,
    pub stats: DbStats,
    pub tasks_done: DbTaskTrace,
    pub tasks_in: DbTaskTrace,
}

impl TraceDatabases {
    pub fn open(
        output_dir: &Path,
        config: &shared::config::SimulationConfig,
        buffer_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            log: DbLogger::new(
                &output_dir.join(&config.db_log),
                buffer_size,
                config.db_logging_enabled,
            )?,
            stats: DbStats::new(&output_dir.join(&config.db_stats), buffer_size)?,
            tasks_done: DbTaskTrace::new(&output_dir.join(&config.db_tasks_done_trace), buffer_size)?,
            tasks_in: DbTaskTrace::new(&output_dir.join(&config.db_tasks_in_trace), buffer_size)?,
        })
    }

    pub fn flush_all(&mut self) -> Result<()> {
        self.log.flush()?;
        self.stats.flush_all()?;
        self.tasks_done.flush()?;
        self.tasks_in.flush()?;
        Ok(())
    }
}
