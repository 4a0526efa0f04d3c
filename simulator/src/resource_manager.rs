//! Resource manager: starts and stops sites from a fixed catalog
//!
//! The catalog is the immutable set of provisionable cluster descriptors,
//! sorted by processor count. Capacity requests are satisfied best-effort
//! through the subset-sum solvers: start-up picks the largest attainable
//! sum at or below the requested capacity, release picks the running
//! subset closest to it, preferring idle sites.

use crate::kernel::{EntityId, EntityKind, Event, EventKind};
use crate::site::{Site, SiteStatus};
use crate::sim::SystemSim;
use shared::gwf::ClusterInfo;
use shared::{subset_closest_to_sum, subset_closest_to_sum2, Result, SimulatorError};
use tracing::info;

#[derive(Debug)]
pub struct ResourceManager {
    /// Provisionable descriptors, ascending by processor count.
    catalog: Vec<ClusterInfo>,
    /// Live sites in provisioning order.
    pub site_ids: Vec<EntityId>,
    /// Allows provisioning the same descriptor repeatedly, for a
    /// never-ending supply of sites.
    pub allow_duplicates: bool,
    /// Suffix counter for unique names under duplicate provisioning.
    next_site_id: u64,
}

impl ResourceManager {
    pub fn new(mut catalog: Vec<ClusterInfo>, allow_duplicates: bool) -> Result<Self> {
        if catalog.is_empty() {
            return Err(SimulatorError::Config("no clusters found".into()).into());
        }
        catalog.sort_by_key(|cluster| cluster.n_procs);

        Ok(Self {
            catalog,
            site_ids: Vec::new(),
            allow_duplicates,
            next_site_id: 0,
        })
    }

    pub fn catalog(&self) -> &[ClusterInfo] {
        &self.catalog
    }
}

impl SystemSim {
    /// Sum of resources of running sites.
    pub fn get_current_capacity(&self) -> u64 {
        self.resource_manager
            .site_ids
            .iter()
            .filter_map(|id| self.sites.get(id))
            .filter(|site| site.status == SiteStatus::Running)
            .map(|site| site.resources)
            .sum()
    }

    /// Current capacity plus everything still provisionable. Undefined
    /// with duplicate provisioning; the request is refused.
    pub fn get_maximum_capacity(&self) -> Result<u64> {
        if self.resource_manager.allow_duplicates {
            return Err(SimulatorError::Invariant(
                "maximum capacity is unbounded when duplicate provisioning is allowed".into(),
            )
            .into());
        }

        let live: u64 = self
            .resource_manager
            .site_ids
            .iter()
            .filter_map(|id| self.sites.get(id))
            .map(|site| site.resources)
            .sum();
        let provisionable: u64 = self
            .available_clusters()
            .iter()
            .map(|cluster| cluster.n_procs)
            .sum();

        Ok(live + provisionable)
    }

    /// Catalog entries that can still be started.
    fn available_clusters(&self) -> Vec<ClusterInfo> {
        if self.resource_manager.allow_duplicates {
            return self.resource_manager.catalog().to_vec();
        }

        let live_names: Vec<&str> = self
            .resource_manager
            .site_ids
            .iter()
            .filter_map(|id| self.sites.get(id))
            .map(|site| site.name.as_str())
            .collect();

        self.resource_manager
            .catalog()
            .iter()
            .filter(|cluster| !live_names.contains(&cluster.cluster_id.as_str()))
            .cloned()
            .collect()
    }

    /// Provisions every catalog entry not yet running. Returns the added
    /// resources.
    pub fn start_all_available_sites(&mut self) -> Result<u64> {
        let available = self.available_clusters();
        info!(count = available.len(), "starting sites");
        self.db
            .log
            .db(self.ts_now, &format!("Starting {} sites", available.len()))?;

        let mut resources = 0;
        for cluster in available {
            resources += self.provision_site(&cluster, false)?;
        }
        Ok(resources)
    }

    /// Starts the smallest unprovisioned site, optionally the smallest one
    /// that satisfies a minimum size. Returns the added resources.
    pub fn start_smallest_available_site(&mut self, min_size: Option<u64>) -> Result<u64> {
        let available = self.available_clusters();
        let chosen = match min_size {
            // catalog order is ascending by processor count
            Some(min) => available.iter().find(|cluster| cluster.n_procs >= min),
            None => available.first(),
        };

        match chosen.cloned() {
            Some(cluster) => {
                info!("starting smallest site available");
                self.provision_site(&cluster, false)
            }
            None => Ok(0),
        }
    }

    /// Best-effort start-up: provisions the unprovisioned sub-multiset
    /// whose resources come closest to `capacity` from below. With
    /// `fix_capacity`, commits only on an exact match. Returns the added
    /// resources.
    pub fn start_up_best_effort(&mut self, capacity: u64, fix_capacity: bool) -> Result<u64> {
        let rm = &self.resource_manager;
        if !rm.allow_duplicates && rm.site_ids.len() == rm.catalog().len() {
            return Ok(0);
        }

        let available = self.available_clusters();
        let chosen: Vec<ClusterInfo> = subset_closest_to_sum(
            &available,
            capacity,
            |cluster| cluster.n_procs,
            self.resource_manager.allow_duplicates,
            false,
        )
        .into_iter()
        .cloned()
        .collect();

        let attained: u64 = chosen.iter().map(|cluster| cluster.n_procs).sum();
        if fix_capacity && attained != capacity {
            return Ok(0);
        }

        let mut resources = 0;
        for cluster in &chosen {
            resources += self.provision_site(cluster, false)?;
        }
        Ok(resources)
    }

    pub(crate) fn provision_site(&mut self, cluster: &ClusterInfo, leased: bool) -> Result<u64> {
        let suffix = if self.resource_manager.allow_duplicates {
            format!("_{}", self.resource_manager.next_site_id)
        } else {
            String::new()
        };
        let site_name = format!("{}{}", cluster.cluster_id, suffix);
        self.resource_manager.next_site_id += 1;

        let site_id = self.registry.add_entity(EntityKind::Site);
        let site = Site::new(
            site_id,
            site_name.clone(),
            cluster.n_procs,
            cluster.resource_speed,
            leased,
            &self.config.site_monitor,
        );

        self.central_queue.add_site_stats(&site, &self.tasks);
        self.resource_manager.site_ids.push(site_id);
        let resources = site.resources;
        self.sites.insert(site_id, site);

        // A site provisioned mid-run starts monitoring itself right away.
        if self.started {
            self.events.enqueue(Event::new(
                self.ts_now,
                site_id,
                site_id,
                EventKind::SiteMonitor,
            ));
        }

        self.db.log.db(
            self.ts_now,
            &format!("Starting site {} with {} NProcs", site_name, resources),
        )?;

        Ok(resources)
    }

    /// Best-effort release: shuts down the running subset whose resources
    /// come closest to `capacity`. With `only_idle` only idle sites are
    /// candidates; otherwise capacity decides first and idleness breaks
    /// ties. Returns the released resources.
    pub fn release_resources_best_effort(
        &mut self,
        capacity: u64,
        only_idle: bool,
        fix_capacity: bool,
    ) -> Result<u64> {
        struct Candidate {
            site_id: EntityId,
            resources: u64,
            used_fraction: f64,
            idle: bool,
        }

        let mut running: Vec<Candidate> = self
            .resource_manager
            .site_ids
            .iter()
            .filter_map(|id| self.sites.get(id))
            .filter(|site| site.status == SiteStatus::Running)
            .map(|site| Candidate {
                site_id: site.id,
                resources: site.resources,
                used_fraction: site.used_resources as f64 / site.resources as f64,
                idle: site.is_idle(),
            })
            .collect();

        let chosen: Vec<(EntityId, u64, bool)> = if only_idle {
            running.retain(|candidate| candidate.idle);
            subset_closest_to_sum(&running, capacity, |c| c.resources, false, false)
                .into_iter()
                .map(|c| (c.site_id, c.resources, c.idle))
                .collect()
        } else {
            subset_closest_to_sum2(&running, capacity, |c| c.resources, |c| c.used_fraction)
                .into_iter()
                .map(|c| (c.site_id, c.resources, c.idle))
                .collect()
        };

        let attained: u64 = chosen.iter().map(|&(_, resources, _)| resources).sum();
        if fix_capacity && attained != capacity {
            return Ok(0);
        }

        let mut released = 0;
        for (site_id, resources, idle) in chosen {
            if only_idle && !idle {
                if fix_capacity {
                    break;
                }
                continue;
            }

            released += resources;
            self.shutdown_site(site_id)?;
            self.central_queue.remove_site_stats(site_id);
        }

        Ok(released)
    }

    /// Shuts down the smallest running site, preferring idle ones; with
    /// `force` a busy site may be stopped too. Returns the released
    /// resources.
    pub fn stop_smallest_available_site(&mut self, min_size: Option<u64>, force: bool) -> Result<u64> {
        let mut found: Option<(EntityId, u64, bool)> = None;

        for site in self
            .resource_manager
            .site_ids
            .iter()
            .filter_map(|id| self.sites.get(id))
        {
            if site.status != SiteStatus::Running {
                continue;
            }
            if min_size.is_some_and(|min| site.resources < min) {
                continue;
            }

            let candidate = (site.id, site.resources, site.is_idle());
            found = match found {
                None if site.is_idle() || force => Some(candidate),
                // between two sites with equal resources, prefer the idle one
                Some((_, resources, idle)) if resources == site.resources && !idle && site.is_idle() => {
                    Some(candidate)
                }
                Some((_, resources, _)) if site.resources < resources && (site.is_idle() || force) => {
                    Some(candidate)
                }
                other => other,
            };
        }

        match found {
            Some((site_id, _, _)) => self.stop_site(site_id),
            None => Ok(0),
        }
    }

    /// Shutdown protocol entry point for a single site.
    pub fn stop_site(&mut self, site_id: EntityId) -> Result<u64> {
        let (name, resources, free) = {
            let site = self.sites.get(&site_id).ok_or_else(|| {
                SimulatorError::Invariant(format!("stop of unknown site {}", site_id))
            })?;
            (site.name.clone(), site.resources, site.free_resources())
        };
        self.db.log.db(
            self.ts_now,
            &format!("Stopping site {}, id {} with {} free resources", name, site_id, free),
        )?;

        self.shutdown_site(site_id)?;
        self.central_queue.remove_site_stats(site_id);
        Ok(resources)
    }

    /// Removes a site that completed its shutdown protocol. Dropping a
    /// running site is a programming error.
    pub fn drop_site(&mut self, site_id: EntityId) -> Result<()> {
        let site = self.sites.get(&site_id).ok_or_else(|| {
            SimulatorError::Invariant(format!("drop of unknown site {}", site_id))
        })?;
        if site.status != SiteStatus::Shutdown {
            return Err(SimulatorError::Invariant(format!(
                "site {} dropped while not shut down",
                site.name
            ))
            .into());
        }

        self.db.log.db(
            self.ts_now,
            &format!(
                "Dropping site {}, id {} with {} free resources",
                site.name,
                site_id,
                site.free_resources()
            ),
        )?;

        self.registry.remove_entity_by_id(site_id);
        self.resource_manager.site_ids.retain(|&id| id != site_id);
        self.sites.remove(&site_id);
        Ok(())
    }
}
