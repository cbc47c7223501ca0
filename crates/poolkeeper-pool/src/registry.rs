//! The drive registry.
//!
//! One registry owns every drive and share of the pool and is shared by
//! handle. Destination selection runs under the read lock and registers an
//! in-flight guard for every drive it hands out; [`DriveRegistry::mark_going`]
//! takes the write lock, so once it returns no new copy can be aimed at the
//! departing drive, and [`DriveRegistry::wait_for_in_flight`] waits out the
//! copies already underway.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use poolkeeper_meta::{DriveId, ShareName};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::drive::{Drive, DriveState};
use crate::error::{PoolError, PoolResult};
use crate::placement::{rank_destinations, PlacementPolicy};
use crate::probe::FreeSpaceProbe;
use crate::share::ShareConfig;

#[derive(Default)]
struct RegistryState {
    drives: BTreeMap<DriveId, Drive>,
    shares: BTreeMap<ShareName, ShareConfig>,
}

#[derive(Default)]
struct InFlight {
    counts: Mutex<HashMap<DriveId, usize>>,
    drained: Condvar,
}

impl InFlight {
    fn acquire(&self, drive: &DriveId) {
        *self.counts.lock().entry(drive.clone()).or_insert(0) += 1;
    }

    fn release(&self, drive: &DriveId) {
        let mut counts = self.counts.lock();
        if let Some(n) = counts.get_mut(drive) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                counts.remove(drive);
                self.drained.notify_all();
            }
        }
    }
}

/// A destination handed out by [`DriveRegistry::select_destination_drives`].
///
/// The drive counts as in flight until the guard is dropped, which callers
/// do once the copy is recorded or discarded.
pub struct DestinationGuard {
    drive: Drive,
    in_flight: Arc<InFlight>,
}

impl DestinationGuard {
    /// Snapshot of the drive at selection time.
    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    /// The drive id.
    pub fn id(&self) -> &DriveId {
        &self.drive.id
    }
}

impl std::fmt::Debug for DestinationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DestinationGuard").field(&self.drive.id).finish()
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        self.in_flight.release(&self.drive.id);
    }
}

/// Owner of every drive and share in the pool.
pub struct DriveRegistry {
    state: RwLock<RegistryState>,
    in_flight: Arc<InFlight>,
    policy: PlacementPolicy,
    min_free_bytes: u64,
    rng: Mutex<StdRng>,
}

impl DriveRegistry {
    /// Creates an empty registry.
    pub fn new(policy: PlacementPolicy, min_free_bytes: u64) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            in_flight: Arc::new(InFlight::default()),
            policy,
            min_free_bytes,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reseeds the placement rng.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Adds a drive.
    pub fn add_drive(&self, drive: Drive) -> PoolResult<()> {
        let mut state = self.state.write();
        if state.drives.contains_key(&drive.id) {
            return Err(PoolError::DriveExists(drive.id));
        }
        info!(drive = %drive.id, state = ?drive.state, "drive registered");
        state.drives.insert(drive.id.clone(), drive);
        Ok(())
    }

    /// Adds or replaces a share.
    pub fn add_share(&self, share: ShareConfig) -> PoolResult<()> {
        let mut state = self.state.write();
        if let Some(list) = &share.drives {
            if let Some(unknown) = list.iter().find(|d| !state.drives.contains_key(*d)) {
                return Err(PoolError::DriveNotFound(unknown.clone()));
            }
        }
        debug!(share = %share.name, copies = %share.copies, "share configured");
        state.shares.insert(share.name.clone(), share);
        Ok(())
    }

    /// Snapshot of one drive.
    pub fn drive(&self, id: &DriveId) -> PoolResult<Drive> {
        self.state
            .read()
            .drives
            .get(id)
            .cloned()
            .ok_or_else(|| PoolError::DriveNotFound(id.clone()))
    }

    /// Snapshot of every drive, ordered by id.
    pub fn drives(&self) -> Vec<Drive> {
        self.state.read().drives.values().cloned().collect()
    }

    /// The drive whose mount contains `path`, preferring the longest mount.
    pub fn drive_for_path(&self, path: &Path) -> Option<Drive> {
        self.state
            .read()
            .drives
            .values()
            .filter(|d| d.contains(path))
            .max_by_key(|d| d.mount.as_os_str().len())
            .cloned()
    }

    /// One share's configuration.
    pub fn share(&self, name: &ShareName) -> PoolResult<ShareConfig> {
        self.state
            .read()
            .shares
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::ShareNotFound(name.to_string()))
    }

    /// Every share, ordered by name.
    pub fn shares(&self) -> Vec<ShareConfig> {
        self.state.read().shares.values().cloned().collect()
    }

    /// Drives eligible for `share`, in any state.
    pub fn drives_for_share(&self, share: &ShareName) -> PoolResult<Vec<Drive>> {
        let state = self.state.read();
        let config = state
            .shares
            .get(share)
            .ok_or_else(|| PoolError::ShareNotFound(share.to_string()))?;
        Ok(state
            .drives
            .values()
            .filter(|d| config.is_eligible(&d.id))
            .cloned()
            .collect())
    }

    /// Required copy count of `share`, with `max` resolved against its
    /// eligible active drives.
    pub fn required_copies(&self, share: &ShareName) -> PoolResult<usize> {
        let state = self.state.read();
        let config = state
            .shares
            .get(share)
            .ok_or_else(|| PoolError::ShareNotFound(share.to_string()))?;
        let active = state
            .drives
            .values()
            .filter(|d| d.state == DriveState::Active && config.is_eligible(&d.id))
            .count();
        Ok(config.copies.resolve(active))
    }

    /// Picks up to `count` destinations for a new copy of a `share` file.
    ///
    /// Only active, available, eligible drives outside `exclude` qualify.
    /// Each returned guard keeps its drive in flight until dropped.
    pub fn select_destination_drives(
        &self,
        share: &ShareName,
        count: usize,
        exclude: &BTreeSet<DriveId>,
    ) -> PoolResult<Vec<DestinationGuard>> {
        let state = self.state.read();
        let config = state
            .shares
            .get(share)
            .ok_or_else(|| PoolError::ShareNotFound(share.to_string()))?;
        let candidates: Vec<&Drive> = state
            .drives
            .values()
            .filter(|d| d.accepts_copies() && config.is_eligible(&d.id) && !exclude.contains(&d.id))
            .collect();
        let ranked = {
            let mut rng = self.rng.lock();
            rank_destinations(&candidates, self.min_free_bytes, self.policy, &mut *rng)
        };

        let guards: Vec<DestinationGuard> = ranked
            .into_iter()
            .take(count)
            .filter_map(|id| state.drives.get(&id).cloned())
            .map(|drive| {
                self.in_flight.acquire(&drive.id);
                DestinationGuard {
                    drive,
                    in_flight: Arc::clone(&self.in_flight),
                }
            })
            .collect();
        debug!(
            %share,
            requested = count,
            selected = guards.len(),
            drives = ?guards.iter().map(|g| g.id().as_str()).collect::<Vec<_>>(),
            "destinations selected"
        );
        Ok(guards)
    }

    /// Guards one specific drive as a destination, if it currently accepts
    /// copies.
    pub fn reserve(&self, id: &DriveId) -> Option<DestinationGuard> {
        let state = self.state.read();
        let drive = state.drives.get(id).filter(|d| d.accepts_copies())?.clone();
        self.in_flight.acquire(&drive.id);
        Some(DestinationGuard {
            drive,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Copies currently aimed at `drive`.
    pub fn in_flight(&self, drive: &DriveId) -> usize {
        self.in_flight.counts.lock().get(drive).copied().unwrap_or(0)
    }

    fn transition(&self, id: &DriveId, to: DriveState) -> PoolResult<()> {
        let mut state = self.state.write();
        let drive = state
            .drives
            .get_mut(id)
            .ok_or_else(|| PoolError::DriveNotFound(id.clone()))?;
        drive.state.check_transition(id, to)?;
        drive.state = to;
        info!(drive = %id, state = ?to, "drive state changed");
        Ok(())
    }

    /// active → going. Once this returns the drive is never selected again.
    pub fn mark_going(&self, id: &DriveId) -> PoolResult<()> {
        self.transition(id, DriveState::Going)
    }

    /// going → gone.
    pub fn mark_gone(&self, id: &DriveId) -> PoolResult<()> {
        self.transition(id, DriveState::Gone)
    }

    /// Blocks until no copy is in flight to `drive`. Returns false if
    /// `timeout` elapsed first.
    pub fn wait_for_in_flight(&self, drive: &DriveId, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut counts = self.in_flight.counts.lock();
        while counts.get(drive).copied().unwrap_or(0) > 0 {
            match deadline {
                Some(deadline) => {
                    if self.in_flight.drained.wait_until(&mut counts, deadline).timed_out() {
                        return counts.get(drive).copied().unwrap_or(0) == 0;
                    }
                }
                None => self.in_flight.drained.wait(&mut counts),
            }
        }
        true
    }

    /// Removes `drive` from every share's eligible list. Returns the
    /// number of shares changed.
    pub fn detach_from_shares(&self, drive: &DriveId) -> usize {
        let mut state = self.state.write();
        let mut changed = 0;
        for share in state.shares.values_mut() {
            if let Some(list) = share.drives.as_mut() {
                let before = list.len();
                list.retain(|d| d != drive);
                if list.len() != before {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Puts back a lifecycle state saved before a restart. A gone drive is
    /// also detached from the shares again.
    pub fn restore_state(&self, id: &DriveId, to: DriveState) -> PoolResult<()> {
        {
            let mut state = self.state.write();
            let drive = state
                .drives
                .get_mut(id)
                .ok_or_else(|| PoolError::DriveNotFound(id.clone()))?;
            if drive.state == to {
                return Ok(());
            }
            drive.state = to;
        }
        if to == DriveState::Gone {
            self.detach_from_shares(id);
        }
        info!(drive = %id, state = ?to, "drive state restored");
        Ok(())
    }

    /// Marks a drive available or not.
    pub fn set_available(&self, id: &DriveId, available: bool) -> PoolResult<()> {
        let mut state = self.state.write();
        let drive = state
            .drives
            .get_mut(id)
            .ok_or_else(|| PoolError::DriveNotFound(id.clone()))?;
        drive.available = available;
        Ok(())
    }

    /// Lowers the free-space estimate after placing `bytes` on `drive`.
    pub fn consume_space(&self, id: &DriveId, bytes: u64) {
        if let Some(drive) = self.state.write().drives.get_mut(id) {
            drive.free_bytes = drive.free_bytes.saturating_sub(bytes);
        }
    }

    /// Re-probes every non-gone drive. A probe error marks the drive
    /// unavailable. Returns the number of available drives.
    pub fn refresh_free_space(&self, probe: &dyn FreeSpaceProbe) -> usize {
        let targets: Vec<(DriveId, std::path::PathBuf)> = self
            .state
            .read()
            .drives
            .values()
            .filter(|d| d.state != DriveState::Gone)
            .map(|d| (d.id.clone(), d.mount.clone()))
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        for (id, mount) in targets {
            let result = match probe.probe(&mount) {
                Ok(space) => space,
                Err(e) => {
                    warn!(drive = %id, error = %e, "free-space probe failed");
                    None
                }
            };
            results.push((id, result));
        }

        let mut state = self.state.write();
        let mut available = 0;
        for (id, result) in results {
            let Some(drive) = state.drives.get_mut(&id) else {
                continue;
            };
            match result {
                Some(space) => {
                    if !drive.available {
                        info!(drive = %id, "drive available again");
                    }
                    drive.available = true;
                    drive.free_bytes = space.free_bytes;
                    drive.total_bytes = space.total_bytes;
                    available += 1;
                }
                None => {
                    if drive.available {
                        warn!(drive = %id, "drive unavailable");
                    }
                    drive.available = false;
                }
            }
        }
        available
    }
}
