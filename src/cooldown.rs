//! Per-actor cooldown lockouts
//!
//! An id present in the table is on cooldown; its expiry event removes it.

use crate::actor::ActorId;
use crate::data::CooldownRow;
use crate::error::{Result, SimError};
use crate::scheduler::{Scheduler, Tick};
use crate::simulation::SimEvent;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownEntry {
    pub id: u32,
    pub expires_at: Tick,
}

/// Lockout duration after the extra delay, haste and the offset bounds
pub fn cooldown_duration(row: &CooldownRow, extra: Tick, haste: i64) -> Tick {
    let raw = row.duration + extra;
    let hasted = raw * (1024 - haste) / 1024;
    let lower = row.min_duration.saturating_add(extra);
    let upper = row.max_duration.saturating_add(extra);
    hasted.max(lower).min(upper)
}

#[derive(Debug, Clone)]
pub struct CooldownTable {
    owner: ActorId,
    entries: HashMap<u32, CooldownEntry>,
}

impl CooldownTable {
    pub fn new(owner: ActorId) -> Self {
        Self {
            owner,
            entries: HashMap::new(),
        }
    }

    fn expiry_event(&self, id: u32) -> SimEvent {
        SimEvent::CooldownReady {
            actor: self.owner,
            id,
        }
    }

    /// Start cooldown `row.id`; returns the expiry tick.
    pub fn setcd(
        &mut self,
        row: &CooldownRow,
        extra: Tick,
        haste: i64,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<Tick> {
        if self.entries.contains_key(&row.id) {
            return Err(SimError::AlreadyOnCooldown(row.id));
        }
        let duration = cooldown_duration(row, extra, haste);
        let expires_at = sched.schedule(duration, self.expiry_event(row.id))?;
        self.entries.insert(
            row.id,
            CooldownEntry {
                id: row.id,
                expires_at,
            },
        );
        debug!(actor = ?self.owner, cooldown = row.id, duration, "cooldown started");
        Ok(expires_at)
    }

    /// Shift the remaining duration by `delta`. Returns the new expiry tick, or
    /// `None` when the cooldown was freed (or was not running).
    pub fn modify(
        &mut self,
        id: u32,
        delta: Tick,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<Option<Tick>> {
        let Some(entry) = self.entries.get(&id).copied() else {
            return Ok(None);
        };
        let remaining = entry.expires_at - sched.now() + delta;
        sched.cancel(entry.expires_at, &self.expiry_event(id));

        if remaining <= 0 {
            self.entries.remove(&id);
            debug!(actor = ?self.owner, cooldown = id, "cooldown freed early");
            return Ok(None);
        }
        let expires_at = sched.schedule(remaining, self.expiry_event(id))?;
        self.entries.insert(id, CooldownEntry { id, expires_at });
        Ok(Some(expires_at))
    }

    /// Drop the entry when its expiry event fires. False for a stale event.
    pub fn expire(&mut self, id: u32, fired_at: Tick) -> bool {
        match self.entries.get(&id) {
            Some(entry) if entry.expires_at == fired_at => {
                self.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Remove a running cooldown and its pending expiry
    pub fn clear(&mut self, id: u32, sched: &mut Scheduler<SimEvent>) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => sched.cancel(entry.expires_at, &self.expiry_event(id)),
            None => false,
        }
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remaining(&self, id: u32, now: Tick) -> Tick {
        self.entries
            .get(&id)
            .map_or(0, |e| (e.expires_at - now).max(0))
    }

    /// Latest expiry among running ids in `ids`, 0 when none is running
    pub fn get_max_expiry(&self, ids: &[u32]) -> Tick {
        ids.iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| e.expires_at)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cd(id: u32, duration: Tick) -> CooldownRow {
        CooldownRow {
            id,
            duration,
            min_duration: 0,
            max_duration: Tick::MAX,
        }
    }

    #[test]
    fn test_duration_haste_and_bounds() {
        let mut row = cd(1, 1536);
        assert_eq!(cooldown_duration(&row, 0, 0), 1536);
        assert_eq!(cooldown_duration(&row, 512, 256), 1536);
        row.min_duration = 1400;
        assert_eq!(cooldown_duration(&row, 0, 256), 1400);
        row.max_duration = 1000;
        assert_eq!(cooldown_duration(&row, 100, 0), 1100);
    }

    #[test]
    fn test_setcd_twice_fails() {
        let mut t = CooldownTable::new(ActorId::Player);
        let mut s = Scheduler::new();
        assert_eq!(t.setcd(&cd(7, 100), 0, 0, &mut s).unwrap(), 100);
        let err = t.setcd(&cd(7, 100), 0, 0, &mut s).unwrap_err();
        assert!(matches!(err, SimError::AlreadyOnCooldown(7)));
    }

    #[test]
    fn test_modify_reschedules_or_frees() {
        let mut t = CooldownTable::new(ActorId::Player);
        let mut s = Scheduler::new();
        t.setcd(&cd(1, 1000), 0, 0, &mut s).unwrap();

        assert_eq!(t.modify(1, -400, &mut s).unwrap(), Some(600));
        assert_eq!(s.len(), 1);
        assert_eq!(s.peek_tick(), Some(600));

        assert_eq!(t.modify(1, -600, &mut s).unwrap(), None);
        assert!(!t.is_active(1));
        assert!(s.is_empty());
        assert_eq!(t.modify(1, 50, &mut s).unwrap(), None);
    }

    #[test]
    fn test_extension_replaces_pending_expiry() {
        let mut t = CooldownTable::new(ActorId::Player);
        let mut s = Scheduler::new();
        t.setcd(&cd(1, 1000), 0, 0, &mut s).unwrap();

        assert_eq!(t.modify(1, 500, &mut s).unwrap(), Some(1500));
        assert_eq!(s.len(), 1);
        assert!(!s.is_scheduled(1000, &SimEvent::CooldownReady { actor: ActorId::Player, id: 1 }));
        assert!(!t.expire(1, 1000));

        let (tick, _) = s.step().unwrap();
        assert_eq!(tick, 1500);
        assert!(t.expire(1, tick));
        assert!(s.is_empty());
    }

    #[test]
    fn test_expiry_and_max() {
        let mut t = CooldownTable::new(ActorId::Player);
        let mut s = Scheduler::new();
        t.setcd(&cd(1, 300), 0, 0, &mut s).unwrap();
        t.setcd(&cd(2, 900), 0, 0, &mut s).unwrap();
        assert_eq!(t.get_max_expiry(&[1, 2, 3]), 900);
        assert_eq!(t.get_max_expiry(&[3]), 0);
        assert_eq!(t.remaining(2, 100), 800);

        let (tick, event) = s.step().unwrap();
        assert_eq!(event, SimEvent::CooldownReady { actor: ActorId::Player, id: 1 });
        assert!(t.expire(1, tick));
        assert!(!t.is_active(1));
        assert!(t.clear(2, &mut s));
        assert!(s.is_empty());
    }
}
