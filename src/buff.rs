//! Per-actor timed buffs keyed by (id, level)
//!
//! The table owns timers and bookkeeping only. Modifier registration and hook
//! execution need the whole simulation, so hooks are handed back as data and
//! run by the caller in the order returned (reverse registration order).

use crate::actor::ActorId;
use crate::damage::DamageFigure;
use crate::data::{BuffKey, BuffRow};
use crate::error::{Result, SimError};
use crate::scheduler::{Scheduler, Tick};
use crate::simulation::SimEvent;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Keys that may lose a single stack on partial removal.
/// Every other stacked key must be removed whole.
pub const STACK_REMOVAL_ALLOW_LIST: [BuffKey; 3] = [
    BuffKey { id: 12850, level: 2 },
    BuffKey { id: 25716, level: 1 },
    BuffKey { id: 25716, level: 2 },
];

/// Hook run on every periodic tick
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveHook {
    CallDamage,
    Script(String),
}

/// Hook run once when the instance ends or is refreshed
#[derive(Debug, Clone, PartialEq)]
pub enum EndHook {
    RemoveAttribute { stat: String, value: i64 },
    Unapply(String),
    OnRemove(String),
    ForgetTrigger(u32),
    ForgetRecipe { id: u32, level: u32 },
    Script(String),
    ApplyBuff(BuffKey),
}

/// Source figure a DOT replays on each tick
#[derive(Debug, Clone)]
pub struct DotSource {
    pub caster: ActorId,
    pub figure: DamageFigure,
}

#[derive(Debug, Clone)]
pub struct BuffInstance {
    pub row: Arc<BuffRow>,
    pub caster: ActorId,
    pub remaining_count: u32,
    pub stacks: u32,
    pub interval: Tick,
    /// Tick of the pending periodic event
    pub timer: Option<Tick>,
    pub dot: Option<DotSource>,
    end_hooks: Vec<EndHook>,
    active_hooks: Vec<ActiveHook>,
}

impl BuffInstance {
    pub fn active_hooks(&self) -> &[ActiveHook] {
        &self.active_hooks
    }

    pub fn end_hooks(&self) -> &[EndHook] {
        &self.end_hooks
    }

    fn release(&mut self) -> Vec<EndHook> {
        self.active_hooks.clear();
        let mut hooks = std::mem::take(&mut self.end_hooks);
        hooks.reverse();
        hooks
    }
}

/// Periodic interval after haste, clamped to the row bounds
pub fn periodic_interval(row: &BuffRow, haste: i64) -> Tick {
    if row.interval <= 0 {
        return 0;
    }
    let hasted = row.interval * (1024 - haste) / 1024;
    hasted.clamp(row.min_interval, row.max_interval.max(row.min_interval))
}

#[derive(Debug, Clone)]
pub struct BuffTable {
    owner: ActorId,
    entries: BTreeMap<BuffKey, BuffInstance>,
}

impl BuffTable {
    pub fn new(owner: ActorId) -> Self {
        Self {
            owner,
            entries: BTreeMap::new(),
        }
    }

    fn tick_event(&self, key: BuffKey) -> SimEvent {
        SimEvent::BuffTick {
            actor: self.owner,
            key,
        }
    }

    /// Apply or refresh a buff and return the end hooks released by a refresh.
    ///
    /// Afterwards the instance has no hooks; the caller registers the row's
    /// modifiers again.
    pub fn apply(
        &mut self,
        row: Arc<BuffRow>,
        caster: ActorId,
        stacks: u32,
        haste: i64,
        duration: Option<Tick>,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<Vec<EndHook>> {
        let key = row.key();
        let interval = periodic_interval(&row, haste);
        let event = self.tick_event(key);
        let max_stack = row.max_stack.max(1);

        let first = duration.unwrap_or(interval);

        let Some(entry) = self.entries.get_mut(&key) else {
            let timer = if first > 0 {
                Some(sched.schedule(first, event)?)
            } else {
                None
            };
            debug!(actor = ?self.owner, buff = %key, interval, "buff applied");
            self.entries.insert(
                key,
                BuffInstance {
                    remaining_count: row.count,
                    stacks: stacks.clamp(1, max_stack),
                    interval,
                    timer,
                    caster,
                    dot: None,
                    end_hooks: Vec::new(),
                    active_hooks: Vec::new(),
                    row,
                },
            );
            return Ok(Vec::new());
        };

        if entry.row.is_over_time() {
            // Keep the running schedule, only top the count back up
            entry.remaining_count = entry.row.count;
            entry.interval = interval;
        } else {
            if let Some(t) = entry.timer.take() {
                sched.cancel(t, &event);
            }
            entry.remaining_count = entry.row.count;
            entry.interval = interval;
            if first > 0 {
                entry.timer = Some(sched.schedule(first, event)?);
            }
        }
        if entry.row.stackable {
            entry.stacks = (entry.stacks + stacks.max(1)).min(max_stack);
        }
        entry.caster = caster;
        debug!(actor = ?self.owner, buff = %key, stacks = entry.stacks, "buff refreshed");
        Ok(entry.release())
    }

    pub fn push_end_hook(&mut self, key: BuffKey, hook: EndHook) -> Result<()> {
        self.get_mut(key)?.end_hooks.push(hook);
        Ok(())
    }

    pub fn push_active_hook(&mut self, key: BuffKey, hook: ActiveHook) -> Result<()> {
        self.get_mut(key)?.active_hooks.push(hook);
        Ok(())
    }

    pub fn set_dot(&mut self, key: BuffKey, source: DotSource) -> Result<()> {
        self.get_mut(key)?.dot = Some(source);
        Ok(())
    }

    /// Active hooks for the periodic event fired at `fired_at`, or `None` when
    /// the event no longer belongs to a live instance.
    pub fn fire(&self, key: BuffKey, fired_at: Tick) -> Option<Vec<ActiveHook>> {
        let entry = self.entries.get(&key)?;
        if entry.timer != Some(fired_at) {
            trace!(buff = %key, fired_at, "stale buff tick");
            return None;
        }
        Some(entry.active_hooks.clone())
    }

    /// Count down after a periodic tick. Returns the end hooks when the
    /// instance expired.
    pub fn advance(
        &mut self,
        key: BuffKey,
        fired_at: Tick,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<Option<Vec<EndHook>>> {
        let event = self.tick_event(key);
        let Some(entry) = self.entries.get_mut(&key) else {
            return Ok(None);
        };
        if entry.timer != Some(fired_at) {
            // Refreshed or re-armed by one of its own hooks
            return Ok(None);
        }
        if entry.remaining_count <= 1 {
            let mut entry = self
                .entries
                .remove(&key)
                .ok_or(SimError::BuffNotActive { id: key.id, level: key.level })?;
            debug!(actor = ?self.owner, buff = %key, "buff expired");
            return Ok(Some(entry.release()));
        }
        entry.remaining_count -= 1;
        entry.timer = Some(sched.schedule(entry.interval, event)?);
        Ok(None)
    }

    /// Remove every instance of `id` (optionally only `level`).
    ///
    /// With `all = false` a stacked instance loses one stack instead, which is
    /// only allowed for [`STACK_REMOVAL_ALLOW_LIST`].
    pub fn remove(
        &mut self,
        id: u32,
        level: Option<u32>,
        all: bool,
        sched: &mut Scheduler<SimEvent>,
    ) -> Result<Vec<(BuffKey, Vec<EndHook>)>> {
        let keys: Vec<BuffKey> = self
            .entries
            .keys()
            .filter(|k| k.id == id && level.map_or(true, |l| k.level == l))
            .copied()
            .collect();

        let mut released = Vec::new();
        for key in keys {
            let event = self.tick_event(key);
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if !all && entry.stacks > 1 {
                if !STACK_REMOVAL_ALLOW_LIST.contains(&key) {
                    return Err(SimError::StackedDuplicate {
                        id: key.id,
                        level: key.level,
                    });
                }
                entry.stacks -= 1;
                continue;
            }
            if let Some(t) = entry.timer.take() {
                sched.cancel(t, &event);
            }
            if let Some(mut entry) = self.entries.remove(&key) {
                debug!(actor = ?self.owner, buff = %key, "buff removed");
                released.push((key, entry.release()));
            }
        }
        Ok(released)
    }

    pub fn is_active(&self, id: u32, level: Option<u32>) -> bool {
        match level {
            Some(level) => self.entries.contains_key(&BuffKey::new(id, level)),
            None => self.entries.keys().any(|k| k.id == id),
        }
    }

    pub fn get(&self, key: BuffKey) -> Option<&BuffInstance> {
        self.entries.get(&key)
    }

    fn get_mut(&mut self, key: BuffKey) -> Result<&mut BuffInstance> {
        self.entries.get_mut(&key).ok_or(SimError::BuffNotActive {
            id: key.id,
            level: key.level,
        })
    }

    pub fn stacks(&self, key: BuffKey) -> u32 {
        self.entries.get(&key).map_or(0, |e| e.stacks)
    }

    /// Ticks until the instance expires, `None` for a buff without a timer
    pub fn remaining_ticks(&self, key: BuffKey, now: Tick) -> Option<Tick> {
        let entry = self.entries.get(&key)?;
        let timer = entry.timer?;
        let later = entry.remaining_count.saturating_sub(1) as Tick * entry.interval;
        Some(timer - now + later)
    }

    /// Every live instance of `id`, across levels
    pub fn records(&self, id: u32) -> Vec<(BuffKey, &BuffInstance)> {
        self.entries
            .iter()
            .filter(|(k, _)| k.id == id)
            .map(|(k, v)| (*k, v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BuffKind;

    fn row(id: u32, level: u32, kind: BuffKind, stackable: bool) -> Arc<BuffRow> {
        Arc::new(BuffRow {
            id,
            level,
            name: String::new(),
            kind,
            interval: 1024,
            min_interval: 0,
            max_interval: Tick::MAX,
            count: 3,
            stackable,
            max_stack: 3,
            begin: vec![],
            active: vec![],
            end: vec![],
            on_remove: None,
        })
    }

    fn setup() -> (BuffTable, Scheduler<SimEvent>) {
        (BuffTable::new(ActorId::Target), Scheduler::new())
    }

    #[test]
    fn test_interval_haste_and_clamp() {
        let mut r = (*row(1, 1, BuffKind::Ordinary, false)).clone();
        assert_eq!(periodic_interval(&r, 256), 768);
        r.min_interval = 900;
        assert_eq!(periodic_interval(&r, 256), 900);
        r.interval = 0;
        assert_eq!(periodic_interval(&r, 256), 0);
    }

    #[test]
    fn test_apply_schedules_first_tick() {
        let (mut t, mut s) = setup();
        let released = t
            .apply(row(1, 1, BuffKind::Ordinary, false), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        assert!(released.is_empty());
        assert!(t.is_active(1, None));
        assert!(t.is_active(1, Some(1)));
        assert!(!t.is_active(1, Some(2)));
        assert_eq!(s.peek_tick(), Some(1024));
        assert_eq!(t.remaining_ticks(BuffKey::new(1, 1), 0), Some(3072));
    }

    #[test]
    fn test_refresh_ordinary_restarts_timer() {
        let (mut t, mut s) = setup();
        let key = BuffKey::new(1, 1);
        t.apply(row(1, 1, BuffKind::Ordinary, false), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        t.push_end_hook(key, EndHook::Script("a".into())).unwrap();
        t.push_end_hook(key, EndHook::Script("b".into())).unwrap();

        s.schedule(500, SimEvent::NextAction).unwrap();
        s.step();
        let released = t
            .apply(row(1, 1, BuffKind::Ordinary, false), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        assert_eq!(
            released,
            vec![EndHook::Script("b".into()), EndHook::Script("a".into())]
        );
        assert_eq!(s.len(), 1);
        assert_eq!(s.peek_tick(), Some(1524));
        assert_eq!(t.remaining_ticks(key, 500), Some(1024 + 2048));
    }

    #[test]
    fn test_refresh_dot_keeps_schedule() {
        let (mut t, mut s) = setup();
        let key = BuffKey::new(2, 1);
        t.apply(row(2, 1, BuffKind::Dot, false), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        let (tick, _) = s.step().unwrap();
        assert!(t.fire(key, tick).is_some());
        assert!(t.advance(key, tick, &mut s).unwrap().is_none());
        assert_eq!(t.get(key).unwrap().remaining_count, 2);

        t.apply(row(2, 1, BuffKind::Dot, false), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        assert_eq!(t.get(key).unwrap().remaining_count, 3);
        assert_eq!(s.len(), 1);
        assert_eq!(s.peek_tick(), Some(2048));
    }

    #[test]
    fn test_dot_refresh_remaining_ticks_follow_kept_timer() {
        let (mut t, mut s) = setup();
        let key = BuffKey::new(2, 1);
        t.apply(row(2, 1, BuffKind::Dot, true), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        let (tick, _) = s.step().unwrap();
        t.advance(key, tick, &mut s).unwrap();

        s.schedule(300, SimEvent::NextAction).unwrap();
        let (now, _) = s.step().unwrap();
        assert_eq!(now, 1324);
        t.apply(row(2, 1, BuffKind::Dot, true), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();

        assert_eq!(t.get(key).unwrap().timer, Some(2048));
        assert_eq!(t.stacks(key), 2);
        assert_eq!(t.remaining_ticks(key, now), Some(2048 - 1324 + 2 * 1024));
    }

    #[test]
    fn test_periodic_expiry() {
        let (mut t, mut s) = setup();
        let key = BuffKey::new(3, 1);
        t.apply(row(3, 1, BuffKind::Hot, false), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();
        t.push_end_hook(key, EndHook::ForgetTrigger(9)).unwrap();
        let mut expired = None;
        let mut ticks = 0;
        while let Some((tick, _)) = s.step() {
            ticks += 1;
            expired = t.advance(key, tick, &mut s).unwrap();
        }
        assert_eq!(ticks, 3);
        assert_eq!(expired, Some(vec![EndHook::ForgetTrigger(9)]));
        assert!(t.is_empty());
    }

    #[test]
    fn test_stacks_up_to_max() {
        let (mut t, mut s) = setup();
        let key = BuffKey::new(25716, 1);
        for expected in [1, 2, 3, 3] {
            t.apply(row(25716, 1, BuffKind::Ordinary, true), ActorId::Player, 1, 0, None, &mut s)
                .unwrap();
            assert_eq!(t.stacks(key), expected);
        }
    }

    #[test]
    fn test_stacked_refresh_outside_allow_list_restarts_timer() {
        let (mut t, mut s) = setup();
        let key = BuffKey::new(40, 1);
        t.apply(row(40, 1, BuffKind::Ordinary, true), ActorId::Player, 1, 0, None, &mut s)
            .unwrap();

        s.schedule(500, SimEvent::NextAction).unwrap();
        s.step();
        for expected in [2, 3, 3] {
            t.apply(row(40, 1, BuffKind::Ordinary, true), ActorId::Player, 1, 0, None, &mut s)
                .unwrap();
            assert_eq!(t.stacks(key), expected);
        }
        assert_eq!(s.len(), 1);
        assert_eq!(s.peek_tick(), Some(1524));
        assert_eq!(t.remaining_ticks(key, 500), Some(3072));

        let err = t.remove(40, Some(1), false, &mut s).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invariant);
        assert_eq!(t.stacks(key), 3);
    }

    #[test]
    fn test_partial_removal_allow_list() {
        let (mut t, mut s) = setup();
        for _ in 0..2 {
            t.apply(row(25716, 2, BuffKind::Ordinary, true), ActorId::Player, 1, 0, None, &mut s)
                .unwrap();
            t.apply(row(40, 1, BuffKind::Ordinary, true), ActorId::Player, 1, 0, None, &mut s)
                .unwrap();
        }

        assert!(t.remove(25716, Some(2), false, &mut s).unwrap().is_empty());
        assert_eq!(t.stacks(BuffKey::new(25716, 2)), 1);

        let err = t.remove(40, None, false, &mut s).unwrap_err();
        assert!(matches!(err, SimError::StackedDuplicate { id: 40, level: 1 }));

        let released = t.remove(40, None, true, &mut s).unwrap();
        assert_eq!(released.len(), 1);
        assert!(!t.is_active(40, None));
        assert_eq!(s.len(), 1);
    }
}
