use crate::conditions::{Condition, EvalCtx};
use crate::effects::WhatChanged;
use crate::facts::Fact;
use crate::goal_stack::GoalStack;
use crate::world_state::WorldState;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};

/// Handle to a registered callback.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct CallbackId(u32);

type FactsCallback = Box<dyn FnMut(&BTreeSet<Fact>)>;

struct ConditionToCallback {
    condition: Condition,
    was_true: bool,
    callback: Box<dyn FnMut()>,
}

/// Observer registry of a problem. Callbacks are invoked in registration
/// order with the net delta of each top-level world mutation; they must not
/// mutate the problem they observe.
#[derive(Default)]
pub struct SetOfCallbacks {
    next_id: u32,
    on_facts_changed: BTreeMap<CallbackId, FactsCallback>,
    on_facts_added: BTreeMap<CallbackId, FactsCallback>,
    on_facts_removed: BTreeMap<CallbackId, FactsCallback>,
    on_punctual_facts: BTreeMap<CallbackId, FactsCallback>,
    on_condition_became_true: BTreeMap<CallbackId, ConditionToCallback>,
    on_goals_changed: BTreeMap<CallbackId, Box<dyn FnMut()>>,
}

impl SetOfCallbacks {
    pub fn new() -> SetOfCallbacks {
        Default::default()
    }

    fn next(&mut self) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_on_facts_changed(&mut self, callback: impl FnMut(&BTreeSet<Fact>) + 'static) -> CallbackId {
        let id = self.next();
        self.on_facts_changed.insert(id, Box::new(callback));
        id
    }

    pub fn add_on_facts_added(&mut self, callback: impl FnMut(&BTreeSet<Fact>) + 'static) -> CallbackId {
        let id = self.next();
        self.on_facts_added.insert(id, Box::new(callback));
        id
    }

    pub fn add_on_facts_removed(&mut self, callback: impl FnMut(&BTreeSet<Fact>) + 'static) -> CallbackId {
        let id = self.next();
        self.on_facts_removed.insert(id, Box::new(callback));
        id
    }

    pub fn add_on_punctual_facts(&mut self, callback: impl FnMut(&BTreeSet<Fact>) + 'static) -> CallbackId {
        let id = self.next();
        self.on_punctual_facts.insert(id, Box::new(callback));
        id
    }

    /// Fires when `condition` transitions from false to true across a world
    /// mutation. The initial truth value is sampled at registration.
    pub fn add_on_condition_became_true(
        &mut self,
        condition: Condition,
        world: &WorldState,
        ctx: &EvalCtx,
        callback: impl FnMut() + 'static,
    ) -> CallbackId {
        let id = self.next();
        let was_true = world.holds(&condition, ctx);
        self.on_condition_became_true.insert(
            id,
            ConditionToCallback {
                condition,
                was_true,
                callback: Box::new(callback),
            },
        );
        id
    }

    pub fn add_on_goals_changed(&mut self, callback: impl FnMut() + 'static) -> CallbackId {
        let id = self.next();
        self.on_goals_changed.insert(id, Box::new(callback));
        id
    }

    pub fn remove(&mut self, id: CallbackId) -> bool {
        self.on_facts_changed.remove(&id).is_some()
            || self.on_facts_added.remove(&id).is_some()
            || self.on_facts_removed.remove(&id).is_some()
            || self.on_punctual_facts.remove(&id).is_some()
            || self.on_condition_became_true.remove(&id).is_some()
            || self.on_goals_changed.remove(&id).is_some()
    }

    /// Dispatched by the problem after any mutation of its goal stack.
    pub fn notify_goals_changed(&mut self) {
        for callback in self.on_goals_changed.values_mut() {
            callback();
        }
    }

    /// Dispatches one world delta: once per top-level modification, with the
    /// net changes.
    pub fn notify(&mut self, changed: &WhatChanged, world: &WorldState, ctx: &EvalCtx) {
        if !changed.punctual.is_empty() {
            for callback in self.on_punctual_facts.values_mut() {
                callback(&changed.punctual);
            }
        }
        if !changed.added.is_empty() {
            for callback in self.on_facts_added.values_mut() {
                callback(&changed.added);
            }
        }
        if !changed.removed.is_empty() {
            for callback in self.on_facts_removed.values_mut() {
                callback(&changed.removed);
            }
        }
        if changed.has_fact_modifications() {
            let mut all: BTreeSet<Fact> = changed.added.clone();
            all.extend(changed.removed.iter().cloned());
            for callback in self.on_facts_changed.values_mut() {
                callback(&all);
            }
            for entry in self.on_condition_became_true.values_mut() {
                let is_true = world.holds(&entry.condition, ctx);
                if is_true && !entry.was_true {
                    (entry.callback)();
                }
                entry.was_true = is_true;
            }
        }
    }
}

impl Debug for SetOfCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SetOfCallbacks(changed: {}, added: {}, removed: {}, punctual: {}, conditions: {}, goals: {})",
            self.on_facts_changed.len(),
            self.on_facts_added.len(),
            self.on_facts_removed.len(),
            self.on_punctual_facts.len(),
            self.on_condition_became_true.len(),
            self.on_goals_changed.len(),
        )
    }
}

/// Diff-based observer of fact additions, for clients that poll instead of
/// registering closures.
#[derive(Clone, Default)]
pub struct FactsChangedTracker {
    known: BTreeSet<Fact>,
}

impl FactsChangedTracker {
    pub fn new(world: &WorldState) -> FactsChangedTracker {
        FactsChangedTracker {
            known: world.facts().facts(),
        }
    }

    /// Facts added and removed since the previous call.
    pub fn update(&mut self, world: &WorldState) -> (BTreeSet<Fact>, BTreeSet<Fact>) {
        let current = world.facts().facts();
        let added: BTreeSet<Fact> = current.difference(&self.known).cloned().collect();
        let removed: BTreeSet<Fact> = self.known.difference(&current).cloned().collect();
        self.known = current;
        (added, removed)
    }
}

/// Diff-based observer of goal removals.
#[derive(Clone, Default)]
pub struct GoalsRemovedTracker {
    known: BTreeSet<String>,
}

impl GoalsRemovedTracker {
    pub fn new(goal_stack: &GoalStack) -> GoalsRemovedTracker {
        GoalsRemovedTracker {
            known: goal_texts(goal_stack),
        }
    }

    /// Goals no longer in the stack since the previous call.
    pub fn update(&mut self, goal_stack: &GoalStack) -> BTreeSet<String> {
        let current = goal_texts(goal_stack);
        let removed: BTreeSet<String> = self.known.difference(&current).cloned().collect();
        self.known = current;
        removed
    }
}

fn goal_texts(goal_stack: &GoalStack) -> BTreeSet<String> {
    goal_stack
        .goals()
        .values()
        .flat_map(|tier| tier.iter().map(|g| g.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Ontology, SetOfEntities, SetOfPredicates, SetOfTypes};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::new();
        let predicates = SetOfPredicates::from_str("fact_a\nfact_b", &types).unwrap();
        (
            Ontology {
                types,
                predicates,
                constants: SetOfEntities::new(),
            },
            SetOfEntities::new(),
        )
    }

    #[test]
    fn condition_callback_fires_on_transition_only() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let mut world = WorldState::new();
        let mut callbacks = SetOfCallbacks::new();
        let hits = Rc::new(RefCell::new(0));
        let hits_in_cb = hits.clone();
        let condition = Condition::from_str("fact_a", &ontology, &entities, &[]).unwrap();
        callbacks.add_on_condition_became_true(condition, &world, &ctx, move || {
            *hits_in_cb.borrow_mut() += 1;
        });

        let fact_a = crate::facts::Fact::from_str("fact_a", &ontology, &entities).unwrap();
        let changed = world.add_fact(fact_a.clone(), &BTreeMap::new(), &ctx).unwrap();
        callbacks.notify(&changed, &world, &ctx);
        assert_eq!(*hits.borrow(), 1);

        // already true: no second firing
        let fact_b = crate::facts::Fact::from_str("fact_b", &ontology, &entities).unwrap();
        let changed = world.add_fact(fact_b, &BTreeMap::new(), &ctx).unwrap();
        callbacks.notify(&changed, &world, &ctx);
        assert_eq!(*hits.borrow(), 1);

        // false then true again: fires again
        let changed = world.remove_fact(fact_a.clone(), &BTreeMap::new(), &ctx).unwrap();
        callbacks.notify(&changed, &world, &ctx);
        let changed = world.add_fact(fact_a, &BTreeMap::new(), &ctx).unwrap();
        callbacks.notify(&changed, &world, &ctx);
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    fn facts_tracker_diffs_world_states() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let mut world = WorldState::new();
        let mut tracker = FactsChangedTracker::new(&world);
        let fact_a = crate::facts::Fact::from_str("fact_a", &ontology, &entities).unwrap();
        world.add_fact(fact_a.clone(), &BTreeMap::new(), &ctx).unwrap();
        let (added, removed) = tracker.update(&world);
        assert_eq!(added.len(), 1);
        assert!(removed.is_empty());
        let (added, _) = tracker.update(&world);
        assert!(added.is_empty());
    }
}
