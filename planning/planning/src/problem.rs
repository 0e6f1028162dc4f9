use crate::callbacks::SetOfCallbacks;
use crate::conditions::EvalCtx;
use crate::domain::Domain;
use crate::effects::{WhatChanged, WsModification};
use crate::errors::RuntimeError;
use crate::facts::{Bindings, Fact};
use crate::goal_stack::{GoalStack, LookForAnActionOutputInfos};
use crate::goals::Goal;
use crate::operators::{ActionId, ActionInvocationWithGoal};
use crate::time::Timestamp;
use crate::world_state::WorldState;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// Counts how many times each action has been executed. Used by the planner
/// to break ties in favor of less-used actions.
///
/// The synchronized flavor serializes its accessors behind an internal mutex
/// for callers sharing it across threads; the plain flavor leaves
/// synchronization to the owner.
#[derive(Debug)]
pub enum Historical {
    Plain(HashMap<ActionId, u32>),
    Synchronized(Mutex<HashMap<ActionId, u32>>),
}

impl Historical {
    pub fn new() -> Historical {
        Historical::Plain(HashMap::new())
    }

    pub fn synchronized() -> Historical {
        Historical::Synchronized(Mutex::new(HashMap::new()))
    }

    pub fn notify_action_done(&mut self, action_id: &str) {
        match self {
            Historical::Plain(counts) => {
                *counts.entry(action_id.to_string()).or_insert(0) += 1;
            }
            Historical::Synchronized(counts) => {
                let mut counts = counts.lock().expect("historical mutex poisoned");
                *counts.entry(action_id.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn count(&self, action_id: &str) -> u32 {
        match self {
            Historical::Plain(counts) => counts.get(action_id).copied().unwrap_or(0),
            Historical::Synchronized(counts) => counts
                .lock()
                .expect("historical mutex poisoned")
                .get(action_id)
                .copied()
                .unwrap_or(0),
        }
    }

    pub fn has_action_id(&self, action_id: &str) -> bool {
        self.count(action_id) > 0
    }
}

impl Default for Historical {
    fn default() -> Self {
        Historical::new()
    }
}

impl Clone for Historical {
    fn clone(&self) -> Self {
        match self {
            Historical::Plain(counts) => Historical::Plain(counts.clone()),
            Historical::Synchronized(counts) => {
                Historical::Synchronized(Mutex::new(counts.lock().expect("historical mutex poisoned").clone()))
            }
        }
    }
}

/// The dynamic side of a planning session: the world, the goals, the problem
/// objects, the execution history and the registered observers. References a
/// [`Domain`] without owning it.
#[derive(Debug)]
pub struct Problem {
    pub name: String,
    pub world_state: WorldState,
    pub goal_stack: GoalStack,
    pub entities: crate::ontology::SetOfEntities,
    pub historical: Historical,
    pub callbacks: SetOfCallbacks,
}

impl Problem {
    /// Builds an empty problem for a domain, seeding its timeless facts.
    pub fn new(domain: &Domain) -> Problem {
        Problem {
            name: String::new(),
            world_state: WorldState::with_timeless(domain.timeless().clone()),
            goal_stack: GoalStack::new(),
            entities: crate::ontology::SetOfEntities::new(),
            historical: Historical::new(),
            callbacks: SetOfCallbacks::new(),
        }
    }

    pub fn eval_ctx<'a>(&'a self, domain: &'a Domain) -> EvalCtx<'a> {
        EvalCtx::new(domain.ontology(), &self.entities)
    }

    /// Applies a world state modification, runs the domain events and
    /// dispatches observers. Returns whether something changed.
    pub fn modify_world(
        &mut self,
        wsm: &WsModification,
        domain: &Domain,
        now: Option<Timestamp>,
    ) -> Result<bool, RuntimeError> {
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let changed = self
            .world_state
            .modify(Some(wsm), domain.events(), &ctx, &Bindings::new())?;
        self.after_world_change(&changed, domain, now);
        Ok(changed.something_changed())
    }

    pub fn add_fact(&mut self, fact: Fact, domain: &Domain, now: Option<Timestamp>) -> Result<bool, RuntimeError> {
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let changed = self.world_state.add_fact(fact, domain.events(), &ctx)?;
        self.after_world_change(&changed, domain, now);
        Ok(changed.something_changed())
    }

    pub fn remove_fact(&mut self, fact: Fact, domain: &Domain, now: Option<Timestamp>) -> Result<bool, RuntimeError> {
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let changed = self.world_state.remove_fact(fact, domain.events(), &ctx)?;
        self.after_world_change(&changed, domain, now);
        Ok(changed.something_changed())
    }

    fn after_world_change(&mut self, changed: &WhatChanged, domain: &Domain, now: Option<Timestamp>) {
        if !changed.something_changed() {
            return;
        }
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        self.callbacks.notify(changed, &self.world_state, &ctx);
        let mut goals_changed = false;
        if !changed.goals_to_add.is_empty() {
            goals_changed |= self
                .goal_stack
                .add_goals(changed.goals_to_add.clone(), &self.world_state, &ctx, now);
        }
        // a changed world may activate or expire shadowed goals
        if changed.has_fact_modifications() {
            goals_changed |= self.goal_stack.notify_world_changed(&self.world_state, &ctx, now);
        }
        if goals_changed {
            self.callbacks.notify_goals_changed();
        }
    }

    pub fn add_goals(
        &mut self,
        goals: BTreeMap<i32, Vec<Goal>>,
        domain: &Domain,
        now: Option<Timestamp>,
    ) -> bool {
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let changed = self.goal_stack.add_goals(goals, &self.world_state, &ctx, now);
        if changed {
            self.callbacks.notify_goals_changed();
        }
        changed
    }

    pub fn set_goals_at(
        &mut self,
        goals: Vec<Goal>,
        priority: i32,
        domain: &Domain,
        now: Option<Timestamp>,
    ) -> bool {
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let changed = self
            .goal_stack
            .set_goals_at(goals, priority, &self.world_state, &ctx, now);
        if changed {
            self.callbacks.notify_goals_changed();
        }
        changed
    }

    /// Applies the at-start part of an action's effect.
    pub fn notify_action_started(
        &mut self,
        step: &ActionInvocationWithGoal,
        domain: &Domain,
        now: Option<Timestamp>,
    ) -> Result<bool, RuntimeError> {
        let Some(action) = domain.action(&step.action_invocation.action_id) else {
            return Ok(false);
        };
        let Some(at_start) = &action.effect.world_state_modification_at_start else {
            return Ok(false);
        };
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let bindings = step.action_invocation.bindings();
        let changed = self
            .world_state
            .modify(Some(at_start), domain.events(), &ctx, &bindings)?;
        self.after_world_change(&changed, domain, now);
        Ok(changed.something_changed())
    }

    /// Applies the action's main effect, updates the history and lets the
    /// goal stack react. The potential effect is never applied here.
    pub fn notify_action_done(
        &mut self,
        step: &ActionInvocationWithGoal,
        domain: &Domain,
        now: Option<Timestamp>,
        mut output: Option<&mut LookForAnActionOutputInfos>,
    ) -> Result<bool, RuntimeError> {
        let action_id = &step.action_invocation.action_id;
        let Some(action) = domain.action(action_id) else {
            return Ok(false);
        };
        debug!(action = %step.action_invocation, "notify action done");
        let ctx = EvalCtx::new(domain.ontology(), &self.entities);
        let bindings = step.action_invocation.bindings();
        let changed = self.world_state.modify(
            action.effect.world_state_modification.as_ref(),
            domain.events(),
            &ctx,
            &bindings,
        )?;
        self.callbacks.notify(&changed, &self.world_state, &ctx);
        self.historical.notify_action_done(action_id);
        let mut stack_changed = false;
        if !changed.goals_to_add.is_empty() {
            stack_changed |= self
                .goal_stack
                .add_goals(changed.goals_to_add.clone(), &self.world_state, &ctx, now);
        }
        stack_changed |= self.goal_stack.notify_action_done(
            step.from_goal.as_ref(),
            &action.effect.goals_to_add,
            &action.effect.goals_to_add_in_current_priority,
            &self.world_state,
            &ctx,
            now,
            output.as_deref_mut(),
        );
        if stack_changed {
            self.callbacks.notify_goals_changed();
        }
        Ok(changed.something_changed() || stack_changed)
    }
}

impl Clone for Problem {
    /// Observers are deliberately not carried over to the copy: planner
    /// simulations must not fire the embedder's callbacks.
    fn clone(&self) -> Self {
        Problem {
            name: self.name.clone(),
            world_state: self.world_state.clone(),
            goal_stack: self.goal_stack.clone(),
            entities: self.entities.clone(),
            historical: self.historical.clone(),
            callbacks: SetOfCallbacks::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Ontology, SetOfEntities, SetOfPredicates, SetOfTypes};

    fn domain() -> Domain {
        let types = SetOfTypes::new();
        let predicates = SetOfPredicates::from_str("fact_a\nfact_b", &types).unwrap();
        Domain::empty(Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        })
    }

    #[test]
    fn historical_counts_executions() {
        let mut historical = Historical::new();
        assert!(!historical.has_action_id("a"));
        historical.notify_action_done("a");
        historical.notify_action_done("a");
        assert_eq!(historical.count("a"), 2);

        let mut synchronized = Historical::synchronized();
        synchronized.notify_action_done("b");
        assert!(synchronized.has_action_id("b"));
        assert_eq!(synchronized.clone().count("b"), 1);
    }

    #[test]
    fn clone_drops_observers() {
        let domain = domain();
        let mut problem = Problem::new(&domain);
        problem.callbacks.add_on_facts_added(|_| {});
        let copy = problem.clone();
        assert_eq!(format!("{:?}", copy.callbacks), format!("{:?}", SetOfCallbacks::new()));
    }
}
