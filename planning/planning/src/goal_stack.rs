use crate::conditions::EvalCtx;
use crate::goals::Goal;
use crate::time::Timestamp;
use crate::world_state::WorldState;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// Priority given to goals stacked without an explicit one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// How a planning step ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlannerStepType {
    InProgress,
    FinishedOnSuccess,
    FinishedOnFailure,
}

/// Summary of a plan-step resolution: how it ended and how many goals were
/// seen satisfied or abandoned along the way.
pub struct LookForAnActionOutputInfos {
    step_type: PlannerStepType,
    satisfied_goals: usize,
    not_satisfied_goals: usize,
}

impl LookForAnActionOutputInfos {
    pub fn new() -> Self {
        LookForAnActionOutputInfos {
            step_type: PlannerStepType::FinishedOnSuccess,
            satisfied_goals: 0,
            not_satisfied_goals: 0,
        }
    }

    pub fn set_type(&mut self, step_type: PlannerStepType) {
        self.step_type = step_type;
    }

    pub fn step_type(&self) -> PlannerStepType {
        self.step_type
    }

    pub fn notify_satisfied_goal(&mut self) {
        self.satisfied_goals += 1;
        if self.step_type != PlannerStepType::FinishedOnFailure {
            self.step_type = PlannerStepType::FinishedOnSuccess;
        }
    }

    pub fn notify_not_satisfied_goal(&mut self) {
        self.not_satisfied_goals += 1;
        self.step_type = PlannerStepType::FinishedOnFailure;
    }

    pub fn satisfied_goal_count(&self) -> usize {
        self.satisfied_goals
    }

    pub fn not_satisfied_goal_count(&self) -> usize {
        self.not_satisfied_goals
    }
}

impl Default for LookForAnActionOutputInfos {
    fn default() -> Self {
        Self::new()
    }
}

/// The goals to satisfy, grouped in priority tiers. Higher priorities are
/// served first; within a tier the front goal is the current one.
#[derive(Clone, Default)]
pub struct GoalStack {
    goals: BTreeMap<i32, Vec<Goal>>,
    /// The goal currently pursued, tracked by value and re-resolved after
    /// every mutation.
    current_goal: Option<Goal>,
}

impl GoalStack {
    pub fn new() -> GoalStack {
        Default::default()
    }

    pub fn goals(&self) -> &BTreeMap<i32, Vec<Goal>> {
        &self.goals
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// The front goal of the highest non-empty tier.
    pub fn top_goal(&self) -> Option<(&Goal, i32)> {
        self.goals
            .iter()
            .rev()
            .find_map(|(priority, tier)| tier.first().map(|g| (g, *priority)))
    }

    /// Map of priority to goals not yet satisfied.
    pub fn not_satisfied_goals(&self, world: &WorldState, ctx: &EvalCtx) -> BTreeMap<i32, Vec<Goal>> {
        let mut res = BTreeMap::new();
        for (&priority, tier) in &self.goals {
            let pending: Vec<Goal> = tier
                .iter()
                .filter(|g| !world.is_goal_satisfied(g, ctx))
                .cloned()
                .collect();
            if !pending.is_empty() {
                res.insert(priority, pending);
            }
        }
        res
    }

    pub fn set_goals(
        &mut self,
        goals: BTreeMap<i32, Vec<Goal>>,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) -> bool {
        if self.goals == goals {
            return false;
        }
        self.current_goal = None;
        self.goals = goals;
        self.remove_inactive_goals(world, ctx, now);
        true
    }

    pub fn set_goals_at(
        &mut self,
        goals: Vec<Goal>,
        priority: i32,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) -> bool {
        self.set_goals(BTreeMap::from([(priority, goals)]), world, ctx, now)
    }

    /// Adds goals in front of their tiers.
    pub fn add_goals(
        &mut self,
        goals: BTreeMap<i32, Vec<Goal>>,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) -> bool {
        if goals.is_empty() {
            return false;
        }
        let mut changed = false;
        for (priority, mut new_goals) in goals {
            if new_goals.is_empty() {
                continue;
            }
            let tier = self.goals.entry(priority).or_default();
            new_goals.append(tier);
            *tier = new_goals;
            changed = true;
        }
        self.remove_inactive_goals(world, ctx, now) || changed
    }

    pub fn add_goals_at(
        &mut self,
        goals: Vec<Goal>,
        priority: i32,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) -> bool {
        self.add_goals(BTreeMap::from([(priority, goals)]), world, ctx, now)
    }

    pub fn push_front_goal(
        &mut self,
        goal: Goal,
        priority: i32,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) {
        self.goals.entry(priority).or_default().insert(0, goal);
        self.remove_inactive_goals(world, ctx, now);
    }

    pub fn push_back_goal(
        &mut self,
        goal: Goal,
        priority: i32,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) {
        self.goals.entry(priority).or_default().push(goal);
        self.remove_inactive_goals(world, ctx, now);
    }

    /// Moves the goal printed as `goal_text` to another priority tier.
    pub fn change_goal_priority(
        &mut self,
        goal_text: &str,
        priority: i32,
        push_front: bool,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
    ) -> bool {
        let mut moved: Option<Goal> = None;
        for tier in self.goals.values_mut() {
            if let Some(pos) = tier.iter().position(|g| g.to_string() == goal_text) {
                moved = Some(tier.remove(pos));
                break;
            }
        }
        self.goals.retain(|_, tier| !tier.is_empty());
        match moved {
            None => false,
            Some(goal) => {
                let tier = self.goals.entry(priority).or_default();
                if push_front {
                    tier.insert(0, goal);
                } else {
                    tier.push(goal);
                }
                self.remove_inactive_goals(world, ctx, now);
                true
            }
        }
    }

    pub fn clear_goals(&mut self) -> bool {
        self.current_goal = None;
        if self.goals.is_empty() {
            return false;
        }
        self.goals.clear();
        true
    }

    /// Removes every goal carrying the given group id.
    pub fn remove_goals(&mut self, group_id: &str) -> bool {
        let mut changed = false;
        for tier in self.goals.values_mut() {
            let before = tier.len();
            tier.retain(|g| g.group_id() != group_id);
            changed |= tier.len() != before;
        }
        self.goals.retain(|_, tier| !tier.is_empty());
        if changed {
            self.current_goal = None;
        }
        changed
    }

    /// Walks the stack from the most important goal down, removing satisfied
    /// non-persistent goals and goals inactive for too long. `manage` is
    /// called on each unsatisfied goal; returning `true` means "this is the
    /// goal being pursued" and stops the walk.
    pub fn iterate_and_remove_non_persistent(
        &mut self,
        mut manage: impl FnMut(&mut Goal, i32) -> bool,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
        mut output: Option<&mut LookForAnActionOutputInfos>,
    ) -> bool {
        let mut changed = false;
        if let Some(out) = output.as_deref_mut() {
            out.set_type(PlannerStepType::FinishedOnSuccess);
        }
        let mut in_active_region = true;
        let priorities: Vec<i32> = self.goals.keys().rev().copied().collect();
        for priority in priorities {
            let mut index = 0;
            loop {
                let Some(tier) = self.goals.get_mut(&priority) else { break };
                if index >= tier.len() {
                    break;
                }
                if !in_active_region && tier[index].is_inactive_for_too_long(now) {
                    tier.remove(index);
                    changed = true;
                    continue;
                }
                let snapshot = tier[index].clone();
                let satisfied = world.is_goal_satisfied(&snapshot, ctx);

                if !satisfied {
                    self.current_goal = Some(snapshot);
                    let tier = self.goals.get_mut(&priority).unwrap();
                    if manage(&mut tier[index], priority) {
                        if let Some(out) = output.as_deref_mut() {
                            out.set_type(PlannerStepType::InProgress);
                        }
                        return changed;
                    }
                    in_active_region = false;
                    if let Some(out) = output.as_deref_mut() {
                        out.notify_not_satisfied_goal();
                    }
                } else {
                    if let Some(out) = output.as_deref_mut() {
                        out.notify_satisfied_goal();
                    }
                    if self.current_goal.as_ref() == Some(&snapshot) {
                        in_active_region = false;
                    }
                }

                let tier = self.goals.get_mut(&priority).unwrap();
                if tier[index].is_persistent() {
                    tier[index].set_inactive_since_if_not_set(now);
                    index += 1;
                } else {
                    tier.remove(index);
                    changed = true;
                }
            }
            if self.goals.get(&priority).is_some_and(|t| t.is_empty()) {
                self.goals.remove(&priority);
            }
        }
        if !in_active_region {
            self.current_goal = None;
        }
        changed
    }

    /// Pops the already-satisfied non-persistent goals from the front of the
    /// stack, stopping at the first unsatisfied one.
    pub fn remove_first_goals_that_are_already_satisfied(
        &mut self,
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
        output: Option<&mut LookForAnActionOutputInfos>,
    ) -> bool {
        self.iterate_and_remove_non_persistent(|_, _| true, world, ctx, now, output)
    }

    /// Updates the stack after an action completed.
    #[allow(clippy::too_many_arguments)]
    pub fn notify_action_done(
        &mut self,
        from_goal: Option<&Goal>,
        goals_to_add: &BTreeMap<i32, Vec<Goal>>,
        goals_to_add_in_current_priority: &[Goal],
        world: &WorldState,
        ctx: &EvalCtx,
        now: Option<Timestamp>,
        mut output: Option<&mut LookForAnActionOutputInfos>,
    ) -> bool {
        let current_priority = self.current_priority(world, ctx);
        let mut changed = match from_goal {
            Some(done) if done.is_one_step_towards() => {
                // any action attributable to a one-step-towards goal retires it
                self.iterate_and_remove_non_persistent(
                    |g, _| g != done,
                    world,
                    ctx,
                    now,
                    output.as_deref_mut(),
                )
            }
            _ => self.remove_first_goals_that_are_already_satisfied(world, ctx, now, output.as_deref_mut()),
        };
        if !goals_to_add.is_empty() {
            changed |= self.add_goals(goals_to_add.clone(), world, ctx, now);
        }
        if !goals_to_add_in_current_priority.is_empty() {
            changed |= self.add_goals_at(
                goals_to_add_in_current_priority.to_vec(),
                current_priority,
                world,
                ctx,
                now,
            );
        }
        changed
    }

    /// Refreshes the stack after a world mutation: the newly active goal gets
    /// its activity reset and expired shadowed goals are dropped.
    pub fn notify_world_changed(&mut self, world: &WorldState, ctx: &EvalCtx, now: Option<Timestamp>) -> bool {
        self.remove_inactive_goals(world, ctx, now)
    }

    /// Priority of the tier currently being served.
    pub fn current_priority(&self, world: &WorldState, ctx: &EvalCtx) -> i32 {
        for (&priority, tier) in self.goals.iter().rev() {
            for goal in tier {
                if !goal.is_persistent() || !world.is_goal_satisfied(goal, ctx) {
                    return priority;
                }
            }
        }
        0
    }

    /// Drops skipped goals whose inactivity window has elapsed. The first
    /// unsatisfied goal is the active one and gets its activity refreshed.
    fn remove_inactive_goals(&mut self, world: &WorldState, ctx: &EvalCtx, now: Option<Timestamp>) -> bool {
        let mut changed = false;
        let mut in_active_region = true;
        let priorities: Vec<i32> = self.goals.keys().rev().copied().collect();
        for priority in priorities {
            let Some(tier) = self.goals.get_mut(&priority) else { continue };
            let mut index = 0;
            while index < tier.len() {
                let goal = &mut tier[index];
                let satisfied = world.is_goal_satisfied(goal, ctx);
                if in_active_region && !satisfied {
                    goal.notify_activity();
                    self.current_goal = Some(goal.clone());
                    in_active_region = false;
                    index += 1;
                    continue;
                }
                if !in_active_region {
                    goal.set_inactive_since_if_not_set(now);
                }
                if !satisfied && goal.is_inactive_for_too_long(now) {
                    tier.remove(index);
                    changed = true;
                } else {
                    index += 1;
                }
            }
            if self.goals.get(&priority).is_some_and(|t| t.is_empty()) {
                self.goals.remove(&priority);
            }
        }
        changed
    }
}

impl Debug for GoalStack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (priority, tier) in self.goals.iter().rev() {
            map.entry(priority, tier);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Fact;
    use crate::ontology::{Ontology, SetOfEntities, SetOfPredicates, SetOfTypes};

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::new();
        let predicates = SetOfPredicates::from_str("fact_a\nfact_b\nfact_c", &types).unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        (ontology, SetOfEntities::new())
    }

    fn goal(s: &str, ontology: &Ontology, entities: &SetOfEntities) -> Goal {
        Goal::from_str(s, ontology, entities).unwrap()
    }

    #[test]
    fn top_goal_is_in_highest_tier() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let world = WorldState::new();
        let mut stack = GoalStack::new();
        stack.add_goals_at(vec![goal("fact_a", &ontology, &entities)], 10, &world, &ctx, None);
        stack.add_goals_at(vec![goal("fact_b", &ontology, &entities)], 20, &world, &ctx, None);
        let (top, priority) = stack.top_goal().unwrap();
        assert_eq!(priority, 20);
        assert_eq!(top.to_string(), "fact_b");
    }

    #[test]
    fn satisfied_non_persistent_goals_are_popped() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let mut world = WorldState::new();
        world
            .add_fact(
                Fact::from_str("fact_a", &ontology, &entities).unwrap(),
                &BTreeMap::new(),
                &ctx,
            )
            .unwrap();
        let mut stack = GoalStack::new();
        stack.set_goals_at(
            vec![goal("fact_a", &ontology, &entities), goal("fact_b", &ontology, &entities)],
            10,
            &world,
            &ctx,
            None,
        );
        let mut output = LookForAnActionOutputInfos::new();
        stack.remove_first_goals_that_are_already_satisfied(&world, &ctx, None, Some(&mut output));
        assert_eq!(output.satisfied_goal_count(), 1);
        let (top, _) = stack.top_goal().unwrap();
        assert_eq!(top.to_string(), "fact_b");
    }

    #[test]
    fn persistent_goal_survives_satisfaction_sweep() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let mut world = WorldState::new();
        world
            .add_fact(
                Fact::from_str("fact_a", &ontology, &entities).unwrap(),
                &BTreeMap::new(),
                &ctx,
            )
            .unwrap();
        let mut stack = GoalStack::new();
        stack.set_goals_at(vec![goal("persist(fact_a)", &ontology, &entities)], 10, &world, &ctx, None);
        stack.remove_first_goals_that_are_already_satisfied(&world, &ctx, None, None);
        assert!(stack.top_goal().is_some());
    }

    #[test]
    fn inactive_goal_is_dropped_after_its_window() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let world = WorldState::new();
        let mut stack = GoalStack::new();
        let t0 = Timestamp::from_secs(0);
        // the lower-priority goal is shadowed and expires after 5 seconds
        stack.add_goals_at(
            vec![goal("fact_b", &ontology, &entities)
                .with_max_inactive_duration(Some(std::time::Duration::from_secs(5)))],
            5,
            &world,
            &ctx,
            Some(t0),
        );
        stack.add_goals_at(vec![goal("fact_a", &ontology, &entities)], 10, &world, &ctx, Some(t0));
        assert_eq!(stack.goals().len(), 2);
        // after the window has elapsed, any stack refresh drops it
        let later = Timestamp::from_secs(10);
        stack.add_goals_at(vec![], 10, &world, &ctx, Some(later));
        stack.remove_first_goals_that_are_already_satisfied(&world, &ctx, Some(later), None);
        assert_eq!(stack.goals().len(), 1);
        assert_eq!(stack.top_goal().unwrap().0.to_string(), "fact_a");
    }

    #[test]
    fn remove_goals_by_group_id() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let world = WorldState::new();
        let mut stack = GoalStack::new();
        stack.add_goals_at(
            vec![
                goal("fact_a", &ontology, &entities).with_group_id("grp"),
                goal("fact_b", &ontology, &entities),
            ],
            10,
            &world,
            &ctx,
            None,
        );
        assert!(stack.remove_goals("grp"));
        assert_eq!(stack.goals()[&10].len(), 1);
        assert_eq!(stack.top_goal().unwrap().0.to_string(), "fact_b");
    }
}
