use crate::conditions::Condition;
use crate::domain::Domain;
use crate::errors::ParseError;
use crate::facts::{FactOptional, FactPattern};
use crate::ontology::{Ontology, SetOfEntities, SetOfTypes};
use crate::operators::ActionId;
use crate::time::Timestamp;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::ops::ControlFlow;
use std::time::Duration;
use uuid::Uuid;

pub const PERSIST_FUNCTION_NAME: &str = "persist";
pub const ONE_STEP_TOWARDS_FUNCTION_NAME: &str = "oneStepTowards";
pub const IMPLY_FUNCTION_NAME: &str = "imply";

/// An objective to pursue, with its lifecycle flags.
#[derive(Clone)]
pub struct Goal {
    objective: Condition,
    /// Re-stack the goal after it has been satisfied and removed.
    is_persistent: bool,
    /// Remove the goal as soon as any action attributable to it is done,
    /// even if the objective is still false.
    one_step_towards: bool,
    /// The goal is active only while this fact holds.
    condition: Option<FactOptional>,
    /// How long the goal may stay inactive before being dropped. `None`
    /// keeps it forever; a zero duration drops it as soon as it is skipped.
    max_inactive_duration: Option<Duration>,
    inactive_since: Option<Timestamp>,
    group_id: String,
    cache: GoalCache,
}

/// Per-goal slice of the succession cache, refreshed lazily when the domain
/// version changes.
#[derive(Clone, Default)]
struct GoalCache {
    domain_uuid: Option<Uuid>,
    actions_that_can_satisfy: BTreeSet<ActionId>,
    events_that_can_satisfy: BTreeSet<String>,
    action_predecessors: BTreeSet<ActionId>,
    event_predecessors: BTreeSet<String>,
}

impl Goal {
    pub fn new(objective: Condition) -> Goal {
        Goal {
            objective,
            is_persistent: false,
            one_step_towards: false,
            condition: None,
            max_inactive_duration: None,
            inactive_since: None,
            group_id: String::new(),
            cache: GoalCache::default(),
        }
    }

    pub fn persistent(mut self) -> Goal {
        self.is_persistent = true;
        self
    }

    pub fn one_step_towards(mut self) -> Goal {
        self.one_step_towards = true;
        self
    }

    pub fn with_condition(mut self, condition: FactOptional) -> Goal {
        self.condition = Some(condition);
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Goal {
        self.group_id = group_id.into();
        self
    }

    pub fn with_max_inactive_duration(mut self, duration: Option<Duration>) -> Goal {
        self.max_inactive_duration = duration;
        self
    }

    pub fn objective(&self) -> &Condition {
        &self.objective
    }

    pub fn is_persistent(&self) -> bool {
        self.is_persistent
    }

    pub fn is_one_step_towards(&self) -> bool {
        self.one_step_towards
    }

    pub fn condition(&self) -> Option<&FactOptional> {
        self.condition.as_ref()
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn max_inactive_duration(&self) -> Option<Duration> {
        self.max_inactive_duration
    }

    pub fn inactive_since(&self) -> Option<Timestamp> {
        self.inactive_since
    }

    pub fn set_inactive_since_if_not_set(&mut self, now: Option<Timestamp>) {
        if self.inactive_since.is_none() {
            self.inactive_since = now;
        }
    }

    pub fn notify_activity(&mut self) {
        self.inactive_since = None;
    }

    pub fn is_inactive_for_too_long(&self, now: Option<Timestamp>) -> bool {
        match self.max_inactive_duration {
            None => false,
            Some(max) if max.is_zero() => true,
            Some(max) => match (self.inactive_since, now) {
                (Some(since), Some(now)) => now.elapsed_since(since) > max,
                _ => false,
            },
        }
    }

    /// Parses `persist(...)`, `oneStepTowards(...)` and `imply(fact, ...)`
    /// wrappers around a condition.
    pub fn from_str(s: &str, ontology: &Ontology, entities: &SetOfEntities) -> Result<Goal, ParseError> {
        let mut s = s.trim();
        let mut is_persistent = false;
        let mut one_step = false;
        let mut condition = None;
        loop {
            if let Some(inner) = strip_call(s, PERSIST_FUNCTION_NAME) {
                is_persistent = true;
                s = inner;
            } else if let Some(inner) = strip_call(s, ONE_STEP_TOWARDS_FUNCTION_NAME) {
                one_step = true;
                s = inner;
            } else if let Some(inner) = strip_call(s, IMPLY_FUNCTION_NAME) {
                let (premise, rest) = split_first_arg(inner, s)?;
                let premise = premise.trim();
                let (negated, premise) = match premise.strip_prefix('!') {
                    Some(p) => (true, p),
                    None => (false, premise),
                };
                let pattern = FactPattern::from_str(premise, ontology, entities, &[])?;
                condition = Some(FactOptional { negated, pattern });
                s = rest;
            } else {
                break;
            }
            s = s.trim();
        }
        let objective = Condition::from_str(s, ontology, entities, &[])?;
        let mut goal = Goal::new(objective);
        goal.is_persistent = is_persistent;
        goal.one_step_towards = one_step;
        goal.condition = condition;
        Ok(goal)
    }

    // Succession cache
    // ----------------

    /// Refreshes the goal's operator caches when the domain changed since the
    /// last refresh.
    pub fn refresh_cache_if_needed(&mut self, domain: &Domain) {
        if self.cache.domain_uuid == Some(domain.uuid()) {
            return;
        }
        self.cache = GoalCache {
            domain_uuid: Some(domain.uuid()),
            ..Default::default()
        };

        let goal_literals = self.objective_literals();
        for (action_id, action) in domain.actions() {
            let mut can_satisfy = false;
            action.effect.for_each_effect_literal(&mut |opt| {
                let self_required = action
                    .precondition
                    .as_ref()
                    .map(|c| c.requires_opt_fact(opt))
                    .unwrap_or(false)
                    || action
                        .over_all_condition
                        .as_ref()
                        .map(|c| c.requires_opt_fact(opt))
                        .unwrap_or(false);
                if !self_required && literal_can_satisfy(opt, &goal_literals, &domain.ontology().types) {
                    can_satisfy = true;
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            });
            if can_satisfy {
                self.cache.actions_that_can_satisfy.insert(action_id.clone());
                self.cache.action_predecessors.insert(action_id.clone());
                let (actions, events) = domain.predecessors_of_action(action_id);
                self.cache.action_predecessors.extend(actions.iter().cloned());
                self.cache.event_predecessors.extend(events.iter().cloned());
            }
        }
        for (full_id, event) in domain.all_events() {
            let can_satisfy = event
                .effect_literals()
                .iter()
                .any(|opt| literal_can_satisfy(opt, &goal_literals, &domain.ontology().types));
            if can_satisfy {
                self.cache.events_that_can_satisfy.insert(full_id.clone());
                self.cache.event_predecessors.insert(full_id.clone());
                let (actions, events) = domain.predecessors_of_event(&full_id);
                self.cache.action_predecessors.extend(actions.iter().cloned());
                self.cache.event_predecessors.extend(events.iter().cloned());
            }
        }
    }

    /// The atomic literals of the objective.
    pub fn objective_literals(&self) -> Vec<FactOptional> {
        let mut res = Vec::new();
        let _ = self.objective.for_each_opt_fact(&mut |opt| {
            res.push(opt.clone());
            ControlFlow::Continue(())
        });
        res
    }

    pub fn can_action_satisfy(&self, action_id: &str) -> bool {
        self.cache.actions_that_can_satisfy.contains(action_id)
    }

    pub fn actions_that_can_satisfy(&self) -> &BTreeSet<ActionId> {
        &self.cache.actions_that_can_satisfy
    }

    pub fn action_predecessors(&self) -> &BTreeSet<ActionId> {
        &self.cache.action_predecessors
    }

    pub fn events_that_can_satisfy(&self) -> &BTreeSet<String> {
        &self.cache.events_that_can_satisfy
    }

    pub fn print_satisfying_operators(&self) -> String {
        let mut res = String::new();
        if !self.cache.actions_that_can_satisfy.is_empty() {
            res.push_str("actions:");
            let ids: Vec<&str> = self.cache.actions_that_can_satisfy.iter().map(String::as_str).collect();
            res.push(' ');
            res.push_str(&ids.join(", "));
        }
        if !self.cache.events_that_can_satisfy.is_empty() {
            if !res.is_empty() {
                res.push('\n');
            }
            res.push_str("events:");
            let ids: Vec<&str> = self.cache.events_that_can_satisfy.iter().map(String::as_str).collect();
            res.push(' ');
            res.push_str(&ids.join(", "));
        }
        res
    }
}

/// Can an effect literal contribute to satisfying one of the goal literals?
/// Polarities must agree, except that writing a fluent can also invalidate an
/// equation a negated goal literal is waiting to see gone.
fn literal_can_satisfy(effect: &FactOptional, goal_literals: &[FactOptional], types: &SetOfTypes) -> bool {
    goal_literals.iter().any(|g| {
        if g.negated == effect.negated && g.pattern.can_unify(&effect.pattern, types) {
            return true;
        }
        if g.negated != effect.negated && g.pattern.fluent.is_some() && effect.pattern.fluent.is_some() {
            let mut ignoring_value = g.pattern.clone();
            ignoring_value.fluent = Some(crate::facts::Term::Any);
            return ignoring_value.can_unify(&effect.pattern, types);
        }
        false
    })
}

fn strip_call<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(name)?;
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn split_first_arg<'a>(inner: &'a str, whole: &str) -> Result<(&'a str, &'a str), ParseError> {
    let mut depth = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Ok((&inner[..i], &inner[i + 1..])),
            _ => {}
        }
    }
    Err(ParseError::new("expected two comma-separated arguments", whole))
}

impl PartialEq for Goal {
    fn eq(&self, other: &Self) -> bool {
        self.objective == other.objective
            && self.is_persistent == other.is_persistent
            && self.one_step_towards == other.one_step_towards
            && self.condition == other.condition
            && self.max_inactive_duration == other.max_inactive_duration
            && self.group_id == other.group_id
    }
}
impl Eq for Goal {}

impl Display for Goal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut res = self.objective.to_string();
        if let Some(condition) = &self.condition {
            res = format!("{IMPLY_FUNCTION_NAME}({condition}, {res})");
        }
        if self.one_step_towards {
            res = format!("{ONE_STEP_TOWARDS_FUNCTION_NAME}({res})");
        }
        if self.is_persistent {
            res = format!("{PERSIST_FUNCTION_NAME}({res})");
        }
        write!(f, "{res}")
    }
}

impl Debug for Goal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{SetOfPredicates, SetOfTypes};

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::new();
        let predicates = SetOfPredicates::from_str("fact_a\nfact_b", &types).unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        (ontology, SetOfEntities::new())
    }

    #[test]
    fn round_trips_goal_wrappers() {
        let (ontology, entities) = setup();
        let goal = Goal::from_str("persist(imply(fact_a, fact_b))", &ontology, &entities).unwrap();
        assert!(goal.is_persistent());
        assert!(!goal.is_one_step_towards());
        assert!(goal.condition().is_some());
        assert_eq!(goal.to_string(), "persist(imply(fact_a, fact_b))");

        let goal = Goal::from_str("oneStepTowards(fact_b)", &ontology, &entities).unwrap();
        assert!(goal.is_one_step_towards());
        assert_eq!(goal.to_string(), "oneStepTowards(fact_b)");
    }

    #[test]
    fn inactivity_window() {
        let (ontology, entities) = setup();
        let mut goal = Goal::from_str("fact_a", &ontology, &entities)
            .unwrap()
            .with_max_inactive_duration(Some(Duration::from_secs(10)));
        let t0 = Timestamp::from_secs(100);
        assert!(!goal.is_inactive_for_too_long(Some(t0)));
        goal.set_inactive_since_if_not_set(Some(t0));
        assert!(!goal.is_inactive_for_too_long(Some(Timestamp::from_secs(105))));
        assert!(goal.is_inactive_for_too_long(Some(Timestamp::from_secs(111))));
        goal.notify_activity();
        assert!(!goal.is_inactive_for_too_long(Some(Timestamp::from_secs(120))));
    }
}
