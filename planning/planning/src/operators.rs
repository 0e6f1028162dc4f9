use crate::conditions::{Condition, Expr};
use crate::effects::WsModification;
use crate::errors::ParseError;
use crate::facts::{Bindings, FactOptional, FactPattern};
use crate::goals::Goal;
use crate::ontology::{Entity, Ontology, Parameter, SetOfEntities};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::ops::ControlFlow;
use stratum_utils::disp_iter;

pub type ActionId = String;
pub type EventSetId = String;
pub type EventId = String;

/// Identifier of an event across sets: `set_id|event_id`.
pub fn full_event_id(set_id: &str, event_id: &str) -> String {
    format!("{set_id}|{event_id}")
}

/// Everything applying a deduction may change in a problem: the world state,
/// now or at action start, and the goal stack.
#[derive(Clone, Default)]
pub struct ProblemModification {
    /// Applied to the world when the action completes.
    pub world_state_modification: Option<WsModification>,
    /// Considered during search but never applied on notification: effects
    /// expected to happen indirectly.
    pub potential_world_state_modification: Option<WsModification>,
    /// Applied when the action starts.
    pub world_state_modification_at_start: Option<WsModification>,
    pub goals_to_add: BTreeMap<i32, Vec<Goal>>,
    pub goals_to_add_in_current_priority: Vec<Goal>,
}

impl ProblemModification {
    pub fn new(wsm: WsModification) -> ProblemModification {
        ProblemModification {
            world_state_modification: Some(wsm),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.world_state_modification.is_none()
            && self.potential_world_state_modification.is_none()
            && self.world_state_modification_at_start.is_none()
            && self.goals_to_add.is_empty()
            && self.goals_to_add_in_current_priority.is_empty()
    }

    /// Visits the literals of the main and potential modifications: the ones
    /// the planner may rely on to satisfy an objective.
    pub fn for_each_effect_literal(&self, f: &mut impl FnMut(&FactOptional) -> ControlFlow<()>) {
        for wsm in [&self.world_state_modification, &self.potential_world_state_modification]
            .into_iter()
            .flatten()
        {
            if wsm.for_each_modified_fact(f).is_break() {
                return;
            }
        }
    }
}

/// A named operator the agent can decide to execute.
#[derive(Clone, Default)]
pub struct Action {
    pub parameters: Vec<Parameter>,
    pub precondition: Option<Condition>,
    /// Must hold during the whole execution; checked like the precondition
    /// during search and by the parallelizer.
    pub over_all_condition: Option<Condition>,
    pub effect: ProblemModification,
    /// Execution time, defaulting to 1 when absent or unresolvable.
    pub duration: Option<Expr>,
    /// Among candidates of equal rank, prefer this action while the context
    /// condition holds.
    pub prefer_in_context: Option<Condition>,
    /// Rank this action first within its goal tier, ignoring the history.
    pub should_be_done_asap_without_history_check: bool,
}

impl Action {
    pub fn new(precondition: Option<Condition>, effect: WsModification) -> Action {
        Action {
            precondition,
            effect: ProblemModification::new(effect),
            ..Default::default()
        }
    }

    /// The literals this action can add or remove, skipping the ones its own
    /// precondition already requires (those cannot change).
    pub fn effect_literals(&self) -> Vec<FactOptional> {
        let mut res = Vec::new();
        self.effect.for_each_effect_literal(&mut |opt| {
            let self_required = self
                .precondition
                .as_ref()
                .map(|c| c.requires_opt_fact(opt))
                .unwrap_or(false)
                || self
                    .over_all_condition
                    .as_ref()
                    .map(|c| c.requires_opt_fact(opt))
                    .unwrap_or(false);
            if !self_required {
                res.push(opt.clone());
            }
            ControlFlow::Continue(())
        });
        res
    }

    /// The literals a successor's precondition would be checked against,
    /// i.e. every literal of the precondition and over-all condition.
    pub fn precondition_literals(&self) -> Vec<FactOptional> {
        let mut res = Vec::new();
        for cond in [&self.precondition, &self.over_all_condition].into_iter().flatten() {
            let _ = cond.for_each_opt_fact(&mut |opt| {
                res.push(opt.clone());
                ControlFlow::Continue(())
            });
        }
        res
    }
}

impl Debug for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "action(")?;
        disp_iter(f, &self.parameters, ", ")?;
        write!(f, ")")
    }
}

/// An operator fired automatically, to a fixed point, whenever a world
/// mutation makes its precondition true.
#[derive(Debug, Clone)]
pub struct Event {
    pub parameters: Vec<Parameter>,
    pub precondition: Condition,
    pub facts_to_modify: Option<WsModification>,
    pub goals_to_add: BTreeMap<i32, Vec<Goal>>,
}

impl Event {
    pub fn new(precondition: Condition, facts_to_modify: WsModification) -> Event {
        Event {
            parameters: Vec::new(),
            precondition,
            facts_to_modify: Some(facts_to_modify),
            goals_to_add: BTreeMap::new(),
        }
    }

    pub fn effect_literals(&self) -> Vec<FactOptional> {
        let mut res = Vec::new();
        if let Some(wsm) = &self.facts_to_modify {
            let _ = wsm.for_each_modified_fact(&mut |opt| {
                if !self.precondition.requires_opt_fact(opt) {
                    res.push(opt.clone());
                }
                ControlFlow::Continue(())
            });
        }
        res
    }

    pub fn precondition_literals(&self) -> Vec<FactOptional> {
        let mut res = Vec::new();
        let _ = self.precondition.for_each_opt_fact(&mut |opt| {
            res.push(opt.clone());
            ControlFlow::Continue(())
        });
        res
    }
}

/// A named group of events, dispatched in id order.
#[derive(Clone, Debug, Default)]
pub struct SetOfEvents {
    events: BTreeMap<EventId, Event>,
}

impl SetOfEvents {
    pub fn new() -> SetOfEvents {
        Default::default()
    }

    pub fn add(&mut self, event: Event) -> EventId {
        let id = format!("event_{}", self.events.len());
        self.events.insert(id.clone(), event);
        id
    }

    pub fn add_with_id(&mut self, id: impl Into<EventId>, event: Event) -> Option<EventId> {
        let id = id.into();
        if self.events.contains_key(&id) {
            return None;
        }
        self.events.insert(id.clone(), event);
        Some(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Event> {
        self.events.remove(id)
    }

    pub fn events(&self) -> &BTreeMap<EventId, Event> {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A derived-predicate declaration, compiled into the pair of events that
/// maintain the derived fact.
#[derive(Clone, Debug)]
pub struct Axiom {
    pub vars: Vec<Parameter>,
    pub context: Condition,
    pub implies: FactPattern,
}

impl Axiom {
    pub fn new(vars: Vec<Parameter>, context: Condition, implies: FactPattern) -> Axiom {
        Axiom { vars, context, implies }
    }

    /// The forward event adds the derived fact while the context holds; the
    /// backward one retracts it when the context fails.
    pub fn to_events(&self) -> [(EventId, Event); 2] {
        let add = Event {
            parameters: self.vars.clone(),
            precondition: self.context.clone(),
            facts_to_modify: Some(WsModification::Fact(FactOptional::positive(self.implies.clone()))),
            goals_to_add: BTreeMap::new(),
        };
        let remove = Event {
            parameters: self.vars.clone(),
            precondition: Condition::And(vec![
                Condition::fact(self.implies.clone()),
                Condition::Not(Box::new(self.context.clone())),
            ]),
            facts_to_modify: Some(WsModification::Fact(FactOptional::negative(self.implies.clone()))),
            goals_to_add: BTreeMap::new(),
        };
        [("from_axiom".to_string(), add), ("from_axiom_2".to_string(), remove)]
    }
}

/// A ground decision: an action with values for its parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ActionInvocation {
    pub action_id: ActionId,
    pub parameters: BTreeMap<String, Entity>,
}

impl ActionInvocation {
    pub fn new(action_id: impl Into<ActionId>, parameters: BTreeMap<String, Entity>) -> ActionInvocation {
        ActionInvocation {
            action_id: action_id.into(),
            parameters,
        }
    }

    /// The invocation's bindings, for substituting into the action's ASTs.
    pub fn bindings(&self) -> Bindings {
        self.parameters
            .iter()
            .map(|(name, value)| (name.clone(), std::collections::BTreeSet::from([value.clone()])))
            .collect()
    }
}

impl Display for ActionInvocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action_id)?;
        if !self.parameters.is_empty() {
            write!(f, "(")?;
            let mut first = true;
            for (name, value) in &self.parameters {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{name} -> {value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl Debug for ActionInvocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// One planner step: the chosen invocation together with the goal that
/// motivated it and the goal's priority.
#[derive(Clone)]
pub struct ActionInvocationWithGoal {
    pub action_invocation: ActionInvocation,
    pub from_goal: Option<Goal>,
    pub from_goal_priority: Option<i32>,
}

impl ActionInvocationWithGoal {
    pub fn new(action_invocation: ActionInvocation, from_goal: Option<Goal>, priority: Option<i32>) -> Self {
        ActionInvocationWithGoal {
            action_invocation,
            from_goal,
            from_goal_priority: priority,
        }
    }
}

impl Display for ActionInvocationWithGoal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action_invocation)
    }
}

impl Debug for ActionInvocationWithGoal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Builds an action from its textual precondition and effect, the way tests
/// and embedders assemble small domains.
pub fn action_from_str(
    precondition: &str,
    effect: &str,
    parameters: Vec<Parameter>,
    ontology: &Ontology,
    entities: &SetOfEntities,
) -> Result<Action, ParseError> {
    let precondition = if precondition.trim().is_empty() {
        None
    } else {
        Some(Condition::from_str(precondition, ontology, entities, &parameters)?)
    };
    let effect = WsModification::from_str(effect, ontology, entities, &parameters)?;
    let mut action = Action::new(precondition, effect);
    action.parameters = parameters;
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{SetOfPredicates, SetOfTypes};

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::from_pddl("entity").unwrap();
        let predicates =
            SetOfPredicates::from_str("fact_a\nfact_b(?e - entity)\nfact_c", &types).unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::from_pddl("a b - entity", &ontology.types).unwrap();
        (ontology, entities)
    }

    #[test]
    fn effect_literals_skip_self_required_facts() {
        let (ontology, entities) = setup();
        let action = action_from_str("fact_a", "fact_a & fact_c", Vec::new(), &ontology, &entities).unwrap();
        let literals = action.effect_literals();
        assert_eq!(literals.len(), 1);
        assert_eq!(literals[0].to_string(), "fact_c");
    }

    #[test]
    fn axiom_compiles_to_add_and_remove_events() {
        let (ontology, entities) = setup();
        let context = Condition::from_str("fact_a", &ontology, &entities, &[]).unwrap();
        let implies = crate::facts::FactPattern::from_str("fact_c", &ontology, &entities, &[]).unwrap();
        let axiom = Axiom::new(Vec::new(), context, implies);
        let [(add_id, add), (remove_id, remove)] = axiom.to_events();
        assert_eq!(add_id, "from_axiom");
        assert_eq!(remove_id, "from_axiom_2");
        assert!(add.facts_to_modify.is_some());
        assert!(matches!(
            remove.facts_to_modify,
            Some(WsModification::Fact(ref opt)) if opt.negated
        ));
    }
}
