use crate::errors::DomainError;
use crate::facts::{Fact, FactOptional};
use crate::ontology::Ontology;
use crate::operators::{full_event_id, Action, ActionId, Axiom, Event, EventSetId, SetOfEvents};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::debug;
use uuid::Uuid;

/// Identifier of an operator in the succession graph: an action id or a full
/// event id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum OperatorId {
    Action(ActionId),
    Event(String),
}

impl OperatorId {
    fn label(&self) -> String {
        match self {
            OperatorId::Action(id) => format!("action: {id}"),
            OperatorId::Event(id) => format!("event: {id}"),
        }
    }

    fn negated_label(&self) -> String {
        match self {
            OperatorId::Action(id) => format!("not action: {id}"),
            OperatorId::Event(id) => format!("not event: {id}"),
        }
    }
}

/// Succession data of one operator: which operators each of its effect
/// literals can enable, which operators it can never usefully precede, and
/// the transitive closure of what can enable it.
#[derive(Clone, Debug, Default)]
pub struct OperatorSuccessions {
    pub fact_successions: Vec<(FactOptional, BTreeSet<OperatorId>)>,
    /// Operators whose whole effect is already covered by this operator's
    /// effect: running them right after this one cannot contribute anything.
    pub impossible_successors: BTreeSet<OperatorId>,
    pub action_predecessors: BTreeSet<ActionId>,
    pub event_predecessors: BTreeSet<String>,
}

/// The static knowledge of the agent: its actions, its events, its ontology
/// and the timeless facts, with a version id renewed on every mutation so
/// that per-goal caches know when to refresh.
#[derive(Debug)]
pub struct Domain {
    name: String,
    actions: BTreeMap<ActionId, Action>,
    events: BTreeMap<EventSetId, SetOfEvents>,
    ontology: Ontology,
    timeless: BTreeSet<Fact>,
    axioms: Vec<Axiom>,
    uuid: Uuid,
    successions: BTreeMap<OperatorId, OperatorSuccessions>,
}

impl Domain {
    pub fn empty(ontology: Ontology) -> Domain {
        Domain {
            name: String::new(),
            actions: BTreeMap::new(),
            events: BTreeMap::new(),
            ontology,
            timeless: BTreeSet::new(),
            axioms: Vec::new(),
            uuid: Uuid::new_v4(),
            successions: BTreeMap::new(),
        }
    }

    pub fn new(actions: BTreeMap<ActionId, Action>, ontology: Ontology) -> Domain {
        let mut domain = Domain::empty(ontology);
        domain.actions = actions;
        domain.rebuild_succession_cache();
        domain
    }

    pub fn with_events(mut self, events: BTreeMap<EventSetId, SetOfEvents>) -> Domain {
        self.events = events;
        self.rebuild_succession_cache();
        self
    }

    pub fn with_timeless(mut self, timeless: BTreeSet<Fact>) -> Domain {
        self.timeless = timeless;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Domain {
        self.name = name.into();
        self
    }

    /// Stores the axioms and compiles each into its pair of maintenance
    /// events, appended to the `axioms` event set.
    pub fn with_axioms(mut self, axioms: Vec<Axiom>) -> Domain {
        let mut set = SetOfEvents::new();
        for (index, axiom) in axioms.iter().enumerate() {
            let [(add_id, add), (remove_id, remove)] = axiom.to_events();
            let (add_id, remove_id) = if index == 0 {
                (add_id, remove_id)
            } else {
                (format!("{}_{}", add_id, index * 2 + 1), format!("from_axiom_{}", index * 2 + 2))
            };
            set.add_with_id(add_id, add);
            set.add_with_id(remove_id, remove);
        }
        self.axioms = axioms;
        if !set.is_empty() {
            self.events.insert("axioms".to_string(), set);
        }
        self.rebuild_succession_cache();
        self
    }

    pub fn axioms(&self) -> &[Axiom] {
        &self.axioms
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn actions(&self) -> &BTreeMap<ActionId, Action> {
        &self.actions
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    pub fn events(&self) -> &BTreeMap<EventSetId, SetOfEvents> {
        &self.events
    }

    pub fn timeless(&self) -> &BTreeSet<Fact> {
        &self.timeless
    }

    /// Every event with its full id, in dispatch order.
    pub fn all_events(&self) -> Vec<(String, &Event)> {
        let mut res = Vec::new();
        for (set_id, set) in &self.events {
            for (event_id, event) in set.events() {
                res.push((full_event_id(set_id, event_id), event));
            }
        }
        res
    }

    pub fn add_action(&mut self, id: impl Into<ActionId>, action: Action) -> Result<(), DomainError> {
        let id = id.into();
        if self.actions.contains_key(&id) {
            return Err(DomainError::DuplicateActionId(id));
        }
        self.actions.insert(id, action);
        self.rebuild_succession_cache();
        Ok(())
    }

    pub fn remove_action(&mut self, id: &str) -> Option<Action> {
        let removed = self.actions.remove(id);
        if removed.is_some() {
            self.rebuild_succession_cache();
        }
        removed
    }

    pub fn add_set_of_events(
        &mut self,
        id: impl Into<EventSetId>,
        set: SetOfEvents,
    ) -> Result<EventSetId, DomainError> {
        let id = id.into();
        if self.events.contains_key(&id) {
            return Err(DomainError::DuplicateEventSetId(id));
        }
        self.events.insert(id.clone(), set);
        self.rebuild_succession_cache();
        Ok(id)
    }

    pub fn remove_set_of_events(&mut self, id: &str) -> Option<SetOfEvents> {
        let removed = self.events.remove(id);
        if removed.is_some() {
            self.rebuild_succession_cache();
        }
        removed
    }

    // Succession cache
    // ----------------

    pub fn predecessors_of_action(&self, id: &str) -> (&BTreeSet<ActionId>, &BTreeSet<String>) {
        self.predecessors_of(&OperatorId::Action(id.to_string()))
    }

    pub fn predecessors_of_event(&self, full_id: &str) -> (&BTreeSet<ActionId>, &BTreeSet<String>) {
        self.predecessors_of(&OperatorId::Event(full_id.to_string()))
    }

    fn predecessors_of(&self, op: &OperatorId) -> (&BTreeSet<ActionId>, &BTreeSet<String>) {
        static EMPTY_ACTIONS: BTreeSet<ActionId> = BTreeSet::new();
        static EMPTY_EVENTS: BTreeSet<String> = BTreeSet::new();
        match self.successions.get(op) {
            Some(s) => (&s.action_predecessors, &s.event_predecessors),
            None => (&EMPTY_ACTIONS, &EMPTY_EVENTS),
        }
    }

    pub fn successions(&self) -> &BTreeMap<OperatorId, OperatorSuccessions> {
        &self.successions
    }

    /// Recomputes the whole succession cache and renews the domain version.
    ///
    /// An operator `O` precedes `P` when one of `O`'s effect literals can
    /// newly satisfy a literal of `P`'s precondition. Effect literals that
    /// `O`'s own precondition requires are not counted (they cannot change).
    fn rebuild_succession_cache(&mut self) {
        self.uuid = Uuid::new_v4();
        self.successions.clear();

        struct OperatorView {
            id: OperatorId,
            effects: Vec<FactOptional>,
            preconditions: Vec<FactOptional>,
        }
        let mut operators: Vec<OperatorView> = Vec::new();
        for (id, action) in &self.actions {
            operators.push(OperatorView {
                id: OperatorId::Action(id.clone()),
                effects: action.effect_literals(),
                preconditions: action.precondition_literals(),
            });
        }
        for (full_id, event) in self.all_events() {
            operators.push(OperatorView {
                id: OperatorId::Event(full_id),
                effects: event.effect_literals(),
                preconditions: event.precondition_literals(),
            });
        }

        let types = &self.ontology.types;
        let mut successor_edges: BTreeMap<OperatorId, BTreeSet<OperatorId>> = BTreeMap::new();
        for op in &operators {
            let mut entry = OperatorSuccessions::default();
            for effect in &op.effects {
                let mut enabled: BTreeSet<OperatorId> = BTreeSet::new();
                for other in &operators {
                    if other.id == op.id {
                        continue;
                    }
                    let matches = other.preconditions.iter().any(|pre| {
                        pre.negated == effect.negated && pre.pattern.can_unify(&effect.pattern, types)
                    });
                    if matches {
                        enabled.insert(other.id.clone());
                    }
                }
                if !enabled.is_empty() {
                    successor_edges.entry(op.id.clone()).or_default().extend(enabled.iter().cloned());
                    entry.fact_successions.push((effect.clone(), enabled));
                }
            }
            for other in &operators {
                if other.effects.is_empty() {
                    continue;
                }
                let covered = other.effects.iter().all(|their| {
                    op.effects
                        .iter()
                        .any(|ours| their.negated == ours.negated && their.pattern.can_unify(&ours.pattern, types))
                });
                if covered {
                    entry.impossible_successors.insert(other.id.clone());
                }
            }
            self.successions.insert(op.id.clone(), entry);
        }

        // transitive closure: predecessors of every operator
        for op in &operators {
            let mut visited: BTreeSet<OperatorId> = BTreeSet::new();
            let mut frontier = vec![op.id.clone()];
            while let Some(current) = frontier.pop() {
                for (candidate, successors) in &successor_edges {
                    if candidate != &op.id && successors.contains(&current) && visited.insert(candidate.clone()) {
                        frontier.push(candidate.clone());
                    }
                }
            }
            let entry = self.successions.get_mut(&op.id).expect("inserted above");
            for pred in visited {
                match pred {
                    OperatorId::Action(id) => {
                        entry.action_predecessors.insert(id);
                    }
                    OperatorId::Event(id) => {
                        entry.event_predecessors.insert(id);
                    }
                }
            }
        }
        debug!(version = %self.uuid, operators = operators.len(), "rebuilt succession cache");
    }

    /// Renders the succession cache, one section per operator that has
    /// successions or impossible successors.
    pub fn print_succession_cache(&self) -> String {
        let mut res = String::new();
        for (op, entry) in &self.successions {
            if entry.fact_successions.is_empty() && entry.impossible_successors.is_empty() {
                continue;
            }
            if !res.is_empty() {
                res.push_str("\n\n");
            }
            let _ = writeln!(res, "{}", op.label());
            res.push_str("----------------------------------\n");
            for (fact, successors) in &entry.fact_successions {
                let _ = write!(res, "\nfact: {fact}\n");
                for successor in successors {
                    let _ = writeln!(res, "{}", successor.label());
                }
            }
            if !entry.impossible_successors.is_empty() {
                res.push('\n');
                for impossible in &entry.impossible_successors {
                    let _ = writeln!(res, "{}", impossible.negated_label());
                }
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Parameter, SetOfEntities, SetOfPredicates, SetOfTypes};
    use crate::operators::action_from_str;

    fn ontology() -> Ontology {
        let types = SetOfTypes::from_pddl("e1 e2 - entity\nresource").unwrap();
        let constants = SetOfEntities::from_pddl("moves - resource", &types).unwrap();
        let predicates = SetOfPredicates::from_str(
            "fact_a\n\
             fact_b(?e - entity)\n\
             fact_c\n\
             fact_d\n\
             locked(?r - resource)",
            &types,
        )
        .unwrap();
        Ontology {
            types,
            predicates,
            constants,
        }
    }

    #[test]
    fn successions_wire_effects_to_preconditions() {
        let ontology = ontology();
        let entities = SetOfEntities::new();
        let e1 = ontology.types.get("e1").unwrap();
        let mut actions = BTreeMap::new();
        actions.insert(
            "action1".to_string(),
            action_from_str(
                "not(locked(moves))",
                "not(fact_a) & fact_b(?e)",
                vec![Parameter::new("?e", e1)],
                &ontology,
                &entities,
            )
            .unwrap(),
        );
        actions.insert(
            "action2".to_string(),
            action_from_str(
                "not(locked(moves)) & fact_b(?e)",
                "fact_c",
                vec![Parameter::new("?e", e1)],
                &ontology,
                &entities,
            )
            .unwrap(),
        );
        let domain = Domain::new(actions, ontology);

        let successions = &domain.successions()[&OperatorId::Action("action1".to_string())];
        let fact_b_successors = successions
            .fact_successions
            .iter()
            .find(|(fact, _)| fact.to_string() == "fact_b(?e)")
            .map(|(_, s)| s)
            .unwrap();
        assert!(fact_b_successors.contains(&OperatorId::Action("action2".to_string())));

        let (preds, _) = domain.predecessors_of_action("action2");
        assert!(preds.contains("action1"));
        let (preds, _) = domain.predecessors_of_action("action1");
        assert!(preds.is_empty());
    }

    #[test]
    fn redundant_operator_is_an_impossible_successor() {
        let ontology = ontology();
        let entities = SetOfEntities::new();
        let mut actions = BTreeMap::new();
        actions.insert(
            "producer".to_string(),
            action_from_str("", "fact_c & fact_d", Vec::new(), &ontology, &entities).unwrap(),
        );
        actions.insert(
            "subset".to_string(),
            action_from_str("", "fact_d", Vec::new(), &ontology, &entities).unwrap(),
        );
        let domain = Domain::new(actions, ontology);
        let successions = &domain.successions()[&OperatorId::Action("producer".to_string())];
        assert!(successions
            .impossible_successors
            .contains(&OperatorId::Action("subset".to_string())));
        assert!(successions
            .impossible_successors
            .contains(&OperatorId::Action("producer".to_string())));
    }

    #[test]
    fn mutations_renew_the_version_and_reject_duplicates() {
        let ontology = ontology();
        let entities = SetOfEntities::new();
        let mut domain = Domain::new(BTreeMap::new(), ontology);
        let v0 = domain.uuid();
        let action = action_from_str("", "fact_c", Vec::new(), domain.ontology(), &entities).unwrap();
        domain.add_action("a", action.clone()).unwrap();
        assert_ne!(domain.uuid(), v0);
        assert_eq!(
            domain.add_action("a", action).unwrap_err(),
            DomainError::DuplicateActionId("a".to_string())
        );
    }
}
