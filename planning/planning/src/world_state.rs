use crate::conditions::{Condition, EvalCtx};
use crate::effects::{WhatChanged, WsModification};
use crate::errors::RuntimeError;
use crate::facts::mapping::FactsMapping;
use crate::facts::{Bindings, Fact, FactOptional, FactPattern};
use crate::goals::Goal;
use crate::operators::{full_event_id, EventSetId, SetOfEvents};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// The facts store of a problem, plus event propagation.
///
/// Mutations go through [`WorldState::modify`], which applies the requested
/// modification and then fires the domain events to a fixed point. A
/// modification either commits entirely or, on a runtime error, leaves the
/// state untouched.
#[derive(Clone, Debug, Default)]
pub struct WorldState {
    facts: FactsMapping,
    timeless: BTreeSet<Fact>,
}

impl WorldState {
    pub fn new() -> WorldState {
        Default::default()
    }

    /// Seeds the timeless facts of a domain; they are part of the state and
    /// protected against removal.
    pub fn with_timeless(timeless: BTreeSet<Fact>) -> WorldState {
        let mut facts = FactsMapping::new();
        for f in &timeless {
            facts.add(f.clone());
        }
        WorldState { facts, timeless }
    }

    pub fn facts(&self) -> &FactsMapping {
        &self.facts
    }

    pub fn has_fact(&self, fact: &Fact) -> bool {
        self.facts.has(fact)
    }

    /// Applies `wsm`, runs the events to a fixed point and returns the net
    /// delta of the whole call.
    pub fn modify(
        &mut self,
        wsm: Option<&WsModification>,
        events: &BTreeMap<EventSetId, SetOfEvents>,
        ctx: &EvalCtx,
        bindings: &Bindings,
    ) -> Result<WhatChanged, RuntimeError> {
        let mut scratch = self.facts.clone();
        let mut changed = WhatChanged::default();
        if let Some(wsm) = wsm {
            wsm.apply(&mut scratch, ctx, bindings, &mut changed)?;
        }
        self.check_timeless(&changed)?;
        self.run_events(&mut scratch, events, ctx, &mut changed)?;
        self.facts = scratch;
        Ok(changed)
    }

    pub fn add_fact(
        &mut self,
        fact: Fact,
        events: &BTreeMap<EventSetId, SetOfEvents>,
        ctx: &EvalCtx,
    ) -> Result<WhatChanged, RuntimeError> {
        let wsm = WsModification::Fact(FactOptional::positive(fact_as_pattern(&fact)));
        self.modify(Some(&wsm), events, ctx, &Bindings::new())
    }

    pub fn remove_fact(
        &mut self,
        fact: Fact,
        events: &BTreeMap<EventSetId, SetOfEvents>,
        ctx: &EvalCtx,
    ) -> Result<WhatChanged, RuntimeError> {
        let wsm = WsModification::Fact(FactOptional::negative(fact_as_pattern(&fact)));
        self.modify(Some(&wsm), events, ctx, &Bindings::new())
    }

    pub fn add_facts(
        &mut self,
        facts: impl IntoIterator<Item = Fact>,
        events: &BTreeMap<EventSetId, SetOfEvents>,
        ctx: &EvalCtx,
    ) -> Result<WhatChanged, RuntimeError> {
        let items: Vec<WsModification> = facts
            .into_iter()
            .map(|f| WsModification::Fact(FactOptional::positive(fact_as_pattern(&f))))
            .collect();
        self.modify(Some(&WsModification::And(items)), events, ctx, &Bindings::new())
    }

    /// Replaces the whole fact base, expressed as a modification so that
    /// events and observers see the net difference.
    pub fn set_facts(
        &mut self,
        facts: BTreeSet<Fact>,
        events: &BTreeMap<EventSetId, SetOfEvents>,
        ctx: &EvalCtx,
    ) -> Result<WhatChanged, RuntimeError> {
        let current = self.facts.facts();
        let mut items: Vec<WsModification> = current
            .difference(&facts)
            .filter(|f| !self.timeless.contains(f))
            .map(|f| WsModification::Fact(FactOptional::negative(fact_as_pattern(f))))
            .collect();
        items.extend(
            facts
                .difference(&current)
                .map(|f| WsModification::Fact(FactOptional::positive(fact_as_pattern(f)))),
        );
        self.modify(Some(&WsModification::And(items)), events, ctx, &Bindings::new())
    }

    fn check_timeless(&self, changed: &WhatChanged) -> Result<(), RuntimeError> {
        for removed in &changed.removed {
            if self.timeless.contains(removed) {
                return Err(RuntimeError::TimelessFactRemoval(removed.to_string()));
            }
        }
        Ok(())
    }

    /// Fires events in ascending `(set_id, event_id)` order until a full scan
    /// fires nothing. One firing per `(event, argument tuple)` per call.
    fn run_events(
        &self,
        scratch: &mut FactsMapping,
        events: &BTreeMap<EventSetId, SetOfEvents>,
        ctx: &EvalCtx,
        changed: &mut WhatChanged,
    ) -> Result<(), RuntimeError> {
        let mut fired: BTreeSet<(String, Vec<String>)> = BTreeSet::new();
        loop {
            let mut fired_this_scan = false;
            for (set_id, set) in events {
                for (event_id, event) in set.events() {
                    let full_id = full_event_id(set_id, event_id);
                    // only reconsider events whose condition reads something that changed
                    let touched = changed.touched_predicates();
                    let mut reads_changed = false;
                    let _ = event.precondition.for_each_opt_fact(&mut |opt| {
                        if touched.contains(&opt.pattern.predicate) {
                            reads_changed = true;
                            return std::ops::ControlFlow::Break(());
                        }
                        std::ops::ControlFlow::Continue(())
                    });
                    if !reads_changed {
                        continue;
                    }
                    for tuple in self.event_argument_tuples(event, scratch, ctx) {
                        let key = (full_id.clone(), tuple.iter().map(|e| e.value.clone()).collect());
                        if fired.contains(&key) {
                            continue;
                        }
                        let mut bindings = Bindings::new();
                        for (param, value) in event.parameters.iter().zip(tuple.iter()) {
                            bindings.insert(param.name.clone(), BTreeSet::from([value.clone()]));
                        }
                        if !event.precondition.eval(scratch, ctx, &mut bindings) {
                            continue;
                        }
                        trace!(event = %full_id, "firing event");
                        if let Some(wsm) = &event.facts_to_modify {
                            wsm.apply(scratch, ctx, &bindings, changed)?;
                            self.check_timeless(changed)?;
                        }
                        for (&priority, goals) in &event.goals_to_add {
                            changed.goals_to_add.entry(priority).or_default().extend(goals.iter().cloned());
                        }
                        fired.insert(key);
                        fired_this_scan = true;
                    }
                }
            }
            if !fired_this_scan {
                return Ok(());
            }
        }
    }

    /// Concrete argument tuples an event could fire with.
    fn event_argument_tuples(
        &self,
        event: &crate::operators::Event,
        facts: &FactsMapping,
        ctx: &EvalCtx,
    ) -> Vec<Vec<crate::ontology::Entity>> {
        if event.parameters.is_empty() {
            return vec![Vec::new()];
        }
        // candidate values per parameter come from one evaluation pass,
        // falling back to every instance of the parameter's type
        let mut bindings = Bindings::new();
        let satisfiable = event.precondition.eval(facts, ctx, &mut bindings);
        if !satisfiable {
            return Vec::new();
        }
        let mut per_param: Vec<Vec<crate::ontology::Entity>> = Vec::with_capacity(event.parameters.len());
        for param in &event.parameters {
            match bindings.get(&param.name) {
                Some(values) => per_param.push(values.iter().cloned().collect()),
                None => per_param.push(ctx.instances_of_type(param.tpe)),
            }
        }
        let mut tuples = vec![Vec::new()];
        for candidates in per_param {
            let mut next = Vec::new();
            for tuple in &tuples {
                for value in &candidates {
                    let mut t = tuple.clone();
                    t.push(value.clone());
                    next.push(t);
                }
            }
            tuples = next;
        }
        tuples
    }

    /// Evaluates a condition against the current facts, narrowing `bindings`.
    pub fn query(&self, condition: &Condition, ctx: &EvalCtx, bindings: &mut Bindings) -> bool {
        condition.eval(&self.facts, ctx, bindings)
    }

    pub fn holds(&self, condition: &Condition, ctx: &EvalCtx) -> bool {
        condition.holds(&self.facts, ctx)
    }

    pub fn is_opt_fact_satisfied(&self, opt: &FactOptional, ctx: &EvalCtx) -> bool {
        Condition::Fact(opt.clone()).holds(&self.facts, ctx)
    }

    /// A goal is satisfied when its imply-condition fails, or its objective
    /// holds.
    pub fn is_goal_satisfied(&self, goal: &Goal, ctx: &EvalCtx) -> bool {
        if let Some(condition) = goal.condition() {
            if !self.is_opt_fact_satisfied(condition, ctx) {
                return true;
            }
        }
        goal.objective().holds(&self.facts, ctx)
    }
}

fn fact_as_pattern(fact: &Fact) -> FactPattern {
    FactPattern::from(fact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::EvalCtx;
    use crate::ontology::{Ontology, SetOfEntities, SetOfPredicates, SetOfTypes};
    use crate::operators::Event;

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::from_pddl("entity").unwrap();
        let predicates = SetOfPredicates::from_str(
            "fact_a\nfact_b\nfact_c\nderived(?e - entity)\nbase(?e - entity)",
            &types,
        )
        .unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::from_pddl("a b - entity", &ontology.types).unwrap();
        (ontology, entities)
    }

    fn event_map(events: Vec<(&str, Event)>) -> BTreeMap<EventSetId, SetOfEvents> {
        let mut set = SetOfEvents::new();
        for (id, e) in events {
            set.add_with_id(id, e);
        }
        BTreeMap::from([("soe".to_string(), set)])
    }

    #[test]
    fn events_fire_to_fixed_point() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        // fact_a triggers fact_b, which triggers fact_c
        let e1 = Event::new(
            Condition::from_str("fact_a", &ontology, &entities, &[]).unwrap(),
            crate::effects::WsModification::from_str("fact_b", &ontology, &entities, &[]).unwrap(),
        );
        let e2 = Event::new(
            Condition::from_str("fact_b", &ontology, &entities, &[]).unwrap(),
            crate::effects::WsModification::from_str("fact_c", &ontology, &entities, &[]).unwrap(),
        );
        let events = event_map(vec![("e1", e1), ("e2", e2)]);
        let mut world = WorldState::new();
        let fact_a = Fact::from_str("fact_a", &ontology, &entities).unwrap();
        let changed = world.add_fact(fact_a, &events, &ctx).unwrap();
        assert!(world.has_fact(&Fact::from_str("fact_c", &ontology, &entities).unwrap()));
        assert_eq!(changed.added.len(), 3);
    }

    #[test]
    fn oscillating_events_terminate() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        // two events that undo each other still terminate within one modify
        let add_b = Event::new(
            Condition::from_str("fact_a", &ontology, &entities, &[]).unwrap(),
            crate::effects::WsModification::from_str("fact_b", &ontology, &entities, &[]).unwrap(),
        );
        let remove_b = Event::new(
            Condition::from_str("fact_b", &ontology, &entities, &[]).unwrap(),
            crate::effects::WsModification::from_str("not(fact_b) & fact_a", &ontology, &entities, &[]).unwrap(),
        );
        let events = event_map(vec![("add_b", add_b), ("remove_b", remove_b)]);
        let mut world = WorldState::new();
        let fact_a = Fact::from_str("fact_a", &ontology, &entities).unwrap();
        world.add_fact(fact_a, &events, &ctx).unwrap();
        // reaching here proves the firing guard broke the loop
    }

    #[test]
    fn parameterized_event_binds_arguments() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let entity = ontology.types.get("entity").unwrap();
        let param = crate::ontology::Parameter::new("?e", entity);
        let mut event = Event::new(
            Condition::from_str("base(?e)", &ontology, &entities, &[param.clone()]).unwrap(),
            crate::effects::WsModification::from_str("derived(?e)", &ontology, &entities, &[param.clone()]).unwrap(),
        );
        event.parameters = vec![param];
        let events = event_map(vec![("derive", event)]);
        let mut world = WorldState::new();
        world
            .add_fact(Fact::from_str("base(a)", &ontology, &entities).unwrap(), &events, &ctx)
            .unwrap();
        assert!(world.has_fact(&Fact::from_str("derived(a)", &ontology, &entities).unwrap()));
        assert!(!world.has_fact(&Fact::from_str("derived(b)", &ontology, &entities).unwrap()));
    }

    #[test]
    fn timeless_facts_cannot_be_removed() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let fact_a = Fact::from_str("fact_a", &ontology, &entities).unwrap();
        let mut world = WorldState::with_timeless(BTreeSet::from([fact_a.clone()]));
        let err = world.remove_fact(fact_a.clone(), &BTreeMap::new(), &ctx).unwrap_err();
        assert!(matches!(err, RuntimeError::TimelessFactRemoval(_)));
        // atomicity: the fact is still there
        assert!(world.has_fact(&fact_a));
    }
}
