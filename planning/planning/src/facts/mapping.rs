use crate::facts::{Bindings, Fact, FactPattern};
use crate::ontology::PredicateId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Debug, Formatter};

/// Identifier of a fact inside a `FactsMapping`.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
struct FactId(u32);

/// Outcome of inserting a fact.
#[derive(Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// A fluent equation for the same argument tuple existed with another
    /// value and was replaced by the new one.
    Replaced(Fact),
    Unchanged,
}

/// Indexed container of ground facts.
///
/// Every fact is reachable through all of: its signature, each of its
/// concrete argument values, its fluent value, and the reverse value lookup.
/// For any fluent predicate and argument tuple at most one equation is kept.
#[derive(Clone, Default)]
pub struct FactsMapping {
    facts: BTreeMap<FactId, Fact>,
    next_id: u32,
    by_signature: HashMap<PredicateId, BTreeSet<FactId>>,
    by_arg_value: HashMap<(PredicateId, usize, String), BTreeSet<FactId>>,
    by_fluent_value: HashMap<(PredicateId, String), BTreeSet<FactId>>,
    with_fluent: HashMap<PredicateId, BTreeSet<FactId>>,
    by_value: HashMap<String, BTreeSet<FactId>>,
    fluent_slot: HashMap<(PredicateId, Vec<String>), FactId>,
}

impl FactsMapping {
    pub fn new() -> FactsMapping {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    pub fn facts(&self) -> BTreeSet<Fact> {
        self.facts.values().cloned().collect()
    }

    /// Inserts a ground fact, replacing any existing fluent equation for the
    /// same argument tuple.
    pub fn add(&mut self, fact: Fact) -> AddOutcome {
        debug_assert!(
            fact.fluent.as_ref().map_or(true, |v| !v.is_any_value()),
            "cannot store a wildcard fluent value: {fact}"
        );
        let mut replaced = None;
        if fact.fluent.is_some() {
            let key = (fact.predicate, fact.arg_values());
            if let Some(&existing) = self.fluent_slot.get(&key) {
                let existing_fact = self.facts[&existing].clone();
                if existing_fact.fluent == fact.fluent {
                    return AddOutcome::Unchanged;
                }
                self.remove_id(existing);
                replaced = Some(existing_fact);
            }
        } else if self.has(&fact) {
            return AddOutcome::Unchanged;
        }

        let id = FactId(self.next_id);
        self.next_id += 1;
        self.by_signature.entry(fact.predicate).or_default().insert(id);
        for (i, arg) in fact.args.iter().enumerate() {
            self.by_arg_value
                .entry((fact.predicate, i, arg.value.clone()))
                .or_default()
                .insert(id);
            self.by_value.entry(arg.value.clone()).or_default().insert(id);
        }
        if let Some(v) = &fact.fluent {
            self.by_fluent_value
                .entry((fact.predicate, v.value.clone()))
                .or_default()
                .insert(id);
            self.with_fluent.entry(fact.predicate).or_default().insert(id);
            self.by_value.entry(v.value.clone()).or_default().insert(id);
            self.fluent_slot.insert((fact.predicate, fact.arg_values()), id);
        }
        self.facts.insert(id, fact);
        match replaced {
            Some(old) => AddOutcome::Replaced(old),
            None => AddOutcome::Added,
        }
    }

    /// Removes a ground fact. For a fluent fact with a wildcard value, the
    /// equation for the argument tuple is removed whatever its value.
    /// Returns the removed fact.
    pub fn remove(&mut self, fact: &Fact) -> Option<Fact> {
        let id = self.find_exact(fact)?;
        let removed = self.facts[&id].clone();
        self.remove_id(id);
        Some(removed)
    }

    fn remove_id(&mut self, id: FactId) {
        let Some(fact) = self.facts.remove(&id) else { return };
        prune(&mut self.by_signature, &fact.predicate, id);
        for (i, arg) in fact.args.iter().enumerate() {
            prune(&mut self.by_arg_value, &(fact.predicate, i, arg.value.clone()), id);
            prune(&mut self.by_value, &arg.value, id);
        }
        if let Some(v) = &fact.fluent {
            prune(&mut self.by_fluent_value, &(fact.predicate, v.value.clone()), id);
            prune(&mut self.with_fluent, &fact.predicate, id);
            prune(&mut self.by_value, &v.value, id);
            self.fluent_slot.remove(&(fact.predicate, fact.arg_values()));
        }
    }

    fn find_exact(&self, fact: &Fact) -> Option<FactId> {
        if fact.fluent.is_some() {
            let id = *self.fluent_slot.get(&(fact.predicate, fact.arg_values()))?;
            let stored = &self.facts[&id];
            let wildcard = fact.fluent.as_ref().is_some_and(|v| v.is_any_value());
            if wildcard || stored.fluent == fact.fluent {
                Some(id)
            } else {
                None
            }
        } else {
            self.by_signature
                .get(&fact.predicate)?
                .iter()
                .find(|&&id| self.facts[&id].args == fact.args)
                .copied()
        }
    }

    /// Membership check. A wildcard fluent value matches any stored value.
    pub fn has(&self, fact: &Fact) -> bool {
        self.find_exact(fact).is_some()
    }

    /// The stored value of `predicate(args)`, if an equation exists.
    pub fn fluent_value(&self, predicate: PredicateId, args: &[String]) -> Option<&Fact> {
        let id = self.fluent_slot.get(&(predicate, args.to_vec()))?;
        self.facts.get(id)
    }

    /// All facts whose arguments or fluent value contain `value`.
    pub fn facts_with_value(&self, value: &str) -> impl Iterator<Item = &Fact> {
        self.by_value
            .get(value)
            .into_iter()
            .flatten()
            .map(move |id| &self.facts[id])
    }

    /// Facts that could match `pattern`: candidate narrowing through the
    /// per-argument and per-fluent-value indexes, then a full pattern check
    /// on the survivors.
    pub fn find<'a>(&'a self, pattern: &'a FactPattern, bindings: &'a Bindings) -> Vec<&'a Fact> {
        let Some(all) = self.by_signature.get(&pattern.predicate) else {
            return Vec::new();
        };
        let mut candidates: Option<BTreeSet<FactId>> = None;
        let mut narrow = |ids: Option<&BTreeSet<FactId>>| {
            let ids = ids.cloned().unwrap_or_default();
            candidates = Some(match candidates.take() {
                None => ids,
                Some(cur) => cur.intersection(&ids).copied().collect(),
            });
        };
        for (i, term) in pattern.args.iter().enumerate() {
            if let Some(value) = term.resolve(bindings) {
                if !value.is_any_value() {
                    narrow(self.by_arg_value.get(&(pattern.predicate, i, value.value.clone())));
                }
            }
        }
        match &pattern.fluent {
            Some(term) if !pattern.negated_fluent => {
                if let Some(value) = term.resolve(bindings) {
                    if !value.is_any_value() {
                        narrow(self.by_fluent_value.get(&(pattern.predicate, value.value.clone())));
                    }
                } else if term.is_placeholder() {
                    narrow(self.with_fluent.get(&pattern.predicate));
                }
            }
            Some(_) => narrow(self.with_fluent.get(&pattern.predicate)),
            None => {}
        }
        let candidates = candidates.unwrap_or_else(|| all.clone());
        candidates
            .iter()
            .map(|id| &self.facts[id])
            .filter(|f| pattern.matches(f, bindings).is_some())
            .collect()
    }
}

fn prune<K: std::hash::Hash + Eq + Clone>(index: &mut HashMap<K, BTreeSet<FactId>>, key: &K, id: FactId) {
    if let Some(set) = index.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

impl Debug for FactsMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.facts.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Ontology, Parameter, SetOfEntities, SetOfPredicates, SetOfTypes};

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::from_pddl("robot location").unwrap();
        let predicates = SetOfPredicates::from_str(
            "at(?r - robot) - location\n\
             charged(?r - robot)",
            &types,
        )
        .unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::from_pddl(
            "r1 r2 - robot\nkitchen bedroom - location",
            &ontology.types,
        )
        .unwrap();
        (ontology, entities)
    }

    #[test]
    fn fluent_insert_replaces_previous_value() {
        let (ontology, entities) = setup();
        let mut facts = FactsMapping::new();
        let at_kitchen = Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap();
        let at_bedroom = Fact::from_str("at(r1)=bedroom", &ontology, &entities).unwrap();
        assert_eq!(facts.add(at_kitchen.clone()), AddOutcome::Added);
        assert_eq!(facts.add(at_kitchen.clone()), AddOutcome::Unchanged);
        assert_eq!(facts.add(at_bedroom.clone()), AddOutcome::Replaced(at_kitchen.clone()));
        assert_eq!(facts.len(), 1);
        assert!(facts.has(&at_bedroom));
        assert!(!facts.has(&at_kitchen));
    }

    #[test]
    fn removal_erases_all_indexes() {
        let (ontology, entities) = setup();
        let mut facts = FactsMapping::new();
        let fact = Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap();
        facts.add(fact.clone());
        assert!(facts.remove(&fact).is_some());
        assert!(facts.is_empty());
        assert_eq!(facts.facts_with_value("kitchen").count(), 0);
        assert_eq!(facts.facts_with_value("r1").count(), 0);
        let pattern = FactPattern::from_str("at(r1)", &ontology, &entities, &[]).unwrap();
        assert!(facts.find(&pattern, &Bindings::new()).is_empty());
    }

    #[test]
    fn find_narrows_by_argument_and_fluent() {
        let (ontology, entities) = setup();
        let mut facts = FactsMapping::new();
        facts.add(Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap());
        facts.add(Fact::from_str("at(r2)=bedroom", &ontology, &entities).unwrap());
        facts.add(Fact::from_str("charged(r1)", &ontology, &entities).unwrap());

        let robot = ontology.types.get("robot").unwrap();
        let params = vec![Parameter::new("?r", robot)];
        let pattern = FactPattern::from_str("at(?r)=bedroom", &ontology, &entities, &params).unwrap();
        let empty = Bindings::new();
        let found = facts.find(&pattern, &empty);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].to_string(), "at(r2)=bedroom");

        let any = FactPattern::from_str("at(?r)", &ontology, &entities, &params).unwrap();
        let empty2 = Bindings::new();
        assert_eq!(facts.find(&any, &empty2).len(), 2);
    }

    #[test]
    fn reverse_value_lookup() {
        let (ontology, entities) = setup();
        let mut facts = FactsMapping::new();
        facts.add(Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap());
        assert_eq!(facts.facts_with_value("kitchen").count(), 1);
        assert_eq!(facts.facts_with_value("r1").count(), 1);
    }
}
