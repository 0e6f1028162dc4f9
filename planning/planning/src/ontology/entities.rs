use crate::errors::{DomainError, ParseError};
use crate::ontology::types::{SetOfTypes, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Entity value that stands for "any value" in fact patterns.
pub const ANY_VALUE: &str = "*";

/// A numeric literal. The int-vs-float distinction of the input text is
/// preserved through arithmetic, as in PDDL numeric fluents.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn combine(self, other: Number, int_op: impl Fn(i64, i64) -> i64, float_op: impl Fn(f64, f64) -> f64) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(int_op(a, b)),
            (a, b) => Number::Float(float_op(a.as_f64(), b.as_f64())),
        }
    }

    pub fn add(self, other: Number) -> Number {
        self.combine(other, |a, b| a.wrapping_add(b), |a, b| a + b)
    }

    pub fn sub(self, other: Number) -> Number {
        self.combine(other, |a, b| a.wrapping_sub(b), |a, b| a - b)
    }

    pub fn mul(self, other: Number) -> Number {
        self.combine(other, |a, b| a.wrapping_mul(b), |a, b| a * b)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.as_f64().partial_cmp(&other.as_f64())
    }
}

impl FromStr for Number {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(i) = s.parse::<i64>() {
            Ok(Number::Int(i))
        } else {
            s.parse::<f64>().map(Number::Float)
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

/// A named, typed value: a domain constant, a problem object or a numeric
/// literal. Two entities are the same entity iff their values are equal
/// (values are unique within a `SetOfEntities`).
#[derive(Clone)]
pub struct Entity {
    pub value: String,
    pub tpe: TypeId,
}

impl Entity {
    pub fn new(value: impl Into<String>, tpe: TypeId) -> Entity {
        Entity { value: value.into(), tpe }
    }

    pub fn number(n: Number, types: &SetOfTypes) -> Entity {
        Entity {
            value: n.to_string(),
            tpe: types.number(),
        }
    }

    pub fn any(tpe: TypeId) -> Entity {
        Entity {
            value: ANY_VALUE.to_string(),
            tpe,
        }
    }

    pub fn is_any_value(&self) -> bool {
        self.value == ANY_VALUE
    }

    pub fn as_number(&self) -> Option<Number> {
        self.value.parse().ok()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}
impl Eq for Entity {}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A typed placeholder appearing in conditions, effects and operator
/// signatures, bound to entities by unification. Names carry the `?` prefix
/// of their PDDL form.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Parameter {
    pub name: String,
    pub tpe: TypeId,
}

impl Parameter {
    pub fn new(name: impl Into<String>, tpe: TypeId) -> Parameter {
        Parameter { name: name.into(), tpe }
    }

    /// Reads a `?name - type` declaration.
    pub fn from_str(s: &str, types: &SetOfTypes) -> Result<Parameter, ParseError> {
        let mut tokens = s.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| ParseError::new("empty parameter declaration", s))?;
        let tpe_name = match (tokens.next(), tokens.next()) {
            (Some("-"), Some(t)) => t,
            (None, _) => return Err(ParseError::new(format!("parameter `{name}` has no type"), s)),
            _ => return Err(ParseError::new("expected `?name - type`", s)),
        };
        let tpe = types
            .get(tpe_name)
            .ok_or_else(|| ParseError::new(format!("unknown type `{tpe_name}`"), s))?;
        Ok(Parameter::new(name, tpe))
    }
}

impl Debug for Parameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
impl Display for Parameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The named entities available to a domain or problem, unique by value and
/// indexed by type for quantifier enumeration.
#[derive(Clone, Debug, Default)]
pub struct SetOfEntities {
    by_value: BTreeMap<String, Entity>,
    by_type: HashMap<TypeId, BTreeSet<String>>,
}

impl SetOfEntities {
    pub fn new() -> SetOfEntities {
        Default::default()
    }

    pub fn add(&mut self, entity: Entity) -> Result<(), DomainError> {
        if self.by_value.contains_key(&entity.value) {
            return Err(DomainError::DuplicateEntity(entity.value));
        }
        self.by_type.entry(entity.tpe).or_default().insert(entity.value.clone());
        self.by_value.insert(entity.value.clone(), entity);
        Ok(())
    }

    pub fn get(&self, value: &str) -> Option<&Entity> {
        self.by_value.get(value)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.by_value.contains_key(value)
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.by_value.values()
    }

    /// All entities whose type is `tpe` or one of its subtypes.
    pub fn instances_of_type<'a>(&'a self, tpe: TypeId, types: &SetOfTypes) -> Vec<&'a Entity> {
        let mut res = Vec::new();
        for t in types.with_subtypes(tpe) {
            if let Some(values) = self.by_type.get(&t) {
                res.extend(values.iter().filter_map(|v| self.by_value.get(v)));
            }
        }
        res.sort();
        res
    }

    /// Reads declarations of the form `a b - type`, one group per line, as in
    /// a PDDL `:objects` or `:constants` block.
    pub fn from_pddl(text: &str, types: &SetOfTypes) -> Result<SetOfEntities, ParseError> {
        let mut entities = SetOfEntities::new();
        for line in text.lines() {
            let mut pending: Vec<&str> = Vec::new();
            let mut tokens = line.split_whitespace().peekable();
            while let Some(tok) = tokens.next() {
                if tok == "-" {
                    let tpe_name = tokens
                        .next()
                        .ok_or_else(|| ParseError::new("missing type after `-`", line))?;
                    let tpe = types
                        .get(tpe_name)
                        .ok_or_else(|| ParseError::new(format!("unknown type `{tpe_name}`"), line))?;
                    for value in pending.drain(..) {
                        entities
                            .add(Entity::new(value, tpe))
                            .map_err(|e| ParseError::new(e.to_string(), line))?;
                    }
                } else {
                    pending.push(tok);
                }
            }
            if !pending.is_empty() {
                return Err(ParseError::new("entities declared without a type", line));
            }
        }
        Ok(entities)
    }
}

impl Display for SetOfEntities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for e in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}", e.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_keep_their_lexical_kind() {
        assert_eq!("3".parse::<Number>().unwrap(), Number::Int(3));
        assert_eq!("3.5".parse::<Number>().unwrap(), Number::Float(3.5));
        assert_eq!(Number::Int(2).add(Number::Int(3)), Number::Int(5));
        assert_eq!(Number::Int(2).mul(Number::Float(1.5)), Number::Float(3.0));
    }

    #[test]
    fn instances_include_subtypes() {
        let types = SetOfTypes::from_pddl("cat dog - animal").unwrap();
        let entities = SetOfEntities::from_pddl("felix - cat\nrex - dog", &types).unwrap();
        let animal = types.get("animal").unwrap();
        let names: Vec<&str> = entities
            .instances_of_type(animal, &types)
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(names, vec!["felix", "rex"]);
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let types = SetOfTypes::from_pddl("cat").unwrap();
        let cat = types.get("cat").unwrap();
        let mut entities = SetOfEntities::new();
        entities.add(Entity::new("felix", cat)).unwrap();
        assert!(entities.add(Entity::new("felix", cat)).is_err());
    }
}
