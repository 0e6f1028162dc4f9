use crate::errors::DomainError;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

/// Name of the built-in numeric type, always present in a `SetOfTypes`.
pub const NUMBER_TYPE: &str = "number";

/// Compact identifier of a type inside its `SetOfTypes` arena.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<TypeId> for usize {
    fn from(t: TypeId) -> Self {
        t.0 as usize
    }
}

impl Debug for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug)]
struct TypeNode {
    name: String,
    parent: Option<TypeId>,
    children: Vec<TypeId>,
}

/// Arena of all the types of a domain, arranged in a single-inheritance
/// forest. Everywhere else in the engine a type is a plain `TypeId`.
#[derive(Debug)]
pub struct SetOfTypes {
    nodes: Vec<TypeNode>,
    by_name: HashMap<String, TypeId>,
    number: TypeId,
}

impl SetOfTypes {
    pub fn new() -> SetOfTypes {
        let mut types = SetOfTypes {
            nodes: Vec::new(),
            by_name: HashMap::new(),
            number: TypeId(0),
        };
        types.number = types.insert_node(NUMBER_TYPE, None);
        types
    }

    fn insert_node(&mut self, name: &str, parent: Option<TypeId>) -> TypeId {
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(TypeNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        if let Some(p) = parent {
            self.nodes[usize::from(p)].children.push(id);
        }
        id
    }

    /// The built-in `number` type.
    pub fn number(&self) -> TypeId {
        self.number
    }

    pub fn get(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.nodes[usize::from(id)].name
    }

    pub fn parent(&self, id: TypeId) -> Option<TypeId> {
        self.nodes[usize::from(id)].parent
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        // the built-in number type does not count as a declaration
        self.nodes.len() <= 1
    }

    /// Declares a type, creating the parent as a root type when it is not
    /// declared yet. Redeclaring an existing root under a parent re-parents
    /// it, which is how `a - b` followed by `b - c` chains are read.
    pub fn add(&mut self, name: &str, parent: Option<&str>) -> Result<TypeId, DomainError> {
        let parent_id = match parent {
            Some(p) => Some(match self.get(p) {
                Some(id) => id,
                None => self.insert_node(p, None),
            }),
            None => None,
        };
        match self.get(name) {
            None => Ok(self.insert_node(name, parent_id)),
            Some(id) => {
                if let Some(p) = parent_id {
                    if self.is_a(p, id) {
                        return Err(DomainError::CyclicTypeDeclaration(name.to_string()));
                    }
                    if self.nodes[usize::from(id)].parent.is_none() {
                        self.nodes[usize::from(id)].parent = Some(p);
                        self.nodes[usize::from(p)].children.push(id);
                    }
                }
                Ok(id)
            }
        }
    }

    /// Declares a type under an already-declared parent.
    pub fn add_child(&mut self, name: &str, parent: &str) -> Result<TypeId, DomainError> {
        if !self.contains(parent) {
            return Err(DomainError::UnknownParentType {
                child: name.to_string(),
                parent: parent.to_string(),
            });
        }
        self.add(name, Some(parent))
    }

    /// Reflexive-transitive subtype check: is `t` a `u`?
    pub fn is_a(&self, t: TypeId, u: TypeId) -> bool {
        let mut cur = Some(t);
        while let Some(c) = cur {
            if c == u {
                return true;
            }
            cur = self.nodes[usize::from(c)].parent;
        }
        false
    }

    /// `t` and all its descendants.
    pub fn with_subtypes(&self, t: TypeId) -> Vec<TypeId> {
        let mut res = vec![t];
        let mut i = 0;
        while i < res.len() {
            res.extend(self.nodes[usize::from(res[i])].children.iter().copied());
            i += 1;
        }
        res
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.nodes.len() as u32).map(TypeId)
    }

    /// User-declared types, in declaration order (skips the built-in number type).
    pub fn declared(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.iter().filter(|&t| t != self.number)
    }

    /// Reads declarations of the form `child1 child2 - parent`, one group per
    /// line or whitespace-separated, as in a PDDL `:types` block.
    pub fn from_pddl(text: &str) -> Result<SetOfTypes, DomainError> {
        let mut types = SetOfTypes::new();
        for line in text.lines() {
            let mut pending: Vec<&str> = Vec::new();
            let mut tokens = line.split_whitespace().peekable();
            while let Some(tok) = tokens.next() {
                if tok == "-" {
                    let parent = tokens.next().unwrap_or_default();
                    for child in pending.drain(..) {
                        types.add(child, Some(parent))?;
                    }
                } else {
                    pending.push(tok);
                }
            }
            for child in pending {
                types.add(child, None)?;
            }
        }
        Ok(types)
    }
}

impl Default for SetOfTypes {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SetOfTypes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for t in self.declared() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            match self.parent(t) {
                Some(p) => write!(f, "{} - {}", self.name(t), self.name(p))?,
                None => write!(f, "{}", self.name(t))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_closure() {
        let types = SetOfTypes::from_pddl("cat dog - animal\nanimal - thing").unwrap();
        let cat = types.get("cat").unwrap();
        let animal = types.get("animal").unwrap();
        let thing = types.get("thing").unwrap();
        assert!(types.is_a(cat, cat));
        assert!(types.is_a(cat, animal));
        assert!(types.is_a(cat, thing));
        assert!(!types.is_a(animal, cat));
        assert!(!types.is_a(types.number(), thing));
    }

    #[test]
    fn with_subtypes_lists_descendants() {
        let types = SetOfTypes::from_pddl("cat dog - animal").unwrap();
        let animal = types.get("animal").unwrap();
        let descendants = types.with_subtypes(animal);
        assert_eq!(descendants.len(), 3);
    }

    #[test]
    fn cyclic_declaration_is_rejected() {
        let mut types = SetOfTypes::new();
        types.add("a", Some("b")).unwrap();
        let err = types.add("b", Some("a")).unwrap_err();
        assert_eq!(err, DomainError::CyclicTypeDeclaration("b".to_string()));
    }

    #[test]
    fn unknown_parent_is_rejected_by_add_child() {
        let mut types = SetOfTypes::new();
        let err = types.add_child("a", "ghost").unwrap_err();
        assert!(matches!(err, DomainError::UnknownParentType { .. }));
    }
}
