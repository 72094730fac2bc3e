//! Name -> heap slot resolution with stack-disciplined scopes.
//!
//! Slots are numbered densely across a whole function. Closing a scope frees exactly
//! the slots it declared, so later scopes reuse them the same way the VM's heap is
//! truncated.

use crate::compile::{CompileErrorKind, CompilerError};

#[derive(Debug, Clone)]
pub struct VarResolver {
    next_slot: usize,
    scopes: Vec<Vec<(String, usize)>>,
}

impl Default for VarResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VarResolver {
    pub fn new() -> Self {
        Self {
            next_slot: 0,
            scopes: vec![Vec::new()],
        }
    }

    /// Declares `name` in the innermost scope and returns its slot.
    pub fn add(&mut self, name: &str) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        let entry = (name.to_string(), slot);
        match self.scopes.last_mut() {
            Some(scope) => scope.push(entry),
            None => self.scopes.push(vec![entry]),
        }
        slot
    }

    /// Innermost binding of `name`.
    pub fn get(&self, name: &str) -> Result<usize, CompilerError> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
            .ok_or_else(|| {
                CompilerError::new(
                    CompileErrorKind::UnknownVariable,
                    format!("cannot find variable of name: {name}"),
                )
            })
    }

    pub fn push(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Closes the innermost scope, returning how many slots it freed.
    pub fn pop(&mut self) -> usize {
        assert!(self.scopes.len() > 1, "scope pop without matching push");
        let freed = self.scopes.pop().map_or(0, |scope| scope.len());
        self.next_slot -= freed;
        freed
    }

    pub fn next_slot(&self) -> usize {
        self.next_slot
    }
}
