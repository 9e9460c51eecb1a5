//! Deterministic, collision-avoiding import name allocation.

use rustc_hash::{FxHashMap, FxHashSet};

/// A generated import the rewritten module needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImport {
    pub binding: String,
    pub specifier: String,
}

/// Allocates local binding names for field sub-components.
///
/// The first candidate for a field is `<field>Field`, then `<field>0`,
/// `<field>1`, ... until no existing lexical binding or already-allocated
/// name collides. Allocation is injective within one compile: a field asked
/// for twice gets the same binding, two fields never share one.
pub struct ImportAllocator {
    taken: FxHashSet<String>,
    by_field: FxHashMap<String, String>,
    imports: Vec<NewImport>,
}

impl ImportAllocator {
    /// `existing` is every name already bound in the template module's
    /// enclosing scope.
    pub fn new(existing: FxHashSet<String>) -> Self {
        Self {
            taken: existing,
            by_field: FxHashMap::default(),
            imports: Vec::new(),
        }
    }

    /// Name and import a sub-component for `field`, importing it from
    /// `specifier`. Idempotent per field.
    pub fn allocate(&mut self, field: &str, specifier: &str) -> String {
        if let Some(binding) = self.by_field.get(field) {
            return binding.clone();
        }

        let base = identifier_safe(field);
        let mut candidate = format!("{base}Field");
        let mut counter = 0usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}{counter}");
            counter += 1;
        }

        self.taken.insert(candidate.clone());
        self.by_field.insert(field.to_string(), candidate.clone());
        self.imports.push(NewImport {
            binding: candidate.clone(),
            specifier: specifier.to_string(),
        });
        candidate
    }

    /// Imports required by allocations so far, in allocation order.
    pub fn imports(&self) -> &[NewImport] {
        &self.imports
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

/// Turn a field name into a valid JS identifier stem.
fn identifier_safe(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
