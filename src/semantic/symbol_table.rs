use std::collections::HashMap;

use super::types::Type;
use crate::common::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Param,
}

/// One declared name, with the usage counters the warning pass reads when
/// the scope closes.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub ty: Type,
    pub span: Span,
    pub initialized: bool,
    pub reads: usize,
    pub writes: usize,
}

impl Symbol {
    pub fn new(kind: SymbolKind, ty: Type, span: Span) -> Self {
        Self {
            kind,
            ty,
            span,
            initialized: kind == SymbolKind::Param,
            reads: 0,
            writes: 0,
        }
    }
}

struct Scope {
    tag: String,
    symbols: HashMap<String, Symbol>,
    /// Declaration order, so scope-exit warnings come out deterministic.
    order: Vec<String>,
}

/// Lexically scoped stack of frames. Frames pop on scope exit and hand the
/// analyzer their symbols for usage warnings and snapshots.
pub struct SymbolTable {
    scopes: Vec<Scope>,
    scope_counter: usize,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![],
            scope_counter: 0,
        }
    }

    pub fn push_scope(&mut self, function: &str, tag: &str) -> String {
        let label = format!("{}:{}:{}", function, tag, self.scope_counter);
        self.scope_counter += 1;
        self.scopes.push(Scope {
            tag: label.clone(),
            symbols: HashMap::new(),
            order: vec![],
        });
        label
    }

    /// Pop the innermost frame, returning its label and symbols in
    /// declaration order.
    pub fn pop_scope(&mut self) -> (String, Vec<(String, Symbol)>) {
        let mut scope = self.scopes.pop().expect("scope stack underflow");
        let symbols = scope
            .order
            .drain(..)
            .map(|name| {
                let symbol = scope.symbols.remove(&name).unwrap();
                (name, symbol)
            })
            .collect();
        (scope.tag, symbols)
    }

    /// Declare in the innermost frame. Fails when the name is already
    /// present in the same frame.
    pub fn declare(&mut self, name: &str, symbol: Symbol) -> Result<(), Span> {
        let scope = self.scopes.last_mut().expect("no open scope");
        if let Some(existing) = scope.symbols.get(name) {
            return Err(existing.span);
        }
        scope.symbols.insert(name.to_owned(), symbol);
        scope.order.push(name.to_owned());
        Ok(())
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.symbols.get_mut(name))
    }

    /// Whether an *enclosing* frame (not the innermost) already binds the
    /// name — the shadowing warning trigger.
    pub fn shadows_outer(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .rev()
            .skip(1)
            .any(|scope| scope.symbols.contains_key(name))
    }

    /// All visible names, for "did you mean" suggestions.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .iter()
            .flat_map(|scope| scope.symbols.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sym(ty: Type) -> Symbol {
        Symbol::new(SymbolKind::Var, ty, Span::synthetic())
    }

    #[test]
    fn test_inner_scope_shadows_and_pops() {
        let mut table = SymbolTable::new();
        table.push_scope("__main__", "main");
        table.declare("x", sym(Type::Int)).unwrap();
        table.push_scope("__main__", "block");
        table.declare("x", sym(Type::Float)).unwrap();
        assert!(table.shadows_outer("x"));
        assert_eq!(table.lookup_mut("x").unwrap().ty, Type::Float);
        table.pop_scope();
        assert_eq!(table.lookup_mut("x").unwrap().ty, Type::Int);
    }

    #[test]
    fn test_redeclaration_in_same_scope_fails() {
        let mut table = SymbolTable::new();
        table.push_scope("__main__", "main");
        table.declare("x", sym(Type::Int)).unwrap();
        assert!(table.declare("x", sym(Type::Int)).is_err());
    }

    #[test]
    fn test_pop_returns_declaration_order() {
        let mut table = SymbolTable::new();
        table.push_scope("f", "fn f");
        table.declare("b", sym(Type::Int)).unwrap();
        table.declare("a", sym(Type::Int)).unwrap();
        let (_, symbols) = table.pop_scope();
        let names: Vec<_> = symbols.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
