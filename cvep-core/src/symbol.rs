use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use string_cache::DefaultAtom as Atom;

use crate::ContractError;

/// Interned symbol identifier. Cheap to clone and hash on every frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolId(Atom);

impl SymbolId {
    pub fn new(name: &str) -> Self {
        Self(Atom::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(name: &str) -> Self {
        SymbolId::new(name)
    }
}

impl From<String> for SymbolId {
    fn from(name: String) -> Self {
        SymbolId(Atom::from(name))
    }
}

impl From<&SymbolId> for SymbolId {
    fn from(id: &SymbolId) -> Self {
        id.clone()
    }
}

/// Where a symbol sits on screen: centre relative to the screen centre (y up), size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Placement {
    pub position: (f32, f32),
    pub size: (f32, f32),
}

impl Placement {
    pub fn new(position: (f32, f32), size: (f32, f32)) -> Self {
        Self { position, size }
    }
}

/// Index of a registered symbol. Only valid for the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolHandle(usize);

impl SymbolHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SymbolEntry<A> {
    id: SymbolId,
    states: Vec<A>,
    placement: Placement,
    default_visible: bool,
}

impl<A> SymbolEntry<A> {
    pub fn id(&self) -> &SymbolId {
        &self.id
    }

    pub fn states(&self) -> &[A] {
        &self.states
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn default_visible(&self) -> bool {
        self.default_visible
    }
}

/// Symbols in registration order, keyed by identifier.
///
/// Duplicate identifiers and empty state lists are refused at registration, so
/// every entry has at least state 0 to fall back on.
#[derive(Debug, Clone)]
pub struct SymbolRegistry<A> {
    entries: Vec<SymbolEntry<A>>,
    index: HashMap<SymbolId, SymbolHandle>,
}

impl<A> Default for SymbolRegistry<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<A> SymbolRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: impl Into<SymbolId>,
        states: Vec<A>,
        placement: Placement,
    ) -> Result<SymbolHandle, ContractError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(ContractError::DuplicateSymbol { symbol: id });
        }
        if states.is_empty() {
            return Err(ContractError::NoStates { symbol: id });
        }

        let handle = SymbolHandle(self.entries.len());
        self.index.insert(id.clone(), handle);
        self.entries.push(SymbolEntry {
            id,
            states,
            placement,
            default_visible: true,
        });
        Ok(handle)
    }

    pub fn handle(&self, id: &SymbolId) -> Result<SymbolHandle, ContractError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ContractError::UnknownSymbol { symbol: id.clone() })
    }

    pub fn entry(&self, handle: SymbolHandle) -> Option<&SymbolEntry<A>> {
        self.entries.get(handle.0)
    }

    pub fn get(&self, id: &SymbolId) -> Option<&SymbolEntry<A>> {
        self.index.get(id).and_then(|h| self.entries.get(h.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolHandle, &SymbolEntry<A>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (SymbolHandle(i), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails unless `state` indexes one of the symbol's assets.
    pub fn check_state(&self, handle: SymbolHandle, state: u8) -> Result<(), ContractError> {
        let entry = self
            .entries
            .get(handle.0)
            .ok_or_else(|| ContractError::UnknownSymbol {
                symbol: SymbolId::new(&format!("#{}", handle.0)),
            })?;
        if state as usize >= entry.states.len() {
            return Err(ContractError::StateOutOfRange {
                symbol: entry.id.clone(),
                state,
                states: entry.states.len(),
            });
        }
        Ok(())
    }

    pub fn set_default_visible(&mut self, id: &SymbolId, visible: bool) -> Result<(), ContractError> {
        let handle = self.handle(id)?;
        self.entries[handle.0].default_visible = visible;
        Ok(())
    }

    pub fn set_all_default_visible(&mut self, visible: bool) {
        for entry in &mut self.entries {
            entry.default_visible = visible;
        }
    }

    /// Snapshot of every symbol's default-visible flag, in registration order.
    pub fn default_visibility(&self) -> Vec<bool> {
        self.entries.iter().map(|e| e.default_visible).collect()
    }

    pub fn restore_default_visibility(&mut self, snapshot: &[bool]) {
        for (entry, &visible) in self.entries.iter_mut().zip(snapshot) {
            entry.default_visible = visible;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement() -> Placement {
        Placement::new((10.0, -20.0), (32.0, 32.0))
    }

    #[test]
    fn duplicate_registration_keeps_original() {
        let mut reg = SymbolRegistry::new();
        reg.register("A", vec!["black", "white"], placement()).unwrap();

        let err = reg
            .register("A", vec!["red"], Placement::new((0.0, 0.0), (1.0, 1.0)))
            .unwrap_err();
        assert_eq!(
            err,
            ContractError::DuplicateSymbol {
                symbol: SymbolId::new("A")
            }
        );

        let entry = reg.get(&SymbolId::new("A")).unwrap();
        assert_eq!(entry.states(), &["black", "white"]);
        assert_eq!(entry.placement(), placement());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn registration_requires_states() {
        let mut reg: SymbolRegistry<&str> = SymbolRegistry::new();
        assert!(matches!(
            reg.register("A", vec![], placement()),
            Err(ContractError::NoStates { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn check_state_bounds() {
        let mut reg = SymbolRegistry::new();
        let h = reg.register("A", vec![0u8, 1, 2], placement()).unwrap();
        assert!(reg.check_state(h, 2).is_ok());
        assert_eq!(
            reg.check_state(h, 3),
            Err(ContractError::StateOutOfRange {
                symbol: SymbolId::new("A"),
                state: 3,
                states: 3
            })
        );
    }

    #[test]
    fn default_visibility_snapshot_round_trip() {
        let mut reg = SymbolRegistry::new();
        reg.register("A", vec![()], placement()).unwrap();
        reg.register("B", vec![()], placement()).unwrap();
        reg.set_default_visible(&SymbolId::new("B"), false).unwrap();

        let snapshot = reg.default_visibility();
        reg.set_all_default_visible(false);
        assert_eq!(reg.default_visibility(), vec![false, false]);

        reg.restore_default_visibility(&snapshot);
        assert_eq!(reg.default_visibility(), vec![true, false]);
    }

    #[test]
    fn unknown_symbol_lookup_fails() {
        let reg: SymbolRegistry<()> = SymbolRegistry::new();
        assert!(matches!(
            reg.handle(&SymbolId::new("Z")),
            Err(ContractError::UnknownSymbol { .. })
        ));
    }
}
