/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use crate::ir::IrRegister;

/// Stable index into the global [`NameTable`]. The AST stores only these.
pub type NameId = usize;

/// One interned identifier or string literal. Function names additionally
/// hold a handle to the local scope built for them during lowering.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    pub text: String,
    pub local_scope: Option<usize>,
}

/// Append-only table of every lexeme the compiler has seen. Indices never
/// change after insertion.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NameTable {
    names: Vec<Name>,
}

impl NameTable {
    pub fn new() -> Self {
        NameTable::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, id: NameId) -> &Name {
        &self.names[id]
    }

    pub fn text(&self, id: NameId) -> &str {
        &self.names[id].text
    }

    pub fn find(&self, text: &str) -> Option<NameId> {
        self.names.iter().position(|name| name.text == text)
    }

    /// Returns the id of `text`, inserting it on first sight.
    pub fn intern(&mut self, text: &str) -> NameId {
        if let Some(id) = self.find(text) {
            return id;
        }

        self.names.push(Name {
            text: text.to_string(),
            local_scope: None,
        });
        self.names.len() - 1
    }

    pub fn set_local_scope(&mut self, id: NameId, scope: usize) {
        self.names[id].local_scope = Some(scope);
    }
}

/// A variable slot inside one function frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlot {
    pub name: NameId,
    /// Offset from the frame base register (positive for parameters,
    /// negative for locals).
    pub mem_shift: i64,
    pub base_reg: IrRegister,
}

/// Parameters and locals of one function, in declaration order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LocalScope {
    slots: Vec<LocalSlot>,
}

impl LocalScope {
    pub fn new() -> Self {
        LocalScope::default()
    }

    pub fn push(&mut self, slot: LocalSlot) {
        self.slots.push(slot);
    }

    pub fn find(&self, name: NameId) -> Option<&LocalSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn contains(&self, name: NameId) -> bool {
        self.find(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
