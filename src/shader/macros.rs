//! Shader macros and value-comparable macro collections.

use std::collections::BTreeMap;

/// Value of a compile-time shader macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacroValue {
    /// Emits a bare `#define NAME`.
    Flag,
    /// Emits `#define NAME value`.
    Int(i64),
}

/// A single named macro.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderMacro {
    pub name: String,
    pub value: MacroValue,
}

impl ShaderMacro {
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: MacroValue::Flag,
        }
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: MacroValue::Int(value),
        }
    }

    pub fn to_directive(&self) -> String {
        match self.value {
            MacroValue::Flag => format!("#define {}", self.name),
            MacroValue::Int(value) => format!("#define {} {}", self.name, value),
        }
    }
}

/// An immutable set of macros.
///
/// Two collections are equal when they hold the same names with equal
/// values, regardless of insertion order. `with` and `without` never mutate;
/// they return a fresh collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MacroCollection {
    macros: BTreeMap<String, MacroValue>,
}

impl MacroCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_macros(macros: impl IntoIterator<Item = ShaderMacro>) -> Self {
        Self {
            macros: macros.into_iter().map(|m| (m.name, m.value)).collect(),
        }
    }

    /// Copy of this collection with `shader_macro` inserted (or replaced).
    pub fn with(&self, shader_macro: &ShaderMacro) -> Self {
        let mut macros = self.macros.clone();
        macros.insert(shader_macro.name.clone(), shader_macro.value);
        Self { macros }
    }

    /// Copy of this collection with `name` removed.
    pub fn without(&self, name: &str) -> Self {
        let mut macros = self.macros.clone();
        macros.remove(name);
        Self { macros }
    }

    pub fn get(&self, name: &str) -> Option<MacroValue> {
        self.macros.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// The `#define` block, one directive per line, sorted by name.
    pub fn generate_defines(&self) -> String {
        let mut block = String::new();
        for (name, value) in &self.macros {
            let shader_macro = ShaderMacro {
                name: name.clone(),
                value: *value,
            };
            block.push_str(&shader_macro.to_directive());
            block.push('\n');
        }
        block
    }
}
