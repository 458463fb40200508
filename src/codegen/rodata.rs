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

//! Read-only data interning. Numeric immediates are stored as IEEE-754
//! doubles under `XMM_VALUE_<n>` labels (`XMM_VALUE__<n>` when negative),
//! string literals as NUL-terminated bytes under `STR_<k>` labels. Both
//! tables deduplicate; final virtual addresses are assigned once pass 1 has
//! collected every entry.

#[derive(Debug, Clone, PartialEq)]
pub struct ImmediateEntry {
    pub imm: i64,
    pub label: String,
    pub addr: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringEntry {
    pub string: String,
    pub label: String,
    pub addr: u64,
}

#[derive(Debug, Default)]
pub struct Rodata {
    immediates: Vec<ImmediateEntry>,
    strings: Vec<StringEntry>,
}

impl Rodata {
    pub fn new() -> Self {
        Rodata::default()
    }

    /// Entry for the double value `(double)imm`, inserted on first use.
    pub fn intern_immediate(&mut self, imm: i64) -> &ImmediateEntry {
        if let Some(index) = self.immediates.iter().position(|entry| entry.imm == imm) {
            return &self.immediates[index];
        }

        let label = if imm < 0 {
            format!("XMM_VALUE__{}", imm.unsigned_abs())
        } else {
            format!("XMM_VALUE_{}", imm)
        };
        self.immediates.push(ImmediateEntry {
            imm,
            label,
            addr: 0,
        });
        self.immediates.last().unwrap()
    }

    /// Entry for a string literal, inserted on first use. Labels are handed
    /// out in insertion order.
    pub fn intern_string(&mut self, string: &str) -> &StringEntry {
        if let Some(index) = self
            .strings
            .iter()
            .position(|entry| entry.string == string)
        {
            return &self.strings[index];
        }

        let label = format!("STR_{}", self.strings.len());
        self.strings.push(StringEntry {
            string: string.to_string(),
            label,
            addr: 0,
        });
        self.strings.last().unwrap()
    }

    /// Lays the tables out sequentially from `base`: immediates first (8
    /// bytes each), then strings (length + NUL). Returns the end address.
    pub fn assign_addresses(&mut self, base: u64) -> u64 {
        let mut addr = base;

        for entry in &mut self.immediates {
            entry.addr = addr;
            addr += std::mem::size_of::<f64>() as u64;
        }
        for entry in &mut self.strings {
            entry.addr = addr;
            addr += entry.string.len() as u64 + 1;
        }

        addr
    }

    pub fn immediates(&self) -> &[ImmediateEntry] {
        &self.immediates
    }

    pub fn strings(&self) -> &[StringEntry] {
        &self.strings
    }

    /// Raw segment bytes in layout order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for entry in &self.immediates {
            bytes.extend_from_slice(&(entry.imm as f64).to_le_bytes());
        }
        for entry in &self.strings {
            bytes.extend_from_slice(entry.string.as_bytes());
            bytes.push(0);
        }
        bytes
    }
}
