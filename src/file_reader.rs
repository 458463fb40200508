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

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File access used by the compiler: source text and AST text are read as
/// UTF-8, the standard-library blob as raw bytes.
pub trait FileReader {
    fn read_text(&self, path: &Path) -> Result<String>;
    fn read_binary(&self, path: &Path) -> Result<Vec<u8>>;
}

// production file reader
pub struct DiskFileReader;

impl FileReader for DiskFileReader {
    fn read_text(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

// in-memory file reader for testing; stores raw bytes and decodes on demand
#[derive(Default)]
pub struct MockFileReader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MockFileReader {
    pub fn add_file(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(PathBuf::from(path), content.into());
    }
}

impl FileReader for MockFileReader {
    fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = self.read_binary(path)?;
        String::from_utf8(bytes)
            .with_context(|| format!("Mock file is not UTF-8: {}", path.display()))
    }

    fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Mock file not found: {}", path.display()))
    }
}
