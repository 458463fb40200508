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

use crate::errors::CompilerError;
use crate::ir::IrNodeId;
use std::collections::HashMap;

// Maps a label name to the IR node that marks the labelled position. The
// jump target resolved during patching is the node right after the marker.
pub type LabelTable = HashMap<String, IrNodeId>;

pub fn define_label(
    table: &mut LabelTable,
    name: &str,
    marker: IrNodeId,
) -> Result<(), CompilerError> {
    if table.insert(name.to_string(), marker).is_some() {
        return Err(CompilerError::internal(format!(
            "label '{}' defined twice",
            name
        )));
    }
    Ok(())
}

pub fn get_label(table: &LabelTable, name: &str) -> Result<IrNodeId, CompilerError> {
    table.get(name).copied().ok_or_else(|| {
        CompilerError::internal(format!("unresolved label '{}'", name))
    })
}
