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

//! Compiler for the 57 language: a hand-written front end producing a
//! prefix-format AST, and a back end that lowers the AST to a linear IR,
//! encodes x86-64 machine code in two passes, and links the result with a
//! prebuilt standard library into a standalone ELF64 executable.

pub mod ast;
pub mod codegen;
pub mod errors;
pub mod file_reader;
pub mod ir;
pub mod lexer;
pub mod names;
pub mod parser;

use std::path::Path;

use anyhow::{Context, Result};
use file_reader::FileReader;

/// Front end: source text in, prefix-format AST text out.
pub fn compile_front<F: FileReader>(source_path: &Path, reader: &F) -> Result<String> {
    let source = reader.read_text(source_path)?;

    let ast = parser::parse_source(&source).context("Failed during the parsing stage")?;

    Ok(ast::prefix::write_ast(&ast))
}

/// What the back end produces for one AST file.
#[derive(Debug)]
pub struct Executable {
    pub image: Vec<u8>,
    pub listing: Option<String>,
}

/// Back end: AST text in, linked ELF image (and optional NASM listing) out.
pub fn compile_back<F: FileReader>(
    ast_path: &Path,
    stdlib_path: &Path,
    want_listing: bool,
    reader: &F,
) -> Result<Executable> {
    let ast_text = reader.read_text(ast_path)?;
    let mut ast = ast::prefix::read_ast(&ast_text).context("Failed reading the AST file")?;

    let lowered = ir::build::lower(&mut ast).context("Failed during lowering")?;
    let mut ir_list = lowered.ir;

    let blob = reader.read_binary(stdlib_path)?;
    let stdlib = codegen::elf::parse_stdlib_image(&blob)
        .context("Failed to load the standard library blob")?;

    let translation =
        codegen::translate(&mut ir_list, stdlib.rodata.len() as u64, want_listing)
            .context("Failed during code generation")?;

    let image = codegen::elf::write_executable(&translation.code, &translation.rodata, &stdlib)
        .context("Failed writing the ELF image")?;

    Ok(Executable {
        image,
        listing: translation.listing,
    })
}
