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

use anyhow::Result;
use clap::Parser as clap_parser;
use lang57::compile_front;
use lang57::file_reader::DiskFileReader;
use std::fs;
use std::path::PathBuf;

/// Parses 57 source text and writes the AST in the prefix text format.
#[derive(clap_parser)]
#[clap(version = "0.1.0")]
struct Opts {
    /// Source file to compile
    input: PathBuf,
    /// Where to write the AST text
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();

    let reader = DiskFileReader;
    let ast_text = compile_front(&opts.input, &reader)?;

    fs::write(&opts.output, ast_text)?;
    println!(
        "Successfully parsed {} to {}",
        opts.input.display(),
        opts.output.display()
    );

    Ok(())
}
