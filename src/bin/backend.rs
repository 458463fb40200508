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
use lang57::compile_back;
use lang57::file_reader::DiskFileReader;
use std::fs;
use std::path::PathBuf;

/// Compiles a prefix-format AST file into a standalone ELF64 executable.
#[derive(clap_parser)]
#[clap(version = "0.1.0")]
struct Opts {
    /// AST file produced by the front end
    input: PathBuf,
    /// Where to write the executable
    output: PathBuf,
    /// Additionally write a NASM-style listing next to the input
    #[clap(short = 'S')]
    asm_listing: bool,
    /// Prebuilt standard library blob to link in
    #[clap(long, default_value = "StdLib57.bin")]
    stdlib: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();

    let reader = DiskFileReader;
    let executable = compile_back(&opts.input, &opts.stdlib, opts.asm_listing, &reader)?;

    fs::write(&opts.output, &executable.image)?;
    make_executable(&opts.output)?;

    if let Some(listing) = &executable.listing {
        let listing_path = format!("{}.s", opts.input.display());
        fs::write(&listing_path, listing)?;
        println!("Wrote assembly listing to {}", listing_path);
    }

    println!(
        "Successfully compiled {} to {}",
        opts.input.display(),
        opts.output.display()
    );

    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &PathBuf) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &PathBuf) -> Result<()> {
    Ok(())
}
