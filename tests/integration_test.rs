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

use byteorder::{LittleEndian, WriteBytesExt};
use lang57::ast::prefix::{read_ast, write_ast};
use lang57::codegen::elf::{PROGRAM_CODE_ADDR, RODATA_ADDR, STDLIB_CODE_ADDR};
use lang57::file_reader::{DiskFileReader, MockFileReader};
use lang57::parser::parse_source;
use lang57::{compile_back, compile_front};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;

const STDLIB_CODE: &[u8] = &[0xC3; 16];
const STDLIB_RODATA: &[u8] = b"already";

/// Builds a minimal standard-library blob with the three-segment layout the
/// back end expects: code at 0x401000, rodata at 0x402000.
fn fake_stdlib_blob() -> Vec<u8> {
    let mut blob = Cursor::new(Vec::new());

    blob.write_all(b"\x7fELF").unwrap();
    blob.write_all(&[2, 1, 1, 0]).unwrap();
    blob.write_all(&[0; 8]).unwrap();
    blob.write_u16::<LittleEndian>(2).unwrap(); // ET_EXEC
    blob.write_u16::<LittleEndian>(0x3E).unwrap(); // EM_X86_64
    blob.write_u32::<LittleEndian>(1).unwrap();
    blob.write_u64::<LittleEndian>(STDLIB_CODE_ADDR).unwrap(); // e_entry
    blob.write_u64::<LittleEndian>(64).unwrap(); // e_phoff
    blob.write_u64::<LittleEndian>(0).unwrap();
    blob.write_u32::<LittleEndian>(0).unwrap();
    blob.write_u16::<LittleEndian>(64).unwrap();
    blob.write_u16::<LittleEndian>(56).unwrap();
    blob.write_u16::<LittleEndian>(3).unwrap(); // e_phnum
    blob.write_u16::<LittleEndian>(64).unwrap();
    blob.write_u16::<LittleEndian>(0).unwrap();
    blob.write_u16::<LittleEndian>(0).unwrap();

    let mut phdr = |flags: u32, offset: u64, vaddr: u64, size: u64| {
        blob.write_u32::<LittleEndian>(1).unwrap(); // PT_LOAD
        blob.write_u32::<LittleEndian>(flags).unwrap();
        blob.write_u64::<LittleEndian>(offset).unwrap();
        blob.write_u64::<LittleEndian>(vaddr).unwrap();
        blob.write_u64::<LittleEndian>(vaddr).unwrap();
        blob.write_u64::<LittleEndian>(size).unwrap();
        blob.write_u64::<LittleEndian>(size).unwrap();
        blob.write_u64::<LittleEndian>(0x1000).unwrap();
    };

    phdr(5, 0x200, STDLIB_CODE_ADDR, STDLIB_CODE.len() as u64);
    phdr(4, 0x300, RODATA_ADDR, STDLIB_RODATA.len() as u64);
    phdr(5, 0x400, 0x404000, 0);

    blob.seek(SeekFrom::Start(0x200)).unwrap();
    blob.write_all(STDLIB_CODE).unwrap();
    blob.seek(SeekFrom::Start(0x300)).unwrap();
    blob.write_all(STDLIB_RODATA).unwrap();

    blob.into_inner()
}

fn compile(source: &str) -> lang57::Executable {
    compile_with_listing(source, false)
}

fn compile_with_listing(source: &str, listing: bool) -> lang57::Executable {
    let mut reader = MockFileReader::default();
    reader.add_file("prog.57", source);
    reader.add_file("StdLib57.bin", fake_stdlib_blob());

    let ast_text = compile_front(Path::new("prog.57"), &reader).unwrap();

    let mut reader = MockFileReader::default();
    reader.add_file("prog.ast", ast_text);
    reader.add_file("StdLib57.bin", fake_stdlib_blob());

    compile_back(
        Path::new("prog.ast"),
        Path::new("StdLib57.bin"),
        listing,
        &reader,
    )
    .unwrap()
}

fn user_code(image: &[u8]) -> &[u8] {
    &image[0x3000..]
}

fn rodata_segment(image: &[u8]) -> &[u8] {
    &image[0x2000..0x3000]
}

#[test]
fn test_hello_world_image() {
    let executable = compile("575757 main 57 . \"Hi\" 57 0 57 {");
    let image = &executable.image;

    // ELF identity and geometry.
    assert_eq!(&image[0..4], b"\x7fELF");
    assert_eq!(
        u64::from_le_bytes(image[24..32].try_into().unwrap()),
        PROGRAM_CODE_ADDR
    );
    assert_eq!(u16::from_le_bytes(image[56..58].try_into().unwrap()), 3);

    // The stdlib segments are copied verbatim.
    assert_eq!(&image[0x1000..0x1000 + STDLIB_CODE.len()], STDLIB_CODE);
    let rodata = rodata_segment(image);
    assert_eq!(&rodata[..STDLIB_RODATA.len()], STDLIB_RODATA);

    // User rodata follows the stdlib's: the interned 0.0, then "Hi\0".
    let user_rodata = &rodata[STDLIB_RODATA.len()..];
    assert_eq!(&user_rodata[0..8], &0.0f64.to_le_bytes());
    assert_eq!(&user_rodata[8..11], b"Hi\0");

    // Entry: CALL main skips over CALL StdHlt.
    let code = user_code(image);
    assert_eq!(code[0], 0xE8);
    assert_eq!(i32::from_le_bytes(code[1..5].try_into().unwrap()), 5);
    assert_eq!(code[5], 0xE8);

    // main starts with the standard prologue.
    assert_eq!(code[10], 0x55);
    assert_eq!(&code[11..14], &[0x48, 0x8B, 0xEC]);
}

#[test]
fn test_ast_format_round_trip() {
    let source = "575757 square 575757 x 57 x / x 57 { \
                  575757 main 57 . square { 7 57 57 0 57 {";
    let ast = parse_source(source).unwrap();

    let text = write_ast(&ast);
    let reread = read_ast(&text).unwrap();

    assert_eq!(reread, ast);
    assert_eq!(write_ast(&reread), text);
}

#[test]
fn test_prefix_text_shape() {
    let ast = parse_source("575757 main 57 0 57 {").unwrap();
    let text = write_ast(&ast);

    assert!(text.starts_with("(TYPE (TYPE_INT nil nil )(FUNC (main "));
    assert!(text.contains("(RETURN (0 nil nil )nil )"));
}

#[test]
fn test_arithmetic_interns_both_operands() {
    // Written `2 - 3`, meaning 2 + 3.
    let executable = compile("575757 main 57 . ( 2 - 3 ) 57 0 57 {");
    let rodata = rodata_segment(&executable.image);
    let user_rodata = &rodata[STDLIB_RODATA.len()..];

    assert_eq!(&user_rodata[0..8], &2.0f64.to_le_bytes());
    assert_eq!(&user_rodata[8..16], &3.0f64.to_le_bytes());

    // The print site stores the value and calls the float printer.
    let code = user_code(&executable.image);
    let addsd = [0xF2, 0x0F, 0x58, 0xC1];
    assert!(code.windows(4).any(|w| w == addsd));
}

#[test]
fn test_conditional_emits_je_over_body() {
    let executable = compile(
        "575757 main 57 \
         575757 a == 1 57 \
         57? a != 1 57 . 1 57 \
         0 57 {",
    );
    let code = user_code(&executable.image);

    // The comparison's JE plus the zero-test JE of the if itself.
    let je_sites = code
        .windows(2)
        .filter(|w| w == &[0x0F, 0x84])
        .count();
    assert!(je_sites >= 2, "expected JE sites, found {}", je_sites);
}

#[test]
fn test_while_loop_jumps_backwards() {
    let executable = compile(
        "575757 main 57 \
         575757 i == 5 57 \
         57! i 57 57 . i 57 i == i + 1 57 { \
         0 57 {",
    );
    let code = user_code(&executable.image);

    // The loop closes with JMP rel32 whose displacement is negative.
    let mut found_backward_jmp = false;
    for (index, window) in code.windows(5).enumerate() {
        if window[0] != 0xE9 {
            continue;
        }
        let rel = i32::from_le_bytes(window[1..5].try_into().unwrap());
        if rel < 0 {
            let target = (index as i64) + 5 + rel as i64;
            assert!(target >= 0 && (target as usize) < code.len());
            found_backward_jmp = true;
        }
    }
    assert!(found_backward_jmp);
}

#[test]
fn test_user_function_callee_cleans_one_parameter() {
    let executable = compile(
        "575757 square 575757 x 57 x / x 57 { \
         575757 main 57 . square { 7 57 57 0 57 {",
    );
    let code = user_code(&executable.image);

    // square ends with RET 16: one 16-byte parameter slot.
    let ret16 = [0xC2, 0x10, 0x00];
    assert!(code.windows(3).any(|w| w == ret16));
    // main ends with RET 0.
    let ret0 = [0xC2, 0x00, 0x00];
    assert!(code.windows(3).any(|w| w == ret0));
}

#[test]
fn test_repeated_literal_shares_one_rodata_string() {
    let executable = compile(
        "575757 main 57 . \"twice\" 57 . \"twice\" 57 0 57 {",
    );
    let rodata = rodata_segment(&executable.image);

    let needle = b"twice\0";
    let occurrences = rodata
        .windows(needle.len())
        .filter(|w| w == needle)
        .count();
    assert_eq!(occurrences, 1);

    // Both call sites load the same absolute address.
    let code = user_code(&executable.image);
    let lea = [0x48, 0x8D, 0x04, 0x25];
    let mut targets = Vec::new();
    for window in code.windows(8) {
        if window[0..4] == lea {
            targets.push(i32::from_le_bytes(window[4..8].try_into().unwrap()));
        }
    }
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0], targets[1]);
}

#[test]
fn test_read_calls_the_stdlib_input_routine() {
    // `{` in expression position is the read builtin.
    let executable = compile("575757 main 57 . { 57 0 57 {");
    let code = user_code(&executable.image);

    // Some CALL site must land exactly on the input routine at 0x401000.
    let mut found = false;
    for (index, window) in code.windows(5).enumerate() {
        if window[0] != 0xE8 {
            continue;
        }
        let rel = i32::from_le_bytes(window[1..5].try_into().unwrap());
        let site_end = PROGRAM_CODE_ADDR as i64 + index as i64 + 5;
        if site_end + rel as i64 == STDLIB_CODE_ADDR as i64 {
            found = true;
        }
    }
    assert!(found);
}

#[test]
fn test_listing_written_on_request() {
    let executable = compile_with_listing("575757 main 57 . \"Hi\" 57 0 57 {", true);
    let listing = executable.listing.expect("listing requested");

    assert!(listing.starts_with("%include 'StdLib57.s'"));
    assert!(listing.contains("main:\n"));
    assert!(listing.contains("\tPUSH RBP\n"));
    assert!(listing.contains("\tCALL StdStrOut\n"));
    assert!(listing.contains("section .rodata\n"));

    let executable = compile("575757 main 57 0 57 {");
    assert!(executable.listing.is_none());
}

#[test]
fn test_semantic_error_surfaces_through_the_pipeline() {
    let mut reader = MockFileReader::default();
    reader.add_file("prog.57", "575757 main 57 ghost == 1 57 0 57 {");

    let err = compile_front(Path::new("prog.57"), &reader).unwrap_err();
    assert!(format!("{:#}", err).contains("undeclared name 'ghost'"));
}

#[test]
fn test_lexical_error_reports_line() {
    let mut reader = MockFileReader::default();
    reader.add_file("prog.57", "575757 main 57\n$ 57 {");

    let err = compile_front(Path::new("prog.57"), &reader).unwrap_err();
    let rendered = format!("{:#}", err);
    assert!(rendered.contains("line 2"), "{rendered}");
}

#[test]
fn test_corrupt_stdlib_blob_is_rejected() {
    let mut reader = MockFileReader::default();
    reader.add_file("prog.ast", "(TYPE (TYPE_INT nil nil )(FUNC (main nil (LINE_END (RETURN (0 nil nil )nil )nil ))nil ))\n");
    reader.add_file("StdLib57.bin", b"garbage".to_vec());

    let err = compile_back(
        Path::new("prog.ast"),
        Path::new("StdLib57.bin"),
        false,
        &reader,
    )
    .unwrap_err();
    assert!(format!("{:#}", err).contains("standard library"));
}

#[test]
fn test_pipeline_through_real_files() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("prog.57");
    let ast_path = dir.path().join("prog.ast");
    let stdlib_path = dir.path().join("StdLib57.bin");

    std::fs::write(&source_path, "575757 main 57 . \"Hi\" 57 0 57 {").unwrap();
    std::fs::write(&stdlib_path, fake_stdlib_blob()).unwrap();

    let reader = DiskFileReader;
    let ast_text = compile_front(&source_path, &reader).unwrap();
    std::fs::write(&ast_path, ast_text).unwrap();

    let executable = compile_back(&ast_path, &stdlib_path, false, &reader).unwrap();
    assert_eq!(&executable.image[0..4], b"\x7fELF");
    assert!(executable.image.len() > 0x3000);
}
