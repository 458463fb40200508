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

//! ELF64 executable layout.
//!
//! The image has three PT_LOAD segments at fixed addresses: the standard
//! library code copied from the prebuilt blob, the rodata segment (stdlib
//! rodata, then user immediates, then user strings), and the user code.
//! The entry point is the first byte of user code.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Seek, SeekFrom, Write};

use crate::codegen::rodata::Rodata;

pub const STDLIB_CODE_ADDR: u64 = 0x401000;
pub const RODATA_ADDR: u64 = 0x402000;
pub const PROGRAM_CODE_ADDR: u64 = 0x403000;

// Entry points inside the standard library blob.
pub const STDLIB_IN_FLOAT: u64 = 0x401000;
pub const STDLIB_OUT_STRING: u64 = 0x40110A;
pub const STDLIB_OUT_FLOAT: u64 = 0x401153;
pub const STDLIB_HLT: u64 = 0x4012C3;

const STDLIB_FILE_POS: u64 = 0x1000;
const RODATA_FILE_POS: u64 = 0x2000;
const PROGRAM_CODE_FILE_POS: u64 = 0x3000;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_R: u32 = 4;

/// The two segments of the prebuilt standard library that get copied into
/// every produced executable.
pub struct StdLibImage {
    pub code: Vec<u8>,
    pub rodata: Vec<u8>,
}

/// Parses the standard-library blob and pulls out its code and rodata
/// segments. The blob must be the fixed-layout ELF this compiler links
/// against: three program headers, entry at the code segment base.
pub fn parse_stdlib_image(blob: &[u8]) -> Result<StdLibImage> {
    if blob.len() < EHDR_SIZE as usize {
        bail!("blob is too short to be an ELF file");
    }
    if &blob[0..4] != b"\x7fELF" {
        bail!("blob is missing the ELF magic");
    }
    if blob[4] != 2 || blob[5] != 1 {
        bail!("blob is not a 64-bit little-endian ELF");
    }

    let mut cursor = Cursor::new(blob);
    cursor.set_position(24);
    let entry = cursor.read_u64::<LittleEndian>()?;
    let phoff = cursor.read_u64::<LittleEndian>()?;
    cursor.set_position(56);
    let phnum = cursor.read_u16::<LittleEndian>()?;

    if entry != STDLIB_CODE_ADDR {
        bail!("blob entry point is {:#x}, expected {:#x}", entry, STDLIB_CODE_ADDR);
    }
    if phnum != 3 {
        bail!("blob has {} program headers, expected 3", phnum);
    }

    let mut code = None;
    let mut rodata = None;

    for index in 0..phnum {
        cursor.set_position(phoff + index as u64 * PHDR_SIZE);
        let p_type = cursor.read_u32::<LittleEndian>()?;
        let _p_flags = cursor.read_u32::<LittleEndian>()?;
        let p_offset = cursor.read_u64::<LittleEndian>()?;
        let p_vaddr = cursor.read_u64::<LittleEndian>()?;
        let _p_paddr = cursor.read_u64::<LittleEndian>()?;
        let p_filesz = cursor.read_u64::<LittleEndian>()?;

        if p_type != PT_LOAD {
            continue;
        }

        let start = usize::try_from(p_offset).context("segment offset overflows")?;
        let size = usize::try_from(p_filesz).context("segment size overflows")?;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= blob.len())
            .context("segment lies outside the blob")?;
        let bytes = blob[start..end].to_vec();

        match p_vaddr {
            STDLIB_CODE_ADDR => code = Some(bytes),
            RODATA_ADDR => rodata = Some(bytes),
            _ => {}
        }
    }

    let code = code.context("blob has no code segment at the expected address")?;
    let rodata = rodata.context("blob has no rodata segment at the expected address")?;

    log::debug!(
        "stdlib image: {} code bytes, {} rodata bytes",
        code.len(),
        rodata.len()
    );

    Ok(StdLibImage { code, rodata })
}

/// Assembles the final executable image.
pub fn write_executable(
    user_code: &[u8],
    rodata: &Rodata,
    stdlib: &StdLibImage,
) -> Result<Vec<u8>> {
    let rodata_bytes = rodata.to_bytes();
    let rodata_size = stdlib.rodata.len() + rodata_bytes.len();

    if stdlib.code.len() as u64 > RODATA_FILE_POS - STDLIB_FILE_POS {
        bail!("standard library code overflows its segment window");
    }
    if rodata_size as u64 > PROGRAM_CODE_FILE_POS - RODATA_FILE_POS {
        bail!("rodata overflows its segment window");
    }

    let mut image = Cursor::new(Vec::new());

    write_ehdr(&mut image)?;
    write_phdr(
        &mut image,
        PF_R | PF_X,
        STDLIB_FILE_POS,
        STDLIB_CODE_ADDR,
        stdlib.code.len() as u64,
    )?;
    write_phdr(
        &mut image,
        PF_R,
        RODATA_FILE_POS,
        RODATA_ADDR,
        rodata_size as u64,
    )?;
    write_phdr(
        &mut image,
        PF_R | PF_X,
        PROGRAM_CODE_FILE_POS,
        PROGRAM_CODE_ADDR,
        user_code.len() as u64,
    )?;

    image.seek(SeekFrom::Start(STDLIB_FILE_POS))?;
    image.write_all(&stdlib.code)?;

    image.seek(SeekFrom::Start(RODATA_FILE_POS))?;
    image.write_all(&stdlib.rodata)?;
    image.write_all(&rodata_bytes)?;

    image.seek(SeekFrom::Start(PROGRAM_CODE_FILE_POS))?;
    image.write_all(user_code)?;

    Ok(image.into_inner())
}

fn write_ehdr(image: &mut Cursor<Vec<u8>>) -> Result<()> {
    image.write_all(b"\x7fELF")?;
    image.write_all(&[2, 1, 1, 0])?; // 64-bit, little-endian, current, SYSV
    image.write_all(&[0; 8])?;

    image.write_u16::<LittleEndian>(2)?; // ET_EXEC
    image.write_u16::<LittleEndian>(0x3E)?; // EM_X86_64
    image.write_u32::<LittleEndian>(1)?; // EV_CURRENT
    image.write_u64::<LittleEndian>(PROGRAM_CODE_ADDR)?; // e_entry
    image.write_u64::<LittleEndian>(EHDR_SIZE)?; // e_phoff
    image.write_u64::<LittleEndian>(0)?; // e_shoff
    image.write_u32::<LittleEndian>(0)?; // e_flags
    image.write_u16::<LittleEndian>(EHDR_SIZE as u16)?; // e_ehsize
    image.write_u16::<LittleEndian>(PHDR_SIZE as u16)?; // e_phentsize
    image.write_u16::<LittleEndian>(3)?; // e_phnum
    image.write_u16::<LittleEndian>(64)?; // e_shentsize
    image.write_u16::<LittleEndian>(0)?; // e_shnum
    image.write_u16::<LittleEndian>(0)?; // e_shstrndx

    Ok(())
}

fn write_phdr(
    image: &mut Cursor<Vec<u8>>,
    flags: u32,
    file_pos: u64,
    vaddr: u64,
    size: u64,
) -> Result<()> {
    image.write_u32::<LittleEndian>(PT_LOAD)?;
    image.write_u32::<LittleEndian>(flags)?;
    image.write_u64::<LittleEndian>(file_pos)?;
    image.write_u64::<LittleEndian>(vaddr)?;
    image.write_u64::<LittleEndian>(vaddr)?; // p_paddr
    image.write_u64::<LittleEndian>(size)?; // p_filesz
    image.write_u64::<LittleEndian>(size)?; // p_memsz
    image.write_u64::<LittleEndian>(0x1000)?; // p_align

    Ok(())
}
