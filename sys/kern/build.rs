// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Tunables read from the environment at build time, as
/// `(variable, constant, type, default)`.
const TUNABLES: &[(&str, &str, &str, u64)] = &[
    ("KERNEL_MAX_PROCESSES", "MAX_PROCESSES", "usize", 16),
    ("KERNEL_MAX_PIPES", "MAX_PIPES", "usize", 16),
    ("KERNEL_MAX_HANDLES", "MAX_HANDLES", "usize", 8),
    ("KERNEL_PIPE_CAPACITY", "PIPE_CAPACITY", "usize", 1024),
    ("KERNEL_TICK_US", "TICK_US", "u64", 1000),
    ("KERNEL_HEAP_LIMIT", "HEAP_LIMIT", "usize", 256 * 1024),
    ("KERNEL_KLOG_UART", "KLOG_UART", "usize", 0x3F20_1000),
    ("KERNEL_DEVICE_BASE", "DEVICE_BASE", "usize", 0x3F00_0000),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    generate_consts()?;
    Ok(())
}

fn parse(text: &str) -> Result<u64, std::num::ParseIntError> {
    let text = text.trim().replace('_', "");
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

fn generate_consts() -> Result<(), Box<dyn std::error::Error>> {
    let out = &PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR unset")?);
    let mut const_file = File::create(out.join("consts.rs"))?;

    writeln!(const_file, "// See build.rs for the variables behind these")?;

    for &(var, name, ty, default) in TUNABLES {
        println!("cargo:rerun-if-env-changed={var}");
        let value = match env::var(var) {
            Ok(text) => parse(&text)
                .map_err(|e| format!("{var}={text:?} is not a number: {e}"))?,
            Err(_) => default,
        };
        check(var, value)?;
        writeln!(const_file, "pub const {name}: {ty} = {value:#x};")?;
    }

    Ok(())
}

fn check(var: &str, value: u64) -> Result<(), String> {
    const PAGE_SIZE: u64 = 4096;
    const TWO_MIB: u64 = 2 * 1024 * 1024;

    let problem = match var {
        "KERNEL_MAX_PROCESSES" | "KERNEL_MAX_PIPES" | "KERNEL_MAX_HANDLES"
        | "KERNEL_PIPE_CAPACITY" | "KERNEL_TICK_US"
            if value == 0 =>
        {
            Some("must be nonzero")
        }
        "KERNEL_MAX_PIPES" if value > u64::from(u16::MAX) => {
            Some("must fit in a pipe id")
        }
        "KERNEL_HEAP_LIMIT" if value % PAGE_SIZE != 0 => {
            Some("must be a whole number of pages")
        }
        "KERNEL_DEVICE_BASE" if value % TWO_MIB != 0 => {
            Some("must be 2 MiB aligned")
        }
        _ => None,
    };
    match problem {
        Some(p) => Err(format!("{var}={value:#x} {p}")),
        None => Ok(()),
    }
}
