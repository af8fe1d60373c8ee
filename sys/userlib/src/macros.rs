// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Longest line `sys_log!` will print; the rest is cut off.
pub const LOG_LINE_MAX: usize = 255;

cfg_if::cfg_if! {
    if #[cfg(feature = "log-print")] {
        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {
                $crate::macros::log_line(format_args!($s))
            };
            ($s:expr, $($tt:tt)*) => {
                $crate::macros::log_line(format_args!($s, $($tt)*))
            };
        }
    } else if #[cfg(feature = "log-null")] {
        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {};
            ($s:expr, $($x:expr),*$(,)?) => {
                {
                    $(
                        let _ = &$x;
                    )*
                }
            };
        }
    } else {
        // Note: we provide macros that contain compile_error, instead of just
        // using compile_error here, to allow programs to omit these features
        // if they don't use logging.

        #[macro_export]
        macro_rules! sys_log {
            ($s:expr) => {
                compile_error!(concat!(
                        "to use sys_log! must enable either ",
                        "'log-print' or 'log-null' feature"
                ))
            };
            ($s:expr, $($tt:tt)*) => {
                compile_error!(concat!(
                        "to use sys_log! must enable either ",
                        "'log-print' or 'log-null' feature"
                ))
            };
        }
    }
}

/// Checks a precondition of a syscall wrapper. Failing one is a bug in the
/// program, so it doesn't get to trap.
#[macro_export]
macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

/// Formats `args` into a NUL-terminated line, truncating if needed.
pub fn format_line(
    args: core::fmt::Arguments<'_>,
) -> heapless::String<{ LOG_LINE_MAX + 1 }> {
    use core::fmt::Write;

    let mut line = Truncating(heapless::String::new());
    line.write_fmt(args).ok();
    let mut line = line.0;
    // Room for this was held back by `Truncating`.
    line.push('\0').ok();
    line
}

#[cfg(feature = "log-print")]
pub fn log_line(args: core::fmt::Arguments<'_>) {
    let line = format_line(args);
    if let Ok(msg) = core::ffi::CStr::from_bytes_with_nul(line.as_bytes()) {
        crate::sys_print(msg).ok();
    }
}

/// Keeps whatever fits in `LOG_LINE_MAX` bytes, on a character boundary.
struct Truncating(heapless::String<{ LOG_LINE_MAX + 1 }>);

impl core::fmt::Write for Truncating {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if c == '\0' || self.0.len() + c.len_utf8() > LOG_LINE_MAX {
                continue;
            }
            self.0.push(c).ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_terminated() {
        let line = format_line(format_args!("pid {}", 7));
        assert_eq!(line.as_bytes(), b"pid 7\0");
    }

    #[test]
    fn long_lines_are_cut() {
        let long = "é".repeat(200);
        let line = format_line(format_args!("{long}"));
        assert_eq!(line.len(), 255);
        assert!(line.ends_with('\0'));
        assert!(core::str::from_utf8(line.as_bytes()).is_ok());
    }

    #[test]
    fn interior_nuls_are_dropped() {
        let line = format_line(format_args!("a\0b"));
        assert_eq!(line.as_bytes(), b"ab\0");
    }
}
