use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    // The console has no device of its own. The board code hands us a
    // byte sink (serial port, VGA writer...) once it is up; until then
    // everything printed is dropped.
    static ref CONSOLE: Mutex<Console> = Mutex::new(Console { putchar: None });
}

struct Console {
    putchar: Option<fn(u8)>,
}

impl fmt::Write for Console {
    /// Prints a string, which can contain non-ASCII characters.
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let putchar = match self.putchar {
            Some(putchar) => putchar,
            None => return Ok(()),
        };

        // The sink accepts one `u8` at a time. Non-ASCII characters are
        // sent as their utf-8 encoding, one call per byte.
        let mut buffer = [0u8; 4];
        for c in s.chars() {
            for code_point in c.encode_utf8(&mut buffer).as_bytes().iter() {
                putchar(*code_point);
            }
        }
        Ok(())
    }
}

/// Routes console output to `putchar`.
pub fn set_putchar(putchar: fn(u8)) {
    CONSOLE.lock().putchar = Some(putchar);
}

// Prints given up because the console was busy.
static DROPPED: AtomicUsize = AtomicUsize::new(0);

/// Prints formatted string by [`core::format_args!`].
///
/// The console is only ever busy when this print interrupted another one
/// on the same CPU, e.g. a record logged by the preemption alarm. Such
/// output is dropped and counted.
pub fn _print(args: fmt::Arguments) {
    match CONSOLE.try_lock() {
        // A sink never fails, so neither does the formatting.
        Some(mut console) => {
            let _ = console.write_fmt(args);
        }
        None => {
            DROPPED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// How many prints were dropped on a busy console.
pub fn dropped() -> usize {
    DROPPED.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::_print(format_args!($fmt $(, $($arg)+)?));
    }
}

#[macro_export]
macro_rules! println {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::_print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?));
    }
}

pub struct HexDump<'a>(pub &'a [u8]);

impl<'a> fmt::Display for HexDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.0.chunks(16) {
            for byte in chunk {
                write!(f, "{:02X} ", byte)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
