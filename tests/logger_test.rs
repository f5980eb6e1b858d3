use std::sync::Mutex;

use log::{debug, info, LevelFilter};
use tempos_proc::{console, logger, println};

static OUTPUT: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn capture(byte: u8) {
    OUTPUT.lock().unwrap().push(byte);
}

fn output() -> String {
    String::from_utf8(OUTPUT.lock().unwrap().clone()).unwrap()
}

#[test]
fn records_reach_the_console() {
    console::set_putchar(capture);
    logger::init(LevelFilter::Info).unwrap();
    assert!(logger::init(LevelFilter::Trace).is_err(), "the logger is installed once");

    info!("task layer up");
    debug!("not shown");
    println!("plain {}", 1);

    let output = output();
    assert!(output.contains("info"));
    assert!(output.contains("task layer up\n"));
    assert!(!output.contains("not shown"));
    assert!(output.ends_with("plain 1\n"));
}
