//! End-to-end tests: assemble wire-format binary images, load them
//! through the real loader and run them to completion.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use ristretto::bytecode::OPCode as Op;
use ristretto::loader::{Image, LoadError, MAGIC_NUMBER};
use ristretto::runtime::Machine;
use ristretto::Word;

/// Assemble a binary image exactly as it appears on disk.
fn wire_image(pool: &[Word], text: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&MAGIC_NUMBER.to_be_bytes());
    bytes.extend_from_slice(&0x10000u32.to_be_bytes()); // pool origin, ignored
    bytes.extend_from_slice(&((pool.len() * 4) as u32).to_be_bytes());
    for word in pool {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes.extend_from_slice(&0u32.to_be_bytes()); // text origin, ignored
    bytes.extend_from_slice(&(text.len() as u32).to_be_bytes());
    bytes.extend_from_slice(text);
    bytes
}

#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Load a wire image and run it against the given input bytes.
fn run_wire(pool: &[Word], text: &[u8], input: &[u8]) -> (Machine, Vec<u8>) {
    let wire = wire_image(pool, text);
    let image = Image::parse(&mut wire.as_slice()).expect("image should load");
    let out = SharedOutput::default();
    let mut machine = Machine::new(
        image,
        Box::new(io::Cursor::new(input.to_vec())),
        Box::new(out.clone()),
    );
    machine.run().expect("program should not fault");
    (machine, out.bytes())
}

#[test]
fn hello_byte_program() {
    let (machine, output) = run_wire(
        &[],
        &[Op::BiPush as u8, 65, Op::Out as u8, Op::Halt as u8],
        &[],
    );
    assert!(machine.finished());
    assert_eq!(output, b"A");
}

#[test]
fn echo_input_until_eof() {
    // loop: IN, DUP, IFEQ +7 -> done, OUT, GOTO -9 -> loop
    //  0: IN
    //  1: DUP
    //  2: IFEQ +7 -> 9
    //  5: OUT
    //  6: GOTO -6 -> 0
    //  9: HALT
    let text = [
        Op::In as u8,
        Op::Dup as u8,
        Op::IfEq as u8, 0x00, 0x07,
        Op::Out as u8,
        Op::Goto as u8, 0xFF, 0xFA, // -6
        Op::Halt as u8,
    ];
    let (machine, output) = run_wire(&[], &text, b"ijvm");
    assert!(machine.finished());
    assert_eq!(output, b"ijvm");
}

#[test]
fn sum_one_to_ten_with_a_loop() {
    // local 0 = i, local 1 = acc
    //  0: BIPUSH 10    2: ISTORE 0
    //  4: BIPUSH 0     6: ISTORE 1
    //  8: ILOAD 0
    // 10: IFEQ +16 -> 26
    // 13: ILOAD 0
    // 15: ILOAD 1
    // 17: IADD
    // 18: ISTORE 1
    // 20: IINC 0, -1
    // 23: GOTO -15 -> 8
    // 26: ILOAD 1
    // 28: OUT
    // 29: HALT
    let text = [
        Op::BiPush as u8, 10,
        Op::IStore as u8, 0,
        Op::BiPush as u8, 0,
        Op::IStore as u8, 1,
        Op::ILoad as u8, 0,
        Op::IfEq as u8, 0x00, 16,
        Op::ILoad as u8, 0,
        Op::ILoad as u8, 1,
        Op::IAdd as u8,
        Op::IStore as u8, 1,
        Op::IInc as u8, 0, 0xFF,
        Op::Goto as u8, 0xFF, 0xF1, // -15
        Op::ILoad as u8, 1,
        Op::Out as u8,
        Op::Halt as u8,
    ];
    let (_, output) = run_wire(&[], &text, &[]);
    assert_eq!(output, &[55]);
}

#[test]
fn method_call_through_the_wire_format() {
    // main pushes receiver + 10 + 20, add returns their sum.
    let mut text = vec![
        Op::BiPush as u8, 0,
        Op::BiPush as u8, 10,
        Op::BiPush as u8, 20,
        Op::InvokeVirtual as u8, 0x00, 0x00,
        Op::Out as u8,
        Op::Halt as u8,
    ];
    let entry = text.len() as Word;
    text.extend_from_slice(&3u16.to_be_bytes()); // A: receiver + 2 args
    text.extend_from_slice(&0u16.to_be_bytes()); // L
    text.extend_from_slice(&[
        Op::ILoad as u8, 1,
        Op::ILoad as u8, 2,
        Op::IAdd as u8,
        Op::IReturn as u8,
    ]);
    let (machine, output) = run_wire(&[entry], &text, &[]);
    assert_eq!(output, &[30]);
    assert_eq!(machine.get_call_stack_size(), 1);
}

#[test]
fn allocation_failure_halts_through_the_wire_format() {
    let text = [
        Op::BiPush as u8, 0xFB, // -5
        Op::NewArray as u8,
        Op::Err as u8,
    ];
    let (machine, output) = run_wire(&[], &text, &[]);
    assert!(machine.finished());
    let diagnostics = String::from_utf8_lossy(&output).into_owned();
    assert!(diagnostics.contains("invalid array size -5"));
    // Only the NEWARRAY diagnostic; ERR was never reached.
    assert!(!diagnostics.contains("ERR"));
}

#[test]
fn image_round_trips_through_a_file() {
    let wire = wire_image(
        &[],
        &[Op::BiPush as u8, 33, Op::Out as u8, Op::Halt as u8],
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program.ijvm");
    std::fs::write(&path, &wire).unwrap();

    let out = SharedOutput::default();
    let mut machine = Machine::from_file(
        &path,
        Box::new(io::empty()),
        Box::new(out.clone()),
    )
    .unwrap();
    machine.run().unwrap();
    assert_eq!(out.bytes(), b"!");
}

#[test]
fn bad_magic_file_reports_a_load_error() {
    let mut wire = wire_image(&[], &[Op::Halt as u8]);
    wire[0] ^= 0xFF;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ijvm");
    std::fs::write(&path, &wire).unwrap();

    let err = Machine::from_file(
        &path,
        Box::new(io::empty()),
        Box::new(io::sink()),
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::BadMagic(_)));
}
