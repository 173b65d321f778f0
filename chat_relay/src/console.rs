// Terminal-side copy loops shared by the operator console and the client.
//
// Both programs do the same thing: copy keyboard input to the relay in raw
// chunks, and print whatever the relay sends with a "msg: " prefix. The
// keyboard side runs on its own thread (`spawn_input_pump`) so that a
// blocked stdin read never delays the display side.
//
// `run_console` is the operator loop for the monitor link: keyboard
// end-of-stream drops the operator's sending half, which the relay takes as
// its shutdown signal, and the loop returns once the relay closes its end.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::config::DEFAULT_READ_BUFFER_SIZE;
use crate::error::{RelayError, Result};
use crate::monitor::{MonitorLink, Received};

/// Prefix printed before every relayed message.
pub const DISPLAY_PREFIX: &[u8] = b"msg: ";

/// Print one relayed chunk.
pub fn display<W: Write>(output: &mut W, bytes: &[u8]) -> io::Result<()> {
    output.write_all(DISPLAY_PREFIX)?;
    output.write_all(bytes)?;
    output.flush()
}

/// Copy `input` to `sink` chunk by chunk on a new thread until end-of-stream.
/// The sink is dropped when the thread ends, so the sink's own drop can act
/// as the end-of-stream signal downstream. A failed sink write also ends the
/// pump quietly; a failed input read is returned as `RelayError::Keyboard`.
pub fn spawn_input_pump<R, F>(mut input: R, mut sink: F) -> Result<JoinHandle<Result<()>>>
where
    R: Read + Send + 'static,
    F: FnMut(&[u8]) -> io::Result<()> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("input-pump".into())
        .spawn(move || {
            let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
            loop {
                let n = match input.read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(RelayError::Keyboard(e)),
                };
                if let Err(e) = sink(&buf[..n]) {
                    debug!(error = %e, "input sink closed");
                    return Ok(());
                }
            }
        })?;
    Ok(handle)
}

/// Collect the pump's result if it has already finished. A pump still
/// blocked on the keyboard is left behind.
pub fn finish_pump(pump: JoinHandle<Result<()>>) -> Result<()> {
    if !pump.is_finished() {
        return Ok(());
    }
    pump.join()
        .map_err(|_| RelayError::Io(io::Error::other("input thread panicked")))?
}

/// Operator loop for the monitor link.
pub fn run_console<R, W>(link: MonitorLink, input: R, mut output: W) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write,
{
    let (sender, mut receiver) = link.split();
    let pump = spawn_input_pump(input, move |bytes| sender.send(bytes))?;

    loop {
        match receiver.receive() {
            Received::Bytes(bytes) => display(&mut output, &bytes).map_err(RelayError::Display)?,
            Received::EndOfStream => break,
        }
    }
    finish_pump(pump)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn display_prefixes_message() {
        let mut out = Vec::new();
        display(&mut out, b"hello\n").unwrap();
        assert_eq!(out, b"msg: hello\n");
    }

    #[test]
    fn pump_copies_until_end_of_stream() {
        let (tx, rx) = mpsc::channel();
        let pump = spawn_input_pump(Cursor::new(b"typed text".to_vec()), move |bytes| {
            tx.send(bytes.to_vec()).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        })
        .unwrap();
        pump.join().unwrap().unwrap();
        let copied: Vec<u8> = rx.iter().flatten().collect();
        assert_eq!(copied, b"typed text");
    }

    struct FailingInput;

    impl Read for FailingInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    #[test]
    fn pump_reports_keyboard_errors() {
        let pump = spawn_input_pump(FailingInput, |_| Ok(())).unwrap();
        let err = pump.join().unwrap().unwrap_err();
        assert_eq!(err.exit_code(), 12);
    }

    #[test]
    fn console_forwards_input_and_displays_relay_output() {
        let (mut relay, operator) = MonitorLink::pair();
        relay.send(b"from a client\n").unwrap();

        let console = thread::spawn(move || {
            let mut out = Vec::new();
            let input = Cursor::new(b"operator says hi\n".to_vec());
            let result = run_console(operator, input, &mut out);
            result.map(|()| out)
        });

        assert_eq!(
            relay.receive(),
            Received::Bytes(b"operator says hi\n".to_vec())
        );
        // Keyboard end-of-stream reaches the relay as end-of-stream.
        assert_eq!(relay.receive(), Received::EndOfStream);

        // The console keeps displaying until the relay closes its end.
        thread::sleep(Duration::from_millis(20));
        assert!(!console.is_finished());
        drop(relay);

        let out = console.join().unwrap().unwrap();
        assert_eq!(out, b"msg: from a client\n");
    }
}
