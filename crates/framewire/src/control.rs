use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use framewire_runtime::ActorRef;
use tracing::{debug, error, info, warn};

use framewire_core::ModuleHandle;

use crate::module::{ModuleController, Start, Status, Stop};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const LINE_READ_TIMEOUT: Duration = Duration::from_millis(500);
/// Shorter than the API call timeout: a slow module must not wedge the
/// control thread past its own stop window.
const CONTROL_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Out-of-band command socket for one module.
///
/// Serves one connection at a time with line-based ASCII commands (`START`,
/// `STOP`, `STATUS`). Commands never touch module state directly; they go
/// through the module actor's mailbox like every other mutation.
pub(crate) struct ControlChannel {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ControlChannel {
    pub fn bind(
        port: u16,
        module: ModuleHandle,
        actor: ActorRef<ModuleController>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        info!(%module, port, "control channel listening");

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name(format!("framewire-ctrl-{module}"))
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            debug!(%module, %peer, "control peer connected");
                            serve(stream, &actor, &stop_flag);
                        }
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {
                            std::thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                        Err(err) => {
                            error!(%module, %err, "control accept failed");
                            std::thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                    }
                }
                debug!(%module, "control worker exiting");
            })?;
        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(stream: TcpStream, actor: &ActorRef<ModuleController>, stop: &AtomicBool) {
    if stream.set_read_timeout(Some(LINE_READ_TIMEOUT)).is_err() {
        return;
    }
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(%err, "control connection unusable");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    while !stop.load(Ordering::Acquire) {
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let reply = dispatch(line.trim(), actor);
                line.clear();
                if writeln!(writer, "{reply}").is_err() {
                    break;
                }
            }
            // Timeout mid-line: whatever was read stays buffered in `line`
            // and the next pass finishes it.
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => {
                debug!(%err, "control connection closed");
                break;
            }
        }
    }
}

fn dispatch(command: &str, actor: &ActorRef<ModuleController>) -> String {
    match command.to_ascii_uppercase().as_str() {
        "START" => match actor.call(Start, CONTROL_CALL_TIMEOUT) {
            Ok(0) => "OK started".to_string(),
            Ok(code) => format!("ERR start failed ({code})"),
            Err(err) => format!("ERR start unavailable ({err:?})"),
        },
        "STOP" => match actor.call(Stop, CONTROL_CALL_TIMEOUT) {
            Ok(0) => "OK stopped".to_string(),
            Ok(code) => format!("ERR stop failed ({code})"),
            Err(err) => format!("ERR stop unavailable ({err:?})"),
        },
        "STATUS" => match actor.call(Status, CONTROL_CALL_TIMEOUT) {
            Ok(status) => status,
            Err(err) => format!("ERR status unavailable ({err:?})"),
        },
        "" => "ERR empty command".to_string(),
        other => {
            warn!(command = other, "unknown control command");
            format!("ERR unknown command '{other}'")
        }
    }
}
