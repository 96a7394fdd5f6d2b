//! Encoder process supervision
//!
//! Spawns the encoder with piped stdin/stderr, drains stderr on a reader
//! task, and stops the process with an escalation ladder: ask politely with
//! `q` on stdin, then terminate, then kill.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::output::{ClassifiedOutput, OutputClassifier, OutputLevel};
use crate::error::CaptureError;
use crate::recorder::RecorderEvent;

/// Bounded wait for the stderr reader after the process is gone
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace periods for the stop ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimeouts {
    /// Wait after writing `q` before terminating
    pub quit_grace: Duration,
    /// Wait after terminating before killing
    pub terminate_grace: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            quit_grace: Duration::from_secs(5),
            terminate_grace: Duration::from_secs(2),
        }
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its own after `q`
    Graceful(Option<i32>),
    /// Exited after a termination request
    Terminated,
    /// Had to be killed
    Killed,
}

/// A running encoder
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    segment: u32,
    started_at: Instant,
}

impl EncoderProcess {
    pub fn segment(&self) -> u32 {
        self.segment
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Starts and stops encoder processes
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    binary: PathBuf,
    timeouts: StopTimeouts,
    batch_lines: usize,
    events: mpsc::UnboundedSender<RecorderEvent>,
}

impl ProcessSupervisor {
    pub fn new(
        binary: PathBuf,
        timeouts: StopTimeouts,
        batch_lines: usize,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Self {
        Self {
            binary,
            timeouts,
            batch_lines,
            events,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Spawn the encoder for one segment
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, args: &[String], segment: u32) -> Result<EncoderProcess, CaptureError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        debug!("Spawning {:?} {}", self.binary, args.join(" "));
        let mut child = command.spawn().map_err(|e| CaptureError::ProcessSpawn {
            binary: self.binary.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take();
        let reader = child.stderr.take().map(|stderr| {
            tokio::spawn(read_diagnostics(
                stderr,
                segment,
                self.batch_lines,
                self.events.clone(),
            ))
        });

        info!("Encoder started for segment {} (pid {:?})", segment, child.id());
        Ok(EncoderProcess {
            child,
            stdin,
            reader,
            segment,
            started_at: Instant::now(),
        })
    }

    /// Stop the encoder, escalating until it is gone
    ///
    /// Never fails; every rung of the ladder is logged.
    pub async fn stop(&self, mut process: EncoderProcess) -> StopOutcome {
        let segment = process.segment;

        if let Some(stdin) = process.stdin.as_mut() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!("Encoder stdin already closed: {}", e);
            } else if let Err(e) = stdin.flush().await {
                debug!("Failed to flush encoder stdin: {}", e);
            }
        }

        let outcome = match wait_for(&mut process.child, self.timeouts.quit_grace).await {
            Ok(status) => StopOutcome::Graceful(status.code()),
            Err(timeout) => {
                warn!("Segment {}: {}; terminating", segment, timeout);
                terminate(&mut process.child);

                match wait_for(&mut process.child, self.timeouts.terminate_grace).await {
                    Ok(_) => StopOutcome::Terminated,
                    Err(timeout) => {
                        warn!("Segment {}: {}; killing", segment, timeout);
                        if let Err(e) = process.child.kill().await {
                            error!("Failed to kill encoder: {}", e);
                        }
                        StopOutcome::Killed
                    }
                }
            }
        };

        drop(process.stdin.take());
        if let Some(reader) = process.reader.take() {
            if tokio::time::timeout(READER_JOIN_TIMEOUT, reader).await.is_err() {
                debug!("Segment {} stderr reader still draining; detaching", segment);
            }
        }

        info!(
            "Encoder for segment {} stopped after {:?}: {:?}",
            segment,
            process.uptime(),
            outcome
        );
        outcome
    }
}

async fn wait_for(child: &mut Child, grace: Duration) -> Result<ExitStatus, CaptureError> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(e)) => {
            // Treated like a timeout so the ladder keeps escalating
            error!("Failed to wait for encoder: {}", e);
            Err(CaptureError::ProcessTimeout { after: grace })
        }
        Err(_) => Err(CaptureError::ProcessTimeout { after: grace }),
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: pid belongs to a child we have not yet reaped
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!(
            "SIGTERM to encoder {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to terminate encoder: {}", e);
    }
}

/// Drain the encoder's stderr until it closes
async fn read_diagnostics(
    stderr: ChildStderr,
    segment: u32,
    batch_lines: usize,
    events: mpsc::UnboundedSender<RecorderEvent>,
) {
    let mut reader = BufReader::new(stderr);
    let mut classifier = OutputClassifier::new(batch_lines);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Progress reports are separated by carriage returns
                let text = String::from_utf8_lossy(&buf);
                for line in text.split(['\r', '\n']) {
                    if let Some(output) = classifier.push(line, Instant::now()) {
                        emit(segment, output, &events);
                    }
                }
            }
            Err(e) => {
                warn!("Segment {} stderr read failed: {}", segment, e);
                break;
            }
        }
    }

    if let Some(output) = classifier.flush() {
        emit(segment, output, &events);
    }
    debug!("Segment {} encoder output closed", segment);
    let _ = events.send(RecorderEvent::EncoderOutputClosed { segment });
}

fn emit(segment: u32, output: ClassifiedOutput, events: &mpsc::UnboundedSender<RecorderEvent>) {
    match output.level {
        OutputLevel::Debug => debug!("encoder[{}]: {}", segment, output.message),
        OutputLevel::Info => info!("encoder[{}]: {}", segment, output.message),
        OutputLevel::Warning => warn!("encoder[{}]: {}", segment, output.message),
        OutputLevel::Error => error!("encoder[{}]: {}", segment, output.message),
        OutputLevel::Critical => error!("encoder[{}] CRITICAL: {}", segment, output.message),
    }

    if output.level >= OutputLevel::Error {
        let _ = events.send(RecorderEvent::EncoderDiagnostic {
            segment,
            level: output.level,
            message: output.message,
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{write_script, COOPERATIVE_ENCODER, STUBBORN_ENCODER};

    fn supervisor(binary: PathBuf) -> (ProcessSupervisor, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timeouts = StopTimeouts {
            quit_grace: Duration::from_millis(300),
            terminate_grace: Duration::from_millis(300),
        };
        (ProcessSupervisor::new(binary, timeouts, 10, tx), rx)
    }

    #[tokio::test]
    async fn test_spawn_failure_names_binary() {
        let (sup, _rx) = supervisor(PathBuf::from("/nonexistent/encoder"));
        let err = sup.start(&[], 0).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::ProcessSpawn { ref binary, .. } if binary == Path::new("/nonexistent/encoder")
        ));
    }

    #[tokio::test]
    async fn test_quit_request_stops_cooperative_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "encoder.sh", COOPERATIVE_ENCODER);
        let output = dir.path().join("part.mkv");
        let (sup, mut rx) = supervisor(script);

        let process = sup
            .start(&[output.to_string_lossy().into_owned()], 3)
            .unwrap();
        assert_eq!(process.segment(), 3);

        let outcome = sup.stop(process).await;
        assert_eq!(outcome, StopOutcome::Graceful(Some(0)));
        assert!(output.exists());

        let mut closed = false;
        while let Ok(event) = rx.try_recv() {
            if let RecorderEvent::EncoderOutputClosed { segment } = event {
                assert_eq!(segment, 3);
                closed = true;
            }
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_stubborn_encoder_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "stubborn.sh", STUBBORN_ENCODER);
        let output = dir.path().join("part.mkv");
        let (sup, _rx) = supervisor(script);

        let process = sup
            .start(&[output.to_string_lossy().into_owned()], 0)
            .unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = sup.stop(process).await;
        assert_eq!(outcome, StopOutcome::Terminated);
    }

    #[tokio::test]
    async fn test_error_lines_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "noisy.sh",
            "echo 'Fatal error: cannot open display' >&2\nexit 1",
        );
        let (sup, mut rx) = supervisor(script);

        let process = sup.start(&[], 7).unwrap();
        let outcome = sup.stop(process).await;
        assert_eq!(outcome, StopOutcome::Graceful(Some(1)));

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            RecorderEvent::EncoderDiagnostic { segment: 7, level: OutputLevel::Critical, .. }
        ));
    }
}
