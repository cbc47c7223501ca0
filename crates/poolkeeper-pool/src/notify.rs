//! Operator notifications.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::{PoolError, PoolResult};

/// A message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// One-line subject.
    pub subject: String,
    /// Free-form body.
    pub body: String,
}

impl Notification {
    /// Builds a notification.
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Delivers notifications.
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    fn notify(&self, notification: &Notification) -> PoolResult<()>;
}

/// Sends `notification`, logging instead of failing.
pub fn notify_best_effort(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification) {
        warn!(subject = %notification.subject, error = %e, "failed to send notification");
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> PoolResult<()> {
        info!(subject = %notification.subject, body = %notification.body, "notification");
        Ok(())
    }
}

/// Pipes the body to an external program.
///
/// Every `{subject}` in `args` is replaced with the subject, so a mailer can
/// be configured as `mail -s {subject} root`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandNotifier {
    /// Creates a notifier running `program args...`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, notification: &Notification) -> PoolResult<()> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{subject}", &notification.subject))
            .collect();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PoolError::Notify(format!("{}: {}", self.program.display(), e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(notification.body.as_bytes())
                .map_err(|e| PoolError::Notify(e.to_string()))?;
        }
        let status = child.wait().map_err(|e| PoolError::Notify(e.to_string()))?;
        if !status.success() {
            return Err(PoolError::Notify(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify(&Notification::new("s", "b")).is_ok());
    }

    #[test]
    fn test_command_notifier_pipes_body() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let notifier = CommandNotifier::new(
            "/bin/sh",
            vec![
                "-c".to_string(),
                format!("echo \"$0\" > {}; cat >> {}", out.display(), out.display()),
                "{subject}".to_string(),
            ],
        );
        notifier
            .notify(&Notification::new("drive removed", "3 files relocated"))
            .unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "drive removed\n3 files relocated");
    }

    #[test]
    fn test_command_notifier_failure_is_error() {
        let notifier = CommandNotifier::new("/bin/sh", vec!["-c".to_string(), "exit 3".to_string()]);
        assert!(matches!(
            notifier.notify(&Notification::new("s", "b")),
            Err(PoolError::Notify(_))
        ));
        notify_best_effort(&notifier, &Notification::new("s", "b"));
    }
}
