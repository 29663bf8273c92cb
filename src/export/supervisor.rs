//! Exporter process supervision
//!
//! Runs the exporter with piped stdio, feeds its stdout to a [`PromptDriver`] and
//! writes the driver's keystrokes back to stdin. stderr is collected on its own
//! task for diagnostics. The whole session is bounded by a wall-clock timeout.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::error::{ExportError, ExportResult};
use super::prompt::{PromptAction, PromptDriver};
use crate::cloud::AccessToken;
use crate::config::ExporterConfig;

/// Fully resolved command line and environment for one exporter run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ExporterInvocation {
    pub fn build(
        config: &ExporterConfig,
        account_id: &str,
        container: &str,
        output_dir: &Path,
        kinds: &[String],
        resource_ids: &[String],
        token: Option<&AccessToken>,
    ) -> Self {
        let mut args = vec![
            "resource-group".to_string(),
            format!("--output-dir={}", output_dir.display()),
            "--overwrite".to_string(),
            "--append=false".to_string(),
            format!("--resource-types={}", kinds.join(",")),
        ];
        if !resource_ids.is_empty() {
            args.push(format!("--resource-ids={}", resource_ids.join(",")));
        }
        args.extend(config.extra_args.iter().cloned());
        args.push(container.to_string());

        let mut env = vec![
            ("ARM_SUBSCRIPTION_ID".to_string(), account_id.to_string()),
            ("AZURE_SUBSCRIPTION_ID".to_string(), account_id.to_string()),
        ];
        if let Some(token) = token.filter(|t| t.has_finite_lifetime()) {
            env.push(("ARM_ACCESS_TOKEN".to_string(), token.token.clone()));
        }

        Self {
            program: config.program.clone(),
            args,
            env,
        }
    }

    /// Pin the exporter's own login to the credential's tenant
    pub fn with_tenant(mut self, tenant_id: Option<&str>) -> Self {
        if let Some(tenant_id) = tenant_id {
            self.env.push(("ARM_TENANT_ID".to_string(), tenant_id.to_string()));
            self.env.push(("AZURE_TENANT_ID".to_string(), tenant_id.to_string()));
        }
        self
    }
}

/// What the exporter printed during a successful run
#[derive(Debug, Clone, Default)]
pub struct ExporterRun {
    pub stdout: String,
    pub stderr: String,
}

/// Starts the exporter and keeps it moving through its prompts
pub struct ExportSupervisor {
    timeout: Duration,
    keystroke_delay: Duration,
}

impl ExportSupervisor {
    pub fn new(config: &ExporterConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            keystroke_delay: config.prompt.keystroke_delay(),
        }
    }

    pub async fn run(
        &self,
        invocation: &ExporterInvocation,
        driver: &mut dyn PromptDriver,
    ) -> ExportResult<ExporterRun> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            program = %invocation.program,
            args = ?invocation.args,
            "Starting exporter"
        );

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExportError::Spawn(format!(
                    "'{}' is not installed or not on PATH",
                    invocation.program
                ))
            } else {
                ExportError::Spawn(format!("{}: {}", invocation.program, e))
            }
        })?;

        let (stdout, stdin, mut stderr) =
            match (child.stdout.take(), child.stdin.take(), child.stderr.take()) {
                (Some(stdout), Some(stdin), Some(stderr)) => (stdout, stdin, stderr),
                _ => {
                    let _ = child.kill().await;
                    return Err(ExportError::Spawn(
                        "exporter stdio was not captured".to_string(),
                    ));
                }
            };

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let delay = self.keystroke_delay;
        let session = async {
            let transcript = drive_session(stdout, stdin, driver, delay).await?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((transcript, status))
        };

        let (stdout, status) = match tokio::time::timeout(self.timeout, session).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(ExportError::Io(e));
            }
            Err(_) => {
                tracing::warn!(
                    seconds = self.timeout.as_secs(),
                    "Exporter timed out, killing it"
                );
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(ExportError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            tracing::info!("Exporter finished");
            Ok(ExporterRun { stdout, stderr })
        } else {
            tracing::warn!(exit_code = ?status.code(), "Exporter failed");
            Err(ExportError::ExporterExit {
                code: status.code(),
                output: combine_output(&stdout, &stderr),
            })
        }
    }
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_string(),
        (out, "") => out.to_string(),
        (out, err) => format!("{}\n{}", out, err),
    }
}

/// Pump `stdout` through the driver and write its keystrokes to `stdin`.
///
/// Returns everything read from `stdout`. Keystrokes are written in the order
/// the driver produced them, each after `delay`. Ends when `stdout` closes.
pub async fn drive_session<R, W>(
    stdout: R,
    stdin: W,
    driver: &mut dyn PromptDriver,
    delay: Duration,
) -> io::Result<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<PromptAction>();

    let reader = async move {
        let mut stdout = stdout;
        let mut buf = vec![0u8; 8192];
        let mut transcript = String::new();

        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            let chunk = String::from_utf8_lossy(&buf[..n]);
            transcript.push_str(&chunk);

            if let Some(action) = driver.on_output_chunk(&chunk) {
                tracing::debug!(rule = ?action.rule, keystroke = %action.keystroke, "Prompt detected");
                let _ = tx.send(action);
            }
        }

        drop(tx);
        Ok::<_, io::Error>(transcript)
    };

    let writer = async move {
        let mut stdin = stdin;

        while let Some(action) = rx.recv().await {
            tokio::time::sleep(delay).await;

            let line = format!("{}\n", action.keystroke);
            let written = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };

            match written {
                Ok(()) => {}
                // The exporter may exit before reading its last keystroke
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
                Err(e) => return Err(e),
            }
        }

        let _ = stdin.shutdown().await;
        Ok::<_, io::Error>(())
    };

    let (transcript, written) = tokio::join!(reader, writer);
    written?;
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::prompt::{MarkerPromptDriver, PromptConfig};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::path::PathBuf;

    fn config(program: &str) -> ExporterConfig {
        ExporterConfig {
            program: program.to_string(),
            extra_args: vec!["--non-interactive=false".to_string()],
            timeout_secs: 5,
            prompt: PromptConfig {
                keystroke_delay_ms: 10,
                ..PromptConfig::default()
            },
        }
    }

    #[test]
    fn test_invocation_arguments() {
        let invocation = ExporterInvocation::build(
            &config("aztfexport"),
            "sub-1",
            "rg-1",
            &PathBuf::from("/tmp/ws/terraform"),
            &["azurerm_key_vault".to_string(), "azurerm_subnet".to_string()],
            &[],
            None,
        )
        .with_tenant(None);

        assert_eq!(
            invocation.args,
            vec![
                "resource-group",
                "--output-dir=/tmp/ws/terraform",
                "--overwrite",
                "--append=false",
                "--resource-types=azurerm_key_vault,azurerm_subnet",
                "--non-interactive=false",
                "rg-1",
            ]
        );
        assert!(
            invocation
                .env
                .contains(&("ARM_SUBSCRIPTION_ID".to_string(), "sub-1".to_string()))
        );
        assert!(
            !invocation
                .env
                .iter()
                .any(|(k, _)| k == "ARM_ACCESS_TOKEN" || k == "ARM_TENANT_ID")
        );
    }

    #[test]
    fn test_invocation_with_ids_and_token() {
        let token = AccessToken {
            token: "tok".to_string(),
            expires_on: Some(Utc::now() + ChronoDuration::hours(1)),
        };
        let invocation = ExporterInvocation::build(
            &config("aztfexport"),
            "sub-1",
            "rg-1",
            &PathBuf::from("out"),
            &["azurerm_key_vault".to_string()],
            &["/id/a".to_string(), "/id/b".to_string()],
            Some(&token),
        )
        .with_tenant(Some("tenant-a"));

        assert!(invocation.args.contains(&"--resource-ids=/id/a,/id/b".to_string()));
        assert!(
            invocation
                .env
                .contains(&("ARM_TENANT_ID".to_string(), "tenant-a".to_string()))
        );
        assert!(
            invocation
                .env
                .contains(&("ARM_ACCESS_TOKEN".to_string(), "tok".to_string()))
        );
    }

    #[tokio::test]
    async fn test_scripted_session_sends_select_then_quit() {
        let (mut exporter_out, session_out) = tokio::io::duplex(1024);
        let (session_in, mut exporter_in) = tokio::io::duplex(1024);

        let script = tokio::spawn(async move {
            exporter_out.write_all(b"Listing resources...\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            exporter_out.write_all(b"\x1b[1mShow menu\x1b[0m\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Same prompt redrawn; must not produce a second keystroke
            exporter_out.write_all(b"show menu\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            exporter_out
                .write_all(b"Import completed. Press q to quit\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let mut driver = MarkerPromptDriver::new(PromptConfig::default());
        let transcript =
            drive_session(session_out, session_in, &mut driver, Duration::from_millis(5))
                .await
                .unwrap();
        script.await.unwrap();

        let mut written = String::new();
        exporter_in.read_to_string(&mut written).await.unwrap();

        assert_eq!(written, "w\nq\n");
        assert!(transcript.contains("Import completed"));
    }

    #[tokio::test]
    async fn test_missing_exporter_is_a_spawn_error() {
        let supervisor = ExportSupervisor::new(&config("teleform-no-such-exporter"));
        let invocation = ExporterInvocation::build(
            &config("teleform-no-such-exporter"),
            "sub",
            "rg",
            &PathBuf::from("out"),
            &["azurerm_subnet".to_string()],
            &[],
            None,
        );
        let mut driver = MarkerPromptDriver::new(PromptConfig::default());

        let err = supervisor.run(&invocation, &mut driver).await.unwrap_err();
        assert!(matches!(err, ExportError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_diagnostics() {
        let supervisor = ExportSupervisor::new(&config("sh"));
        let invocation = ExporterInvocation {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo working; echo 'auth error' >&2; exit 2".to_string(),
            ],
            env: Vec::new(),
        };
        let mut driver = MarkerPromptDriver::new(PromptConfig::default());

        match supervisor.run(&invocation, &mut driver).await {
            Err(ExportError::ExporterExit { code, output }) => {
                assert_eq!(code, Some(2));
                assert!(output.contains("working"));
                assert!(output.contains("auth error"));
            }
            other => panic!("expected ExporterExit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_exporter_times_out() {
        let mut slow = config("sh");
        slow.timeout_secs = 1;
        let supervisor = ExportSupervisor::new(&slow);
        let invocation = ExporterInvocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            env: Vec::new(),
        };
        let mut driver = MarkerPromptDriver::new(PromptConfig::default());

        let err = supervisor.run(&invocation, &mut driver).await.unwrap_err();
        assert!(matches!(err, ExportError::Timeout { seconds: 1 }));
    }
}
