//! Office conversion: legacy binary Word documents → DOCX via an external
//! converter process.
//!
//! Each conversion gets a private temp directory holding the input, the
//! output and a throwaway LibreOffice user profile (concurrent `soffice`
//! instances sharing one profile block on its lock file).
//!
//! The `libreoffice` launcher forks the real `soffice.bin` worker, so on
//! unix the converter runs in its own process group and the whole group is
//! killed when the conversion ends or its future is dropped (for example by
//! the orchestrator's deadline). `kill_on_drop` alone only reaches the
//! launcher.

use crate::document::DocumentKind;
use crate::error::ConversionError;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Capability provider for office-document conversion.
#[async_trait]
pub trait OfficeConverter: Send + Sync {
    /// Convert `bytes` of kind `from` into DOCX bytes.
    async fn convert(&self, bytes: &[u8], from: DocumentKind) -> Result<Vec<u8>, ConversionError>;
}

/// `libreoffice --headless --convert-to docx`.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    bin: String,
}

impl LibreOfficeConverter {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl OfficeConverter for LibreOfficeConverter {
    async fn convert(&self, bytes: &[u8], from: DocumentKind) -> Result<Vec<u8>, ConversionError> {
        let ext = match from {
            DocumentKind::LegacyDoc => "doc",
            other => {
                return Err(ConversionError::Failed(format!(
                    "no conversion defined from {other}"
                )))
            }
        };

        let dir = tempfile::Builder::new()
            .prefix("doc2text-convert-")
            .tempdir()
            .map_err(|e| ConversionError::Failed(format!("temp dir: {e}")))?;
        let input = dir.path().join(format!("input.{ext}"));
        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| ConversionError::Failed(format!("write input: {e}")))?;

        let profile = format!(
            "-env:UserInstallation=file://{}",
            dir.path().join("profile").display()
        );
        debug!("Running {} --convert-to docx in {}", self.bin, dir.path().display());

        let mut cmd = Command::new(&self.bin);
        cmd.arg("--headless")
            .arg(profile)
            .arg("--convert-to")
            .arg("docx")
            .arg("--outdir")
            .arg(dir.path())
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            IoErrorKind::NotFound => {
                ConversionError::Unavailable(format!("'{}' not found on PATH", self.bin))
            }
            _ => ConversionError::Unavailable(format!("failed to start '{}': {}", self.bin, e)),
        })?;
        #[cfg(unix)]
        let _group = child.id().map(ProcessGroup);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ConversionError::Failed(format!("waiting for {}: {e}", self.bin)))?;

        if !output.status.success() {
            return Err(ConversionError::Failed(format!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // LibreOffice exits 0 even when it skips a file it cannot read.
        match tokio::fs::read(dir.path().join("input.docx")).await {
            Ok(docx) if !docx.is_empty() => Ok(docx),
            Ok(_) => Err(ConversionError::Failed("converter wrote an empty file".into())),
            Err(e) => Err(ConversionError::Failed(format!(
                "converter produced no output: {e}"
            ))),
        }
    }
}

/// Kills every process in the converter's group on drop.
#[cfg(unix)]
struct ProcessGroup(u32);

#[cfg(unix)]
impl Drop for ProcessGroup {
    fn drop(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // ESRCH once every member has already exited.
        if killpg(Pid::from_raw(self.0 as i32), Signal::SIGKILL).is_ok() {
            debug!("Killed converter process group {}", self.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let c = LibreOfficeConverter::new("/nonexistent/libreoffice-bin");
        let err = c.convert(b"\xD0\xCF\x11\xE0", DocumentKind::LegacyDoc).await.unwrap_err();
        assert!(matches!(err, ConversionError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn only_legacy_doc_converts() {
        let c = LibreOfficeConverter::new("libreoffice");
        let err = c.convert(b"%PDF-1.4", DocumentKind::Pdf).await.unwrap_err();
        assert!(matches!(err, ConversionError::Failed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_skip_is_a_failure() {
        // `true` exits 0 without writing anything, like LibreOffice on an
        // unreadable input.
        let c = LibreOfficeConverter::new("true");
        let err = c.convert(b"junk", DocumentKind::LegacyDoc).await.unwrap_err();
        assert!(
            matches!(err, ConversionError::Failed(ref m) if m.contains("no output")),
            "got {err:?}"
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn abandoned_conversion_kills_forked_worker() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        // Stands in for the launcher: forks a long-lived worker and waits.
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let launcher = dir.path().join("fake-libreoffice");
        std::fs::write(
            &launcher,
            format!("#!/bin/sh\nsleep 300 &\necho $! > {}\nwait\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

        let c = LibreOfficeConverter::new(launcher.to_string_lossy().into_owned());
        let res = tokio::time::timeout(
            Duration::from_secs(1),
            c.convert(b"\xD0\xCF\x11\xE0", DocumentKind::LegacyDoc),
        )
        .await;
        assert!(res.is_err(), "fake converter returned early: {res:?}");

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Gone, or a zombie awaiting its new parent.
        let alive = std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| {
                let state = stat.rsplit(')').next().unwrap_or("").trim_start();
                !state.starts_with('Z')
            })
            .unwrap_or(false);
        assert!(!alive, "worker {pid} outlived the conversion");
    }
}
