//! Browser hand-off through the platform's URL handler.

use std::process::{Command, Stdio};

use extkit_runtime::host::UrlOpener;
use tracing::{debug, warn};

/// Hands URLs to the desktop's default handler (`open` on macOS, `xdg-open` elsewhere).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUrlOpener;

impl UrlOpener for SystemUrlOpener {
    fn open(&self, url: &str) -> bool {
        let program = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        match Command::new(program)
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {
                debug!(url, "url_opened");
                true
            }
            Ok(status) => {
                warn!(url, program, %status, "url_open_failed");
                false
            }
            Err(e) => {
                warn!(url, program, error = %e, "url_open_failed");
                false
            }
        }
    }
}
