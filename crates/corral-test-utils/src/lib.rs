//! Shared test fixtures for corral.
//!
//! The harness's collaborators are an external executable and a TCP
//! endpoint, so the fixtures here are a scripted fake cluster-manager
//! binary and small port helpers. Nothing in this crate runs in production.

use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to set script permissions");
    }
    path
}

/// Builder for a fake cluster-manager binary.
///
/// The generated script dispatches on the subcommand of
/// `<ctl> cluster <sub> <name> ...` and runs a configurable shell fragment
/// for each of `create`, `get`, and `delete`. Unknown subcommands exit 64.
#[derive(Debug, Clone)]
pub struct ScriptedCtl {
    create: String,
    get: String,
    delete: String,
}

impl Default for ScriptedCtl {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCtl {
    /// Defaults: `create` stays alive like a real foreground bootstrap,
    /// `get` and `delete` succeed immediately.
    pub fn new() -> Self {
        Self {
            create: "sleep 3600".to_string(),
            get: "exit 0".to_string(),
            delete: "exit 0".to_string(),
        }
    }

    pub fn on_create(mut self, fragment: impl Into<String>) -> Self {
        self.create = fragment.into();
        self
    }

    pub fn on_get(mut self, fragment: impl Into<String>) -> Self {
        self.get = fragment.into();
        self
    }

    pub fn on_delete(mut self, fragment: impl Into<String>) -> Self {
        self.delete = fragment.into();
        self
    }

    /// `delete` exits 1 the first `n` invocations, then succeeds. The
    /// attempt count is tracked in a state file beside the script, so the
    /// flakiness survives across separate process invocations.
    pub fn delete_fails_times(self, n: u32) -> Self {
        self.on_delete(format!(
            r#"count_file="$(dirname "$0")/delete_attempts"
    count=$(cat "$count_file" 2>/dev/null || echo 0)
    count=$((count + 1))
    echo "$count" > "$count_file"
    if [ "$count" -le {n} ]; then exit 1; fi
    exit 0"#
        ))
    }

    /// `delete` records each invocation by touching a marker file beside
    /// the script, then succeeds. Pair with [`delete_marker`].
    pub fn delete_touches_marker(self) -> Self {
        self.on_delete(r#"touch "$(dirname "$0")/deleted"; exit 0"#)
    }

    /// Write the script into `dir` and return its path.
    pub fn write(self, dir: &Path) -> PathBuf {
        let body = format!(
            r#"#!/bin/sh
sub="$2"
case "$sub" in
  create)
    {create}
    ;;
  get)
    {get}
    ;;
  delete)
    {delete}
    ;;
  *)
    echo "unknown subcommand: $sub" >&2
    exit 64
    ;;
esac
"#,
            create = self.create,
            get = self.get,
            delete = self.delete,
        );
        write_script(dir, "fake-ctl.sh", &body)
    }
}

/// Path of the marker file written by [`ScriptedCtl::delete_touches_marker`].
pub fn delete_marker(dir: &Path) -> PathBuf {
    dir.join("deleted")
}

/// Bind an ephemeral loopback listener and return it with its port.
pub async fn ephemeral_listener() -> (tokio::net::TcpListener, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral listener");
    let port = listener.local_addr().expect("listener has no addr").port();
    (listener, port)
}

/// A loopback port that was free at the time of the call.
pub fn free_port() -> u16 {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral listener");
    listener.local_addr().expect("listener has no addr").port()
}
