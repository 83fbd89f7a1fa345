//! Fixtures shared by the unit tests of several modules.

use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use crate::{ShotError, Transport};

pub(crate) fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("loadflame-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

pub(crate) fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(path).expect("meta").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod");
}

/// A stand-in for `perf record`: parses `-o`, then on SIGINT runs
/// `on_interrupt` with `$out` set and exits 0. The handler is a shell
/// function, so `on_interrupt` may use any quoting.
pub(crate) fn fake_profiler(dir: &Path, on_interrupt: &str) -> PathBuf {
    let path = dir.join("fake-perf");
    write_script(
        &path,
        &format!(
            r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
on_int() {{
  {on_interrupt}
  exit 0
}}
trap on_int INT
while :; do sleep 0.05; done"#
        ),
    );
    path
}

/// Answers from a script, recording every URL it was asked for.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    pub calls: Vec<String>,
    pub fail_every: Option<usize>,
}

impl Transport for ScriptedTransport {
    fn fire(&mut self, url: &str) -> Result<u16, ShotError> {
        self.calls.push(url.to_string());
        match self.fail_every {
            Some(n) if self.calls.len() % n == 0 => {
                Err(ShotError::Request("connection refused".to_string()))
            }
            _ => Ok(200),
        }
    }
}
