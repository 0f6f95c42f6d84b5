//! Shell stand-in for the `rbd` CLI used by binary-level tests.
//!
//! The script records every invocation in `calls.log`, remembers at most one
//! mapped image in `mapped`, and fails any subcommand for which a
//! `fail-<verb>` marker file exists.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::TempDir;

const SCRIPT: &str = r#"#!/bin/sh
here=$(dirname "$0")
echo "$*" >> "$here/calls.log"
while [ $# -gt 0 ]; do
  case "$1" in
    --id|--keyring|--keyfile) shift 2 ;;
    *) break ;;
  esac
done
verb=$1
shift
if [ -f "$here/fail-$verb" ]; then
  echo "rbd: simulated $verb failure" >&2
  exit 1
fi
case "$verb" in
  showmapped)
    if [ -s "$here/mapped" ]; then
      image=$(cat "$here/mapped")
      case "$image" in
        */*) pool=${image%%/*}; name=${image#*/} ;;
        *) pool=rbd; name=$image ;;
      esac
      printf '{"0":{"pool":"%s","name":"%s","snap":"-","device":"/dev/rbd0"}}\n' "$pool" "$name"
    else
      printf '{}\n'
    fi
    ;;
  map)
    printf '%s' "$1" > "$here/mapped"
    echo /dev/rbd0
    ;;
  unmap)
    : > "$here/mapped"
    ;;
esac
exit 0
"#;

/// Temporary directory holding the fake `rbd` executable and its state.
pub struct FakeRbd {
    root: Utf8PathBuf,
    dir: Dir,
    _tmp: TempDir,
}

impl FakeRbd {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("temp dir should be created");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .expect("temp dir should be UTF-8");
        let dir = Dir::open_ambient_dir(&root, ambient_authority()).expect("open temp dir");
        dir.write("rbd", SCRIPT).expect("write fake rbd");
        fs::set_permissions(root.join("rbd"), Permissions::from_mode(0o755))
            .expect("make fake rbd executable");
        Self {
            root,
            dir,
            _tmp: tmp,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn bin(&self) -> Utf8PathBuf {
        self.root.join("rbd")
    }

    /// Makes every later invocation of `verb` exit with status 1.
    pub fn fail(&self, verb: &str) {
        self.dir
            .write(format!("fail-{verb}"), "")
            .expect("write failure marker");
    }

    /// Arguments of every invocation so far, one string per call.
    pub fn calls(&self) -> Vec<String> {
        self.dir
            .read_to_string("calls.log")
            .map(|log| log.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(verb))
            .count()
    }

    /// Provider command wired to this fake, with `VOL_CNAME` and `EXTP_POOL`
    /// set for the `ganeti/disk0` image.
    pub fn provider(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("rbd-extstorage");
        cmd.current_dir(self.root.as_std_path())
            .env("RBD_EXTSTORAGE_RBD_BIN", self.bin().as_str())
            .env_remove("RBD_EXTSTORAGE_CEPH_CONF")
            .env_remove("RBD_EXTSTORAGE_CONFIG_PATH")
            .env("VOL_CNAME", "disk0")
            .env("EXTP_POOL", "ganeti");
        cmd
    }
}
