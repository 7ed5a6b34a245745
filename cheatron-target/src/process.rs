//! プロセスハンドル

use crate::{Memory, Result};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io;

/// 開かれたプロセス
///
/// /proc/<pid>/mem のファイルディスクリプタがネイティブハンドルに相当します。
/// ハンドルは Drop 時にクローズされます。
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    mem: File,
    current: bool,
}

impl ProcessHandle {
    /// 呼び出し元プロセス自身のハンドルを取得する
    pub fn current() -> Result<Self> {
        let mem = open_mem("/proc/self/mem")?;
        Ok(Self {
            pid: nix::unistd::getpid(),
            mem,
            current: true,
        })
    }

    /// 既存のプロセスを開く
    ///
    /// 読み書き両方の権限で /proc/<pid>/mem を開きます。
    /// プロセスが存在しない場合やアクセス権がない場合はOSのエラーをそのまま返します。
    pub fn open(pid: i32) -> Result<Self> {
        if pid <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid process id {}", pid),
            ));
        }

        let pid = Pid::from_raw(pid);

        // シグナル0で存在と権限だけを確認する
        nix::sys::signal::kill(pid, None)?;

        let mem = open_mem(&format!("/proc/{}/mem", pid))?;
        let current = pid == nix::unistd::getpid();

        tracing::debug!("opened /proc/{}/mem", pid);
        Ok(Self { pid, mem, current })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// 呼び出し元プロセス自身かどうか
    pub fn is_current(&self) -> bool {
        self.current
    }

    /// メモリアクセスを取得する
    pub fn memory(&self) -> Memory<'_> {
        Memory::new(self.pid, &self.mem)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        tracing::debug!("closing process handle for pid {}", self.pid);
    }
}

fn open_mem(path: &str) -> Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}
