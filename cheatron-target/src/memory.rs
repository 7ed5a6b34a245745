//! メモリアクセス機能

use crate::{MemoryRegion, Result};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::unix::fs::FileExt;

/// プロセスメモリへのアクセス
///
/// [`crate::ProcessHandle::memory`] から取得します。ハンドルが保持する
/// /proc/<pid>/mem のディスクリプタに対して位置指定で読み書きします。
pub struct Memory<'a> {
    pid: Pid,
    mem: &'a File,
}

impl<'a> Memory<'a> {
    pub(crate) fn new(pid: Pid, mem: &'a File) -> Self {
        Self { pid, mem }
    }

    /// メモリからデータを読み取る
    ///
    /// 1回の pread で読み取り、OSが報告したバイト数に切り詰めたバッファを返します。
    /// 領域の途中で未マップ領域に達した場合は、要求より短いバッファが返ります。
    /// 先頭から読み取れなかった場合はエラーになります。
    pub fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let read = self.mem.read_at(&mut buffer, addr)?;
        if read == 0 && size > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no bytes readable at 0x{:x}", addr),
            ));
        }

        buffer.truncate(read);
        Ok(buffer)
    }

    /// メモリにデータを書き込む
    ///
    /// OSが報告した書き込みバイト数を返します。
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<usize> {
        let written = self.mem.write_at(data, addr)?;
        if written == 0 && !data.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("no bytes writable at 0x{:x}", addr),
            ));
        }
        Ok(written)
    }

    /// /proc/pid/maps を解析してメモリ領域の一覧を取得する
    pub fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let reader = BufReader::new(File::open(&maps_path)?);

        let mut regions = Vec::new();
        for line in reader.lines() {
            if let Some(region) = MemoryRegion::parse_maps_line(&line?) {
                regions.push(region);
            }
        }

        Ok(regions)
    }

    /// 指定されたアドレスを含むメモリ領域を取得する
    ///
    /// どの領域にも含まれない場合は None を返します。
    pub fn region_at(&self, addr: u64) -> Result<Option<MemoryRegion>> {
        Ok(self.regions()?.into_iter().find(|r| r.contains(addr)))
    }
}

#[cfg(test)]
mod tests {
    use crate::{ProcessHandle, RegionState};
    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
    use nix::unistd::{sysconf, SysconfVar};
    use std::ffi::c_void;
    use std::num::NonZeroUsize;
    use std::ptr::NonNull;

    /// 2ページをマップして2ページ目を解放し、(先頭, ページサイズ) を返す
    fn map_page_before_hole() -> (NonNull<c_void>, usize) {
        let page = sysconf(SysconfVar::PAGE_SIZE).unwrap().unwrap() as usize;
        let length = NonZeroUsize::new(page * 2).unwrap();

        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .unwrap();

        let second = NonNull::new(unsafe { base.as_ptr().cast::<u8>().add(page) }.cast::<c_void>()).unwrap();
        unsafe { munmap(second, page) }.unwrap();

        (base, page)
    }

    #[test]
    fn test_read_write_own_buffer() {
        let handle = ProcessHandle::current().unwrap();
        let memory = handle.memory();

        let mut scratch = vec![0u8; 16];
        let addr = scratch.as_mut_ptr() as u64;

        let written = memory.write(addr, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(written, 4);

        let bytes = memory.read(addr, 4).unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_read_unmapped_fails() {
        let handle = ProcessHandle::current().unwrap();
        // 最初のページは mmap_min_addr によりマップされない
        assert!(handle.memory().read(0x10, 4).is_err());
    }

    #[test]
    fn test_region_at() {
        let handle = ProcessHandle::current().unwrap();
        let memory = handle.memory();

        let value = Box::new(0x1234_5678u32);
        let addr = &*value as *const u32 as u64;

        let region = memory.region_at(addr).unwrap().expect("heap address is mapped");
        assert!(region.contains(addr));
        assert!(region.protection.can_read());
        assert!(region.protection.can_write());
        assert_eq!(region.state, RegionState::Committed);

        assert!(memory.region_at(0x10).unwrap().is_none());
    }

    #[test]
    fn test_read_across_unmapped_boundary_is_short() {
        let (base, page) = map_page_before_hole();
        let tail = unsafe { base.as_ptr().cast::<u8>().add(page - 8) };
        unsafe { std::ptr::write_bytes(tail, 0xab, 8) };

        let handle = ProcessHandle::current().unwrap();
        let bytes = handle.memory().read(tail as u64, 64).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes, vec![0xab; 8]);

        unsafe { munmap(base, page) }.unwrap();
    }
}
