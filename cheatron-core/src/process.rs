//! プロセスアクセサ
//!
//! プロセスを開いてリファレンスとして返し、そのリファレンスを使って
//! 対象プロセスのメモリを読み書き・問い合わせします。
//! 各操作はまずリファレンスを検証し、無効な場合はOSを呼ばずに失敗します。

use crate::{Error, HostValue, MemoryOperation, Reference, Result};
use cheatron_target::{MemoryRegion, ProcessHandle};

/// 1回の読み取りで許可する最大バイト数（10 MiB）
pub const MAX_READ_LENGTH: usize = 10 * 1024 * 1024;

/// リファレンスが所有するプロセスリソース
///
/// 呼び出し元が直接作ることはなく、[`get_current`] と [`open`] でのみ作られます。
/// リファレンスの破棄時に Drop され、ネイティブハンドルがクローズされます。
/// 有効性はリファレンス側が持ち、解放後はこの値に到達できません。
#[derive(Debug)]
pub struct ProcessResource {
    handle: ProcessHandle,
    pid: u32,
}

impl ProcessResource {
    fn new(handle: ProcessHandle) -> Self {
        let pid = handle.pid() as u32;
        Self { handle, pid }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// 呼び出し元プロセス自身かどうか
    pub fn is_current(&self) -> bool {
        self.handle.is_current()
    }
}

impl Drop for ProcessResource {
    fn drop(&mut self) {
        tracing::debug!("process resource for pid {} closed", self.pid);
    }
}

/// リファレンスからプロセスリソースを取り出す
///
/// 解放済みのリファレンスは [`Error::InvalidHandle`] になります。
fn resource(reference: &Reference) -> Result<&ProcessResource> {
    reference.downcast_ref::<ProcessResource>()
}

/// 呼び出し元プロセス自身のリファレンスを取得する
pub fn get_current() -> Result<Reference> {
    let handle = ProcessHandle::current().map_err(|source| Error::ProcessOpen {
        pid: std::process::id(),
        source,
    })?;
    Ok(Reference::from_box(Box::new(ProcessResource::new(handle))))
}

/// PIDを指定してプロセスを開く
pub fn open(pid: &HostValue) -> Result<Reference> {
    let pid = pid.to_pid()?;
    let raw_pid = i32::try_from(pid)
        .map_err(|_| Error::invalid_argument(format!("pid {} is out of range", pid)))?;

    let handle = ProcessHandle::open(raw_pid).map_err(|source| Error::ProcessOpen { pid, source })?;
    tracing::debug!("opened process {}", pid);

    Ok(Reference::from_box(Box::new(ProcessResource::new(handle))))
}

/// リファレンスが指すプロセスのPIDを取得する
pub fn pid(reference: &Reference) -> Result<u32> {
    Ok(resource(reference)?.pid())
}

/// プロセスメモリを読み取る
///
/// 戻り値はOSが報告したバイト数ちょうどで、要求より短い場合があります。
/// 失敗した場合、部分的に読み取ったデータは返しません。
pub fn read(reference: &Reference, address: &HostValue, length: &HostValue) -> Result<Vec<u8>> {
    let process = resource(reference)?;
    let address = address.to_address()?;
    let length = length.to_length()?;

    if length == 0 || length > MAX_READ_LENGTH as u64 {
        return Err(Error::Range {
            length,
            max: MAX_READ_LENGTH,
        });
    }

    process
        .handle
        .memory()
        .read(address, length as usize)
        .map_err(|source| Error::MemoryAccess {
            operation: MemoryOperation::Read,
            address,
            source,
        })
}

/// プロセスメモリに書き込む
///
/// OSが報告した書き込みバイト数を返します。
pub fn write(reference: &Reference, address: &HostValue, data: &[u8]) -> Result<usize> {
    let process = resource(reference)?;
    let address = address.to_address()?;

    if data.is_empty() {
        return Err(Error::invalid_argument("data must not be empty"));
    }

    process
        .handle
        .memory()
        .write(address, data)
        .map_err(|source| Error::MemoryAccess {
            operation: MemoryOperation::Write,
            address,
            source,
        })
}

/// アドレスを含むメモリ領域を問い合わせる
///
/// 問い合わせに失敗した場合（どの領域にも含まれない場合を含む）は
/// エラーではなく空の結果を返します。成功時は要素1つの Vec です。
pub fn query(reference: &Reference, address: &HostValue) -> Result<Vec<MemoryRegion>> {
    let process = resource(reference)?;
    let address = address.to_address()?;

    match process.handle.memory().region_at(address) {
        Ok(Some(region)) => Ok(vec![region]),
        Ok(None) => Ok(Vec::new()),
        Err(e) => {
            tracing::debug!("memory query at 0x{:x} failed: {}", address, e);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_pid() {
        let reference = get_current().unwrap();
        assert_eq!(pid(&reference).unwrap(), std::process::id());
        assert!(reference.downcast_ref::<ProcessResource>().unwrap().is_current());
    }

    #[test]
    fn test_read_length_bounds() {
        let reference = get_current().unwrap();
        let buffer = [0u8; 8];
        let address = HostValue::from(buffer.as_ptr() as u64);

        assert!(matches!(
            read(&reference, &address, &HostValue::from(0u32)),
            Err(Error::Range { length: 0, .. })
        ));
        assert!(matches!(
            read(&reference, &address, &HostValue::Number((MAX_READ_LENGTH + 1) as f64)),
            Err(Error::Range { .. })
        ));
        assert!(matches!(
            read(&reference, &address, &HostValue::Number(-1.0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            read(&reference, &address, &HostValue::Number(2.5)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            read(&reference, &HostValue::from("0x10"), &HostValue::from(4u32)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_write_round_trip() {
        let reference = get_current().unwrap();
        let mut scratch = vec![0u8; 32];
        let address = HostValue::from(scratch.as_mut_ptr() as u64);

        let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        assert_eq!(write(&reference, &address, &data).unwrap(), data.len());

        let bytes = read(&reference, &address, &HostValue::from(data.len() as u32)).unwrap();
        assert_eq!(bytes, data);
    }

    #[test]
    fn test_write_rejects_empty_data() {
        let reference = get_current().unwrap();
        let scratch = [0u8; 4];
        let address = HostValue::from(scratch.as_ptr() as u64);
        assert!(matches!(
            write(&reference, &address, &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_unmapped_reports_memory_error() {
        let reference = get_current().unwrap();
        let result = read(&reference, &HostValue::from(0x10u32), &HostValue::from(4u32));
        assert!(matches!(
            result,
            Err(Error::MemoryAccess {
                operation: MemoryOperation::Read,
                address: 0x10,
                ..
            })
        ));
    }

    #[test]
    fn test_operations_after_release_fail() {
        let mut reference = get_current().unwrap();
        let scratch = [0u8; 4];
        let address = HostValue::from(scratch.as_ptr() as u64);

        reference.release();
        assert!(!reference.is_valid());

        assert!(matches!(
            read(&reference, &address, &HostValue::from(4u32)),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(
            write(&reference, &address, &[1]),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(query(&reference, &address), Err(Error::InvalidHandle)));
        assert!(matches!(reference.address(), Err(Error::InvalidHandle)));
        assert!(matches!(pid(&reference), Err(Error::InvalidHandle)));
        assert!(matches!(
            reference.downcast_ref::<ProcessResource>(),
            Err(Error::InvalidHandle)
        ));
    }

    #[test]
    fn test_invalid_handle_checked_before_arguments() {
        let mut reference = get_current().unwrap();
        reference.release();
        assert!(matches!(
            read(&reference, &HostValue::Null, &HostValue::from(0u32)),
            Err(Error::InvalidHandle)
        ));
    }

    #[test]
    fn test_non_process_reference_rejected() {
        let literal = Reference::from_address(&HostValue::Number(4096.0)).unwrap();
        assert!(matches!(
            read(&literal, &HostValue::from(4096u32), &HostValue::from(4u32)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_query_regions() {
        let reference = get_current().unwrap();
        let value = Box::new(7u64);
        let addr = &*value as *const u64 as u64;

        let regions = query(&reference, &HostValue::from(addr)).unwrap();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].contains(addr));

        let empty = query(&reference, &HostValue::from(0x10u32)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_open_invalid_pid() {
        assert!(matches!(open(&HostValue::from(0u32)), Err(Error::InvalidArgument(_))));
        assert!(matches!(open(&HostValue::from("1")), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            open(&HostValue::Number(4_000_000_000.0)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
