//! ネイティブリソースを保持するリファレンス
//!
//! ホストからはポインタとして扱えないネイティブリソースを、1つのリファレンス
//! オブジェクトが単独で所有します。リソースの破棄処理（デストラクタ）は、
//! 明示的な `release()` とリファレンスの Drop（ホスト側のGCによるファイナライズ）の
//! うち先に起きた方で1回だけ実行されます。
//!
//! アドレス値から直接作ったリファレンスは所有権を持たず、破棄処理も持ちません。

use crate::{parse::parse_address, Error, HostValue, Result};
use std::any::TypeId;
use std::ffi::c_void;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;

/// リソースを解放するためのデストラクタ
pub type Destructor = Box<dyn FnOnce(NonNull<c_void>)>;

/// リファレンスの所有形態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// リソースを所有し、破棄時にデストラクタを実行する
    Owning,
    /// 呼び出し元が渡したアドレスを参照するだけで、何も解放しない
    NonOwning,
}

/// ネイティブリソースの所有記録
///
/// `raw` が Some の間だけ有効です。破棄処理は `raw` と `destructor` を
/// take() することで1回だけ実行されます。
pub struct OpaqueHandle {
    raw: Option<NonNull<c_void>>,
    destructor: Option<Destructor>,
    ownership: Ownership,
    resource_type: Option<(TypeId, &'static str)>,
}

impl OpaqueHandle {
    fn owning(
        raw: NonNull<c_void>,
        destructor: Option<Destructor>,
        resource_type: Option<(TypeId, &'static str)>,
    ) -> Self {
        Self {
            raw: Some(raw),
            destructor,
            ownership: Ownership::Owning,
            resource_type,
        }
    }

    fn non_owning(raw: NonNull<c_void>) -> Self {
        Self {
            raw: Some(raw),
            destructor: None,
            ownership: Ownership::NonOwning,
            resource_type: None,
        }
    }

    /// 有効かどうか
    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    /// 生ポインタを取得する（無効なら None）
    pub fn raw(&self) -> Option<NonNull<c_void>> {
        self.raw
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// 破棄処理を実行する
    ///
    /// デストラクタのパニックは捕捉して握りつぶします。2回目以降は何もしません。
    fn teardown(&mut self) {
        let raw = self.raw.take();
        let destructor = self.destructor.take();
        self.resource_type = None;

        if let (Some(raw), Some(destructor)) = (raw, destructor) {
            let address = raw.as_ptr() as usize;
            if catch_unwind(AssertUnwindSafe(move || destructor(raw))).is_err() {
                tracing::warn!("destructor panicked while releasing 0x{:016x}; ignored", address);
            } else {
                tracing::debug!("released native resource at 0x{:016x}", address);
            }
        }
    }
}

impl Drop for OpaqueHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// ホストに公開されるリファレンス（プロキシ）
///
/// 1つの [`OpaqueHandle`] を排他的に所有します。
/// 同じリソースを複数のリファレンスで共有することはありません。
pub struct Reference {
    handle: OpaqueHandle,
}

impl Reference {
    /// 生ポインタとデストラクタからリファレンスを作成する
    ///
    /// null ポインタの場合は [`Error::NullResource`] を返し、デストラクタは呼ばれません。
    pub fn wrap(raw: *mut c_void, destructor: Option<Destructor>) -> Result<Self> {
        let raw = NonNull::new(raw).ok_or(Error::NullResource)?;
        Ok(Self {
            handle: OpaqueHandle::owning(raw, destructor, None),
        })
    }

    /// 所有する値を包んだリファレンスを作成する
    ///
    /// デストラクタは Box を取り戻して値を Drop します。
    /// 値は [`Reference::downcast_ref`] で同じ型としてのみ取り出せます。
    pub fn from_box<T: 'static>(value: Box<T>) -> Self {
        let raw = NonNull::from(Box::leak(value)).cast::<c_void>();
        let destructor: Destructor = Box::new(|ptr: NonNull<c_void>| {
            // SAFETY: ptr は上で Box::leak した T へのポインタで、teardown により1回だけ渡される
            drop(unsafe { Box::from_raw(ptr.cast::<T>().as_ptr()) });
        });

        Self {
            handle: OpaqueHandle::owning(
                raw,
                Some(destructor),
                Some((TypeId::of::<T>(), std::any::type_name::<T>())),
            ),
        }
    }

    /// アドレス値から所有権を持たないリファレンスを作成する
    ///
    /// number / bigint / 文字列（"0x" 付き16進数または10進数）を受け付けます。
    /// 作成されたリファレンスは有効ですが、解放時に何も行いません。
    pub fn from_address(value: &HostValue) -> Result<Self> {
        let address = match value {
            HostValue::String(s) => parse_address(s)?,
            other => other.to_address()?,
        };

        let address = usize::try_from(address).map_err(|_| {
            Error::invalid_argument(format!("address 0x{:x} does not fit in a pointer", address))
        })?;
        let raw = NonNull::new(address as *mut c_void).ok_or(Error::NullResource)?;

        Ok(Self {
            handle: OpaqueHandle::non_owning(raw),
        })
    }

    /// リソースのアドレスを固定幅の16進数文字列で取得する（表示用）
    pub fn address(&self) -> Result<String> {
        let raw = self.as_ptr()?;
        Ok(format!("0x{:016x}", raw.as_ptr() as usize))
    }

    /// 有効かどうか
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// リソースを所有しているかどうか
    pub fn is_owning(&self) -> bool {
        self.handle.ownership() == Ownership::Owning
    }

    /// リソースを解放する
    ///
    /// 有効かつデストラクタがある場合はそれを1回だけ実行し、無効状態にします。
    /// すでに無効な場合は何もしません。
    pub fn release(&mut self) {
        self.handle.teardown();
    }

    /// 生ポインタを取得する
    pub fn as_ptr(&self) -> Result<NonNull<c_void>> {
        self.handle.raw().ok_or(Error::InvalidHandle)
    }

    /// 所有している値を型を指定して参照する
    ///
    /// 無効なリファレンスは [`Error::InvalidHandle`]、型が一致しない場合や
    /// 所有権を持たないリファレンスは [`Error::InvalidArgument`] になります。
    pub fn downcast_ref<T: 'static>(&self) -> Result<&T> {
        let raw = self.as_ptr()?;
        match self.handle.resource_type {
            Some((type_id, _)) if type_id == TypeId::of::<T>() => {
                // SAFETY: 型IDが一致しており、raw は from_box で作られた T を指している。
                // 解放には &mut self が必要なので、返した参照の間は解放されない。
                Ok(unsafe { &*raw.cast::<T>().as_ptr() })
            }
            Some((_, held)) => Err(Error::invalid_argument(format!(
                "Reference holds {}, expected {}",
                held,
                std::any::type_name::<T>()
            ))),
            None => Err(Error::invalid_argument(format!(
                "Reference does not own a {}",
                std::any::type_name::<T>()
            ))),
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("address", &self.handle.raw().map(|p| p.as_ptr() as usize))
            .field("valid", &self.is_valid())
            .field("ownership", &self.handle.ownership())
            .finish()
    }
}
