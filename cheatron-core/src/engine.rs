//! 逆アセンブルエンジンのハンドル
//!
//! Capstone のインスタンスを開き、リファレンスとして返します。
//! リファレンスの解放時にインスタンスがクローズされます。

use crate::{Error, HostValue, Reference, Result};
use bitflags::bitflags;
use capstone::prelude::*;
use capstone::Endian;

/// エンジンのアーキテクチャ（Capstone の番号付けに従う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineArch {
    Arm,
    Arm64,
    X86,
}

impl TryFrom<u32> for EngineArch {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(EngineArch::Arm),
            1 => Ok(EngineArch::Arm64),
            3 => Ok(EngineArch::X86),
            other => Err(Error::invalid_argument(format!("unknown arch {}", other))),
        }
    }
}

/// エンジンのモード（Capstone の番号付けに従う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// ARM モード（リトルエンディアン、値 0）
    Arm,
    Mode16,
    Mode32,
    Mode64,
    Thumb,
}

impl TryFrom<u32> for EngineMode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(EngineMode::Arm),
            v if v == 1 << 1 => Ok(EngineMode::Mode16),
            v if v == 1 << 2 => Ok(EngineMode::Mode32),
            v if v == 1 << 3 => Ok(EngineMode::Mode64),
            v if v == 1 << 4 => Ok(EngineMode::Thumb),
            other => Err(Error::invalid_argument(format!("unknown mode {}", other))),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// 基本モードに組み合わせる追加モードとエンディアン（Capstone の番号付けに従う）
    pub struct ModeFlags: u32 {
        /// ARM Cortex-M
        const MCLASS = 1 << 5;
        /// ARMv8 A32
        const V8 = 1 << 6;
        const BIG_ENDIAN = 1 << 31;
    }
}

/// モード値を基本モードと追加フラグに分ける
///
/// 既知のフラグ以外のビットは基本モードとして解釈されます。
pub fn split_mode(value: u32) -> Result<(EngineMode, ModeFlags)> {
    let flags = ModeFlags::from_bits_truncate(value);
    let mode = EngineMode::try_from(value & !ModeFlags::all().bits())?;
    Ok((mode, flags))
}

/// 逆アセンブルされた命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub op_str: String,
}

impl Instruction {
    /// 命令のバイト数
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// リファレンスが所有するエンジンインスタンス
pub struct EngineInstance {
    cs: Capstone,
    arch: EngineArch,
    mode: EngineMode,
    flags: ModeFlags,
}

impl EngineInstance {
    pub fn arch(&self) -> EngineArch {
        self.arch
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    /// バイト列を逆アセンブルする
    pub fn disassemble(&self, code: &[u8], base_addr: u64) -> Result<Vec<Instruction>> {
        let insns = self
            .cs
            .disasm_all(code, base_addr)
            .map_err(|e| Error::invalid_argument(format!("Failed to disassemble: {}", e)))?;

        Ok(insns
            .as_ref()
            .iter()
            .map(|insn| Instruction {
                address: insn.address(),
                bytes: insn.bytes().to_vec(),
                mnemonic: insn.mnemonic().unwrap_or("").to_string(),
                op_str: insn.op_str().unwrap_or("").to_string(),
            })
            .collect())
    }
}

impl Drop for EngineInstance {
    fn drop(&mut self) {
        // Capstone の Drop が cs_close を呼ぶ
        tracing::debug!("Capstone handle released ({:?}/{:?})", self.arch, self.mode);
    }
}

/// アーキテクチャとモードを指定してエンジンを開く
///
/// 詳細モードを有効にした状態で返します。
pub fn open_with(arch: EngineArch, mode: EngineMode) -> Result<Reference> {
    open_with_flags(arch, mode, ModeFlags::empty())
}

/// 追加モードとエンディアンを含めてエンジンを開く
pub fn open_with_flags(arch: EngineArch, mode: EngineMode, flags: ModeFlags) -> Result<Reference> {
    let unsupported = || {
        Error::EngineOpen(format!(
            "mode {:?} ({:?}) is not supported for {:?}",
            mode, flags, arch
        ))
    };

    let endian = if flags.contains(ModeFlags::BIG_ENDIAN) {
        Endian::Big
    } else {
        Endian::Little
    };

    let built = match arch {
        EngineArch::X86 => {
            let x86_mode = match mode {
                EngineMode::Mode16 => arch::x86::ArchMode::Mode16,
                EngineMode::Mode32 => arch::x86::ArchMode::Mode32,
                EngineMode::Mode64 => arch::x86::ArchMode::Mode64,
                _ => return Err(unsupported()),
            };
            if !flags.is_empty() {
                return Err(unsupported());
            }
            Capstone::new().x86().mode(x86_mode).detail(true).build()
        }
        EngineArch::Arm => {
            let arm_mode = match mode {
                EngineMode::Arm => arch::arm::ArchMode::Arm,
                EngineMode::Thumb => arch::arm::ArchMode::Thumb,
                _ => return Err(unsupported()),
            };

            let mut extra = Vec::new();
            if flags.contains(ModeFlags::MCLASS) {
                extra.push(arch::arm::ArchExtraMode::MClass);
            }
            if flags.contains(ModeFlags::V8) {
                extra.push(arch::arm::ArchExtraMode::V8);
            }

            Capstone::new()
                .arm()
                .mode(arm_mode)
                .extra_mode(extra.into_iter())
                .endian(endian)
                .detail(true)
                .build()
        }
        EngineArch::Arm64 => {
            if mode != EngineMode::Arm || flags.intersects(ModeFlags::MCLASS | ModeFlags::V8) {
                return Err(unsupported());
            }
            Capstone::new()
                .arm64()
                .mode(arch::arm64::ArchMode::Arm)
                .endian(endian)
                .detail(true)
                .build()
        }
    };

    let cs = built.map_err(|e| Error::EngineOpen(e.to_string()))?;
    tracing::debug!("Capstone opened ({:?}/{:?} {:?})", arch, mode, flags);

    Ok(Reference::from_box(Box::new(EngineInstance {
        cs,
        arch,
        mode,
        flags,
    })))
}

/// ホストの数値でアーキテクチャとモードを指定してエンジンを開く
///
/// モードには追加モードとエンディアンのビットを組み合わせられます
/// （例: `THUMB | MCLASS`）。
pub fn open(arch: &HostValue, mode: &HostValue) -> Result<Reference> {
    let arch = EngineArch::try_from(arch.to_u32()?)?;
    let (mode, flags) = split_mode(mode.to_u32()?)?;
    open_with_flags(arch, mode, flags)
}

/// リファレンスからエンジンインスタンスを取り出す
pub fn instance(reference: &Reference) -> Result<&EngineInstance> {
    reference.downcast_ref::<EngineInstance>()
}

/// リファレンスのエンジンでバイト列を逆アセンブルする
pub fn disassemble(reference: &Reference, code: &[u8], address: &HostValue) -> Result<Vec<Instruction>> {
    let engine = instance(reference)?;
    let address = address.to_address()?;
    engine.disassemble(code, address)
}
