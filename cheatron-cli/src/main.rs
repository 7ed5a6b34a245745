//! Cheatron CLI - コマンドラインインターフェース
//!
//! ネイティブブリッジのホストとして動作するREPL。
//! リファレンスを `$1`, `$2`, ... という名前で保持し、各コマンドの後に
//! 診断メッセージチャネルを処理してシンクに届いたメッセージを表示します。

use anyhow::{anyhow, bail, Result};
use cheatron_core::diagnostics;
use cheatron_core::parse::{parse_address, parse_hex_bytes};
use cheatron_core::process::{self, ProcessResource};
use cheatron_core::value::MAX_SAFE_INTEGER;
use cheatron_core::{
    engine, ChannelConfig, Command, DiagnosticChannel, EngineInstance, HostValue, Level,
    MemoryRegion, NoopLibrary, Reference, Runtime,
};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cheatron - native bridge host
#[derive(Parser)]
#[command(name = "cheatron")]
#[command(version = "0.1.0")]
#[command(about = "Interactive host for process memory and disassembler handles", long_about = None)]
struct Cli {
    /// Process ID to open at start
    #[arg(short, long)]
    pid: Option<u32>,

    /// Capacity of the diagnostic message queue
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log level for internal tracing (overridden by RUST_LOG)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// ホストが保持するリファレンスの表
struct Host {
    runtime: Runtime,
    proxies: BTreeMap<usize, Reference>,
    next_id: usize,
}

impl Host {
    fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            proxies: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// リファレンスを登録して名前を返す
    fn insert(&mut self, reference: Reference) -> String {
        let id = self.next_id;
        self.next_id += 1;
        self.proxies.insert(id, reference);
        format!("${}", id)
    }

    fn get(&self, name: &str) -> Result<&Reference> {
        let id = proxy_id(name)?;
        self.proxies
            .get(&id)
            .ok_or_else(|| anyhow!("No such reference: {}", name))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Reference> {
        let id = proxy_id(name)?;
        self.proxies
            .get_mut(&id)
            .ok_or_else(|| anyhow!("No such reference: {}", name))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    println!("Cheatron - native bridge host");
    println!("Version 0.1.0");
    println!();

    let channel: &'static DiagnosticChannel = match cli.queue_capacity {
        Some(capacity) => Box::leak(Box::new(DiagnosticChannel::with_config(ChannelConfig {
            capacity,
        }))),
        None => diagnostics::global(),
    };

    let sink = Arc::new(|level: Level, message: &str| {
        println!("[{}] {}", level, message);
    });

    let runtime = Runtime::initialize(channel, &sink, NoopLibrary)?;
    tracing::debug!("init status: {:?}", runtime.status());
    runtime.dispatch();

    let mut host = Host::new(runtime);

    if let Some(pid) = cli.pid {
        let reference = host.runtime.open_process(&HostValue::from(pid))?;
        let name = host.insert(reference);
        println!("Opened process {} as {}", pid, name);
    }

    run_repl(&mut host)?;

    // リファレンスを先に破棄してから外部ライブラリを破棄する
    let Host { runtime, proxies, .. } = host;
    drop(proxies);
    runtime.shutdown();

    Ok(())
}

/// ログを初期化する
fn init_logging(log_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// REPLループを実行する
fn run_repl(host: &mut Host) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(cheatron) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                let result = handle_command(host, line);

                // コマンドごとにホストの手番として診断メッセージを届ける
                host.runtime.dispatch();

                match result {
                    Ok(true) => {
                        println!("Goodbye!");
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// コマンドを処理する（終了する場合は true）
fn handle_command(host: &mut Host, line: &str) -> Result<bool> {
    let Some(command) = Command::parse(line) else {
        println!("Unknown command: {}", line);
        println!("Type 'help' for available commands.");
        return Ok(false);
    };

    match command {
        Command::Current => {
            let reference = process::get_current()?;
            let name = host.insert(reference);
            println!("{} = current process (pid {})", name, std::process::id());
        }
        Command::Open(pid) => {
            let reference = host.runtime.open_process(&number_arg(&pid)?)?;
            let pid = process::pid(&reference)?;
            let name = host.insert(reference);
            println!("{} = process {}", name, pid);
        }
        Command::Ref(address) => {
            let reference = Reference::from_address(&HostValue::from(address))?;
            let shown = reference.address()?;
            let name = host.insert(reference);
            println!("{} = {}", name, shown);
        }
        Command::Read {
            target,
            address,
            length,
        } => {
            let address = parse_address(&address)?;
            let bytes = process::read(
                host.get(&target)?,
                &HostValue::from(address),
                &number_arg(&length)?,
            )?;
            print_hexdump(address, &bytes);
        }
        Command::Write {
            target,
            address,
            data,
        } => {
            let address = parse_address(&address)?;
            let data = parse_hex_bytes(&data)?;
            let written = process::write(host.get(&target)?, &HostValue::from(address), &data)?;
            println!("Wrote {} bytes at 0x{:x}", written, address);
        }
        Command::Query { target, address } => {
            let address = parse_address(&address)?;
            let regions = process::query(host.get(&target)?, &HostValue::from(address))?;
            if regions.is_empty() {
                println!("No region contains 0x{:x}", address);
            }
            for region in &regions {
                print_region(region);
            }
        }
        Command::Addr(name) => {
            println!("{}", host.get(&name)?.address()?);
        }
        Command::Valid(name) => {
            println!("{}", host.get(&name)?.is_valid());
        }
        Command::Release(name) => {
            host.get_mut(&name)?.release();
            println!("{} released", name);
        }
        Command::Drop(name) => {
            let id = proxy_id(&name)?;
            match host.proxies.remove(&id) {
                Some(reference) => {
                    drop(reference);
                    println!("{} dropped", name);
                }
                None => bail!("No such reference: {}", name),
            }
        }
        Command::Cs { arch, mode } => {
            let reference = host
                .runtime
                .open_engine(&arch_arg(&arch)?, &mode_arg(&mode)?)?;
            let engine = engine::instance(&reference)?;
            let description = describe_engine(engine);
            let name = host.insert(reference);
            println!("{} = {}", name, description);
        }
        Command::Disasm {
            engine: cs,
            target,
            address,
            length,
        } => {
            let address = HostValue::from(parse_address(&address)?);
            let code = process::read(host.get(&target)?, &address, &number_arg(&length)?)?;
            let insns = engine::disassemble(host.get(&cs)?, &code, &address)?;

            if insns.is_empty() {
                println!("No instructions decoded");
            }
            for insn in insns {
                let bytes: Vec<String> = insn.bytes.iter().map(|b| format!("{:02x}", b)).collect();
                println!(
                    "  0x{:016x}: {:<24} {} {}",
                    insn.address,
                    bytes.join(" "),
                    insn.mnemonic,
                    insn.op_str
                );
            }
        }
        Command::List => print_proxies(host),
        Command::Help => print_help(),
        Command::Quit => return Ok(true),
    }

    Ok(false)
}

/// `$n` 形式のリファレンス名を番号に変換する
fn proxy_id(name: &str) -> Result<usize> {
    name.strip_prefix('$')
        .and_then(|id| id.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("Reference names look like $1, got '{}'", name))
}

/// 数値引数をホストの値に変換する
///
/// 倍精度で正確に表せない値は丸めずに bigint として渡します。
fn number_arg(s: &str) -> Result<HostValue> {
    let value = parse_address(s)?;
    if value <= MAX_SAFE_INTEGER as u64 {
        Ok(HostValue::Number(value as f64))
    } else {
        Ok(HostValue::from(value))
    }
}

fn arch_arg(s: &str) -> Result<HostValue> {
    match s {
        "arm" => Ok(HostValue::from(0u32)),
        "arm64" | "aarch64" => Ok(HostValue::from(1u32)),
        "x86" => Ok(HostValue::from(3u32)),
        other => number_arg(other),
    }
}

fn mode_bits(name: &str) -> Option<u32> {
    match name {
        "arm" => Some(0),
        "16" => Some(1 << 1),
        "32" => Some(1 << 2),
        "64" => Some(1 << 3),
        "thumb" => Some(1 << 4),
        "mclass" => Some(1 << 5),
        "v8" => Some(1 << 6),
        "be" => Some(1 << 31),
        _ => None,
    }
}

/// モード名（`thumb+mclass` のように `+` で組み合わせ可）または数値
fn mode_arg(s: &str) -> Result<HostValue> {
    if let Some(bits) = mode_bits(s) {
        return Ok(HostValue::from(bits));
    }

    if s.contains('+') {
        let mut mode = 0;
        for part in s.split('+') {
            mode |= mode_bits(part).ok_or_else(|| anyhow!("Unknown mode name '{}'", part))?;
        }
        return Ok(HostValue::from(mode));
    }

    number_arg(s)
}

fn describe_engine(engine: &EngineInstance) -> String {
    if engine.flags().is_empty() {
        format!("capstone {:?}/{:?}", engine.arch(), engine.mode())
    } else {
        format!("capstone {:?}/{:?} {:?}", engine.arch(), engine.mode(), engine.flags())
    }
}

/// 16バイトごとに16進ダンプを表示する
fn print_hexdump(base: u64, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        println!(
            "  0x{:016x}: {:<47}  {}",
            base + (i * 16) as u64,
            hex.join(" "),
            ascii
        );
    }
    println!("({} bytes)", bytes.len());
}

fn print_region(region: &MemoryRegion) {
    println!(
        "  0x{:016x}-0x{:016x} {} {:<18} {:<9} {:<7} {}",
        region.base,
        region.end(),
        region.protection.to_rwx_string(),
        region.protection.class().as_str(),
        region.state.as_str(),
        region.region_type.as_str(),
        region.path.as_deref().unwrap_or("")
    );
}

fn print_proxies(host: &Host) {
    if host.proxies.is_empty() {
        println!("No references");
        return;
    }

    for (id, reference) in &host.proxies {
        let address = reference
            .address()
            .unwrap_or_else(|_| "<released>".to_string());

        let kind = if let Ok(process) = reference.downcast_ref::<ProcessResource>() {
            format!("process {}", process.pid())
        } else if let Ok(engine) = reference.downcast_ref::<EngineInstance>() {
            describe_engine(engine)
        } else if reference.is_valid() && !reference.is_owning() {
            "address".to_string()
        } else {
            "-".to_string()
        };

        println!("  ${:<4} {} {}", id, address, kind);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help                      - Show this help message");
    println!("  quit/exit                 - Exit");
    println!("  list (ls)                 - List references");
    println!();
    println!("Process commands:");
    println!("  current                   - Reference the current process");
    println!("  open <pid>                - Open a process by pid");
    println!("  read <ref> <addr> <len>   - Read process memory");
    println!("  write <ref> <addr> <hex>  - Write bytes to process memory");
    println!("  query <ref> <addr>        - Show the region containing an address");
    println!();
    println!("Reference commands:");
    println!("  ref <addr>                - Make a non-owning reference from an address");
    println!("  addr <ref>                - Show the address of a reference");
    println!("  valid <ref>               - Show whether a reference is valid");
    println!("  release <ref>             - Release a reference explicitly");
    println!("  drop <ref>                - Forget a reference (finalization path)");
    println!();
    println!("Disassembler commands:");
    println!("  cs <arch> <mode>          - Open capstone (arch: x86|arm|arm64, mode: 16|32|64|arm|thumb)");
    println!("                              mode names combine with '+': thumb+mclass, arm+v8, arm+be");
    println!("  disasm <cs> <ref> <addr> <len> - Disassemble process memory");
    println!();
    println!("Examples:");
    println!("  current");
    println!("  query $1 0x7ffd0000");
    println!("  cs x86 64");
    println!("  disasm $2 $1 0x401000 32");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_id() {
        assert_eq!(proxy_id("$1").unwrap(), 1);
        assert_eq!(proxy_id("$42").unwrap(), 42);
        assert!(proxy_id("1").is_err());
        assert!(proxy_id("$x").is_err());
    }

    #[test]
    fn test_engine_args() {
        assert_eq!(arch_arg("x86").unwrap(), HostValue::from(3u32));
        assert_eq!(mode_arg("64").unwrap(), HostValue::from(8u32));
        assert_eq!(mode_arg("thumb").unwrap(), HostValue::from(16u32));
        assert_eq!(arch_arg("1").unwrap(), HostValue::Number(1.0));
        assert!(mode_arg("fast").is_err());
    }

    #[test]
    fn test_combined_mode_names() {
        assert_eq!(mode_arg("thumb+mclass").unwrap(), HostValue::from(48u32));
        assert_eq!(mode_arg("arm+be").unwrap(), HostValue::from(1u32 << 31));
        assert!(mode_arg("thumb+turbo").is_err());
    }

    #[test]
    fn test_number_arg_is_exact() {
        assert_eq!(number_arg("4096").unwrap(), HostValue::Number(4096.0));
        assert_eq!(
            number_arg("9007199254740991").unwrap(),
            HostValue::Number(9_007_199_254_740_991.0)
        );

        // 2^53 + 1 は倍精度で表せないため bigint になる
        let big = number_arg("9007199254740993").unwrap();
        assert_eq!(big, HostValue::from(9_007_199_254_740_993u64));
        assert_eq!(big.to_address().unwrap(), 9_007_199_254_740_993);
        assert!(big.to_length().is_err());
    }
}
