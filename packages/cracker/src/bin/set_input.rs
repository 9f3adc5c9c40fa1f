//! 生成穷举所需的 input.h：预处理明密文并逐位拉直成 64 位字。

use std::path::Path;

use anyhow::bail;
use clap::Parser;
use descrack::input;
use descrack_cipher::BitVector;
use tracing::info;

/// 在当前目录生成位切片检查器的 input.h。
#[derive(Parser)]
#[command(name = "set_input")]
struct Cli {
    /// 检查器一次穷举的密钥末尾位数
    #[arg(short = 'n', long, default_value_t = 28)]
    num_chunk_bits: u32,
    /// 16 位十六进制明文
    plaintext: String,
    /// 对应的 16 位十六进制密文
    ciphertext: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    let plaintext = BitVector::from_hex(&cli.plaintext)?;
    if plaintext.len() != 64 {
        bail!("plaintext must be 16 hex digits");
    }
    let ciphertext = BitVector::from_hex(&cli.ciphertext)?;
    if ciphertext.len() != 64 {
        bail!("ciphertext must be 16 hex digits");
    }

    input::write_input_header(
        Path::new("input.h"),
        &plaintext,
        &ciphertext,
        cli.num_chunk_bits,
    )?;
    info!("已生成 input.h (NUM_CHUNK_BITS={})", cli.num_chunk_bits);
    Ok(())
}
