//! DES / 3DES 命令行：单分组的十六进制/ASCII 加解密，
//! 以及按 ECB 逐块处理整个文件的文件模式。

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use descrack_cipher::{BitVector, CipherError, TripleDes};
use tracing::info;

/// 用 DES 加密（默认）或解密。明文、密文与密钥都按十六进制给出，
/// 64 位值是 16 个十六进制数字；14 个数字的密钥按 56 位形式补校验位；
/// 3DES 密钥是上述宽度的 2 倍或 3 倍。
#[derive(Parser)]
#[command(name = "des")]
struct Cli {
    /// 把第一个参数当作密文并解密
    #[arg(short, long)]
    decrypt: bool,
    /// 把第一个参数当作明文并加密（默认行为）
    #[arg(short = 'c', long, conflicts_with = "decrypt")]
    encrypt: bool,
    /// 打印算法每一步的中间值
    #[arg(short, long)]
    verbose: bool,
    /// 加密时把输入按 ASCII 解释，解密时把结果转回 ASCII
    #[arg(short, long)]
    ascii: bool,
    /// 文件模式：按 ECB 逐 8 字节处理整个文件，末块补零，
    /// 每一轮写出 <文件名>.<轮号>.encrypted / .decrypted
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// 明文或密文（文件模式下省略，密钥前移到这里）
    first: String,
    /// 密钥
    second: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .without_time()
        .init();

    // -c 与 -d 互斥，两者都缺省时按加密处理
    let decrypt = cli.decrypt && !cli.encrypt;
    let key_string = match (&cli.file, &cli.second) {
        (Some(_), Some(_)) => bail!("file mode expects the key as its only argument"),
        (Some(_), None) => cli.first.clone(),
        (None, Some(key)) => key.clone(),
        (None, None) => bail!("not enough arguments: expected <text> <key>"),
    };
    let pipeline = TripleDes::with_trace(&key_string, decrypt, cli.verbose)?;

    match &cli.file {
        Some(path) => run_file_mode(path, &pipeline),
        None => run_block_mode(&cli, &pipeline, decrypt),
    }
}

fn run_block_mode(cli: &Cli, pipeline: &TripleDes, decrypt: bool) -> anyhow::Result<()> {
    let text = if cli.ascii && !decrypt {
        BitVector::from_ascii(cli.first.as_bytes())?
    } else {
        BitVector::from_hex(&cli.first).with_context(|| {
            format!(
                "text couldn't be converted from [{}], perhaps you want --ascii or --file mode",
                cli.first
            )
        })?
    };
    if text.len() != 64 {
        if decrypt {
            bail!("ciphertext must be 16 hex digits");
        }
        bail!("plaintext must be 16 hex digits (or 8 ascii letters if using -a/--ascii)");
    }

    let result = pipeline.crypt(&text)?;
    if cli.ascii && decrypt {
        println!("{}", String::from_utf8_lossy(&result.to_bytes()));
    } else {
        println!("{}", result.to_hex());
    }
    Ok(())
}

/// 文件模式：读 8 字节一组，末组补零；每一轮把全部分组处理一遍并
/// 写出中间文件，下一轮接着上一轮的结果继续。
fn run_file_mode(path: &PathBuf, pipeline: &TripleDes) -> anyhow::Result<()> {
    let data =
        std::fs::read(path).with_context(|| format!("无法读取文件 {}", path.display()))?;
    let mut blocks = data
        .chunks(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes[..chunk.len()].copy_from_slice(chunk);
            BitVector::from_ascii(&bytes)
        })
        .collect::<Result<Vec<_>, CipherError>>()?;

    for (round, (des, decrypt)) in pipeline.rounds().enumerate() {
        blocks = blocks
            .iter()
            .map(|block| {
                if decrypt {
                    des.decrypt(block)
                } else {
                    des.encrypt(block)
                }
            })
            .collect::<Result<Vec<_>, CipherError>>()?;

        let suffix = if decrypt { "decrypted" } else { "encrypted" };
        let out_path = format!("{}.{round}.{suffix}", path.display());
        let bytes: Vec<u8> = blocks.iter().flat_map(BitVector::to_bytes).collect();
        std::fs::write(&out_path, &bytes)
            .with_context(|| format!("无法写出 {out_path}"))?;
        info!("已写出 {out_path}");
    }
    Ok(())
}
