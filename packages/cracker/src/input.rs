//! 生成位切片检查器所需的 input.h。
//!
//! 检查器把 DES 的初始置换挪到预处理阶段做掉：明文过 IP 后再交换
//! 左右半（进第一轮前的状态），密文只过 IP。每个位随后被"拉直"成
//! 64 位全 0 或全 1 的字，检查器就能把 64 把候选密钥并排塞进一个
//! 字里逐位并行地跑。

use std::fmt::Write as _;
use std::path::Path;

use descrack_cipher::BitVector;
use descrack_cipher::consts::INITIAL_PERMUTATION;

/// 明文的预处理：初始置换，再交换左右半。
pub fn preprocess_plaintext(block: &BitVector) -> BitVector {
    let permuted = block.permute(&INITIAL_PERMUTATION);
    permuted.slice(32, 64).concat(&permuted.slice(0, 32))
}

/// 密文的预处理：只做初始置换。
pub fn preprocess_ciphertext(block: &BitVector) -> BitVector {
    block.permute(&INITIAL_PERMUTATION)
}

/// 把 64 位分组逐位拉直：第 i 项是第 i 位重复 64 次的字。
pub fn zip_block(block: &BitVector) -> [u64; 64] {
    assert_eq!(block.len(), 64);
    std::array::from_fn(|i| if block.bit(i) == 1 { u64::MAX } else { 0 })
}

/// 按每行四个的 C 数组字面量排版。
fn format_zipped(words: &[u64; 64]) -> String {
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i % 4 == 0 {
            out.push_str("    ");
        }
        let _ = write!(out, "0x{word:016x}LL");
        if i != 63 {
            out.push(',');
        }
        if i % 4 == 3 {
            out.push('\n');
        } else {
            out.push(' ');
        }
    }
    out
}

/// 渲染完整的 input.h 文本。
pub fn render_input_header(
    plaintext: &BitVector,
    ciphertext: &BitVector,
    num_chunk_bits: u32,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#define NUM_CHUNK_BITS {num_chunk_bits}");
    let _ = writeln!(out);

    let _ = writeln!(out, "uint64_t plaintext_zipped[64] = {{");
    let _ = writeln!(out);
    let _ = writeln!(out, "    // Unprocessed plaintext: 0x{}", plaintext.to_hex());
    out.push_str(&format_zipped(&zip_block(&preprocess_plaintext(plaintext))));
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    let _ = writeln!(out, "uint64_t ciphertext_zipped[64] = {{");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "    // Unprocessed ciphertext: 0x{}",
        ciphertext.to_hex()
    );
    out.push_str(&format_zipped(&zip_block(&preprocess_ciphertext(ciphertext))));
    let _ = writeln!(out, "}};");
    out
}

/// 写出 input.h。
pub fn write_input_header(
    path: &Path,
    plaintext: &BitVector,
    ciphertext: &BitVector,
    num_chunk_bits: u32,
) -> std::io::Result<()> {
    std::fs::write(path, render_input_header(plaintext, ciphertext, num_chunk_bits))
}
