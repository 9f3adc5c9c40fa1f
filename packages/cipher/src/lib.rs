//! 教学用 DES / 3DES 实现。
//!
//! 所有密码学运算都建立在 [`bits::BitVector`] 之上：一个显式记录长度、
//! 以最高位在前（索引 0 为最左）寻址的位向量。置换表按 FIPS 46-3 的
//! 原始排版逐字收录，绝不依赖整数的字节序来表达位顺序。

pub mod bits;
pub mod consts;
pub mod des;
pub mod tdes;

pub use bits::BitVector;
pub use des::Des;
pub use tdes::TripleDes;

use thiserror::Error;

/// 密码层错误。内部的位长断言不属于这里：那是不变量被破坏，直接 panic。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// 十六进制 / ASCII / 二进制输入无法解析。
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// 密钥或分组的位长不符。
    #[error("length mismatch: expected {expected} bits, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
