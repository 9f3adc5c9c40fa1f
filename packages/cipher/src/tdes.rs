//! 3DES（EDE）组合与密钥字符串解析。
//!
//! 密钥字符串接受 16 位十六进制（64 位带校验形式）或 14 位十六进制
//! （56 位形式，解析时在校验位补零）的 1 至 3 倍长度。两把密钥时按
//! 键控选项 2 以 K1 充当 K3。

use crate::CipherError;
use crate::bits::BitVector;
use crate::des::Des;

/// 64 位密钥中被算法忽略的奇偶校验位下标。
pub const PARITY_POSITIONS: [usize; 8] = [7, 15, 23, 31, 39, 47, 55, 63];

/// 在校验位处插零，把 56 位密钥扩回 64 位。
pub fn expand_key(key: &BitVector) -> Result<BitVector, CipherError> {
    if key.len() != 56 {
        return Err(CipherError::LengthMismatch {
            expected: 56,
            actual: key.len(),
        });
    }
    let mut out = BitVector::EMPTY;
    let mut source = 0;
    for index in 0..64 {
        if PARITY_POSITIONS.contains(&index) {
            out = out.concat(&BitVector::from_int(0, 1));
        } else {
            out = out.concat(&BitVector::from_int(u64::from(key.bit(source)), 1));
            source += 1;
        }
    }
    Ok(out)
}

/// 丢弃校验位，把 64 位密钥压成 56 位。
pub fn reduce_key(key: &BitVector) -> Result<BitVector, CipherError> {
    if key.len() != 64 {
        return Err(CipherError::LengthMismatch {
            expected: 64,
            actual: key.len(),
        });
    }
    let mut out = BitVector::EMPTY;
    for index in 0..64 {
        if !PARITY_POSITIONS.contains(&index) {
            out = out.concat(&BitVector::from_int(u64::from(key.bit(index)), 1));
        }
    }
    Ok(out)
}

/// 把密钥字符串拆成 1 或 3 把 64 位密钥。
pub fn parse_keys(key_string: &str) -> Result<Vec<BitVector>, CipherError> {
    let digits = key_string.strip_prefix("0x").unwrap_or(key_string);
    if !digits.is_ascii() {
        return Err(CipherError::MalformedInput(format!(
            "key [{key_string}] contains non-hex characters"
        )));
    }
    let subkey_digits = if !digits.is_empty() && digits.len() % 16 == 0 {
        16
    } else if !digits.is_empty() && digits.len() % 14 == 0 {
        14
    } else {
        return Err(CipherError::MalformedInput(format!(
            "expected key length for [{key_string}] to be a multiple of 14 or 16 hex digits, was {}",
            digits.len()
        )));
    };

    let mut keys = Vec::new();
    let mut offset = 0;
    while offset + subkey_digits <= digits.len() {
        keys.push(single_key(&digits[offset..offset + subkey_digits])?);
        offset += subkey_digits;
    }

    if keys.len() == 2 {
        // 键控选项 2：K3 = K1
        keys.push(keys[0]);
    }
    if keys.len() != 1 && keys.len() != 3 {
        return Err(CipherError::MalformedInput(format!(
            "expected 1, 2 or 3 keys in [{key_string}], got {}",
            keys.len()
        )));
    }
    Ok(keys)
}

fn single_key(digits: &str) -> Result<BitVector, CipherError> {
    let key = BitVector::from_hex(digits)?;
    match key.len() {
        64 => Ok(key),
        56 => expand_key(&key),
        actual => Err(CipherError::LengthMismatch { expected: 64, actual }),
    }
}

/// 把整条 EDE / DED 管线预先铺开的 3DES（或单 DES）实例。
///
/// 第 j 轮的方向是 `decrypt ^ (j 为奇数)`；解密时密钥次序整体反转。
pub struct TripleDes {
    stages: Vec<(Des, bool)>,
}

impl TripleDes {
    pub fn new(key_string: &str, decrypt: bool) -> Result<Self, CipherError> {
        Self::with_trace(key_string, decrypt, false)
    }

    /// `trace` 会透传给每一级 DES。
    pub fn with_trace(key_string: &str, decrypt: bool, trace: bool) -> Result<Self, CipherError> {
        let mut keys = parse_keys(key_string)?;
        if decrypt {
            keys.reverse();
        }
        let stages = keys
            .iter()
            .enumerate()
            .map(|(round, key)| Ok((Des::with_trace(key, trace)?, decrypt ^ (round % 2 == 1))))
            .collect::<Result<Vec<_>, CipherError>>()?;
        Ok(Self { stages })
    }

    /// 依次过每一级，返回最终分组。
    pub fn crypt(&self, block: &BitVector) -> Result<BitVector, CipherError> {
        let mut block = *block;
        for (des, decrypt) in &self.stages {
            block = if *decrypt {
                des.decrypt(&block)?
            } else {
                des.encrypt(&block)?
            };
        }
        Ok(block)
    }

    /// 逐级访问（文件模式按轮写中间结果时用）。
    pub fn rounds(&self) -> impl ExactSizeIterator<Item = (&Des, bool)> {
        self.stages.iter().map(|(des, decrypt)| (des, *decrypt))
    }
}
