//! DES 核心：密钥编排、Feistel 轮函数与单分组加解密。

use tracing::debug;

use crate::CipherError;
use crate::bits::BitVector;
use crate::consts::{
    EXPANSION, FINAL_PERMUTATION, INITIAL_PERMUTATION, KEY_SHIFT_AMOUNTS, PERMUTATION,
    PERMUTED_CHOICE_1_LEFT, PERMUTED_CHOICE_1_RIGHT, PERMUTED_CHOICE_2, SBOXES,
};

const NUM_ROUNDS: usize = 16;

/// 携带预计算子密钥的 DES 实例。
///
/// 子密钥按加密方向存放；解密时反向取用。`trace` 打开后会把
/// 子密钥生成与每一轮的中间状态写进日志。
pub struct Des {
    subkeys: [BitVector; NUM_ROUNDS],
    trace: bool,
}

impl Des {
    pub fn new(key: &BitVector) -> Result<Self, CipherError> {
        Self::with_trace(key, false)
    }

    /// `trace` 为真时输出算法每一步的中间值。
    pub fn with_trace(key: &BitVector, trace: bool) -> Result<Self, CipherError> {
        if key.len() != 64 {
            return Err(CipherError::LengthMismatch {
                expected: 64,
                actual: key.len(),
            });
        }
        Ok(Self {
            subkeys: key_schedule(key, trace),
            trace,
        })
    }

    pub fn encrypt(&self, block: &BitVector) -> Result<BitVector, CipherError> {
        self.crypt(block, false)
    }

    /// 与加密完全相同，只是子密钥次序反转。
    pub fn decrypt(&self, block: &BitVector) -> Result<BitVector, CipherError> {
        self.crypt(block, true)
    }

    fn crypt(&self, block: &BitVector, decrypt: bool) -> Result<BitVector, CipherError> {
        if block.len() != 64 {
            return Err(CipherError::LengthMismatch {
                expected: 64,
                actual: block.len(),
            });
        }

        let permuted = block.permute(&INITIAL_PERMUTATION);
        let mut left = permuted.slice(0, 32);
        let mut right = permuted.slice(32, 64);
        if self.trace {
            debug!("初始置换: {}", permuted.to_hex());
        }

        for round in 0..NUM_ROUNDS {
            let subkey = if decrypt {
                &self.subkeys[NUM_ROUNDS - 1 - round]
            } else {
                &self.subkeys[round]
            };
            let mixed = left.xor(&feistel(&right, subkey));
            left = right;
            right = mixed;
            if self.trace {
                debug!(
                    "第 {round} 轮: 子密钥={} 左半={} 右半={}",
                    subkey.to_hex(),
                    left.to_hex(),
                    right.to_hex()
                );
            }
        }

        // 末轮不交换左右半，等价于按 R‖L 组合后过末置换
        let output = right.concat(&left).permute(&FINAL_PERMUTATION);
        if self.trace {
            debug!("末置换: {}", output.to_hex());
        }
        Ok(output)
    }
}

/// PC-1 拆出两个 28 位寄存器，逐轮左旋后经 PC-2 得到 16 把 48 位子密钥。
fn key_schedule(key: &BitVector, trace: bool) -> [BitVector; NUM_ROUNDS] {
    let mut left = key.permute(&PERMUTED_CHOICE_1_LEFT);
    let mut right = key.permute(&PERMUTED_CHOICE_1_RIGHT);
    assert_eq!(left.len(), 28);
    assert_eq!(right.len(), 28);

    let mut subkeys = [BitVector::EMPTY; NUM_ROUNDS];
    for (round, subkey) in subkeys.iter_mut().enumerate() {
        let shift = KEY_SHIFT_AMOUNTS[round];
        left = left.rotate_left(shift);
        right = right.rotate_left(shift);
        *subkey = left.concat(&right).permute(&PERMUTED_CHOICE_2);
        if trace {
            debug!(
                "子密钥 {round}: 寄存器左旋 {shift} 位, C={} D={} → {}",
                left.to_hex(),
                right.to_hex(),
                subkey.to_hex()
            );
        }
    }
    subkeys
}

/// 轮函数 F：扩张、与子密钥异或、S 盒代换、P 置换。
fn feistel(half_block: &BitVector, subkey: &BitVector) -> BitVector {
    assert_eq!(half_block.len(), 32);
    assert_eq!(subkey.len(), 48);

    let expanded = half_block.permute(&EXPANSION);
    let mixed = expanded.xor(subkey);
    substitute(&mixed).permute(&PERMUTATION)
}

/// 八个 6 位分组过各自的 S 盒。首末两位选行，中间四位选列。
fn substitute(block: &BitVector) -> BitVector {
    assert_eq!(block.len(), 48);
    let mut out = BitVector::EMPTY;
    for group in 0..8 {
        let base = group * 6;
        let row = usize::from(block.bit(base) << 1 | block.bit(base + 5));
        let column = usize::from(
            block.bit(base + 1) << 3
                | block.bit(base + 2) << 2
                | block.bit(base + 3) << 1
                | block.bit(base + 4),
        );
        out = out.concat(&BitVector::from_int(u64::from(SBOXES[group][row][column]), 4));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(text: &str) -> BitVector {
        BitVector::from_hex(text).unwrap()
    }

    // FIPS 46-3 的标准已知答案
    #[test]
    fn known_answer_classic_vector() {
        let des = Des::new(&hex("133457799BBCDFF1")).unwrap();
        let ciphertext = des.encrypt(&hex("0123456789ABCDEF")).unwrap();
        assert_eq!(ciphertext.to_hex(), "85e813540f0ab405");
    }

    #[test]
    fn known_answer_all_zero() {
        let des = Des::new(&hex("0000000000000000")).unwrap();
        let ciphertext = des.encrypt(&hex("0000000000000000")).unwrap();
        assert_eq!(ciphertext.to_hex(), "8ca64de9c1b123a7");
    }

    #[test]
    fn known_answer_all_one() {
        let des = Des::new(&hex("ffffffffffffffff")).unwrap();
        let ciphertext = des.encrypt(&hex("ffffffffffffffff")).unwrap();
        assert_eq!(ciphertext.to_hex(), "7359b2163e4edc58");
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let des = Des::new(&hex("deadbeef01234567")).unwrap();
        let plaintext = hex("0011223344556677");
        let ciphertext = des.encrypt(&plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(des.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn parity_bits_are_ignored() {
        let key = hex("133457799BBCDFF1");
        let reference = Des::new(&key).unwrap().encrypt(&hex("0123456789ABCDEF")).unwrap();
        for position in [7usize, 15, 23, 31, 39, 47, 55, 63] {
            let flipped = key.xor(&BitVector::from_int(1u64 << (63 - position), 64));
            let ciphertext = Des::new(&flipped)
                .unwrap()
                .encrypt(&hex("0123456789ABCDEF"))
                .unwrap();
            assert_eq!(ciphertext, reference, "parity bit {position} changed the result");
        }
    }

    #[test]
    fn rejects_short_key_and_block() {
        assert!(matches!(
            Des::new(&hex("1234")),
            Err(CipherError::LengthMismatch { expected: 64, .. })
        ));
        let des = Des::new(&hex("133457799BBCDFF1")).unwrap();
        assert!(des.encrypt(&hex("0123")).is_err());
    }
}
