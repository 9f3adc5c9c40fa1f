//! 密钥空间枚举与 input.h 的参数提取。
//!
//! DES 的有效密钥是 56 位。位切片检查器一次吃掉末尾
//! `NUM_CHUNK_BITS` 位，已知的用户前缀再削掉开头若干位，
//! 剩下的中段就是要逐一派发的任务前缀。

use std::path::Path;

use regex::Regex;
use thiserror::Error;

/// DES 的有效密钥位数。
pub const KEY_BITS: u32 = 56;

#[derive(Error, Debug)]
pub enum KeySpaceError {
    #[error("num_chunk_bits {0} outside the supported range 6..=56")]
    ChunkBitsOutOfRange(u32),
    #[error("invalid character '{0}' in key prefix, expected '0' or '1'")]
    InvalidPrefix(char),
    #[error("prefix of {prefix} bits leaves no room under {chunk} chunk bits")]
    PrefixTooLong { prefix: usize, chunk: u32 },
    #[error("no NUM_CHUNK_BITS define found in the input header")]
    MissingChunkBits,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 任务前缀的有序枚举器。
///
/// 依次产出 `前缀 ‖ binary(n, 宽度)`，n 严格递增，序列有限且无重复；
/// 给定相同的参数可以从头重放。
pub struct KeySpace {
    prefix: String,
    width: usize,
    next: u64,
    end: u64,
}

impl KeySpace {
    pub fn new(num_chunk_bits: u32, prefix: &str) -> Result<Self, KeySpaceError> {
        if !(6..=KEY_BITS).contains(&num_chunk_bits) {
            return Err(KeySpaceError::ChunkBitsOutOfRange(num_chunk_bits));
        }
        if let Some(bad) = prefix.chars().find(|ch| *ch != '0' && *ch != '1') {
            return Err(KeySpaceError::InvalidPrefix(bad));
        }
        let width = ((KEY_BITS - num_chunk_bits) as usize)
            .checked_sub(prefix.len())
            .ok_or(KeySpaceError::PrefixTooLong {
                prefix: prefix.len(),
                chunk: num_chunk_bits,
            })?;
        Ok(Self {
            prefix: prefix.to_string(),
            width,
            next: 0,
            end: 1u64 << width,
        })
    }

    /// 尚未产出的任务数。
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }
}

impl Iterator for KeySpace {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.next == self.end {
            return None;
        }
        let n = self.next;
        self.next += 1;
        if self.width == 0 {
            // 前缀与分块位恰好覆盖整把密钥，只剩一个空后缀任务
            Some(self.prefix.clone())
        } else {
            Some(format!("{}{:02$b}", self.prefix, n, self.width))
        }
    }
}

/// 从 input.h 里抠出 `#define NUM_CHUNK_BITS <n>`。
pub fn read_num_chunk_bits(path: &Path) -> Result<u32, KeySpaceError> {
    let content = std::fs::read_to_string(path)?;
    let pattern =
        Regex::new(r"#define NUM_CHUNK_BITS (\d{1,2})").expect("字面量正则必然合法");
    let captures = pattern
        .captures(&content)
        .ok_or(KeySpaceError::MissingChunkBits)?;
    Ok(captures[1].parse().expect("两位以内的数字必然可解析"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn enumerates_in_ascending_order() {
        let tasks: Vec<String> = KeySpace::new(53, "1").unwrap().collect();
        assert_eq!(tasks, ["100", "101", "110", "111"]);
    }

    #[test]
    fn prefix_is_prepended_verbatim() {
        let tasks: Vec<String> = KeySpace::new(52, "01").unwrap().collect();
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|task| task.starts_with("01")));
        assert_eq!(tasks[0], "0100");
        assert_eq!(tasks[3], "0111");
    }

    #[test]
    fn restart_replays_the_same_sequence() {
        let first: Vec<String> = KeySpace::new(50, "").unwrap().collect();
        let second: Vec<String> = KeySpace::new(50, "").unwrap().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn full_prefix_leaves_a_single_task() {
        let tasks: Vec<String> = KeySpace::new(54, "01").unwrap().collect();
        assert_eq!(tasks, ["01"]);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            KeySpace::new(5, ""),
            Err(KeySpaceError::ChunkBitsOutOfRange(5))
        ));
        assert!(matches!(
            KeySpace::new(57, ""),
            Err(KeySpaceError::ChunkBitsOutOfRange(57))
        ));
        assert!(matches!(
            KeySpace::new(28, "012"),
            Err(KeySpaceError::InvalidPrefix('2'))
        ));
        assert!(matches!(
            KeySpace::new(54, "111"),
            Err(KeySpaceError::PrefixTooLong { .. })
        ));
    }

    #[test]
    fn chunk_bits_are_scraped_from_the_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#define NUM_CHUNK_BITS 28").unwrap();
        writeln!(file, "uint64_t plaintext_zipped[64] = {{ 0 }};").unwrap();
        assert_eq!(read_num_chunk_bits(file.path()).unwrap(), 28);
    }

    #[test]
    fn missing_define_is_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            read_num_chunk_bits(file.path()),
            Err(KeySpaceError::MissingChunkBits)
        ));
    }
}
