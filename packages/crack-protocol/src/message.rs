use binrw::{BinRead, BinResult, BinWrite, Endian, binrw};
use std::io::{Cursor, Read, Seek, Write};

/// 任务前缀字符串，u16 长度前缀 + UTF-8 字节。
/// 任务只含 '0'/'1'，但解码时仍按 lossy 处理，不让坏字节拖垮通道。
#[derive(Clone, Eq, PartialEq, Default, Debug)]
pub struct BitString(pub String);

impl AsRef<str> for BitString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl std::ops::Deref for BitString {
    type Target = String;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<&str> for BitString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
impl From<String> for BitString {
    fn from(s: String) -> Self {
        Self(s)
    }
}
impl From<BitString> for String {
    fn from(value: BitString) -> Self {
        value.0
    }
}

impl BinRead for BitString {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let len = u16::read_options(reader, endian, ())?;
        let mut bytes = vec![0u8; usize::from(len)];
        reader.read_exact(&mut bytes)?;
        Ok(Self(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl BinWrite for BitString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let len = u16::try_from(self.0.len()).map_err(|_| binrw::Error::AssertFail {
            pos: 0,
            message: "bit string longer than a u16 length prefix allows".into(),
        })?;
        len.write_options(writer, endian, ())?;
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }
}

/// 报文本体。
///
/// 前四种只在握手与接入阶段出现；`Done` 对应原协议里表示
/// “没有更多任务”的 `false` 哨兵。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// 管理端下发的认证质询（随机数）
    #[brw(magic(0u16))]
    AuthChallenge { nonce: [u8; 16] },
    /// 工作端对质询的 HMAC-SHA256 应答
    #[brw(magic(1u16))]
    AuthDigest { digest: [u8; 32] },
    #[brw(magic(2u16))]
    AuthOk,
    #[brw(magic(3u16))]
    AuthReject,
    /// 接入成功后分配的工作端编号
    #[brw(magic(4u16))]
    WorkerId { id: u32 },
    /// 待穷举的密钥前缀
    #[brw(magic(5u16))]
    Task { task: BitString },
    /// 任务回执：原样带回任务，verdict 为空表示没有命中
    #[brw(magic(6u16))]
    TaskResult {
        task: BitString,
        #[bw(try_calc = u32::try_from(verdict.len()))]
        size: u32,
        #[br(count = size)]
        verdict: Vec<u8>,
    },
    /// 停机哨兵：工作端收到后应关闭连接退出
    #[brw(magic(7u16))]
    Done,
}

pub fn parse_body(body: &[u8]) -> anyhow::Result<Message> {
    Ok(Message::read(&mut Cursor::new(body))?)
}

pub fn to_body(body: &Message) -> anyhow::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(256));
    body.write(&mut cursor)?;
    Ok(cursor.into_inner())
}
