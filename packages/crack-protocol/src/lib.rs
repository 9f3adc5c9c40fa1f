//! DES 穷举调度的线上协议。
//!
//! 报文本体是小端二进制编码的自描述对象；帧定界（长度前缀）由传输层
//! 负责，本 crate 只管编解码与认证摘要，不做任何 I/O。

pub mod auth;
pub mod message;

pub use message::*;
