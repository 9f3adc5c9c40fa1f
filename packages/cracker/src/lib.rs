//! 分布式 DES 密钥穷举。
//!
//! 管理端把密钥前缀当作任务流水线式地派给若干工作端，工作端对每个
//! 前缀调起本地的位切片检查器，命中与否原样回传。通道是带长度分帧、
//! 预共享口令认证的 TCP 连接。

pub mod channel;
pub mod distproc;
pub mod input;
pub mod keyspace;

use thiserror::Error;

#[derive(Error, Debug)]
#[error("invalid endpoint [{0}], expected [address:]port")]
pub struct EndpointError(pub String);

/// 解析 `[地址:]端口` 形式的命令行参数，地址缺省时用 `default_addr`。
pub fn parse_endpoint(arg: &str, default_addr: &str) -> Result<String, EndpointError> {
    let (addr, port) = match arg.rsplit_once(':') {
        Some((addr, port)) => (if addr.is_empty() { default_addr } else { addr }, port),
        None => (default_addr, arg),
    };
    let port: u16 = port
        .parse()
        .map_err(|_| EndpointError(arg.to_string()))?;
    if port == 0 {
        return Err(EndpointError(arg.to_string()));
    }
    Ok(format!("{addr}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_forms() {
        assert_eq!(parse_endpoint("50000", "127.0.0.1").unwrap(), "127.0.0.1:50000");
        assert_eq!(parse_endpoint(":50000", "0.0.0.0").unwrap(), "0.0.0.0:50000");
        assert_eq!(
            parse_endpoint("10.0.0.7:50000", "127.0.0.1").unwrap(),
            "10.0.0.7:50000"
        );
    }

    #[test]
    fn endpoint_rejects_bad_ports() {
        assert!(parse_endpoint("", "127.0.0.1").is_err());
        assert!(parse_endpoint("abc", "127.0.0.1").is_err());
        assert!(parse_endpoint("host:", "127.0.0.1").is_err());
        assert!(parse_endpoint("host:0", "127.0.0.1").is_err());
        assert!(parse_endpoint("host:99999", "127.0.0.1").is_err());
    }
}
