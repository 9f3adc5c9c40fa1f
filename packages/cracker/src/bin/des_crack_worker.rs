//! 穷举工作端：连上管理端领任务，对每个前缀调起本地检查器。

use anyhow::{Context, bail};
use clap::Parser;
use descrack::distproc::{CheckKeys, Worker};
use tracing::info;

/// 启动一个（或一批）DES 穷举工作端。地址缺省为 127.0.0.1。
#[derive(Parser)]
#[command(name = "des_crack_worker")]
struct Cli {
    /// 管理端启动时设置的预共享口令
    #[arg(short, long)]
    secret: Option<String>,
    /// 同时运行的工作端数量，各自独立建连
    #[arg(short = 'c', long, default_value_t = 1)]
    count: u32,
    /// [地址:]端口
    endpoint: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    if cli.count == 0 {
        bail!("count must be at least 1");
    }
    let endpoint = descrack::parse_endpoint(&cli.endpoint, "127.0.0.1")?;
    let secret = cli.secret.unwrap_or_default();

    let mut handles = Vec::new();
    for _ in 0..cli.count {
        let endpoint = endpoint.clone();
        let secret = secret.clone();
        handles.push(tokio::spawn(run_worker(endpoint, secret)));
    }
    for handle in handles {
        handle.await??;
    }
    Ok(())
}

async fn run_worker(endpoint: String, secret: String) -> anyhow::Result<()> {
    let worker = Worker::connect(&endpoint, secret.as_bytes(), CheckKeys::default())
        .await
        .with_context(|| format!("无法连接管理端 {endpoint}，口令是否一致？"))?;
    info!("== Worker {} == 已连接 {endpoint}", worker.worker_id());
    worker.run().await
}
