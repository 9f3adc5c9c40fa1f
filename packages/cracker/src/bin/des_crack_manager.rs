//! 穷举管理端：按 input.h 的参数枚举密钥前缀，派发给连上来的工作端。

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use descrack::channel::CrackListener;
use descrack::distproc::{ResultSink, WorkManager};
use descrack::keyspace::{self, KeySpace};
use tracing::info;

/// 启动供 DES 穷举工作端连接的调度服务。
/// 从当前目录的 input.h 读取 NUM_CHUNK_BITS。
#[derive(Parser)]
#[command(name = "des_crack_manager")]
struct Cli {
    /// 工作端必须出示的预共享口令
    #[arg(short, long)]
    secret: Option<String>,
    /// 已知的密钥开头（二进制，只含 0/1）
    #[arg(short, long, default_value = "")]
    prefix: String,
    /// [绑定地址:]端口
    endpoint: String,
}

/// 记录命中结果的收集器。
struct DesCrackJob {
    results: Vec<Vec<u8>>,
    started: Instant,
}

impl ResultSink for DesCrackJob {
    fn on_result(&mut self, worker_id: u32, _task: &str, verdict: &[u8]) {
        if !verdict.is_empty() {
            info!(
                "== Worker {worker_id} == 在 {:.2} 秒后找到匹配: {}",
                self.started.elapsed().as_secs_f64(),
                String::from_utf8_lossy(verdict).trim()
            );
            self.results.push(verdict.to_vec());
        }
    }

    fn finish(&mut self) {
        info!("== Manager == 搜索结束，共 {} 条匹配", self.results.len());
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    let endpoint = descrack::parse_endpoint(&cli.endpoint, "0.0.0.0")?;
    let num_chunk_bits = keyspace::read_num_chunk_bits(Path::new("input.h"))
        .context("读取 ./input.h 失败，请先用 set_input 生成")?;
    let tasks = KeySpace::new(num_chunk_bits, &cli.prefix)?;
    info!(
        "== Manager == NUM_CHUNK_BITS={num_chunk_bits}, 前缀 [{}], 共 {} 个任务",
        cli.prefix,
        tasks.remaining()
    );

    let secret = cli.secret.unwrap_or_default();
    let listener = CrackListener::bind(&endpoint, secret.as_bytes())
        .await
        .with_context(|| format!("无法监听 {endpoint}"))?;
    info!("== Manager == 正在监听 {endpoint}");

    let job = DesCrackJob {
        results: Vec::new(),
        started: Instant::now(),
    };
    let (job, tasks_finished) = WorkManager::new(tasks, job).serve(listener).await;
    info!("== Manager == 共完成 {tasks_finished} 个任务");

    for verdict in &job.results {
        println!("{}", String::from_utf8_lossy(verdict).trim());
    }
    Ok(())
}
