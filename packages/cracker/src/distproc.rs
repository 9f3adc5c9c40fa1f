//! 任务分发：管理端事件循环与工作端运行时。
//!
//! 管理端是单线程协作式事件循环：每条连接一个只管转发的读取任务，
//! 全部可变状态（枚举游标、会话表、恢复队列、计数器）只在循环里动。
//! 任何时刻每个任务恰处于四种去向之一：尚未产出、在某个会话的
//! 在途集合里、在恢复队列里、或已完成。会话断开时在途任务整体进入
//! 恢复队列，于是没有任务会丢，也不会凭空复制。

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use crack_protocol::Message;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{
    self, CrackListener, HANDSHAKE_TIMEOUT, MsgReader, MsgStream, server_handshake,
};

/// 任务来源：有限、可重启的任务序列。
pub trait JobSource: Iterator<Item = String> {}
impl<T: Iterator<Item = String>> JobSource for T {}

/// 结果去向。回调运行在事件循环里，不可以阻塞；
/// 重活应当放在 `serve` 返回之后做。
pub trait ResultSink {
    fn on_result(&mut self, worker_id: u32, task: &str, verdict: &[u8]);
    fn finish(&mut self) {}
}

/// 每个健康会话保持的在途任务数。多压一个任务进管道，
/// 工作端干完手头的活时下一个已经躺在它的接收缓冲里了。
const PIPELINE_DEPTH: usize = 2;

struct WorkerSession {
    writer: channel::MsgWriter,
    /// 已发出而未收到回执的任务，有序且无重复。
    in_flight: Vec<String>,
    reader_task: JoinHandle<()>,
}

enum SessionEvent {
    /// 握手通过的新连接
    Authed { chan: MsgStream, addr: SocketAddr },
    /// 某会话送回一个任务结果
    Result {
        worker_id: u32,
        task: String,
        verdict: Vec<u8>,
    },
    /// 某会话的连接断开或违反协议
    Closed { worker_id: u32 },
}

/// 任务调度管理端。
pub struct WorkManager<T, R> {
    tasks: T,
    sink: R,
    exhausted: bool,
    tasks_finished: u64,
    next_worker_id: u32,
    sessions: HashMap<u32, WorkerSession>,
    recovered: VecDeque<String>,
}

impl<T, R> WorkManager<T, R>
where
    T: JobSource,
    R: ResultSink,
{
    pub fn new(tasks: T, sink: R) -> Self {
        Self {
            tasks,
            sink,
            exhausted: false,
            tasks_finished: 0,
            next_worker_id: 0,
            sessions: HashMap::new(),
            recovered: VecDeque::new(),
        }
    }

    /// 运行事件循环直到任务空间耗尽、恢复队列排空且所有会话退场。
    /// 返回结果收集器和完成的任务数。
    pub async fn serve(mut self, listener: CrackListener) -> (R, u64) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        loop {
            if self.exhausted && self.sessions.is_empty() && self.recovered.is_empty() {
                break;
            }
            // 只要还有未派完的活就继续纳新
            let accepting = !(self.exhausted && self.recovered.is_empty());

            tokio::select! {
                biased;
                event = events_rx.recv() => {
                    // 发送端握在本函数手里，通道不会先关
                    if let Some(event) = event {
                        self.handle_event(event, &events_tx).await;
                    }
                }
                accepted = listener.accept_raw(), if accepting => match accepted {
                    Ok((stream, addr)) => spawn_handshake(stream, addr, listener.secret_bytes(), events_tx.clone()),
                    Err(err) => warn!("接受连接失败: {err}"),
                },
            }
        }

        let WorkManager {
            mut sink,
            tasks_finished,
            ..
        } = self;
        sink.finish();
        (sink, tasks_finished)
    }

    async fn handle_event(&mut self, event: SessionEvent, events_tx: &UnboundedSender<SessionEvent>) {
        match event {
            SessionEvent::Authed { chan, addr } => self.admit(chan, addr, events_tx).await,
            SessionEvent::Result {
                worker_id,
                task,
                verdict,
            } => self.take_result(worker_id, task, verdict).await,
            SessionEvent::Closed { worker_id } => self.remove_session(worker_id),
        }
    }

    /// 新会话入册：发编号、起读取任务、一口气压入两个任务。
    async fn admit(
        &mut self,
        chan: MsgStream,
        addr: SocketAddr,
        events_tx: &UnboundedSender<SessionEvent>,
    ) {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        let (reader, mut writer) = chan.into_split();
        if writer.send(&Message::WorkerId { id: worker_id }).await.is_err() {
            warn!("工作端 {addr} 在拿到编号前就断开了");
            return;
        }
        let reader_task = tokio::spawn(forward_results(worker_id, reader, events_tx.clone()));
        self.sessions.insert(
            worker_id,
            WorkerSession {
                writer,
                in_flight: Vec::new(),
                reader_task,
            },
        );
        info!("工作端 {worker_id} 已接入: {addr}");

        for _ in 0..PIPELINE_DEPTH {
            self.assign_one(worker_id).await;
        }
    }

    /// 取下一个任务：恢复队列优先于枚举器；
    /// 枚举器见底时置耗尽标记并返回 `None`（对应停机哨兵）。
    fn next_task(&mut self) -> Option<String> {
        if let Some(task) = self.recovered.pop_front() {
            debug!("恢复任务 [{task}]");
            return Some(task);
        }
        match self.tasks.next() {
            Some(task) => Some(task),
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    /// 向会话派一个任务（或哨兵）。先记在途再发送，
    /// 发送失败时整个会话按断开处理，刚派的任务随之回收。
    async fn assign_one(&mut self, worker_id: u32) {
        let task = self.next_task();
        let Some(session) = self.sessions.get_mut(&worker_id) else {
            if let Some(task) = task {
                self.recovered.push_front(task);
            }
            return;
        };

        let message = match &task {
            Some(task) => Message::Task {
                task: task.as_str().into(),
            },
            None => Message::Done,
        };
        if let Some(task) = task {
            session.in_flight.push(task);
            debug_assert!(session.in_flight.len() <= PIPELINE_DEPTH);
        }
        if session.writer.send(&message).await.is_err() {
            warn!("向工作端 {worker_id} 发送失败");
            self.remove_session(worker_id);
        }
    }

    /// 收一个回执：销掉在途记录、计数、立刻补派、最后交给收集器。
    async fn take_result(&mut self, worker_id: u32, task: String, verdict: Vec<u8>) {
        let Some(session) = self.sessions.get_mut(&worker_id) else {
            warn!("工作端 {worker_id} 已不在册，回执 [{task}] 作废");
            return;
        };
        let Some(index) = session.in_flight.iter().position(|t| *t == task) else {
            // 信任模型之外的报文，不让它搅乱在途集合
            warn!("工作端 {worker_id} 送回了未曾指派的任务 [{task}]");
            return;
        };
        session.in_flight.remove(index);
        self.tasks_finished += 1;
        self.assign_one(worker_id).await;
        self.sink.on_result(worker_id, &task, &verdict);
    }

    /// 会话退场：在途任务整体进恢复队列，读取任务随手掐掉。
    fn remove_session(&mut self, worker_id: u32) {
        if let Some(session) = self.sessions.remove(&worker_id) {
            if !session.in_flight.is_empty() {
                info!(
                    "工作端 {worker_id} 断开，回收 {} 个在途任务",
                    session.in_flight.len()
                );
            } else {
                info!("工作端 {worker_id} 断开");
            }
            self.recovered.extend(session.in_flight);
            session.reader_task.abort();
        }
    }
}

/// 读取任务：把一条连接上的回执转成事件，断流时报告退场。
async fn forward_results(
    worker_id: u32,
    mut reader: MsgReader,
    events: UnboundedSender<SessionEvent>,
) {
    loop {
        match reader.recv().await {
            Ok(Message::TaskResult { task, verdict }) => {
                let event = SessionEvent::Result {
                    worker_id,
                    task: task.into(),
                    verdict,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(other) => {
                warn!("工作端 {worker_id} 发来不该出现的报文: {other:?}");
                let _ = events.send(SessionEvent::Closed { worker_id });
                return;
            }
            Err(_) => {
                let _ = events.send(SessionEvent::Closed { worker_id });
                return;
            }
        }
    }
}

/// 握手放到独立任务里做，省得慢客户端拖住事件循环。
fn spawn_handshake(
    stream: TcpStream,
    addr: SocketAddr,
    secret: Vec<u8>,
    events: UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let mut chan = MsgStream::new(stream);
        match timeout(HANDSHAKE_TIMEOUT, server_handshake(&mut chan, &secret)).await {
            Ok(Ok(())) => {
                let _ = events.send(SessionEvent::Authed { chan, addr });
            }
            Ok(Err(err)) => warn!("客户端 {addr} 未通过认证: {err}"),
            Err(_) => warn!("客户端 {addr} 握手超时"),
        }
    });
}

/// 任务执行器。出错视为致命：工作端带着错误退出，
/// 管理端会在断开时把任务收回重派。
pub trait TaskExecutor {
    fn execute(
        &mut self,
        task: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

#[derive(Error, Debug)]
#[error("checker exited with {status}")]
pub struct CheckerError {
    pub status: std::process::ExitStatus,
}

/// 调起本地位切片检查器 `./check_keys` 的执行器。
/// 检查器收一个二进制前缀参数，命中时向标准输出打印密钥，否则沉默。
pub struct CheckKeys {
    pub command: PathBuf,
}

impl Default for CheckKeys {
    fn default() -> Self {
        Self {
            command: PathBuf::from("./check_keys"),
        }
    }
}

impl TaskExecutor for CheckKeys {
    async fn execute(&mut self, task: &str) -> anyhow::Result<Vec<u8>> {
        info!("检查前缀: {task}");
        let output = tokio::process::Command::new(&self.command)
            .arg(task)
            .output()
            .await
            .with_context(|| format!("无法启动检查器 {}", self.command.display()))?;
        if !output.status.success() {
            return Err(CheckerError {
                status: output.status,
            }
            .into());
        }
        Ok(output.stdout)
    }
}

/// 工作端运行时：接编号、循环领活、逐个回执，见哨兵收工。
pub struct Worker<E> {
    chan: MsgStream,
    worker_id: u32,
    executor: E,
}

impl<E: TaskExecutor> Worker<E> {
    /// 连接管理端并完成认证，等到分配的工作端编号。
    pub async fn connect(
        addr: &str,
        secret: &[u8],
        executor: E,
    ) -> Result<Self, channel::ChannelError> {
        let mut chan = channel::connect(addr, secret).await?;
        let worker_id = match chan.recv().await? {
            Message::WorkerId { id } => id,
            other => {
                warn!("等待编号时收到: {other:?}");
                return Err(channel::ChannelError::Protocol);
            }
        };
        Ok(Self {
            chan,
            worker_id,
            executor,
        })
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            match self.chan.recv().await.context("与管理端的连接中断")? {
                Message::Task { task } => {
                    let task: String = task.into();
                    let verdict = self.executor.execute(&task).await?;
                    self.chan
                        .send(&Message::TaskResult {
                            task: task.into(),
                            verdict,
                        })
                        .await
                        .context("回传结果失败")?;
                }
                Message::Done => {
                    info!("工作端 {} 收到停机哨兵，退出", self.worker_id);
                    return Ok(());
                }
                other => anyhow::bail!("不该在任务循环里收到 {other:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(u32, String, Vec<u8>)>,
        finished: bool,
    }

    impl ResultSink for Recorder {
        fn on_result(&mut self, worker_id: u32, task: &str, verdict: &[u8]) {
            self.seen.push((worker_id, task.to_string(), verdict.to_vec()));
        }
        fn finish(&mut self) {
            self.finished = true;
        }
    }

    struct EchoExecutor;

    impl TaskExecutor for EchoExecutor {
        async fn execute(&mut self, _task: &str) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    async fn expect_task(chan: &mut MsgStream) -> String {
        match chan.recv().await.unwrap() {
            Message::Task { task } => task.into(),
            other => panic!("expected a task, got {other:?}"),
        }
    }

    async fn ack(chan: &mut MsgStream, task: &str) {
        chan.send(&Message::TaskResult {
            task: task.into(),
            verdict: Vec::new(),
        })
        .await
        .unwrap();
    }

    fn numbered_tasks(count: usize, width: usize) -> Vec<String> {
        (0..count).map(|n| format!("{n:0width$b}")).collect()
    }

    #[tokio::test]
    async fn four_tasks_single_worker_drains_the_space() {
        let listener = CrackListener::bind("127.0.0.1:0", b"s").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let tasks = numbered_tasks(4, 2);

        let worker = tokio::spawn({
            let addr = addr.clone();
            async move {
                let worker = Worker::connect(&addr, b"s", EchoExecutor).await.unwrap();
                worker.run().await
            }
        });

        let manager = WorkManager::new(tasks.clone().into_iter(), Recorder::default());
        let (recorder, finished) = manager.serve(listener).await;

        assert!(finished >= 4);
        for task in &tasks {
            assert!(
                recorder.seen.iter().any(|(_, seen, _)| seen == task),
                "task {task} was never acknowledged"
            );
        }
        assert!(recorder.finished);
        // run 正常返回意味着哨兵恰好收到一次
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_worker_tasks_are_reissued() {
        let listener = CrackListener::bind("127.0.0.1:0", b"s").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let tasks = numbered_tasks(16, 4);

        let manager = tokio::spawn(
            WorkManager::new(tasks.clone().into_iter(), Recorder::default()).serve(listener),
        );

        // 脚本化的坏工作端：领了三个任务只回一个就失联
        let mut chan = channel::connect(&addr, b"s").await.unwrap();
        let Message::WorkerId { id: bad_id } = chan.recv().await.unwrap() else {
            panic!("expected a worker id");
        };
        let first = expect_task(&mut chan).await;
        let second = expect_task(&mut chan).await;
        ack(&mut chan, &first).await;
        let third = expect_task(&mut chan).await;
        drop(chan);

        // 幸存的工作端把剩下的活全部干完
        let survivor = Worker::connect(&addr, b"s", EchoExecutor).await.unwrap();
        let survivor_id = survivor.worker_id();
        assert_ne!(survivor_id, bad_id);
        survivor.run().await.unwrap();

        let (recorder, finished) = manager.await.unwrap();
        assert!(finished >= 16);
        for task in &tasks {
            assert!(
                recorder.seen.iter().any(|(_, seen, _)| seen == task),
                "task {task} was never acknowledged"
            );
        }
        // 坏工作端的在途任务改由幸存者完成
        for task in [&second, &third] {
            assert!(
                recorder
                    .seen
                    .iter()
                    .any(|(id, seen, _)| *id == survivor_id && seen == task),
                "recovered task {task} was not reissued to the survivor"
            );
        }
    }

    #[tokio::test]
    async fn pipeline_never_exceeds_two_outstanding_tasks() {
        let listener = CrackListener::bind("127.0.0.1:0", b"s").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let manager = tokio::spawn(
            WorkManager::new(numbered_tasks(3, 2).into_iter(), Recorder::default())
                .serve(listener),
        );

        let mut chan = channel::connect(&addr, b"s").await.unwrap();
        let Message::WorkerId { .. } = chan.recv().await.unwrap() else {
            panic!("expected a worker id");
        };
        let first = expect_task(&mut chan).await;
        let second = expect_task(&mut chan).await;

        // 不回执就不该有第三个任务进来
        assert!(
            tokio::time::timeout(Duration::from_millis(200), chan.recv())
                .await
                .is_err(),
            "manager sent a third task past the pipeline bound"
        );

        ack(&mut chan, &first).await;
        let third = expect_task(&mut chan).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(200), chan.recv())
                .await
                .is_err()
        );

        ack(&mut chan, &second).await;
        assert_eq!(chan.recv().await.unwrap(), Message::Done);
        ack(&mut chan, &third).await;
        assert_eq!(chan.recv().await.unwrap(), Message::Done);
        drop(chan);

        let (recorder, finished) = manager.await.unwrap();
        assert_eq!(finished, 3);
        assert_eq!(recorder.seen.len(), 3);
    }

    #[tokio::test]
    async fn unauthenticated_peer_does_not_disturb_the_run() {
        let listener = CrackListener::bind("127.0.0.1:0", b"right").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let manager = tokio::spawn(
            WorkManager::new(numbered_tasks(2, 1).into_iter(), Recorder::default())
                .serve(listener),
        );

        let rejected = channel::connect(&addr, b"wrong").await;
        assert!(matches!(rejected, Err(channel::ChannelError::AuthFailure)));

        let worker = Worker::connect(&addr, b"right", EchoExecutor).await.unwrap();
        worker.run().await.unwrap();

        let (_, finished) = manager.await.unwrap();
        assert!(finished >= 2);
    }

    #[tokio::test]
    async fn spurious_result_is_ignored() {
        let listener = CrackListener::bind("127.0.0.1:0", b"s").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let manager = tokio::spawn(
            WorkManager::new(numbered_tasks(2, 1).into_iter(), Recorder::default())
                .serve(listener),
        );

        let mut chan = channel::connect(&addr, b"s").await.unwrap();
        let Message::WorkerId { .. } = chan.recv().await.unwrap() else {
            panic!("expected a worker id");
        };
        let first = expect_task(&mut chan).await;
        let second = expect_task(&mut chan).await;

        // 伪造一个从未指派过的任务号，不应计入也不应引发补派
        ack(&mut chan, "11111111").await;
        ack(&mut chan, &first).await;
        assert_eq!(chan.recv().await.unwrap(), Message::Done);
        ack(&mut chan, &second).await;
        assert_eq!(chan.recv().await.unwrap(), Message::Done);
        drop(chan);

        let (recorder, finished) = manager.await.unwrap();
        assert_eq!(finished, 2);
        assert!(!recorder.seen.iter().any(|(_, task, _)| task == "11111111"));
    }
}
