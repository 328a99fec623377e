use super::outcome::{BatchOutcome, DiscoveredItem, TransferResult};
use super::scanner::{DiscoveryStream, FileScanner, ScannedRoot};
use super::transfer::{dest_path, TransferOptions, TransferWorker};
use crate::progress::ProgressSink;
use crate::storage::Storage;
use anyhow::Result;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 源根目录的类型，决定枚举前的检查方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// 先 stat，不存在或不是目录时报告一次结构性失败
    Remote,
    /// 先解析符号链接，不可访问时静默跳过
    Local,
}

/// 发现计数的发送方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountPolicy {
    /// 每个子管道枚举完毕后发送一次总数，然后开始传输
    Upfront,
    /// 每发现一个条目发送一次，边枚举边传输
    Streaming,
}

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub root_kind: RootKind,
    pub count_policy: CountPolicy,
    pub transfer: TransferOptions,
    /// 共享结果通道的容量
    pub result_buffer: usize,
    /// 子管道内部（枚举 -> 传输）通道的容量
    pub route_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root_kind: RootKind::Remote,
            count_policy: CountPolicy::Upfront,
            transfer: TransferOptions::default(),
            result_buffer: 64,
            route_buffer: 128,
        }
    }
}

/// 条目来源
#[derive(Debug, Clone)]
pub enum Discovery {
    /// 遍历一个根目录
    Walk(String),
    /// 已经预扫描好的条目列表
    Listed(Vec<DiscoveredItem>),
}

/// 一条子管道：从源根到目标根
#[derive(Debug, Clone)]
pub struct Route {
    pub discovery: Discovery,
    /// 计算目标路径时要去掉的源前缀
    pub source_root: String,
    pub dest_root: String,
}

impl Route {
    pub fn walk(source_root: impl Into<String>, dest_root: impl Into<String>) -> Self {
        let source_root = source_root.into();
        Self {
            discovery: Discovery::Walk(source_root.clone()),
            source_root,
            dest_root: dest_root.into(),
        }
    }

    pub fn listed(
        items: Vec<DiscoveredItem>,
        source_root: impl Into<String>,
        dest_root: impl Into<String>,
    ) -> Self {
        Self {
            discovery: Discovery::Listed(items),
            source_root: source_root.into(),
            dest_root: dest_root.into(),
        }
    }
}

/// 批次状态
///
/// `Draining` 表示收尾任务正在等待各子管道结束，`Done` 时共享发送端已释放。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Draining,
    Done,
}

/// 调用方持有的管道输出
///
/// 三个通道由收尾任务统一关闭：它在所有子管道结束后才释放发送端，
/// 因此不会出现向已关闭通道发送的情况。
pub struct PipelineHandle {
    pub discovered: mpsc::UnboundedReceiver<u64>,
    pub results: mpsc::Receiver<TransferResult>,
    pub done: oneshot::Receiver<()>,
    outstanding: Arc<AtomicUsize>,
    discovered_total: Arc<AtomicU64>,
    state: watch::Receiver<PipelineState>,
    started: Instant,
}

impl PipelineHandle {
    /// 尚未结束的子管道数
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// 所有子管道累计的发现数
    pub fn discovered_total(&self) -> u64 {
        self.discovered_total.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// 排空所有输出并汇总
    ///
    /// 只有在结果通道关闭（所有生产者结束）之后才返回，
    /// 发现计数仅转发给进度显示，不参与终止判断。
    pub async fn drain(mut self, sink: &dyn ProgressSink) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut counts_open = true;

        loop {
            tokio::select! {
                biased;
                count = self.discovered.recv(), if counts_open => match count {
                    Some(n) => {
                        outcome.discovered += n;
                        sink.discovered(n);
                    }
                    None => counts_open = false,
                },
                result = self.results.recv() => match result {
                    Some(result) => {
                        sink.item(&result);
                        outcome.record(&result);
                    }
                    None => break,
                },
            }
        }

        // 结果通道关闭时计数发送端也已释放，读完剩余计数
        while let Ok(n) = self.discovered.try_recv() {
            outcome.discovered += n;
            sink.discovered(n);
        }

        if self.done.await.is_err() {
            warn!("管道未发送完成信号");
        }

        outcome.duration = self.started.elapsed();
        outcome
    }
}

/// 子管道共享的上下文
#[derive(Clone)]
struct RouteContext {
    source: Arc<dyn Storage>,
    worker: Arc<TransferWorker>,
    scanner: Arc<FileScanner>,
    config: SyncConfig,
    counts: mpsc::UnboundedSender<u64>,
    results: mpsc::Sender<TransferResult>,
    discovered_total: Arc<AtomicU64>,
}

impl RouteContext {
    fn count(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.discovered_total.fetch_add(n, Ordering::SeqCst);
        // 计数只用于进度显示，接收端关闭时直接丢弃
        let _ = self.counts.send(n);
    }

    async fn publish(&self, result: TransferResult) {
        if let Err(mpsc::error::SendError(orphan)) = self.results.send(result).await {
            // 调用方已不再读取结果，只能记录日志
            match &orphan.error {
                Some(e) => warn!("结果无人接收，丢弃失败 {}: {:#}", orphan.path, e),
                None => debug!("结果无人接收，丢弃 {}", orphan.path),
            }
        }
    }
}

/// 同步引擎：每个映射一条子管道，并发执行，汇总到共享通道
pub struct SyncEngine {
    source: Arc<dyn Storage>,
    dest: Arc<dyn Storage>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn Storage>, dest: Arc<dyn Storage>, config: SyncConfig) -> Self {
        Self::with_cancel(source, dest, config, CancellationToken::new())
    }

    pub fn with_cancel(
        source: Arc<dyn Storage>,
        dest: Arc<dyn Storage>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            dest,
            config,
            cancel,
        }
    }

    /// 取消同步
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 启动一个批次，必须在 tokio 运行时内调用
    pub fn start(&self, routes: Vec<Route>) -> PipelineHandle {
        let (count_tx, count_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::channel(self.config.result_buffer.max(1));
        let (done_tx, done_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(PipelineState::Starting);

        let outstanding = Arc::new(AtomicUsize::new(routes.len()));
        let discovered_total = Arc::new(AtomicU64::new(0));

        let ctx = RouteContext {
            source: self.source.clone(),
            worker: Arc::new(TransferWorker::new(
                self.source.clone(),
                self.dest.clone(),
                self.config.transfer,
                self.cancel.clone(),
            )),
            scanner: Arc::new(FileScanner::new(self.cancel.clone())),
            config: self.config.clone(),
            counts: count_tx,
            results: result_tx,
            discovered_total: discovered_total.clone(),
        };

        debug!("启动批次: {} 条子管道", routes.len());

        let mut tasks = JoinSet::new();
        for route in routes {
            tasks.spawn(run_route(ctx.clone(), route));
        }
        let _ = state_tx.send(PipelineState::Running);

        // 收尾任务持有原始发送端，所有子管道结束后才释放
        let closer_outstanding = outstanding.clone();
        tokio::spawn(async move {
            let _ = state_tx.send(PipelineState::Draining);
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    ctx.publish(TransferResult::structural(anyhow::anyhow!(
                        "子管道异常退出: {}",
                        e
                    )))
                    .await;
                }
                let left = closer_outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
                debug!("子管道结束，剩余 {}", left);
            }

            drop(ctx);
            let _ = state_tx.send(PipelineState::Done);
            let _ = done_tx.send(());
        });

        PipelineHandle {
            discovered: count_rx,
            results: result_rx,
            done: done_rx,
            outstanding,
            discovered_total,
            state: state_rx,
            started: Instant::now(),
        }
    }

    /// 启动并排空一个批次
    pub async fn run(&self, routes: Vec<Route>, sink: &dyn ProgressSink) -> BatchOutcome {
        let outcome = self.start(routes).drain(sink).await;
        sink.finish(&outcome);
        outcome
    }
}

/// 一条子管道：枚举阶段经私有通道喂给传输阶段，传输按枚举顺序串行执行
async fn run_route(ctx: RouteContext, route: Route) {
    let (source_root, stream): (String, DiscoveryStream) = match route.discovery {
        Discovery::Listed(list) => (
            route.source_root,
            futures::stream::iter(list.into_iter().map(Ok)).boxed(),
        ),
        Discovery::Walk(root) => match open_root(&ctx, &root).await {
            Some(Ok(scanned)) => (scanned.root, scanned.items),
            Some(Err(e)) => {
                // 根目录失败算作一个发现项，保证发现数与结果数一致
                ctx.count(1);
                ctx.publish(TransferResult::structural(e)).await;
                return;
            }
            None => return,
        },
    };

    let (item_tx, mut item_rx) = mpsc::channel(ctx.config.route_buffer.max(1));
    let enumerate = {
        let ctx = ctx.clone();
        tokio::spawn(async move { enumerate_route(&ctx, stream, item_tx).await })
    };

    while let Some(item) = item_rx.recv().await {
        let result = match item {
            Ok(item) => {
                let target = dest_path(&source_root, &route.dest_root, &item.path);
                ctx.worker.transfer(&item, &target).await
            }
            Err(e) => TransferResult::structural(e),
        };
        ctx.publish(result).await;
    }

    if let Err(e) = enumerate.await {
        ctx.publish(TransferResult::structural(anyhow::anyhow!("枚举任务异常退出: {}", e)))
            .await;
    }
}

/// 枚举阶段：转发条目并发送计数
async fn enumerate_route(
    ctx: &RouteContext,
    mut stream: DiscoveryStream,
    items: mpsc::Sender<Result<DiscoveredItem>>,
) {
    match ctx.config.count_policy {
        CountPolicy::Streaming => {
            while let Some(item) = stream.next().await {
                ctx.count(1);
                if items.send(item).await.is_err() {
                    break;
                }
            }
        }
        CountPolicy::Upfront => {
            let all: Vec<Result<DiscoveredItem>> = stream.collect().await;
            ctx.count(all.len() as u64);
            for item in all {
                if items.send(item).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn open_root(ctx: &RouteContext, root: &str) -> Option<Result<ScannedRoot>> {
    match ctx.config.root_kind {
        RootKind::Remote => Some(ctx.scanner.scan_remote(ctx.source.as_ref(), root).await),
        RootKind::Local => ctx.scanner.scan_local(ctx.source.as_ref(), root).await.map(Ok),
    }
}
