//! 多阶段并发流水线
//!
//! 每个区域文件是一个独立的工作单元，依次经过：
//! - 发现：按文件名模式列出区域文件，总数在接纳开始前确定
//! - 读取：读取文件头与槽位数据；接纳前先取得 `max_loaded_files` 许可
//! - 处理：解码需要的区块并执行操作逻辑，返回是否有修改
//! - 写入：只有存在修改时才写回；完成后归还许可
//!
//! 读取、处理、写入各有一个独立大小的 rayon 线程池。同一文件的所有区块
//! 由同一个工作线程处理。出现致命错误或被取消时停止接纳新文件，
//! 已接纳的文件会完整走完（原子写入不会被打断）。

use crate::config::PipelineConfig;
use crate::coords::RegionPos;
use crate::error::{Error, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use walkdir::WalkDir;

/// 一个工作单元：一个区域文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub region: RegionPos,
    pub path: PathBuf,
}

impl WorkUnit {
    pub fn new(region: RegionPos, path: PathBuf) -> Self {
        Self { region, path }
    }

    pub fn name(&self) -> String {
        self.region.file_name()
    }
}

/// 流水线上运行的批处理操作
pub trait Operation: Send + Sync + 'static {
    /// 读取后在各阶段之间传递的数据
    type Job: Send + 'static;

    fn name(&self) -> &'static str;

    /// 在任何 I/O 之前检查参数组合
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn discover(&self) -> Result<Vec<WorkUnit>>;

    fn load(&self, unit: &WorkUnit) -> Result<Self::Job>;

    /// 返回 `true` 表示需要写入
    fn process(&self, job: &mut Self::Job) -> Result<bool>;

    fn write(&self, job: Self::Job) -> Result<()>;
}

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub file: String,
    pub completed: usize,
    pub total: usize,
}

/// 批处理结果
#[derive(Debug, Clone, Default)]
pub struct Summary {
    /// 发现的文件数
    pub total: usize,
    /// 已完成的文件数
    pub completed: usize,
    /// 写入的文件数
    pub written: usize,
    /// 无修改、跳过写入的文件数
    pub skipped: usize,
    /// 失败的文件及原因
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Written,
    Skipped,
}

enum Event {
    Done {
        file: String,
        result: Result<UnitOutcome>,
    },
    Closed {
        admitted: usize,
    },
}

// ============== 许可 ==============

/// 计数信号量，限制同时加载的文件数
struct Permits {
    available: Mutex<usize>,
    cond: Condvar,
}

impl Permits {
    fn new(n: usize) -> Self {
        Self {
            available: Mutex::new(n),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        while *available == 0 {
            available = self.cond.wait(available).unwrap_or_else(|e| e.into_inner());
        }
        *available -= 1;
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(|e| e.into_inner());
        *available += 1;
        self.cond.notify_one();
    }
}

// ============== 阶段 ==============

struct Stages<O: Operation> {
    op: Arc<O>,
    load: ThreadPool,
    process: ThreadPool,
    write: ThreadPool,
}

/// 随工作单元在各阶段间传递，负责归还许可并上报结果
struct Ticket {
    unit: WorkUnit,
    permits: Arc<Permits>,
    stop: Arc<AtomicBool>,
    fail_fast: bool,
    tx: Sender<Event>,
}

impl Ticket {
    fn finish(self, result: Result<UnitOutcome>) {
        if let Err(e) = &result {
            // 先置停止标志再归还许可，保证接纳线程拿到许可时能看到停止
            if e.is_fatal() || self.fail_fast {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
        self.permits.release();
        let _ = self.tx.send(Event::Done {
            file: self.unit.name(),
            result,
        });
    }
}

fn build_pool(kind: &str, threads: usize) -> Result<ThreadPool> {
    let prefix = format!("mcabatch-{}", kind);
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{}-{}", prefix, i))
        .build()
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 捕获阶段内的 panic，转成致命错误
fn guarded<T>(stage: &str, unit: &WorkUnit, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::WorkerPanic(format!(
            "{} {}: {}",
            stage,
            unit.name(),
            panic_message(payload)
        ))),
    }
}

impl<O: Operation> Stages<O> {
    fn submit(self: &Arc<Self>, ticket: Ticket) {
        let stages = Arc::clone(self);
        self.load.spawn(move || {
            let loaded = guarded("读取", &ticket.unit, || stages.op.load(&ticket.unit));
            match loaded {
                Ok(job) => stages.clone().to_process(ticket, job),
                Err(e) => ticket.finish(Err(e)),
            }
        });
    }

    fn to_process(self: Arc<Self>, ticket: Ticket, mut job: O::Job) {
        let stages = Arc::clone(&self);
        self.process.spawn(move || {
            let dirty = guarded("处理", &ticket.unit, || stages.op.process(&mut job));
            match dirty {
                Ok(true) => stages.clone().to_write(ticket, job),
                Ok(false) => {
                    log::debug!("{} 无修改，跳过写入", ticket.unit.name());
                    drop(job);
                    ticket.finish(Ok(UnitOutcome::Skipped));
                }
                Err(e) => {
                    drop(job);
                    ticket.finish(Err(e));
                }
            }
        });
    }

    fn to_write(self: Arc<Self>, ticket: Ticket, job: O::Job) {
        let stages = Arc::clone(&self);
        self.write.spawn(move || {
            let written = guarded("写入", &ticket.unit, || stages.op.write(job));
            ticket.finish(written.map(|_| UnitOutcome::Written));
        });
    }
}

// ============== 流水线 ==============

pub struct Pipeline {
    config: PipelineConfig,
    /// 外部取消；致命错误的停止标志每次运行单独创建
    cancel: Arc<AtomicBool>,
}

/// 后台运行中的批处理
pub struct PipelineHandle {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<Summary>>,
}

impl PipelineHandle {
    /// 停止接纳新文件，已接纳的文件会处理完
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn wait(self) -> Result<Summary> {
        self.handle
            .join()
            .unwrap_or_else(|p| Err(Error::WorkerPanic(panic_message(p))))
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 在后台线程运行，返回可等待、可取消的句柄
    pub fn spawn<O, P>(self, op: Arc<O>, on_progress: P) -> PipelineHandle
    where
        O: Operation,
        P: FnMut(&Progress) + Send + 'static,
    {
        let cancel = Arc::clone(&self.cancel);
        let handle = thread::spawn(move || self.run(op, on_progress));
        PipelineHandle { cancel, handle }
    }

    /// 运行到结束，返回唯一的完成结果
    pub fn run<O, P>(&self, op: Arc<O>, mut on_progress: P) -> Result<Summary>
    where
        O: Operation,
        P: FnMut(&Progress),
    {
        op.validate()?;
        let units = op.discover()?;
        let total = units.len();
        log::info!(
            "{}: {} 个区域文件 (读取 {} / 处理 {} / 写入 {} 线程, 最多加载 {} 个)",
            op.name(),
            total,
            self.config.load_threads,
            self.config.process_threads,
            self.config.write_threads,
            self.config.max_loaded_files
        );

        let stages = Arc::new(Stages {
            op: Arc::clone(&op),
            load: build_pool("load", self.config.load_threads)?,
            process: build_pool("process", self.config.process_threads)?,
            write: build_pool("write", self.config.write_threads)?,
        });
        let permits = Arc::new(Permits::new(self.config.max_loaded_files));
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let admission = {
            let stop = Arc::clone(&stop);
            let cancel = Arc::clone(&self.cancel);
            let fail_fast = self.config.fail_fast;
            thread::Builder::new()
                .name("mcabatch-discover".to_string())
                .spawn(move || {
                    let mut admitted = 0;
                    let halted = || stop.load(Ordering::SeqCst) || cancel.load(Ordering::SeqCst);
                    for unit in units {
                        if halted() {
                            break;
                        }
                        permits.acquire();
                        if halted() {
                            permits.release();
                            break;
                        }
                        admitted += 1;
                        stages.submit(Ticket {
                            unit,
                            permits: Arc::clone(&permits),
                            stop: Arc::clone(&stop),
                            fail_fast,
                            tx: tx.clone(),
                        });
                    }
                    let _ = tx.send(Event::Closed { admitted });
                })?
        };

        let mut summary = Summary {
            total,
            ..Summary::default()
        };
        let mut admitted = None;
        let mut fatal: Option<Error> = None;

        while admitted != Some(summary.completed) {
            let event = match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            match event {
                Event::Closed { admitted: n } => admitted = Some(n),
                Event::Done { file, result } => {
                    summary.completed += 1;
                    match result {
                        Ok(UnitOutcome::Written) => summary.written += 1,
                        Ok(UnitOutcome::Skipped) => summary.skipped += 1,
                        Err(e) => {
                            if e.is_fatal() || self.config.fail_fast {
                                log::error!("{} 失败，停止批处理: {}", file, e);
                                summary.failed.push((file.clone(), e.to_string()));
                                fatal.get_or_insert(e);
                            } else {
                                log::warn!("{} 失败，已跳过: {}", file, e);
                                summary.failed.push((file.clone(), e.to_string()));
                            }
                        }
                    }
                    on_progress(&Progress {
                        file,
                        completed: summary.completed,
                        total,
                    });
                }
            }
        }

        if let Err(p) = admission.join() {
            return Err(Error::WorkerPanic(panic_message(p)));
        }

        log::info!(
            "{}: 完成 {}/{}，写入 {}，跳过 {}，失败 {}",
            op.name(),
            summary.completed,
            total,
            summary.written,
            summary.skipped,
            summary.failed.len()
        );

        if let Some(e) = fatal {
            return Err(Error::Aborted(Box::new(e)));
        }
        if self.cancel.load(Ordering::SeqCst) && summary.completed < total {
            return Err(Error::Cancelled);
        }
        Ok(summary)
    }
}

/// 列出目录下的区域文件（不递归），按坐标排序
pub fn discover_regions(dir: &Path) -> Result<Vec<WorkUnit>> {
    let mut units = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(region) = RegionPos::from_file_name(name) {
            units.push(WorkUnit::new(region, entry.path().to_path_buf()));
        }
    }
    units.sort_by_key(|u| u.region);
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Behaviour {
        Clean,
        Dirty,
        FailLoad,
        Panic,
    }

    struct Toy {
        units: usize,
        behaviour: fn(usize) -> Behaviour,
        load_delay: Duration,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        writes: AtomicUsize,
        reject: bool,
    }

    impl Toy {
        fn new(units: usize, behaviour: fn(usize) -> Behaviour) -> Self {
            Self {
                units,
                behaviour,
                load_delay: Duration::ZERO,
                live: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                writes: AtomicUsize::new(0),
                reject: false,
            }
        }
    }

    struct ToyJob {
        index: usize,
        live: Arc<AtomicUsize>,
    }

    impl Drop for ToyJob {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Operation for Toy {
        type Job = ToyJob;

        fn name(&self) -> &'static str {
            "toy"
        }

        fn validate(&self) -> Result<()> {
            if self.reject {
                return Err(Error::Validation("rejected".into()));
            }
            Ok(())
        }

        fn discover(&self) -> Result<Vec<WorkUnit>> {
            Ok((0..self.units)
                .map(|i| {
                    let region = RegionPos::new(i as i32, 0);
                    WorkUnit::new(region, PathBuf::from(region.file_name()))
                })
                .collect())
        }

        fn load(&self, unit: &WorkUnit) -> Result<ToyJob> {
            let index = unit.region.x as usize;
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let job = ToyJob {
                index,
                live: Arc::clone(&self.live),
            };
            thread::sleep(self.load_delay);
            if (self.behaviour)(index) == Behaviour::FailLoad {
                return Err(Error::format(unit.path.clone(), "bad header"));
            }
            Ok(job)
        }

        fn process(&self, job: &mut ToyJob) -> Result<bool> {
            match (self.behaviour)(job.index) {
                Behaviour::Panic => panic!("boom {}", job.index),
                Behaviour::Dirty => Ok(true),
                _ => Ok(false),
            }
        }

        fn write(&self, _job: ToyJob) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(max_loaded: usize) -> PipelineConfig {
        PipelineConfig::with_threads(2, 3, 2, max_loaded)
    }

    #[test]
    fn progress_is_monotonic_and_complete() {
        let op = Arc::new(Toy::new(40, |i| if i % 3 == 0 { Behaviour::Dirty } else { Behaviour::Clean }));
        let pipeline = Pipeline::new(config(4)).unwrap();
        let mut seen = Vec::new();
        let summary = pipeline.run(op.clone(), |p| seen.push(p.clone())).unwrap();

        assert_eq!(summary.total, 40);
        assert_eq!(summary.completed, 40);
        assert_eq!(summary.written, 14);
        assert_eq!(summary.skipped, 26);
        assert!(summary.failed.is_empty());
        assert_eq!(op.writes.load(Ordering::SeqCst), 14);

        let counts: Vec<usize> = seen.iter().map(|p| p.completed).collect();
        assert_eq!(counts, (1..=40).collect::<Vec<_>>());
        assert!(seen.iter().all(|p| p.total == 40));
    }

    #[test]
    fn loaded_files_never_exceed_cap() {
        let mut toy = Toy::new(30, |_| Behaviour::Dirty);
        toy.load_delay = Duration::from_millis(2);
        let op = Arc::new(toy);
        let pipeline = Pipeline::new(PipelineConfig::with_threads(4, 4, 4, 2)).unwrap();
        let summary = pipeline.run(op.clone(), |_| {}).unwrap();
        assert_eq!(summary.completed, 30);
        assert!(op.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(op.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_loaded_file_still_completes() {
        let op = Arc::new(Toy::new(10, |_| Behaviour::Dirty));
        let pipeline = Pipeline::new(PipelineConfig::with_threads(1, 1, 1, 1)).unwrap();
        let summary = pipeline.run(op.clone(), |_| {}).unwrap();
        assert_eq!(summary.written, 10);
        assert_eq!(op.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn per_file_errors_do_not_abort() {
        let op = Arc::new(Toy::new(12, |i| if i == 5 { Behaviour::FailLoad } else { Behaviour::Dirty }));
        let pipeline = Pipeline::new(config(3)).unwrap();
        let summary = pipeline.run(op, |_| {}).unwrap();
        assert_eq!(summary.completed, 12);
        assert_eq!(summary.written, 11);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "r.5.0.mca");
    }

    #[test]
    fn fail_fast_stops_admission() {
        let op = Arc::new(Toy::new(50, |i| if i == 0 { Behaviour::FailLoad } else { Behaviour::Dirty }));
        let mut cfg = PipelineConfig::with_threads(1, 1, 1, 1);
        cfg.fail_fast = true;
        let pipeline = Pipeline::new(cfg).unwrap();
        let mut progress = 0;
        let err = pipeline.run(op.clone(), |_| progress += 1).unwrap_err();
        assert!(matches!(err, Error::Aborted(inner) if matches!(*inner, Error::Format { .. })));
        assert_eq!(progress, 1);
        assert_eq!(op.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pipeline_is_reusable_after_abort() {
        let mut cfg = PipelineConfig::with_threads(1, 1, 1, 1);
        cfg.fail_fast = true;
        let pipeline = Pipeline::new(cfg).unwrap();

        let broken = Arc::new(Toy::new(5, |i| if i == 0 { Behaviour::FailLoad } else { Behaviour::Dirty }));
        assert!(matches!(pipeline.run(broken, |_| {}), Err(Error::Aborted(_))));

        let healthy = Arc::new(Toy::new(5, |_| Behaviour::Dirty));
        let summary = pipeline.run(healthy.clone(), |_| {}).unwrap();
        assert_eq!(summary.completed, 5);
        assert_eq!(healthy.writes.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn worker_panic_is_fatal() {
        let op = Arc::new(Toy::new(20, |i| if i == 0 { Behaviour::Panic } else { Behaviour::Clean }));
        let pipeline = Pipeline::new(PipelineConfig::with_threads(1, 1, 1, 1)).unwrap();
        let err = pipeline.run(op.clone(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::Aborted(inner) if matches!(*inner, Error::WorkerPanic(_))));
        assert_eq!(op.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn validation_happens_before_discovery() {
        let mut toy = Toy::new(5, |_| Behaviour::Dirty);
        toy.reject = true;
        let op = Arc::new(toy);
        let pipeline = Pipeline::new(config(2)).unwrap();
        assert!(matches!(pipeline.run(op.clone(), |_| {}), Err(Error::Validation(_))));
        assert_eq!(op.peak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        assert!(matches!(
            Pipeline::new(PipelineConfig::with_threads(1, 0, 1, 1)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn cancel_through_handle() {
        let mut toy = Toy::new(200, |_| Behaviour::Dirty);
        toy.load_delay = Duration::from_millis(5);
        let op = Arc::new(toy);
        let pipeline = Pipeline::new(PipelineConfig::with_threads(1, 1, 1, 1)).unwrap();
        let handle = pipeline.spawn(op.clone(), |_| {});
        handle.cancel();
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(handle.wait(), Err(Error::Cancelled)));
        assert_eq!(op.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn discovers_only_region_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["r.0.0.mca", "r.-1.2.mca", "r.0.0.mcr", "level.dat", ".mcabatch-x.tmp"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("r.5.5.mca")).unwrap();
        let units = discover_regions(dir.path()).unwrap();
        let regions: Vec<_> = units.iter().map(|u| u.region).collect();
        assert_eq!(regions, vec![RegionPos::new(-1, 2), RegionPos::new(0, 0)]);
    }
}
