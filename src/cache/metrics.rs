use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 循环缓冲区，用于存储有限数量的延迟数据，防止内存泄漏
#[derive(Debug)]
struct CircularBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    head: usize,
    size: usize,
}

impl<T: Clone + Default> CircularBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            capacity,
            head: 0,
            size: 0,
        }
    }

    fn push(&mut self, item: T) {
        self.data[self.head] = item;
        self.head = (self.head + 1) % self.capacity;
        if self.size < self.capacity {
            self.size += 1;
        }
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        // 未写满时 head 之后都是默认值，需要跳过
        let (tail, head) = self.data.split_at(self.head);
        let wrapped = if self.size < self.capacity { &head[..0] } else { head };
        wrapped.iter().chain(tail.iter())
    }

    fn len(&self) -> usize {
        self.size
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCacheMetrics {
    pub gets: u64,
    pub get_errors: u64,
    pub puts: u64,
    pub put_errors: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub decode_errors: u64,
    pub not_implemented: u64,
    pub avg_get_latency_ms: f64,
    pub avg_put_latency_ms: f64,
    pub uptime_seconds: u64,
}

/// 远端缓存客户端的调用统计
#[derive(Debug)]
pub struct MetricsCollector {
    gets: AtomicU64,
    get_errors: AtomicU64,
    puts: AtomicU64,
    put_errors: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    decode_errors: AtomicU64,
    not_implemented: AtomicU64,
    get_latencies: RwLock<CircularBuffer<Duration>>,
    put_latencies: RwLock<CircularBuffer<Duration>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            gets: AtomicU64::new(0),
            get_errors: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            put_errors: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            not_implemented: AtomicU64::new(0),
            get_latencies: RwLock::new(CircularBuffer::new(1000)),
            put_latencies: RwLock::new(CircularBuffer::new(1000)),
            start_time: Instant::now(),
        }
    }

    pub fn record_get(&self, latency: Duration, bytes: Option<usize>) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        match bytes {
            Some(n) => {
                self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            }
            None => {
                self.get_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.get_latencies.write().push(latency);
    }

    pub fn record_put(&self, latency: Duration, bytes: usize, ok: bool) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        } else {
            self.put_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.put_latencies.write().push(latency);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_implemented(&self) {
        self.not_implemented.fetch_add(1, Ordering::Relaxed);
    }

    fn calculate_average_latency(latencies: &CircularBuffer<Duration>) -> f64 {
        if latencies.len() == 0 {
            return 0.0;
        }

        let total_ms: f64 = latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        total_ms / latencies.len() as f64
    }

    // 生成当前指标快照
    pub fn get_metrics(&self) -> RemoteCacheMetrics {
        RemoteCacheMetrics {
            gets: self.gets.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            not_implemented: self.not_implemented.load(Ordering::Relaxed),
            avg_get_latency_ms: Self::calculate_average_latency(&self.get_latencies.read()),
            avg_put_latency_ms: Self::calculate_average_latency(&self.put_latencies.read()),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
