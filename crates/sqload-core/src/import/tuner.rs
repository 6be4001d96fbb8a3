//! 批次大小自动调优。
//!
//! 初始预算按 (内存档位, 文件大小档位) 查表，再乘以档位系数和安全系数。
//! 之后每次调用根据上一轮的峰值内存和吞吐量上调或下调，始终限制在
//! `[min_batch_size, max_batch_size]` 之间。无法获取内存大小时退回最小批次，不报错。

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{
    analysis::FileAnalysis,
    config::{ImportConfig, PerformanceProfile},
};

const MIB: u64 = 1024 * 1024;

/// 保留的历史样本数
pub const HISTORY_LIMIT: usize = 8;

const RAM_TTL: Duration = Duration::from_secs(30);
const RSS_TTL: Duration = Duration::from_secs(1);

const GROW_FACTOR: f64 = 1.25;
const SHRINK_FACTOR: f64 = 0.7;
const LOW_WATER: f64 = 0.5;
const HIGH_WATER: f64 = 0.8;
const THROUGHPUT_DROP: f64 = 0.25;

const MIN_BYTE_BUDGET: u64 = 256 * 1024;

/// 内存档位上界，最后一档不设上界
const RAM_TIERS: [u64; 5] = [512 * MIB, 1024 * MIB, 2048 * MIB, 4096 * MIB, 8192 * MIB];

/// 每次调用处理的行数，行为内存档位，列为文件大小档位
const LINES_TABLE: [[u64; 5]; 6] = [
    [3_000, 3_000, 5_000, 5_000, 5_000],
    [3_000, 5_000, 10_000, 10_000, 10_000],
    [5_000, 10_000, 20_000, 30_000, 30_000],
    [5_000, 20_000, 40_000, 60_000, 80_000],
    [10_000, 30_000, 60_000, 100_000, 150_000],
    [10_000, 50_000, 100_000, 200_000, 300_000],
];

/// 内存探针，取不到时返回 None
pub trait MemoryProbe: Send {
    fn total_ram(&mut self) -> Option<u64>;
    fn process_rss(&mut self) -> Option<u64>;
}

/// 读取 /proc 的探针，仅 Linux 可用
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcProbe;

impl MemoryProbe for ProcProbe {
    #[cfg(target_os = "linux")]
    fn total_ram(&mut self) -> Option<u64> {
        let content = std::fs::read_to_string("/proc/meminfo").ok()?;
        content
            .lines()
            .find(|line| line.starts_with("MemTotal:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    }

    #[cfg(not(target_os = "linux"))]
    fn total_ram(&mut self) -> Option<u64> {
        None
    }

    #[cfg(target_os = "linux")]
    fn process_rss(&mut self) -> Option<u64> {
        let content = std::fs::read_to_string("/proc/self/status").ok()?;
        content
            .lines()
            .find(|line| line.starts_with("VmRSS:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    }

    #[cfg(not(target_os = "linux"))]
    fn process_rss(&mut self) -> Option<u64> {
        None
    }
}

/// 固定数值的探针
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedProbe {
    pub total_ram: Option<u64>,
    pub process_rss: Option<u64>,
}

impl MemoryProbe for FixedProbe {
    fn total_ram(&mut self) -> Option<u64> {
        self.total_ram
    }

    fn process_rss(&mut self) -> Option<u64> {
        self.process_rss
    }
}

/// 带 TTL 缓存的探针
pub struct CachedProbe<P> {
    inner: P,
    ram: Option<(Instant, Option<u64>)>,
    rss: Option<(Instant, Option<u64>)>,
}

impl<P: MemoryProbe> CachedProbe<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            ram: None,
            rss: None,
        }
    }
}

impl<P: MemoryProbe> MemoryProbe for CachedProbe<P> {
    fn total_ram(&mut self) -> Option<u64> {
        match self.ram {
            Some((at, value)) if at.elapsed() < RAM_TTL => value,
            _ => {
                let value = self.inner.total_ram();
                self.ram = Some((Instant::now(), value));
                value
            }
        }
    }

    fn process_rss(&mut self) -> Option<u64> {
        match self.rss {
            Some((at, value)) if at.elapsed() < RSS_TTL => value,
            _ => {
                let value = self.inner.process_rss();
                self.rss = Some((Instant::now(), value));
                value
            }
        }
    }
}

/// 一次调用的吞吐和内存记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningSample {
    pub budget_lines: u64,
    pub lines: u64,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub peak_rss: Option<u64>,
}

impl TuningSample {
    /// 每秒行数
    pub fn throughput(&self) -> Option<f64> {
        (self.elapsed_ms > 0 && self.lines > 0).then(|| self.lines as f64 * 1000.0 / self.elapsed_ms as f64)
    }
}

/// 追加样本并丢弃超出上限的旧样本
pub fn push_sample(
    history: &mut Vec<TuningSample>,
    sample: TuningSample,
) {
    history.push(sample);
    if history.len() > HISTORY_LIMIT {
        history.drain(..history.len() - HISTORY_LIMIT);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunedBudget {
    pub lines: u64,
    pub bytes: u64,
}

pub struct AutoTuner {
    profile: PerformanceProfile,
    ram_override: Option<u64>,
    forced: Option<u64>,
    min: u64,
    max: u64,
    probe: Box<dyn MemoryProbe>,
}

impl AutoTuner {
    pub fn new(
        config: &ImportConfig,
        probe: Box<dyn MemoryProbe>,
    ) -> Self {
        Self {
            profile: config.performance_profile,
            ram_override: config.ram_override_bytes,
            forced: config.forced_batch_size,
            min: config.min_batch_size,
            max: config.max_batch_size,
            probe,
        }
    }

    pub fn total_ram(&mut self) -> Option<u64> {
        self.ram_override.or_else(|| self.probe.total_ram())
    }

    pub fn process_rss(&mut self) -> Option<u64> {
        self.probe.process_rss()
    }

    /// 下一次调用的行数和字节预算；previous 为上一次使用的行数
    pub fn next_budget(
        &mut self,
        analysis: &FileAnalysis,
        previous: Option<u64>,
        history: &[TuningSample],
    ) -> TunedBudget {
        let lines = match self.forced {
            Some(forced) => forced,
            None => match self.total_ram() {
                None => {
                    tracing::warn!("无法获取物理内存大小，批次退回最小值 {}", self.min);
                    self.min
                }
                Some(ram) => match previous {
                    None => self.base_lines(ram, analysis),
                    Some(previous) => self.revise(ram, previous, history),
                },
            },
        };
        let lines = lines.clamp(self.min, self.max);
        let bytes = lines
            .saturating_mul(analysis.bytes_per_line)
            .saturating_mul(2)
            .max(MIN_BYTE_BUDGET);

        TunedBudget { lines, bytes }
    }

    fn base_lines(
        &self,
        ram: u64,
        analysis: &FileAnalysis,
    ) -> u64 {
        let tier = RAM_TIERS.iter().position(|&limit| ram < limit).unwrap_or(RAM_TIERS.len());
        let mut lines = LINES_TABLE[tier][analysis.size_category.index()] as f64
            * self.profile.multiplier()
            * self.profile.safety_margin();
        if analysis.bulk_inserts {
            lines /= 2.0;
        }
        tracing::debug!(
            "初始批次: {} 行 (内存档位 {}, 文件档位 {:?})",
            lines.round() as u64,
            tier,
            analysis.size_category
        );
        lines.round() as u64
    }

    fn revise(
        &self,
        ram: u64,
        previous: u64,
        history: &[TuningSample],
    ) -> u64 {
        let Some(last) = history.last() else {
            return previous;
        };
        let ceiling = ram as f64 * self.profile.memory_fraction();

        let degraded = match (history.len().checked_sub(2).and_then(|i| history.get(i)), last.throughput()) {
            (Some(before), Some(now)) => before
                .throughput()
                .is_some_and(|before| (before - now) / before > THROUGHPUT_DROP),
            _ => false,
        };

        let next = match last.peak_rss {
            Some(peak) if peak as f64 > ceiling * HIGH_WATER => previous as f64 * SHRINK_FACTOR,
            _ if degraded => previous as f64 * SHRINK_FACTOR,
            Some(peak) if (peak as f64) < ceiling * LOW_WATER => previous as f64 * GROW_FACTOR,
            _ => previous as f64,
        };
        let next = next.round() as u64;
        tracing::debug!("批次调整: {} -> {}", previous, next);
        next
    }
}
