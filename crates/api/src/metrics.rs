use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use pipeline::StageId;

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    partial_results: AtomicUsize,

    // Timing (in microseconds)
    total_analysis_time_us: AtomicU64,
    stage_time_us: [AtomicU64; StageId::ALL.len()],
    stage_runs: [AtomicUsize; StageId::ALL.len()],
    total_search_time_us: AtomicU64,

    // Counts
    http_searches: AtomicUsize,
    agent_searches: AtomicUsize,
    knowledge_rebuilds: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            partial_results: AtomicUsize::new(0),
            total_analysis_time_us: AtomicU64::new(0),
            stage_time_us: std::array::from_fn(|_| AtomicU64::new(0)),
            stage_runs: std::array::from_fn(|_| AtomicUsize::new(0)),
            total_search_time_us: AtomicU64::new(0),
            http_searches: AtomicUsize::new(0),
            agent_searches: AtomicUsize::new(0),
            knowledge_rebuilds: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_analysis(&self, result: &pipeline::AnalysisResult, duration: Duration) {
        self.total_analysis_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if result.is_partial() {
            self.partial_results.fetch_add(1, Ordering::Relaxed);
        }
        for (stage, elapsed_ms) in result.stage_timings() {
            let slot = stage_slot(stage);
            self.stage_time_us[slot].fetch_add(elapsed_ms * 1000, Ordering::Relaxed);
            self.stage_runs[slot].fetch_add(1, Ordering::Relaxed);
        }
        let tool_calls: usize = result.raw_outputs.iter().map(|o| o.tool_calls).sum();
        self.agent_searches.fetch_add(tool_calls, Ordering::Relaxed);
    }

    /// A search served directly over HTTP. Agent searches arrive through `record_analysis`.
    pub fn record_search(&self, duration: Duration) {
        self.total_search_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.http_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.knowledge_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stages = StageId::ALL
            .iter()
            .map(|&stage| {
                let slot = stage_slot(stage);
                StageTiming {
                    stage,
                    runs: self.stage_runs[slot].load(Ordering::Relaxed),
                    avg_time_ms: avg_time_ms(&self.stage_time_us[slot], &self.stage_runs[slot]),
                }
            })
            .collect();

        let http_searches = self.http_searches.load(Ordering::Relaxed);
        let agent_searches = self.agent_searches.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            partial_results: self.partial_results.load(Ordering::Relaxed),
            avg_analysis_time_ms: avg_time_ms(&self.total_analysis_time_us, &self.successful_requests),
            avg_search_time_ms: avg_time_ms(&self.total_search_time_us, &self.http_searches),
            knowledge_searches: http_searches + agent_searches,
            agent_searches,
            knowledge_rebuilds: self.knowledge_rebuilds.load(Ordering::Relaxed),
            stages,
        }
    }
}

fn stage_slot(stage: StageId) -> usize {
    StageId::ALL.iter().position(|s| *s == stage).unwrap_or(0)
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub partial_results: usize,
    pub avg_analysis_time_ms: f64,
    /// Mean latency of HTTP searches only.
    pub avg_search_time_ms: f64,
    /// HTTP searches plus searches the profiler ran as a tool.
    pub knowledge_searches: usize,
    pub agent_searches: usize,
    pub knowledge_rebuilds: usize,
    pub stages: Vec<StageTiming>,
}

#[derive(Debug, Serialize)]
pub struct StageTiming {
    pub stage: StageId,
    pub runs: usize,
    pub avg_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_are_zero_before_any_work() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.avg_analysis_time_ms, 0.0);
        assert_eq!(snapshot.stages.len(), 3);
        assert!(snapshot.stages.iter().all(|s| s.runs == 0));
    }

    #[test]
    fn counts_requests_and_searches() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_search(Duration::from_millis(4));
        metrics.record_search(Duration::from_millis(2));
        metrics.record_rebuild();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.knowledge_searches, 2);
        assert_eq!(snapshot.knowledge_rebuilds, 1);
        assert!((snapshot.avg_search_time_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn profiler_tool_calls_count_as_knowledge_searches() {
        use agent::Completion;
        use pipeline::{AnalysisResult, StageOutput, VictimProfile};

        let stage = |stage, tool_calls| StageOutput {
            stage,
            raw: String::new(),
            completion: Completion::Complete,
            elapsed_ms: 10,
            tool_calls,
            fields: None,
        };
        let result = AnalysisResult {
            transcript: String::new(),
            segments: Vec::new(),
            duration: 0.0,
            risk_level: pipeline::RiskLevel::High,
            scam_type: String::new(),
            defense_advice: String::new(),
            victim_profile: VictimProfile::default(),
            raw_outputs: vec![
                stage(StageId::Monitor, 0),
                stage(StageId::Profile, 2),
                stage(StageId::Defend, 0),
            ],
        };

        let metrics = Metrics::new();
        metrics.record_search(Duration::from_millis(6));
        metrics.record_analysis(&result, Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.knowledge_searches, 3);
        assert_eq!(snapshot.agent_searches, 2);
        assert!((snapshot.avg_search_time_ms - 6.0).abs() < 1e-9);
    }
}
