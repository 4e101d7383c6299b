//! Static per-metric remediation knowledge
//!
//! Each kind carries four likely root causes ordered from the most to the
//! least severe explanation, and four mitigation steps ordered by priority.

use crate::events::{MetricKind, RegressionSeverity, MODERATE_CHANGE_PERCENT, SEVERE_CHANGE_PERCENT};

pub fn root_causes(kind: MetricKind) -> [&'static str; 4] {
    match kind {
        MetricKind::ResponseTime => [
            "Database query performance degradation",
            "Network latency increase",
            "Server resource contention",
            "Inefficient algorithm implementation",
        ],
        MetricKind::MemoryUsage => [
            "Memory leak in component lifecycle",
            "Inefficient data structures",
            "Excessive caching",
            "Large object allocations",
        ],
        MetricKind::ErrorRate => [
            "API endpoint failures",
            "Network connectivity issues",
            "Invalid input handling",
            "Third-party service degradation",
        ],
        MetricKind::Fps => [
            "Inefficient rendering logic",
            "Excessive layout or DOM manipulation",
            "Heavy computational tasks on the render path",
            "Large dataset rendering",
        ],
        MetricKind::CpuUsage => [
            "Inefficient algorithms",
            "Runaway loops or recursion",
            "Heavy computational tasks",
            "Background process interference",
        ],
        MetricKind::Throughput => [
            "Resource bottlenecks",
            "Concurrency limitations",
            "Network bandwidth constraints",
            "Database connection limits",
        ],
        MetricKind::ContextProcessingTime => [
            "Large context size",
            "Complex processing logic",
            "Memory allocation overhead",
            "CPU throttling",
        ],
        MetricKind::TokenProcessingRate => [
            "Model performance degradation",
            "Network latency to the model service",
            "Rate limiting enforcement",
            "Resource allocation changes",
        ],
        MetricKind::BundleSize => [
            "New dependencies added",
            "Dead code not eliminated from the build",
            "Asset optimization disabled",
            "Build configuration changes",
        ],
        MetricKind::RenderTime => [
            "Complex component hierarchy",
            "Inefficient re-rendering",
            "Large state updates",
            "Layout thrashing",
        ],
        MetricKind::LoadTime => [
            "Increased bundle size",
            "Network performance degradation",
            "CDN issues",
            "Resource loading inefficiencies",
        ],
        MetricKind::NetworkLatency => [
            "Network congestion",
            "Geographic distance increase",
            "CDN performance issues",
            "ISP routing changes",
        ],
        MetricKind::PayloadSize => [
            "API response size increase",
            "Inefficient data serialization",
            "Missing compression",
            "Over-fetching data",
        ],
        MetricKind::CacheHitRate => [
            "Cache invalidation issues",
            "Cache size limitations",
            "Cache key collision",
            "TTL configuration problems",
        ],
    }
}

pub fn mitigations(kind: MetricKind) -> [&'static str; 4] {
    match kind {
        MetricKind::ResponseTime => [
            "Analyze slow database queries",
            "Implement request caching",
            "Optimize API endpoints",
            "Scale server resources",
        ],
        MetricKind::MemoryUsage => [
            "Review component lifecycle cleanup",
            "Enable memory leak detection",
            "Optimize data structures",
            "Release large buffers eagerly",
        ],
        MetricKind::ErrorRate => [
            "Implement better error handling",
            "Add retry mechanisms",
            "Validate input data",
            "Monitor third-party services",
        ],
        MetricKind::Fps => [
            "Optimize render cycles",
            "Implement virtual scrolling",
            "Reduce layout manipulation",
            "Use performance profiling",
        ],
        MetricKind::CpuUsage => [
            "Profile CPU-intensive operations",
            "Optimize algorithms",
            "Move work to background processing",
            "Add performance monitoring",
        ],
        MetricKind::Throughput => [
            "Scale infrastructure",
            "Optimize database connections",
            "Implement request batching",
            "Add load balancing",
        ],
        MetricKind::ContextProcessingTime => [
            "Reduce context size",
            "Implement context compression",
            "Add processing caching",
            "Profile the processing pipeline",
        ],
        MetricKind::TokenProcessingRate => [
            "Monitor model service performance",
            "Implement token caching",
            "Optimize request batching",
            "Add fallback mechanisms",
        ],
        MetricKind::BundleSize => [
            "Implement code splitting",
            "Remove unused dependencies",
            "Optimize asset loading",
            "Enable dead code elimination",
        ],
        MetricKind::RenderTime => [
            "Memoize expensive components",
            "Optimize component hierarchy",
            "Reduce unnecessary re-renders",
            "Use performance profiling",
        ],
        MetricKind::LoadTime => [
            "Optimize bundle size",
            "Implement lazy loading",
            "Use CDN optimization",
            "Add resource preloading",
        ],
        MetricKind::NetworkLatency => [
            "Optimize network requests",
            "Implement request caching",
            "Use CDN services",
            "Add connection pooling",
        ],
        MetricKind::PayloadSize => [
            "Implement data compression",
            "Optimize API responses",
            "Add pagination",
            "Remove unnecessary data",
        ],
        MetricKind::CacheHitRate => [
            "Optimize cache configuration",
            "Implement cache warming",
            "Review cache keys",
            "Add cache monitoring",
        ],
    }
}

/// Most likely root cause for a change of the given size
pub fn root_cause(kind: MetricKind, change_percent: f64) -> String {
    let causes = root_causes(kind);
    let magnitude = change_percent.abs();
    let index = if magnitude > SEVERE_CHANGE_PERCENT {
        0
    } else if magnitude > MODERATE_CHANGE_PERCENT {
        1
    } else {
        2
    };
    causes[index].to_string()
}

/// Mitigation steps, longer for more severe regressions
pub fn mitigation_plan(kind: MetricKind, severity: RegressionSeverity) -> Vec<String> {
    let steps = match severity {
        RegressionSeverity::Severe => 4,
        RegressionSeverity::Moderate => 3,
        RegressionSeverity::Minor => 2,
    };
    mitigations(kind)
        .iter()
        .take(steps)
        .map(|step| step.to_string())
        .collect()
}

/// Extra advice attached to an unstable metric
pub fn stability_recommendations(kind: MetricKind) -> &'static [&'static str] {
    match kind {
        MetricKind::ResponseTime => &[
            "Consider implementing request caching",
            "Review database query performance",
        ],
        MetricKind::MemoryUsage => &["Check for memory leaks", "Optimize component cleanup"],
        MetricKind::Fps | MetricKind::RenderTime => &[
            "Optimize rendering performance",
            "Reduce unnecessary re-renders",
        ],
        MetricKind::NetworkLatency => &["Add connection pooling", "Review request fan-out"],
        _ => &[],
    }
}
