//! Benchmarks for approval gates and plan artifacts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use infragate::approval::{ApprovalEvent, ApprovalGate, StaticApprovalPolicy};
use infragate::core::{PlanArtifact, PlanMode};
use std::time::Duration;

fn reviewers(count: usize) -> Vec<ApprovalEvent> {
    (0..count)
        .map(|i| ApprovalEvent::approve(format!("reviewer-{i}")).with_environment("prod"))
        .collect()
}

fn gate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_batch");
    let open = StaticApprovalPolicy::new();

    for size in [1usize, 16, 256] {
        let events = reviewers(size);
        let policy = StaticApprovalPolicy::new()
            .with_reviewers("prod", events.iter().map(|e| e.reviewer.clone()));

        group.bench_with_input(BenchmarkId::new("open_policy", size), &events, |b, events| {
            b.iter(|| {
                let mut gate = ApprovalGate::new("prod", size, Duration::from_secs(60));
                black_box(gate.record_batch(events.clone(), &open));
                black_box(gate.state())
            });
        });

        group.bench_with_input(BenchmarkId::new("listed_reviewers", size), &events, |b, events| {
            b.iter(|| {
                let mut gate = ApprovalGate::new("prod", size, Duration::from_secs(60));
                black_box(gate.record_batch(events.clone(), &policy));
                black_box(gate.state())
            });
        });
    }
    group.finish();
}

fn artifact_benchmark(c: &mut Criterion) {
    let plan = vec![0x5a_u8; 1 << 20];
    c.bench_function("plan_artifact_1mb", |b| {
        b.iter(|| {
            let artifact = PlanArtifact::new(PlanMode::Apply, ".", "prod", plan.clone());
            black_box(artifact.verify())
        });
    });
}

criterion_group!(benches, gate_benchmark, artifact_benchmark);
criterion_main!(benches);
