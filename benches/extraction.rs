//! Benchmarks for MetricFlow extraction and defined metric evaluation

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use metricflow::metric::attributes;
use metricflow::{
    DefinedMetrics, DefinedMetricsPipeline, Equation, ExceptionsCache, JsonRecord, Metric,
    MetricSchemas, Properties, Value, ValueType,
};
use std::collections::HashMap;
use std::sync::Arc;

fn schema_properties() -> Properties {
    [
        ("metrics.schema.perf.sources", "hosts"),
        ("metrics.schema.perf.attributes.host", "data.host"),
        ("metrics.schema.perf.attributes.cluster", "#prod"),
        ("metrics.schema.perf.attributes.+", r"tags\.(.*)"),
        ("metrics.schema.perf.value.cpu.key", "data.cpu"),
        ("metrics.schema.perf.value.mem.key", "data.mem"),
        ("metrics.schema.perf.filter.attribute.host", "!test.*"),
    ]
    .into_iter()
    .collect()
}

fn generate_records(count: usize) -> Vec<JsonRecord> {
    (0..count)
        .map(|i| {
            let json = format!(
                r#"{{"timestamp": {}, "data": {{"host": "h{}", "cpu": {}, "mem": {}}}, "tags": {{"zone": "eu", "rack": "r{}"}}}}"#,
                i * 1000,
                i % 50,
                (i % 100) as f64 / 100.0,
                i % 64,
                i % 8
            );
            JsonRecord::from_json(&json).unwrap()
        })
        .collect()
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");

    // Setup
    let exceptions = Arc::new(ExceptionsCache::default());
    let schemas = MetricSchemas::from_properties(&schema_properties(), exceptions);
    let records = generate_records(1000);

    group.throughput(Throughput::Elements(1000));

    group.bench_function("extract_1000_records", |b| {
        b.iter(|| {
            for record in &records {
                black_box(schemas.extract("hosts", record));
            }
        })
    });

    group.finish();
}

fn bench_equation(c: &mut Criterion) {
    let mut group = c.benchmark_group("equation");

    let types = HashMap::from([
        ("used".to_string(), ValueType::Numeric),
        ("total".to_string(), ValueType::Numeric),
    ]);

    group.bench_function("parse", |b| {
        b.iter(|| black_box(Equation::parse("used / total * 100 > 90 && total > 0", &types)))
    });

    let equation = Equation::parse("used / total * 100 > 90 && total > 0", &types).unwrap();
    let inputs = HashMap::from([
        ("used".to_string(), Value::Numeric(95.0)),
        ("total".to_string(), Value::Numeric(100.0)),
    ]);

    group.bench_function("evaluate", |b| {
        b.iter(|| black_box(equation.evaluate(&inputs)))
    });

    group.finish();
}

fn bench_defined_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("defined_metrics");

    let properties: Properties = [
        ("metrics.define.load.metrics.groupby", "cluster"),
        ("metrics.define.load.variables.l.aggregate", "avg"),
        ("metrics.define.load.variables.l.expire", "10m"),
    ]
    .into_iter()
    .collect();
    let definitions = Arc::new(DefinedMetrics::from_properties(
        &properties,
        Arc::new(ExceptionsCache::default()),
    ));

    let start = Utc.timestamp_opt(0, 0).unwrap();
    let metrics: Vec<Metric> = (0..1000)
        .map(|i| {
            let host = format!("h{}", i % 100);
            let cluster = format!("c{}", i % 4);
            Metric::new(
                start + Duration::seconds(i),
                (i % 10) as f64,
                attributes([("host", host.as_str()), ("cluster", cluster.as_str())]),
            )
        })
        .collect();

    group.throughput(Throughput::Elements(1000));

    group.bench_function("update_1000_metrics", |b| {
        b.iter(|| {
            let mut pipeline =
                DefinedMetricsPipeline::in_memory(definitions.clone(), Duration::hours(1));
            let derived = pipeline.process(metrics.iter().cloned()).count();
            black_box(derived);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_extraction,
    bench_equation,
    bench_defined_metrics
);
criterion_main!(benches);
