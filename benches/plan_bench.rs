use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chartengine::{
    AutogenPolicy, ChartTemplateConfig, DimensionConfig, Engine, EngineOptions, EnginePolicy, LabelSet, Series,
    SeriesMeta,
};

fn series_set(count: usize) -> Vec<Series> {
    (0..count)
        .map(|i| {
            let name = if i % 2 == 0 { "mysql.queries" } else { "app.requests_total" };
            let labels = LabelSet::from_pairs([
                ("instance".to_string(), format!("db{}", i % 16)),
                ("command".to_string(), format!("cmd{}", i / 16)),
            ]);
            Series::new(name, labels, SeriesMeta::counter())
        })
        .collect()
}

fn engine() -> Engine {
    let template = ChartTemplateConfig {
        id: "queries".to_string(),
        chart_id: "mysql_queries".to_string(),
        instances: vec!["instance".to_string()],
        metrics: vec!["mysql.*".to_string()],
        dimension: DimensionConfig {
            from_label: Some("command".to_string()),
            ..DimensionConfig::default()
        },
        ..ChartTemplateConfig::default()
    };

    Engine::new(
        EngineOptions::new()
            .with_templates(vec![template])
            .with_policy(EnginePolicy {
                autogen: Some(AutogenPolicy::enabled()),
                ..EnginePolicy::default()
            }),
    )
    .unwrap()
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for count in [100, 1_000, 10_000] {
        let series = series_set(count);

        group.bench_with_input(BenchmarkId::new("steady_state", count), &series, |b, series| {
            let mut engine = engine();
            let mut seq = 1;
            engine.plan(series, seq);
            b.iter(|| {
                seq += 1;
                black_box(engine.plan(black_box(series), seq))
            });
        });

        group.bench_with_input(BenchmarkId::new("cold", count), &series, |b, series| {
            b.iter(|| {
                let mut engine = engine();
                black_box(engine.plan(black_box(series), 1))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan);
criterion_main!(benches);
