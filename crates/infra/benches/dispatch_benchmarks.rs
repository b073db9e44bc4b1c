use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use chrono::Utc;
use postroom_core::UserId;
use postroom_infra::{Dispatcher, RecordingTransport};
use postroom_queue::{Campaign, InMemoryRepository, MailQueue, RecipientResult, Template};
use postroom_templates::{RecipientDetails, TemplateFields};
use std::sync::Arc;

fn campaign() -> Campaign {
    let user_id = UserId::new();
    let template = Template::new(
        "bench",
        user_id,
        TemplateFields::new(
            "Hi {{.FirstName}}",
            "Open {{.URL}} before {{.Position}} review",
            "<p>{{.FirstName}} {{.LastName}}</p><a href=\"{{.URL}}\">go</a>{{.Tracker}}",
        ),
    );
    Campaign::new(
        user_id,
        "bench",
        "https://example.com/{{.Email}}/landing?utm=mail",
        template,
        Utc::now(),
    )
}

fn recipients(campaign: &Campaign, n: usize) -> Vec<RecipientResult> {
    (0..n)
        .map(|i| {
            RecipientResult::new(
                campaign,
                RecipientDetails::new(format!("user{i}@example.com"))
                    .with_name("Sam", "Lee")
                    .with_position("Engineer"),
            )
        })
        .collect()
}

fn bench_launch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("launch_throughput");

    for size in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("render_and_enqueue", size),
            size,
            |b, &size| {
                let campaign = campaign();
                let results = recipients(&campaign, size);

                b.iter_batched(
                    || MailQueue::new(InMemoryRepository::arc()),
                    |queue| black_box(queue.launch(&campaign, &results).unwrap()),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_drain_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_throughput");

    for size in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("run_once", size), size, |b, &size| {
            let campaign = campaign();
            let results = recipients(&campaign, size);

            b.iter_batched(
                || {
                    let queue = MailQueue::new(InMemoryRepository::arc());
                    queue.launch(&campaign, &results).unwrap();
                    Dispatcher::new(Arc::new(queue), RecordingTransport::accepting())
                },
                |dispatcher| black_box(dispatcher.run_once(size).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_launch_throughput, bench_drain_throughput);
criterion_main!(benches);
