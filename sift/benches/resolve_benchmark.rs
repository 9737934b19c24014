use criterion::{criterion_group, criterion_main, Criterion};
use sift::query::normalize;
use sift::{Document, SearchEngine, SearchSettings, SortOrder, SqliteStore};
use std::hint::black_box;
use std::sync::Arc;

const WORDS: &[&str] = &[
    "tomato", "basil", "compost", "pruning", "roses", "soil", "seedling", "mulch", "harvest", "trellis",
    "watering", "greenhouse", "aphids", "perennial", "cutting", "orchard",
];

fn setup_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("Failed to open in-memory database");
    let docs: Vec<Document> = (0..2_000)
        .map(|i| {
            let title = format!("{} {} notes", WORDS[i % WORDS.len()], WORDS[(i * 7) % WORDS.len()]);
            let body = (0..40)
                .map(|j| WORDS[(i * 31 + j * 13) % WORDS.len()])
                .collect::<Vec<_>>()
                .join(" ");
            Document::new("post", title, body).published_at(i as i64)
        })
        .collect();
    store.insert_documents(&docs).expect("Failed to seed documents");
    store
}

fn bench_normalize(c: &mut Criterion) {
    let settings = SearchSettings::default();
    let mut group = c.benchmark_group("normalize");
    group.bench_function("fulltext_passthrough", |b| {
        b.iter(|| normalize(black_box("  pruning \"climbing\" roses "), &settings))
    });
    group.bench_function("term_split", |b| {
        b.iter(|| normalize(black_box("a, b,  &quot;c&quot; 'd'"), &settings))
    });
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = setup_store();

    let uncached = SearchEngine::new(
        SearchSettings { cache_enabled: false, ..Default::default() },
        Arc::new(store.clone()),
        None,
    )
    .unwrap();
    let cached = SearchEngine::new(
        SearchSettings::default(),
        Arc::new(store),
        Some(Arc::new(sift::MemoryCache::new())),
    )
    .unwrap();

    let queries = vec![
        ("single_word", "compost"),
        ("multi_word", "pruning roses"),
        ("term_fallback", "greenhous"),
        ("short_terms", "mix of pot"),
    ];

    let mut group = c.benchmark_group("resolve");
    group.sample_size(20);

    for (name, query) in &queries {
        group.bench_function(format!("uncached_{}", name), |b| {
            b.iter(|| rt.block_on(async { uncached.resolve(query, 0, None, SortOrder::Score).await.unwrap() }))
        });
        group.bench_function(format!("cached_{}", name), |b| {
            b.iter(|| rt.block_on(async { cached.resolve(query, 20, None, SortOrder::Score).await.unwrap() }))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_normalize, bench_resolve);
criterion_main!(benches);
