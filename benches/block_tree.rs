//! Benchmarks for identifier parsing, block tree rendering and cache lookups.
//!
//! Benchmark targets:
//! - Identifier parsing: <1us
//! - Rendering a 1000 node tree: <1ms
//! - Cache hit: <50us

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use blockcache::{Alias, BlockCache, BlockTree, CacheKey, DocumentId, ObjectKind};

const COMPACT_ID: &str = "0123456789abcdef0123456789abcdef";
const HYPHENATED_ID: &str = "01234567-89AB-CDEF-0123-456789ABCDEF";
const INVALID_ID: &str = "not-a-document-identifier";

fn bench_document_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_id");

    group.bench_function("parse_compact", |b| {
        b.iter(|| DocumentId::parse(black_box(COMPACT_ID)));
    });

    group.bench_function("parse_hyphenated", |b| {
        b.iter(|| DocumentId::parse(black_box(HYPHENATED_ID)));
    });

    group.bench_function("parse_invalid", |b| {
        b.iter(|| DocumentId::parse(black_box(INVALID_ID)));
    });

    group.finish();
}

/// Builds a tree where each node has `fanout` children, breadth first.
fn wide_tree(nodes: u32, fanout: u32) -> BlockTree {
    let mut tree = BlockTree::new();
    for child in 2..=nodes {
        let parent = (child - 2) / fanout + 1;
        tree.add_relationship(Alias::new(parent), Alias::new(child));
    }
    tree
}

fn bench_block_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_tree");
    group.measurement_time(Duration::from_secs(5));

    for nodes in [10u32, 100, 1000] {
        let tree = wide_tree(nodes, 4);
        group.throughput(Throughput::Elements(u64::from(nodes)));

        group.bench_with_input(BenchmarkId::new("render", nodes), &tree, |b, tree| {
            b.iter(|| black_box(tree).render());
        });

        group.bench_with_input(BenchmarkId::new("to_plain", nodes), &tree, |b, tree| {
            b.iter(|| black_box(tree).to_plain());
        });

        group.bench_with_input(BenchmarkId::new("descendants", nodes), &tree, |b, tree| {
            b.iter(|| black_box(tree).get_all_children_recursive(Alias::new(1)));
        });
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache");

    let cache = BlockCache::in_memory().unwrap();
    let key = CacheKey::document(DocumentId::parse(COMPACT_ID).unwrap(), ObjectKind::Page);
    cache
        .put(&key, r#"{"object":"page","id":1}"#, None, None)
        .unwrap();

    group.bench_function("get_hit", |b| {
        b.iter(|| cache.get(black_box(&key)));
    });

    let missing = CacheKey::document(DocumentId::new_random(), ObjectKind::Page);
    group.bench_function("get_miss", |b| {
        b.iter(|| cache.get(black_box(&missing)));
    });

    group.finish();
}

criterion_group!(benches, bench_document_id, bench_block_tree, bench_cache);
criterion_main!(benches);
