use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use lander_autosave::conflict::diff_documents;
use lander_autosave::storage::{DraftStoreConfig, RocksDraftStore};
use lander_autosave::{Lz4JsonCodec, SnapshotCodec, SnapshotOrigin, VersionConfig, VersionManager};
use lander_core::{ChangeEvent, DocumentState};
use serde_json::json;

/// A draft with 20 sections of realistic copy.
fn page() -> DocumentState {
    let mut doc = DocumentState::new("bench");
    for i in 0..20 {
        doc = doc.with_section(
            &format!("section-{i}"),
            [
                ("headline", json!(format!("Ship landing pages in minutes #{i}"))),
                ("subheadline", json!("Describe your product and refine the copy with AI.")),
                ("cta", json!("Start free trial")),
            ],
        );
    }
    doc.theme.insert("accent".into(), json!("#ff6600"));
    doc
}

fn bench_create_snapshot(c: &mut Criterion) {
    let doc = page();
    let mut vm = VersionManager::new(VersionConfig::default());
    let mut now = 0;

    c.bench_function("create_snapshot_20_sections", |b| {
        b.iter(|| {
            now += 1;
            black_box(
                vm.create_snapshot(black_box(&doc), "edit", SnapshotOrigin::User, Vec::new(), now)
                    .unwrap(),
            );
        })
    });
}

fn bench_create_snapshot_compressing(c: &mut Criterion) {
    let doc = page();
    let mut vm = VersionManager::new(VersionConfig {
        compress_after_ms: 0,
        ..VersionConfig::default()
    });
    let mut now = 0;

    c.bench_function("create_snapshot_with_compression", |b| {
        b.iter(|| {
            now += 1;
            black_box(
                vm.create_snapshot(black_box(&doc), "edit", SnapshotOrigin::User, Vec::new(), now)
                    .unwrap(),
            );
        })
    });
}

fn bench_undo_redo_walk(c: &mut Criterion) {
    let mut vm = VersionManager::new(VersionConfig {
        compress_after_ms: 10,
        ..VersionConfig::default()
    });
    let mut doc = page();
    for i in 0..50u64 {
        let change = ChangeEvent::content("section-0", "headline", json!(""), json!(i), i);
        doc.apply_change(&change).unwrap();
        vm.create_snapshot(&doc, "edit", SnapshotOrigin::AutoSave, vec![change], i * 100)
            .unwrap();
    }

    c.bench_function("undo_redo_walk_50", |b| {
        b.iter(|| {
            while let Some(s) = vm.undo() {
                black_box(s);
            }
            while let Some(s) = vm.redo() {
                black_box(s);
            }
        })
    });
}

fn bench_lz4_codec(c: &mut Criterion) {
    let doc = page();
    let encoded = Lz4JsonCodec.encode(&doc).unwrap();

    c.bench_function("lz4_json_encode", |b| {
        b.iter(|| black_box(Lz4JsonCodec.encode(black_box(&doc)).unwrap()))
    });
    c.bench_function("lz4_json_decode", |b| {
        b.iter(|| black_box(Lz4JsonCodec.decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_conflict_diff(c: &mut Criterion) {
    let local = page();
    let mut remote = page();
    remote.theme.insert("accent".into(), json!("#0066ff"));
    remote
        .content
        .get_mut("section-3")
        .unwrap()
        .insert("cta".into(), json!("Book a demo"));

    c.bench_function("conflict_diff_20_sections", |b| {
        b.iter(|| black_box(diff_documents(black_box(&local), black_box(&remote))))
    });
}

fn bench_rocks_put_draft(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksDraftStore::open(DraftStoreConfig::for_testing(dir.path())).unwrap();
    let mut doc = page();

    c.bench_function("rocks_put_draft", |b| {
        b.iter(|| {
            doc.last_updated += 1;
            black_box(store.put_draft("bench", black_box(&doc)).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_create_snapshot,
    bench_create_snapshot_compressing,
    bench_undo_redo_walk,
    bench_lz4_codec,
    bench_conflict_diff,
    bench_rocks_put_draft,
);
criterion_main!(benches);
