//! Archive -> store -> catalog -> query/tree, through the public API only

use std::io::Write;
use std::path::{Path, PathBuf};
use bzip2::write::BzEncoder;
use serde_json::{json, Value};
use tempfile::TempDir;

use redstore::{
    ingest_and_catalog, Error, FrontierStrategy, IngestTargets, LoaderConfig, QueryEngine, RecordKind,
    RecordQuery, RecordStore, SledStore, StoreConfig, TimeBounds, TreeReconstructor,
};

fn write_bz2(dir: &Path, name: &str, lines: &[Value]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = BzEncoder::new(file, bzip2::Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap();
    path
}

fn submissions() -> Vec<Value> {
    vec![
        json!({"name": "t3_a1", "subreddit_id": "t5_a", "subreddit": "rust", "author": "ferris", "created_utc": 1298937600}),
        json!({"name": "t3_a2", "subreddit_id": "t5_a", "subreddit": "Rust", "author": "crab", "created_utc": 1299000000}),
        json!({"name": "t3_b1", "subreddit_id": "t5_b", "subreddit": "golang", "author": "gopher", "created_utc": 1301616000}),
    ]
}

fn comments() -> Vec<Value> {
    vec![
        json!({"name": "t1_c1", "parent_id": "t3_a1", "subreddit_id": "t5_a", "author": "crab", "created_utc": "1298940000"}),
        json!({"name": "t1_c2", "parent_id": "t3_a1", "subreddit_id": "t5_a", "author": "gopher", "created_utc": "1298941000"}),
        json!({"name": "t1_c3", "parent_id": "t1_c1", "subreddit_id": "t5_a", "author": "ferris", "created_utc": "1298942000"}),
        json!({"name": "t1_c4", "parent_id": "t1_c3", "subreddit_id": "t5_a", "author": "crab", "created_utc": "1298943000"}),
    ]
}

struct Fixture {
    _dir: TempDir,
    store: SledStore,
    submission_files: Vec<PathBuf>,
    comment_files: Vec<PathBuf>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let submission_files = vec![write_bz2(dir.path(), "RS_2011-03.bz2", &submissions())];
    let mut comment_lines = comments();
    comment_lines.insert(2, json!("not an object"));
    let comment_files = vec![write_bz2(dir.path(), "RC_2011-03.bz2", &comment_lines)];
    let store = SledStore::open(StoreConfig::at(dir.path().join("db"))).unwrap();
    Fixture { _dir: dir, store, submission_files, comment_files }
}

#[test]
fn test_ingest_catalog_query_and_tree() {
    let fx = fixture();
    let targets = IngestTargets {
        submissions: "Submission",
        comments: "Comment",
        catalog: "SubredIdMap",
        submission_files: &fx.submission_files,
        comment_files: &fx.comment_files,
    };
    let report = ingest_and_catalog(&fx.store, &LoaderConfig::with_batch_size(2), &targets).unwrap();

    assert_eq!(report.submissions.inserted(), 3);
    assert_eq!(report.comments.inserted(), 4);
    assert_eq!(report.comments.files[0].malformed, 1);
    assert_eq!(report.catalog.entries, 2);
    assert_eq!(report.enrichment.matched, 1);
    assert!(fx.store.has_index("Comment", "parent_id").unwrap());

    // Catalog: t5_a gathered both display names, t5_b has no comment activity
    let engine = QueryEngine::for_kind(&fx.store, RecordKind::Submission);
    let a = engine.catalog_entry("SubredIdMap", "t5_a").unwrap().unwrap();
    let mut names = a.subreddits.clone();
    names.sort();
    assert_eq!(names, vec!["Rust".to_string(), "rust".to_string()]);
    assert_eq!(a.submission_count, 2);
    assert_eq!(a.comment_count, Some(4));
    let b = engine.catalog_entry("SubredIdMap", "t5_b").unwrap().unwrap();
    assert_eq!(b.comment_count, None);
    assert_eq!(engine.subreddit_ids_for_name("SubredIdMap", "golang").unwrap(), vec!["t5_b".to_string()]);

    // March 2011 excludes the submission stamped exactly at April 1st midnight
    let query = RecordQuery::new().between(TimeBounds::parse("2011-03-01", "2011-04-01").unwrap());
    let march = engine.get_records("Submission", &query).unwrap().into_records().unwrap();
    assert_eq!(march.len(), 2);

    // Comment timestamps were normalized from strings, so range filters see them
    let comments = QueryEngine::for_kind(&fx.store, RecordKind::Comment);
    let query = RecordQuery::new()
        .field("author", "crab")
        .between(TimeBounds::parse("2011-03-01", "2011-04-01").unwrap());
    let by_crab = comments.get_records("Comment", &query).unwrap().into_records().unwrap();
    assert_eq!(by_crab.len(), 2);

    for strategy in [FrontierStrategy::SetMembership, FrontierStrategy::PerNode] {
        let tree = TreeReconstructor::new(&fx.store, "Comment")
            .with_strategy(strategy)
            .comment_tree("t3_a1", None)
            .unwrap();
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.edge_count(), 4);
        let mut first: Vec<&str> = tree.depth_edges[0].iter().map(|e| e.child()).collect();
        first.sort();
        assert_eq!(first, vec!["t1_c1", "t1_c2"]);
    }
}

#[test]
fn test_second_catalog_run_is_rejected() {
    let fx = fixture();
    let targets = IngestTargets {
        submissions: "Submission",
        comments: "Comment",
        catalog: "SubredIdMap",
        submission_files: &fx.submission_files,
        comment_files: &fx.comment_files,
    };
    let config = LoaderConfig {
        key_by_fullname: true,
        ..LoaderConfig::with_batch_size(10)
    };
    ingest_and_catalog(&fx.store, &config, &targets).unwrap();

    let err = ingest_and_catalog(&fx.store, &config, &targets).unwrap_err();
    assert!(matches!(err, Error::CollectionExists(ref name) if name == "SubredIdMap"));
    assert_eq!(fx.store.count("Submission", &redstore::Filter::All).unwrap(), 3);
}

#[test]
fn test_store_reopens_with_data() {
    let dir = TempDir::new().unwrap();
    let rs = vec![write_bz2(dir.path(), "RS_2011-03.bz2", &submissions())];
    let db = dir.path().join("db");
    {
        let store = SledStore::open(StoreConfig::at(&db)).unwrap();
        let loader = redstore::BulkLoader::new(&store, LoaderConfig::with_batch_size(100));
        loader.load("Submission", &rs).unwrap();
        store.flush().unwrap();
    }
    let store = SledStore::open(StoreConfig::at(&db)).unwrap();
    assert_eq!(store.count("Submission", &redstore::Filter::All).unwrap(), 3);
    assert!(store.has_index("Submission", "subreddit_id").unwrap());
}
