//! Caching correctness tests
//!
//! End-to-end scenarios against a real cache directory: cold miss and
//! warm hit, hash-collision probing, invalidation by dataset mtime,
//! size-triggered purge, oversized identifiers, and recovery from
//! truncated entries.

mod fixtures;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use dap_function_cache::{
    base_name, candidate_name, resource_id, CacheInfo, CacheSettings, FunctionResponseCache,
    PURGE_RETAIN_FRACTION,
};
use fixtures::{assert_same_values, source_dataset, write_dataset_file, FixtureEvaluator};

fn make_settings(cache_dir: &Path, size_mb: u64) -> CacheSettings {
    CacheSettings {
        path: cache_dir.to_path_buf(),
        prefix: "rc".to_string(),
        size_mb,
    }
}

fn make_cache_dir(temp: &TempDir) -> PathBuf {
    let dir = temp.path().join("cache");
    fs::create_dir(&dir).unwrap();
    dir
}

/// Entry files (accounting record excluded), sorted by name.
fn entry_files(cache_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(cache_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy().to_string();
            name.starts_with("rc") && name != "rc.cache_info"
        })
        .collect();
    files.sort();
    files
}

fn first_line(path: &Path) -> String {
    let mut line = String::new();
    BufReader::new(fs::File::open(path).unwrap())
        .read_line(&mut line)
        .unwrap();
    line.trim_end_matches('\n').to_string()
}

// =============================================================================
// Cold miss, warm hit
// =============================================================================

#[test]
fn test_cold_miss_then_warm_hit() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));
    assert!(cache.is_available());

    let mut evaluator = FixtureEvaluator::new();
    let first = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1, "cold call evaluates");

    let entries = entry_files(&cache_dir);
    assert_eq!(entries.len(), 1);

    // The entry's header line is the exact resource identifier.
    let rid = resource_id(&dataset, "mean(u,0)");
    assert_eq!(first_line(&entries[0]), rid);

    // The entry name is <prefix><decimal hash>_0.
    let expected = candidate_name(&base_name("rc", &rid), 0);
    assert_eq!(entries[0].file_name().unwrap().to_string_lossy(), expected);

    let second = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1, "warm call must not re-evaluate");

    // Same answer either way, and the hit carries the source filename.
    assert_same_values(&first, &second);
    assert_eq!(second.filename(), dataset.filename());
    for var in second.variables() {
        assert!(var.read_p() && var.send_p());
    }
}

// =============================================================================
// Hash collision probing
// =============================================================================

#[test]
fn test_collision_probes_next_suffix() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let rid = resource_id(&dataset, "mean(u,0)");
    let base = base_name("rc", &rid);

    // Plant a foreign entry squatting on suffix 0, as if some other
    // resource had hashed to the same base.
    let squatter = cache_dir.join(candidate_name(&base, 0));
    fs::write(&squatter, "/other/data.nc#min(v)\nnot a real entry\n").unwrap();

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));
    let mut evaluator = FixtureEvaluator::new();
    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);

    // The squatter is untouched and the new entry took suffix 1.
    assert_eq!(first_line(&squatter), "/other/data.nc#min(v)");
    let slot_1 = cache_dir.join(candidate_name(&base, 1));
    assert!(slot_1.exists(), "collision should probe to suffix 1");
    assert_eq!(first_line(&slot_1), rid);

    // And the suffix-1 entry now serves hits.
    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);
}

// =============================================================================
// Invalidation by dataset mtime
// =============================================================================

#[test]
fn test_dataset_mtime_invalidates_entry() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));
    let mut evaluator = FixtureEvaluator::new();

    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);

    // Touch the dataset so its mtime passes the entry's. Filesystem
    // timestamps can be coarse, so spread the writes out.
    thread::sleep(Duration::from_millis(1100));
    fs::write(&dataset_path, b"netcdf stand-in, updated\n").unwrap();

    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(
        evaluator.evaluations, 2,
        "stale entry must be re-evaluated"
    );

    // The rewritten entry serves hits again.
    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 2);
    assert_eq!(entry_files(&cache_dir).len(), 1, "entry was replaced in place");
}

// =============================================================================
// Size-triggered purge
// =============================================================================

#[test]
fn test_purge_keeps_cache_under_low_water() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    // 1 MB high water; each entry carries a ~320 KiB payload.
    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 1));
    let mut evaluator = FixtureEvaluator::new().with_payload_floats(40_000);

    for i in 0..4 {
        cache
            .get_or_cache(&dataset, &format!("subset(u,{i})"), &mut evaluator)
            .unwrap();
        // Distinct access times make the eviction order deterministic.
        thread::sleep(Duration::from_millis(1100));
    }
    assert_eq!(evaluator.evaluations, 4);

    let low_water = ((1u64 << 20) as f64 * PURGE_RETAIN_FRACTION) as u64;

    let entries = entry_files(&cache_dir);
    let on_disk: u64 = entries
        .iter()
        .map(|p| fs::metadata(p).unwrap().len())
        .sum();
    assert!(
        on_disk <= low_water,
        "cache holds {on_disk} bytes, above the {low_water} low-water mark"
    );
    assert!(entries.len() < 4, "purge must have deleted entries");

    // The accounting record agrees with the directory.
    let mut info_file = fs::File::open(cache_dir.join("rc.cache_info")).unwrap();
    let info = CacheInfo::load(&mut info_file).unwrap().unwrap();
    assert_eq!(info.size_bytes, on_disk);

    // The newest entry (exempt at purge time) survived.
    let rid = resource_id(&dataset, "subset(u,3)");
    let newest = cache_dir.join(candidate_name(&base_name("rc", &rid), 0));
    assert!(newest.exists(), "most recent entry must survive its own purge");
}

// =============================================================================
// Oversized identifiers bypass
// =============================================================================

#[test]
fn test_too_long_identifier_bypasses_cache() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));
    let mut evaluator = FixtureEvaluator::new();

    let constraint = format!("mean({},0)", "u".repeat(5000));
    let result = cache
        .get_or_cache(&dataset, &constraint, &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);
    assert_eq!(result.filename(), dataset.filename());

    assert!(
        entry_files(&cache_dir).is_empty(),
        "oversized identifier must not create an entry"
    );

    // No caching means the second call evaluates again.
    cache
        .get_or_cache(&dataset, &constraint, &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 2);
}

// =============================================================================
// Truncated entry recovery
// =============================================================================

#[test]
fn test_truncated_entry_is_discarded_and_rebuilt() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));
    let mut evaluator = FixtureEvaluator::new();

    let first = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);

    // Chop the payload, as a crash mid-write would.
    let entry = entry_files(&cache_dir).remove(0);
    let bytes = fs::read(&entry).unwrap();
    fs::write(&entry, &bytes[..bytes.len() - 16]).unwrap();

    let rebuilt = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(
        evaluator.evaluations, 2,
        "corrupt entry must be discarded and re-evaluated"
    );
    assert_same_values(&first, &rebuilt);

    // The rebuilt entry is whole again.
    let entry = entry_files(&cache_dir).remove(0);
    assert_eq!(fs::read(&entry).unwrap(), bytes);

    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 2, "rebuilt entry serves hits");
}

// =============================================================================
// Evaluator failures leave nothing behind
// =============================================================================

#[test]
fn test_evaluator_error_removes_partial_entry() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));

    let mut failing = FixtureEvaluator::new();
    failing.fail = true;
    let err = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut failing)
        .unwrap_err();
    assert!(err.to_string().contains("injected parse failure"));

    assert!(
        entry_files(&cache_dir).is_empty(),
        "failed write must unlink its partial entry"
    );

    // The slot is reusable: the lock was released and the file removed.
    let mut evaluator = FixtureEvaluator::new();
    cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);
    assert_eq!(entry_files(&cache_dir).len(), 1);
}

// =============================================================================
// Cache directory removed at runtime
// =============================================================================

#[test]
fn test_cache_dir_removed_at_runtime_falls_back_to_evaluation() {
    let temp = TempDir::new().unwrap();
    let cache_dir = make_cache_dir(&temp);
    let dataset_path = write_dataset_file(temp.path(), "f.nc");
    let dataset = source_dataset(&dataset_path);

    let cache = FunctionResponseCache::new(make_settings(&cache_dir, 20));
    let mut evaluator = FixtureEvaluator::new();

    let first = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(evaluator.evaluations, 1);

    fs::remove_dir_all(&cache_dir).unwrap();

    let second = cache
        .get_or_cache(&dataset, "mean(u,0)", &mut evaluator)
        .unwrap();
    assert_eq!(
        evaluator.evaluations, 2,
        "with the directory gone the call evaluates directly"
    );
    assert_same_values(&first, &second);
}
