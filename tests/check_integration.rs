//! Integration test: reachability check over hand-built and written files.
//!
//! Covers:
//! - writer output checks clean, and checking twice gives the same report
//! - dangling bucket pointers (inside the file and past its end)
//! - orphan records, backward child pointers, duplicate pointers
//! - free records and garbage between records, which leave findings unchanged
//! - divergence of the two resync policies
//! - truncated trailing records

mod common;

use common::RawDb;
use hdbkit::check::{check, dump_findings, CheckOptions, CheckStats, Finding, RECORD_ORIGIN};
use hdbkit::format::{DbOptions, HashDbFile, HashDbWriter, RecordSink, ResyncPolicy, Tuning};
use hdbkit::HdbError;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn byte_by_byte() -> CheckOptions {
    CheckOptions {
        resync: ResyncPolicy::ByteByByte,
        ..CheckOptions::default()
    }
}

fn aligned() -> CheckOptions {
    CheckOptions {
        resync: ResyncPolicy::Aligned,
        ..CheckOptions::default()
    }
}

fn open(raw: &RawDb) -> HashDbFile {
    HashDbFile::from_bytes(raw.bytes()).unwrap()
}

fn written_db(dir: &TempDir, options: u8, keys: u32) -> HashDbFile {
    let path = dir.path().join("written.tch");
    let tuning = Tuning {
        bucket_count: 61,
        alignment_power: 4,
        free_block_power: 3,
        options: DbOptions(options),
    };
    let mut writer = HashDbWriter::create(&path, tuning).unwrap();
    for i in 0..keys {
        writer
            .put_if_absent(format!("mlid:{i}").as_bytes(), format!("{i:08}").as_bytes())
            .unwrap();
    }
    writer.close().unwrap();
    HashDbFile::open(&path).unwrap()
}

// ---------------------------------------------------------------------------
// Tests: well-formed files
// ---------------------------------------------------------------------------

#[test]
fn written_database_checks_clean() {
    let dir = TempDir::new().unwrap();
    let db = written_db(&dir, 0, 500);
    let report = check(&db, byte_by_byte());

    assert!(report.is_consistent(), "{report:?}");
    assert_eq!(report.stats.data_records, 500);
    assert_eq!(report.stats.buckets_scanned, 61);
    assert_eq!(report.stats.child_pointers, 500 - report.stats.non_empty_buckets);
    assert_eq!(report.stats.resyncs, 0);
}

#[test]
fn wide_pointer_database_checks_clean() {
    let dir = TempDir::new().unwrap();
    let db = written_db(&dir, DbOptions::LARGE, 200);
    assert_eq!(db.metadata().pointer_width.bytes(), 8);
    let report = check(&db, aligned());
    assert!(report.is_consistent(), "{report:?}");
    assert_eq!(report.stats.data_records, 200);
}

#[test]
fn check_is_idempotent() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    raw.data(b"orphan", b"2", 0, 0);
    raw.set_bucket(0, a);
    raw.set_bucket(1, a + 4096);
    let db = open(&raw);

    let first = check(&db, byte_by_byte());
    let second = check(&db, byte_by_byte());
    assert_eq!(first, second);
    assert!(!first.is_consistent());
}

// ---------------------------------------------------------------------------
// Tests: discrepancies
// ---------------------------------------------------------------------------

#[test]
fn dangling_bucket_pointers_are_reported() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    let gap = raw.garbage(&[0; 8]);
    raw.set_bucket(0, a);
    raw.set_bucket(1, a + 1024);
    raw.set_bucket(2, gap);
    assert_eq!(a, 280);
    assert_eq!(gap, 296);

    let report = check(&open(&raw), byte_by_byte());
    assert_eq!(
        report.dangling,
        vec![
            Finding { origin: 2, offset: gap },
            Finding {
                origin: 1,
                offset: a + 1024
            },
        ]
    );
    assert!(report.orphans.is_empty());
    assert_eq!(report.stats.out_of_range_pointers, 1);
    assert_eq!(report.stats.resyncs, 1);
    assert_eq!(report.stats.skipped_bytes, 8);
}

#[test]
fn orphan_records_are_reported() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    let b = raw.data(b"b", b"2", 0, 0);
    raw.set_bucket(3, a);

    let report = check(&open(&raw), byte_by_byte());
    assert!(report.dangling.is_empty());
    assert_eq!(
        report.orphans,
        vec![Finding {
            origin: RECORD_ORIGIN,
            offset: b
        }]
    );
}

#[test]
fn child_pointers_resolve_in_both_directions() {
    let mut raw = RawDb::new(4, 3, 0);
    // x is only reachable through a later record's child slot
    let x = raw.data(b"x", b"1", 0, 0);
    // y's left child is z, which comes after it
    let z_offset = raw.end() + 16;
    let y = raw.data(b"y", b"2", z_offset, x);
    let z = raw.data(b"z", b"3", 0, 0);
    assert_eq!(z, z_offset);
    raw.set_bucket(0, y);

    let report = check(&open(&raw), byte_by_byte());
    assert!(report.is_consistent(), "{report:?}");
    assert_eq!(report.stats.child_pointers, 2);
    assert_eq!(report.stats.data_records, 3);
}

#[test]
fn duplicate_pointers_keep_the_first_origin() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    raw.set_bucket(1, a);
    raw.set_bucket(2, a);
    raw.set_bucket(3, a + 2048);
    raw.garbage(&[0; 8]);

    let report = check(&open(&raw), byte_by_byte());
    assert_eq!(report.stats.duplicate_offsets, 1);
    assert_eq!(report.stats.non_empty_buckets, 3);
    assert_eq!(report.dangling, vec![Finding { origin: 3, offset: a + 2048 }]);
    assert!(report.orphans.is_empty());
}

#[test]
fn overflowing_bucket_entries_are_counted_not_tracked() {
    let mut raw = RawDb::new(2, 4, DbOptions::LARGE);
    let a = raw.data(b"a", b"1", 0, 0);
    raw.set_bucket(0, a);
    raw.set_bucket_raw(1, u64::MAX);

    let report = check(&open(&raw), byte_by_byte());
    assert_eq!(report.stats.overflowed_pointers, 1);
    assert!(report.dangling.is_empty());
    assert!(report.is_consistent());
}

// ---------------------------------------------------------------------------
// Tests: record section layout
// ---------------------------------------------------------------------------

#[test]
fn free_records_are_skipped() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    raw.free(16);
    let b = raw.data(b"b", b"2", 0, 0);
    raw.set_bucket(0, a);
    raw.set_bucket(1, b);

    let report = check(&open(&raw), byte_by_byte());
    assert!(report.is_consistent(), "{report:?}");
    assert_eq!(report.stats.free_records, 1);
    assert_eq!(report.stats.data_records, 2);
    assert_eq!(report.stats.resyncs, 0);
}

/// x <- c.left, b unreferenced, c.right and bucket 2 past the end of the file.
/// Returns the image and the offsets of x, b and c.
fn findings_layout(with_free: bool) -> (RawDb, [u64; 3]) {
    let mut raw = RawDb::new(4, 3, 0);
    let x = raw.data(b"x", b"1", 0, 0);
    if with_free {
        raw.free(16);
    }
    let b = raw.data(b"b", b"2", 0, 0);
    if with_free {
        raw.free(24);
    }
    let c = raw.data(b"c", b"3", x, 1 << 20);
    raw.set_bucket(1, c);
    raw.set_bucket(2, 1 << 21);
    (raw, [x, b, c])
}

#[test]
fn free_records_do_not_change_findings() {
    let (plain_raw, plain) = findings_layout(false);
    let (freed_raw, freed) = findings_layout(true);
    assert_eq!(freed[1], plain[1] + 16);
    assert_eq!(freed[2], plain[2] + 40);

    let without = check(&open(&plain_raw), byte_by_byte());
    let with = check(&open(&freed_raw), byte_by_byte());

    assert_eq!(
        without.dangling,
        vec![
            Finding {
                origin: RECORD_ORIGIN,
                offset: 1 << 20
            },
            Finding { origin: 2, offset: 1 << 21 },
        ]
    );
    assert_eq!(with.dangling, without.dangling);

    assert_eq!(
        without.orphans,
        vec![Finding {
            origin: RECORD_ORIGIN,
            offset: plain[1]
        }]
    );
    assert_eq!(
        with.orphans,
        vec![Finding {
            origin: RECORD_ORIGIN,
            offset: freed[1]
        }]
    );

    assert_eq!(with.stats.free_records, 2);
    assert_eq!(without.stats.free_records, 0);
    assert_eq!(
        CheckStats {
            free_records: 0,
            ..with.stats
        },
        without.stats
    );
    assert_eq!(with.truncated_at, without.truncated_at);
}

#[test]
fn resync_policies_can_disagree() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    raw.garbage(&[0x00]);
    // unaligned record, only visible byte by byte
    let hidden = raw.data_with_padding(b"abc", b"xyz", 0, 0, 0);
    raw.align();
    let b = raw.data(b"b", b"2", 0, 0);
    raw.set_bucket(0, a);
    raw.set_bucket(1, b);
    assert_eq!(hidden, 297);
    assert_eq!(b, 320);

    let db = open(&raw);
    let bytewise = check(&db, byte_by_byte());
    let aligned = check(&db, aligned());

    assert_eq!(bytewise.stats.data_records, 3);
    assert_eq!(bytewise.stats.resyncs, 2);
    assert_eq!(bytewise.stats.skipped_bytes, 4);
    assert_eq!(
        bytewise.orphans,
        vec![Finding {
            origin: RECORD_ORIGIN,
            offset: hidden
        }]
    );

    assert_eq!(aligned.stats.data_records, 2);
    assert_eq!(aligned.stats.resyncs, 1);
    assert_eq!(aligned.stats.skipped_bytes, 24);
    assert!(aligned.is_consistent());
}

#[test]
fn truncated_record_keeps_earlier_findings() {
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    let orphan = raw.data(b"b", b"2", 0, 0);
    let full = hdbkit::format::record::encode_data_record(&raw.geometry, 0, 0, 0, b"t", &[7u8; 100], 0).unwrap();
    let t = raw.garbage(&full[..20]);
    raw.set_bucket(0, a);
    raw.set_bucket(2, t);

    let report = check(&open(&raw), byte_by_byte());
    assert_eq!(report.truncated_at, Some(t));
    assert_eq!(report.stats.data_records, 2);
    assert_eq!(report.dangling, vec![Finding { origin: 2, offset: t }]);
    assert_eq!(
        report.orphans,
        vec![Finding {
            origin: RECORD_ORIGIN,
            offset: orphan
        }]
    );
    assert!(!report.is_consistent());
}

// ---------------------------------------------------------------------------
// Tests: files and headers
// ---------------------------------------------------------------------------

#[test]
fn findings_dump_to_csv() {
    let dir = TempDir::new().unwrap();
    let mut raw = RawDb::new(4, 3, 0);
    let a = raw.data(b"a", b"1", 0, 0);
    let orphan = raw.data(b"b", b"2", 0, 0);
    raw.set_bucket(1, a + 512);
    let path = raw.write(dir.path(), "dump.tch");

    let report = check(&HashDbFile::open(&path).unwrap(), byte_by_byte());
    let offsets_csv = dir.path().join("offsets.csv");
    let records_csv = dir.path().join("records.csv");
    assert!(dump_findings(&report.dangling, &offsets_csv).unwrap());
    assert!(dump_findings(&report.orphans, &records_csv).unwrap());

    assert_eq!(std::fs::read_to_string(&offsets_csv).unwrap(), format!("1,{}\n", a + 512));
    assert_eq!(
        std::fs::read_to_string(&records_csv).unwrap(),
        format!("-1,{a}\n-1,{orphan}\n")
    );
}

#[test]
fn unreadable_headers_abort() {
    let dir = TempDir::new().unwrap();
    let short = dir.path().join("short.tch");
    std::fs::write(&short, b"ToKyO CaBiNeT\n").unwrap();
    assert!(matches!(HashDbFile::open(&short), Err(HdbError::UnreadableHeader(_))));

    let mut raw = RawDb::new(4, 3, 0);
    raw.data(b"a", b"1", 0, 0);
    let mut bytes = raw.bytes();
    bytes[32] = 1;
    assert!(matches!(HashDbFile::from_bytes(bytes), Err(HdbError::UnreadableHeader(_))));

    assert!(matches!(
        HashDbFile::open(&dir.path().join("missing.tch")),
        Err(HdbError::Io(_))
    ));
}
